use ::fjall::{
    Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode, UserKey, UserValue,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::store_path;
use crate::error::{Error, Result};
use crate::storage::batch::{Batch, BatchOp, BatchWriter, BufferedBatch};
use crate::storage::iter::{Direction, KeyRange, RecordSource};
use crate::storage::registry::{BackendType, Registry};
use crate::storage::store::{validate_key, validate_value, Store};

/// Every store lives in a single partition of its own keyspace.
const PARTITION: &str = "kv";

pub(crate) fn register(registry: &Registry) {
    registry.register(BackendType::FJALL, open);
}

fn open(name: &str, dir: &Path) -> Result<Box<dyn Store>> {
    Ok(Box::new(FjallStore::open(store_path(dir, name))?))
}

struct Handles {
    keyspace: Keyspace,
    partition: PartitionHandle,
}

struct Shared {
    // `None` once the store is closed
    handles: RwLock<Option<Handles>>,
}

impl Shared {
    fn with_handles<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Handles) -> ::fjall::Result<T>,
    ) -> Result<T> {
        let handles = self.handles.read();
        let handles = handles.as_ref().ok_or(Error::StoreClosed)?;
        f(handles).map_err(|e| Error::engine(BackendType::FJALL, op, e))
    }
}

impl BatchWriter for Shared {
    fn write_ops(&self, ops: &[BatchOp], sync: bool) -> Result<()> {
        self.with_handles("write batch", |handles| {
            let mut batch = handles.keyspace.batch();
            for op in ops {
                match op {
                    BatchOp::Set { key, value } => {
                        batch.insert(&handles.partition, key.as_slice(), value.as_slice())
                    }
                    BatchOp::Delete { key } => batch.remove(&handles.partition, key.as_slice()),
                }
            }
            batch.commit()?;

            if sync {
                handles.keyspace.persist(PersistMode::SyncAll)?;
            }
            Ok(())
        })
    }
}

/// A store backed by a fjall LSM-tree keyspace.
///
/// Plain writes go to the journal buffer and are persisted by fjall in the background; sync
/// writes persist the journal with `SyncAll` before returning. Iterators read the partition
/// lazily and may observe writes made after they were created.
pub struct FjallStore {
    shared: Arc<Shared>,
}

impl FjallStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let handles = Config::new(path)
            .open()
            .and_then(|keyspace| {
                let partition =
                    keyspace.open_partition(PARTITION, PartitionCreateOptions::default())?;
                Ok(Handles {
                    keyspace,
                    partition,
                })
            })
            .map_err(|e| Error::engine(BackendType::FJALL, "open", e))?;
        log::debug!("opened fjall keyspace {}", path.display());

        Ok(Self {
            shared: Arc::new(Shared {
                handles: RwLock::new(Some(handles)),
            }),
        })
    }

    fn write(
        &self,
        op: &'static str,
        sync: bool,
        f: impl FnOnce(&Handles) -> ::fjall::Result<()>,
    ) -> Result<()> {
        self.shared.with_handles(op, |handles| {
            f(handles)?;
            if sync {
                handles.keyspace.persist(PersistMode::SyncAll)?;
            }
            Ok(())
        })
    }
}

fn to_record(item: ::fjall::Result<(UserKey, UserValue)>) -> Result<(Vec<u8>, Vec<u8>)> {
    item.map(|(key, value)| (key.to_vec(), value.to_vec()))
        .map_err(|e| Error::engine(BackendType::FJALL, "iterate", e))
}

impl Store for FjallStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        self.shared.with_handles("get", |handles| {
            Ok(handles.partition.get(key)?.map(|value| value.to_vec()))
        })
    }

    fn set(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        validate_key(key)?;
        let value = validate_value(value)?;
        self.write("set", false, |handles| handles.partition.insert(key, value))
    }

    fn set_sync(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        validate_key(key)?;
        let value = validate_value(value)?;
        self.write("set_sync", true, |handles| handles.partition.insert(key, value))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.write("delete", false, |handles| handles.partition.remove(key))
    }

    fn delete_sync(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.write("delete_sync", true, |handles| handles.partition.remove(key))
    }

    fn scan(&self, range: &KeyRange, direction: Direction) -> Result<RecordSource> {
        self.shared.with_handles("scan", |handles| {
            if range.is_empty() {
                return Ok(Box::new(std::iter::empty()) as RecordSource);
            }

            let iter = handles.partition.range(range.to_owned_bounds());
            Ok(match direction {
                Direction::Forward => Box::new(iter.map(to_record)) as RecordSource,
                Direction::Reverse => Box::new(iter.rev().map(to_record)),
            })
        })
    }

    fn new_batch(&self) -> Result<Box<dyn Batch>> {
        if self.shared.handles.read().is_none() {
            return Err(Error::StoreClosed);
        }
        Ok(Box::new(BufferedBatch::new(Arc::clone(&self.shared))))
    }

    fn close(&self) -> Result<()> {
        let handles = self.shared.handles.write().take().ok_or(Error::StoreClosed)?;
        handles
            .keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| Error::engine(BackendType::FJALL, "close", e))?;
        log::debug!("closed fjall keyspace");
        Ok(())
    }

    fn stats(&self) -> HashMap<String, String> {
        let mut stats = HashMap::new();
        if let Some(handles) = self.shared.handles.read().as_ref() {
            stats.insert(
                "fjall.disk_space".to_string(),
                handles.keyspace.disk_space().to_string(),
            );
            stats.insert(
                "fjall.partition_count".to_string(),
                handles.keyspace.partition_count().to_string(),
            );
            stats.insert(
                "fjall.approximate_len".to_string(),
                handles.partition.approximate_len().to_string(),
            );
        }
        stats
    }
}
