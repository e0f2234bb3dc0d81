use ::sled::{Db, IVec};
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

pub(crate) fn register(registry: &Registry) {
    registry.register(BackendType::SLED, open);
}

fn open(name: &str, dir: &Path) -> Result<Box<dyn Store>> {
    Ok(Box::new(SledStore::open(store_path(dir, name))?))
}

struct Shared {
    // `None` once the store is closed
    db: RwLock<Option<Db>>,
}

impl Shared {
    fn with_db<T>(&self, op: &'static str, f: impl FnOnce(&Db) -> ::sled::Result<T>) -> Result<T> {
        let db = self.db.read();
        let db = db.as_ref().ok_or(Error::StoreClosed)?;
        f(db).map_err(|e| Error::engine(BackendType::SLED, op, e))
    }
}

impl BatchWriter for Shared {
    fn write_ops(&self, ops: &[BatchOp], sync: bool) -> Result<()> {
        let mut batch = ::sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Set { key, value } => batch.insert(key.as_slice(), value.as_slice()),
                BatchOp::Delete { key } => batch.remove(key.as_slice()),
            }
        }

        self.with_db("write batch", |db| {
            db.apply_batch(batch)?;
            if sync {
                db.flush()?;
            }
            Ok(())
        })
    }
}

/// A store backed by a sled database.
///
/// Sync writes flush sled's write buffers before returning. Iterators read the tree lazily and
/// may observe writes made after they were created.
pub struct SledStore {
    shared: Arc<Shared>,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = ::sled::open(path).map_err(|e| Error::engine(BackendType::SLED, "open", e))?;
        log::debug!(
            "opened sled database {} (recovered: {})",
            path.display(),
            db.was_recovered()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                db: RwLock::new(Some(db)),
            }),
        })
    }

    fn write(
        &self,
        op: &'static str,
        sync: bool,
        f: impl FnOnce(&Db) -> ::sled::Result<Option<IVec>>,
    ) -> Result<()> {
        self.shared.with_db(op, |db| {
            f(db)?;
            if sync {
                db.flush()?;
            }
            Ok(())
        })
    }
}

fn to_record(item: ::sled::Result<(IVec, IVec)>) -> Result<(Vec<u8>, Vec<u8>)> {
    item.map(|(key, value)| (key.to_vec(), value.to_vec()))
        .map_err(|e| Error::engine(BackendType::SLED, "iterate", e))
}

impl Store for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        self.shared
            .with_db("get", |db| Ok(db.get(key)?.map(|value| value.to_vec())))
    }

    fn set(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        validate_key(key)?;
        let value = validate_value(value)?;
        self.write("set", false, |db| db.insert(key, value))
    }

    fn set_sync(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        validate_key(key)?;
        let value = validate_value(value)?;
        self.write("set_sync", true, |db| db.insert(key, value))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.write("delete", false, |db| db.remove(key))
    }

    fn delete_sync(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.write("delete_sync", true, |db| db.remove(key))
    }

    fn scan(&self, range: &KeyRange, direction: Direction) -> Result<RecordSource> {
        self.shared.with_db("scan", |db| {
            if range.is_empty() {
                return Ok(Box::new(std::iter::empty()) as RecordSource);
            }

            let iter = db.range(range.to_owned_bounds());
            Ok(match direction {
                Direction::Forward => Box::new(iter.map(to_record)) as RecordSource,
                Direction::Reverse => Box::new(iter.rev().map(to_record)),
            })
        })
    }

    fn new_batch(&self) -> Result<Box<dyn Batch>> {
        if self.shared.db.read().is_none() {
            return Err(Error::StoreClosed);
        }
        Ok(Box::new(BufferedBatch::new(Arc::clone(&self.shared))))
    }

    fn close(&self) -> Result<()> {
        let db = self.shared.db.write().take().ok_or(Error::StoreClosed)?;
        db.flush()
            .map_err(|e| Error::engine(BackendType::SLED, "close", e))?;
        log::debug!("closed sled database");
        Ok(())
    }

    fn stats(&self) -> HashMap<String, String> {
        let mut stats = HashMap::new();
        if let Some(db) = self.shared.db.read().as_ref() {
            stats.insert("sled.len".to_string(), db.len().to_string());
            stats.insert(
                "sled.was_recovered".to_string(),
                db.was_recovered().to_string(),
            );
            match db.size_on_disk() {
                Ok(size) => {
                    stats.insert("sled.size_on_disk".to_string(), size.to_string());
                }
                Err(e) => log::warn!("failed to read sled size on disk: {e}"),
            }
        }
        stats
    }
}
