use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::batch::{Batch, BatchOp, BatchWriter, BufferedBatch};
use crate::storage::iter::{Direction, KeyRange, RecordSource};
use crate::storage::registry::{BackendType, Registry};
use crate::storage::store::{validate_key, validate_value, Store};

pub(crate) fn register(registry: &Registry) {
    registry.register(BackendType::MEMDB, open);
}

fn open(_name: &str, _dir: &Path) -> Result<Box<dyn Store>> {
    Ok(Box::new(MemDb::new()))
}

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory store for testing purposes.
///
/// Iterators work on a copy of their range taken at creation, so writes made while an iterator is
/// open are never visible through it. Sync writes are the same as plain writes.
#[derive(Debug)]
pub struct MemDb {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    // `None` once the store is closed
    data: RwLock<Option<Map>>,
}

impl MemDb {
    pub fn new() -> Self {
        MemDb {
            inner: Arc::new(Inner {
                data: RwLock::new(Some(BTreeMap::new())),
            }),
        }
    }
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn set(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        validate_key(key)?;
        let value = validate_value(value)?;
        let mut data = self.data.write();
        let data = data.as_mut().ok_or(Error::StoreClosed)?;
        data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        let mut data = self.data.write();
        let data = data.as_mut().ok_or(Error::StoreClosed)?;
        data.remove(key);
        Ok(())
    }
}

impl BatchWriter for Inner {
    fn write_ops(&self, ops: &[BatchOp], _sync: bool) -> Result<()> {
        // a single write lock for the whole batch keeps it atomic to readers
        let mut data = self.data.write();
        let data = data.as_mut().ok_or(Error::StoreClosed)?;
        for op in ops {
            match op {
                BatchOp::Set { key, value } => {
                    data.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    data.remove(key);
                }
            }
        }
        Ok(())
    }
}

impl Store for MemDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let data = self.inner.data.read();
        let data = data.as_ref().ok_or(Error::StoreClosed)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.inner.set(key, value)
    }

    fn set_sync(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.inner.set(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }

    fn delete_sync(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }

    fn scan(&self, range: &KeyRange, direction: Direction) -> Result<RecordSource> {
        let data = self.inner.data.read();
        let data = data.as_ref().ok_or(Error::StoreClosed)?;
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }

        let records = data
            .range::<[u8], _>(range.as_bounds())
            .map(|(k, v)| Ok((k.clone(), v.clone())));
        let snapshot: Vec<Result<(Vec<u8>, Vec<u8>)>> = match direction {
            Direction::Forward => records.collect(),
            Direction::Reverse => records.rev().collect(),
        };
        Ok(Box::new(snapshot.into_iter()))
    }

    fn new_batch(&self) -> Result<Box<dyn Batch>> {
        if self.inner.data.read().is_none() {
            return Err(Error::StoreClosed);
        }
        Ok(Box::new(BufferedBatch::new(Arc::clone(&self.inner))))
    }

    fn close(&self) -> Result<()> {
        match self.inner.data.write().take() {
            Some(_) => {
                log::debug!("closed memdb store");
                Ok(())
            }
            None => Err(Error::StoreClosed),
        }
    }

    fn stats(&self) -> HashMap<String, String> {
        let mut stats = HashMap::new();
        stats.insert("database.type".to_string(), "memDB".to_string());
        if let Some(data) = self.inner.data.read().as_ref() {
            stats.insert("database.size".to_string(), data.len().to_string());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::iter::KvIterator;

    fn keys(store: &MemDb, start: Option<&[u8]>, end: Option<&[u8]>, reverse: bool) -> Vec<Vec<u8>> {
        let mut iter = if reverse {
            store.reverse_iterator(start, end).unwrap()
        } else {
            store.iterator(start, end).unwrap()
        };
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().unwrap().to_vec());
            iter.next().unwrap();
        }
        iter.close().unwrap();
        keys
    }

    #[test]
    fn set_get_delete() {
        let db = MemDb::new();
        db.set(b"test_key", Some(b"test_value")).unwrap();
        assert_eq!(db.get(b"test_key").unwrap(), Some(b"test_value".to_vec()));

        db.delete(b"test_key").unwrap();
        assert_eq!(db.get(b"test_key").unwrap(), None);
        // deleting again is fine
        db.delete_sync(b"test_key").unwrap();
    }

    #[test]
    fn iterator_snapshot_ignores_later_writes() {
        let db = MemDb::new();
        db.set(b"a", Some(b"1")).unwrap();
        db.set(b"c", Some(b"3")).unwrap();

        let mut iter = db.iterator(None, None).unwrap();
        db.set(b"b", Some(b"2")).unwrap();
        db.delete(b"c").unwrap();

        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(iter.key().unwrap().to_vec());
            iter.next().unwrap();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn inverted_range_is_empty() {
        let db = MemDb::new();
        db.set(b"a", Some(b"1")).unwrap();
        assert!(keys(&db, Some(b"c"), Some(b"a"), false).is_empty());
        assert!(keys(&db, Some(b"a"), Some(b"a"), true).is_empty());
    }

    #[test]
    fn reverse_respects_bounds() {
        let db = MemDb::new();
        for key in [b"a", b"b", b"c", b"d"] {
            db.set(key, Some(b"")).unwrap();
        }
        assert_eq!(
            keys(&db, Some(b"b"), Some(b"d"), true),
            vec![b"c".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn closed_store_rejects_everything() {
        let db = MemDb::new();
        db.set(b"k", Some(b"v")).unwrap();
        db.close().unwrap();

        assert!(matches!(db.get(b"k"), Err(Error::StoreClosed)));
        assert!(matches!(db.set(b"k", Some(b"v")), Err(Error::StoreClosed)));
        assert!(matches!(db.delete(b"k"), Err(Error::StoreClosed)));
        assert!(matches!(db.iterator(None, None).err().unwrap(), Error::StoreClosed));
        assert!(matches!(db.new_batch().err().unwrap(), Error::StoreClosed));
        assert!(matches!(db.close(), Err(Error::StoreClosed)));
        assert_eq!(db.stats().get("database.size"), None);
    }

    #[test]
    fn stats_report_size() {
        let db = MemDb::new();
        db.set(b"k", Some(b"v")).unwrap();
        let stats = db.stats();
        assert_eq!(stats["database.type"], "memDB");
        assert_eq!(stats["database.size"], "1");
    }
}
