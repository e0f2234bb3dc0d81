use std::collections::HashMap;
use std::fmt;

use super::batch::Batch;
use super::iter::{Direction, KeyRange, KvIterator, RangeIter, RecordSource};
use crate::error::{Error, Result};

/// Rejects empty keys. Every operation addressing a single record goes through this first.
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey);
    }
    Ok(())
}

/// Rejects the nil value. An empty slice is a valid value.
pub fn validate_value(value: Option<&[u8]>) -> Result<&[u8]> {
    value.ok_or(Error::InvalidValue)
}

/// The contract every storage backend implements.
///
/// Point operations take `&self` and are safe to call from multiple threads at once. A missing
/// key is never an error: [`get`](Store::get) returns `Ok(None)`.
///
/// Writes take the value as `Option<&[u8]>`. `None` is the nil value and is rejected with
/// [`Error::InvalidValue`]; use `Some(&[])` to store an empty value.
pub trait Store: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn set(&self, key: &[u8], value: Option<&[u8]>) -> Result<()>;

    /// Like [`set`](Store::set), but the write is on stable storage before this returns.
    fn set_sync(&self, key: &[u8], value: Option<&[u8]>) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    fn delete_sync(&self, key: &[u8]) -> Result<()>;

    /// Produces the records in `range` ordered by `direction`. Callers go through
    /// [`iterator`](Store::iterator) and [`reverse_iterator`](Store::reverse_iterator), which
    /// validate the bounds and wrap the source in the shared cursor.
    fn scan(&self, range: &KeyRange, direction: Direction) -> Result<RecordSource>;

    /// Returns a cursor over `[start, end)` in ascending key order. `None` leaves that side
    /// unbounded, an empty bound is rejected with [`Error::InvalidKey`].
    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Box<dyn KvIterator>> {
        let range = KeyRange::new(start, end)?;
        let source = self.scan(&range, Direction::Forward)?;
        Ok(Box::new(RangeIter::new(source, range)?))
    }

    /// Same range semantics as [`iterator`](Store::iterator), in descending key order.
    fn reverse_iterator(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Box<dyn KvIterator>> {
        let range = KeyRange::new(start, end)?;
        let source = self.scan(&range, Direction::Reverse)?;
        Ok(Box::new(RangeIter::new(source, range)?))
    }

    fn new_batch(&self) -> Result<Box<dyn Batch>>;

    /// Releases every engine resource. Any further operation fails with [`Error::StoreClosed`].
    fn close(&self) -> Result<()>;

    /// Backend-defined diagnostic counters. Never fails; an unavailable counter is omitted.
    fn stats(&self) -> HashMap<String, String>;

    /// Dumps the stats and every record to stdout. Failures are logged, not returned.
    fn print(&self) {
        let mut stats: Vec<_> = self.stats().into_iter().collect();
        stats.sort();
        for (key, value) in stats {
            println!("{key}: {value}");
        }

        let mut iter = match self.iterator(None, None) {
            Ok(iter) => iter,
            Err(e) => {
                log::warn!("failed to print store: {e}");
                return;
            }
        };

        while iter.valid() {
            if let (Ok(key), Ok(value)) = (iter.key(), iter.value()) {
                println!("[{}]:\t[{}]", Hex(key), Hex(value));
            }
            if let Err(e) = iter.next() {
                log::warn!("failed to print store: {e}");
                break;
            }
        }

        let _ = iter.close();
    }
}

/// Upper-case hex rendering of raw bytes.
pub(crate) struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}
