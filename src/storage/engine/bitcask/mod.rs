//! Loosely implemented based on the BitCask paper: <https://riak.com/assets/bitcask-intro.pdf>
//!
//! All writes are appended to a single log file. Every write, whether a single set/delete or a
//! whole batch, is one frame, and a frame is only applied on recovery if it was written out
//! completely, which is what makes batches atomic across a crash.
//!
//! +------------------------------------------------------------------------------+
//! |                                BITCASK FILE                                  |
//! +------------------------------------------------------------------------------+
//! | Payload length (4 bytes)       | Entry count (4 bytes)                       |
//! +------------------------------------------------------------------------------+
//! |                                 LOG ENTRIES                                  |
//! +------------+------------+------------+------------------+--------------------+
//! | Kind       | Key Size   | Value Size | Key              | Value              |
//! | (1 byte)   | (4 bytes)  | (4 bytes)  | (variable size)  | (variable size)    |
//! +------------+------------+------------+------------------+--------------------+
//! | ...        | ...        | ...        | ...              | ...                |
//! +------------+------------+------------+------------------+--------------------+
//! | Payload length (4 bytes)       | Entry count (4 bytes)                       |
//! +------------------------------------------------------------------------------+
//! | ...                                                                          |
//! +------------------------------------------------------------------------------+
//!
//! The keydir keeps every live key in memory together with the location of its latest value.
//! Values are read back from the file on demand. The log is never compacted, so a location stays
//! readable for the lifetime of the store; iterators rely on this to read a consistent snapshot.

mod iter;

use memmap2::MmapOptions;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use self::iter::Iter;
use super::store_path;
use crate::error::{Error, Result};
use crate::storage::batch::{Batch, BatchOp, BatchWriter, BufferedBatch};
use crate::storage::iter::{Direction, KeyRange, RecordSource};
use crate::storage::registry::{BackendType, Registry};
use crate::storage::store::{validate_key, validate_value, Store};

/// The file extension for the data files.
const FILE_EXT: &str = "cask";
const DATA_FILE: &str = "0";

const PUT: u8 = 0x01;
/// Marks a deleted key.
const TOMBSTONE: u8 = 0xFF;

const FRAME_HEADER: usize = 4 + 4;
const ENTRY_HEADER: usize = 1 + 4 + 4;

pub(crate) fn register(registry: &Registry) {
    registry.register(BackendType::BITCASK, open);
}

fn open(name: &str, dir: &Path) -> Result<Box<dyn Store>> {
    Ok(Box::new(BitCask::open(store_path(dir, name))?))
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("entry of {0} bytes is too large for the log format")]
    TooLarge(usize),

    #[error("log has a partially written frame that could not be rolled back")]
    Poisoned,
}

type Key = Vec<u8>;

/// Represents the location of a value in the file.
#[derive(Debug, Clone, Copy)]
struct ValueLocation {
    /// Offset in the file
    offset: u64,
    /// Size of the value
    size: u32,
}

/// An index of keys to their value's locations in the file.
type KeyDir = BTreeMap<Key, ValueLocation>;

enum Entry<'a> {
    Put(&'a [u8], &'a [u8]),
    Tombstone(&'a [u8]),
}

impl<'a> From<&'a BatchOp> for Entry<'a> {
    fn from(op: &'a BatchOp) -> Self {
        match op {
            BatchOp::Set { key, value } => Entry::Put(key, value),
            BatchOp::Delete { key } => Entry::Tombstone(key),
        }
    }
}

#[derive(Debug)]
struct DataFile {
    /// The key dir which maps the active keys to their value's locations in the file.
    keydir: KeyDir,
    file: fs::File,
    /// Length of the valid prefix of the file, where the next frame goes.
    len: u64,
    path: PathBuf,
    /// Set when a failed append left bytes past `len`. Appends are refused from then on; reopening
    /// the store truncates the torn frame.
    poisoned: bool,
}

impl DataFile {
    fn open(root: &Path) -> Result<Self, LogError> {
        fs::create_dir_all(root)?;
        let path = root.join(DATA_FILE).with_extension(FILE_EXT);
        let file = fs::OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let (keydir, len) = build_keydir(&file)?;

        let file_len = file.metadata()?.len();
        if len < file_len {
            log::warn!(
                "discarding {} bytes of incomplete writes at the end of {}",
                file_len - len,
                path.display()
            );
            file.set_len(len)?;
            file.sync_all()?;
        }

        Ok(Self {
            keydir,
            file,
            len,
            path,
            poisoned: false,
        })
    }

    fn read(&mut self, location: ValueLocation) -> Result<Vec<u8>, LogError> {
        let mut buffer = vec![0; location.size as usize];
        self.file.seek(SeekFrom::Start(location.offset))?;
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, entries: &[Entry<'_>], sync: bool) -> Result<(), LogError> {
        if self.poisoned {
            return Err(LogError::Poisoned);
        }
        let start = self.len;
        let (frame, value_offsets) = encode_frame(entries)?;

        let written = self.file.write_all(&frame).and_then(|()| {
            if sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // cut off whatever part of the frame reached the file so the next one starts clean
            if let Err(e) = self.file.set_len(start) {
                log::error!("failed to truncate {}: {e}", self.path.display());
                self.poisoned = true;
            }
            return Err(e.into());
        }
        self.len += frame.len() as u64;

        for (entry, value_offset) in entries.iter().zip(value_offsets) {
            match entry {
                Entry::Put(key, value) => {
                    let location = ValueLocation {
                        offset: start + value_offset,
                        size: value.len() as u32,
                    };
                    self.keydir.insert(key.to_vec(), location);
                }
                Entry::Tombstone(key) => {
                    self.keydir.remove(*key);
                }
            }
        }

        Ok(())
    }
}

/// Encodes `entries` as one frame. Also returns, per entry, the offset of its value relative to
/// the start of the frame.
fn encode_frame(entries: &[Entry<'_>]) -> Result<(Vec<u8>, Vec<u64>), LogError> {
    let mut buffer = vec![0u8; FRAME_HEADER];
    let mut value_offsets = Vec::with_capacity(entries.len());

    for entry in entries {
        let (kind, key, value): (u8, &[u8], &[u8]) = match *entry {
            Entry::Put(key, value) => (PUT, key, value),
            Entry::Tombstone(key) => (TOMBSTONE, key, &[][..]),
        };
        buffer.push(kind);
        buffer.extend(encode_len(key.len())?);
        buffer.extend(encode_len(value.len())?);
        buffer.extend_from_slice(key);
        value_offsets.push(buffer.len() as u64);
        buffer.extend_from_slice(value);
    }

    let payload_len = encode_len(buffer.len() - FRAME_HEADER)?;
    let count = encode_len(entries.len())?;
    buffer[..4].copy_from_slice(&payload_len);
    buffer[4..FRAME_HEADER].copy_from_slice(&count);

    Ok((buffer, value_offsets))
}

fn encode_len(len: usize) -> Result<[u8; 4], LogError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| LogError::TooLarge(len))
}

fn read_u32(buffer: &[u8], at: usize) -> Option<u32> {
    let bytes = buffer.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

/// Replays every complete frame of the log. Returns the keydir and the length of the valid
/// prefix; anything after it is a torn write.
fn build_keydir(file: &fs::File) -> Result<(KeyDir, u64), LogError> {
    let mut keydir = KeyDir::new();
    if file.metadata()?.len() == 0 {
        return Ok((keydir, 0));
    }

    // SAFETY: the file is exclusively owned by this store and is not written to while mapped.
    let mmapped = unsafe { MmapOptions::new().map(file)? };

    let mut position = 0;
    while let Some(frame_end) = replay_frame(&mmapped, position, &mut keydir) {
        position = frame_end;
    }

    Ok((keydir, position as u64))
}

/// Applies the frame starting at `position` to `keydir` and returns where it ends, or `None` if
/// there is no complete frame there. A frame is applied all or nothing.
fn replay_frame(buffer: &[u8], position: usize, keydir: &mut KeyDir) -> Option<usize> {
    let payload_len = read_u32(buffer, position)? as usize;
    let count = read_u32(buffer, position + 4)?;
    let payload_start = position + FRAME_HEADER;
    let frame_end = payload_start.checked_add(payload_len)?;
    let payload = buffer.get(payload_start..frame_end)?;

    let mut parsed = Vec::with_capacity((count as usize).min(payload.len() / ENTRY_HEADER));
    let mut cursor = 0;
    for _ in 0..count {
        let kind = *payload.get(cursor)?;
        let key_size = read_u32(payload, cursor + 1)? as usize;
        let value_size = read_u32(payload, cursor + 5)?;
        let key_start = cursor + ENTRY_HEADER;
        let value_start = key_start.checked_add(key_size)?;
        let key = payload.get(key_start..value_start)?;
        cursor = value_start.checked_add(value_size as usize)?;
        if cursor > payload.len() {
            return None;
        }

        let location = ValueLocation {
            offset: (payload_start + value_start) as u64,
            size: value_size,
        };
        match kind {
            PUT => parsed.push((key, Some(location))),
            TOMBSTONE => parsed.push((key, None)),
            _ => return None,
        }
    }
    if cursor != payload.len() {
        return None;
    }

    for (key, location) in parsed {
        match location {
            Some(location) => {
                keydir.insert(key.to_vec(), location);
            }
            None => {
                keydir.remove(key);
            }
        }
    }

    Some(frame_end)
}

#[derive(Debug)]
struct Shared {
    // `None` once the store is closed
    data: Mutex<Option<DataFile>>,
}

impl Shared {
    fn with_data<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut DataFile) -> Result<T, LogError>,
    ) -> Result<T> {
        let mut data = self.data.lock();
        let data = data.as_mut().ok_or(Error::StoreClosed)?;
        f(data).map_err(|e| Error::engine(BackendType::BITCASK, op, e))
    }

    fn read(&self, location: ValueLocation) -> Result<Vec<u8>> {
        self.with_data("read", |data| data.read(location))
    }
}

impl BatchWriter for Shared {
    fn write_ops(&self, ops: &[BatchOp], sync: bool) -> Result<()> {
        let entries: Vec<Entry<'_>> = ops.iter().map(Entry::from).collect();
        self.with_data("write batch", |data| data.append(&entries, sync))
    }
}

/// Flush the log to disk if the store was never closed.
impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(data) = self.data.get_mut() {
            if let Err(e) = data.file.sync_all() {
                log::error!("Failed to sync {}: {:?}", data.path.display(), e);
            }
        }
    }
}

/// A store backed by an append-only log on local disk.
///
/// Iterators read a snapshot taken at creation: later writes are not visible through them.
#[derive(Debug)]
pub struct BitCask {
    shared: Arc<Shared>,
}

impl BitCask {
    /// Opens the store rooted at `path`, creating it if needed and replaying its log.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = DataFile::open(path.as_ref())
            .map_err(|e| Error::engine(BackendType::BITCASK, "open", e))?;
        log::debug!(
            "opened bitcask {} with {} keys",
            data.path.display(),
            data.keydir.len()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                data: Mutex::new(Some(data)),
            }),
        })
    }

    fn write(&self, op: &'static str, entry: Entry<'_>, sync: bool) -> Result<()> {
        self.shared
            .with_data(op, |data| data.append(&[entry], sync))
    }
}

impl Store for BitCask {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        self.shared.with_data("get", |data| match data.keydir.get(key).copied() {
            Some(location) => data.read(location).map(Some),
            None => Ok(None),
        })
    }

    fn set(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        validate_key(key)?;
        let value = validate_value(value)?;
        self.write("set", Entry::Put(key, value), false)
    }

    fn set_sync(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        validate_key(key)?;
        let value = validate_value(value)?;
        self.write("set_sync", Entry::Put(key, value), true)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.write("delete", Entry::Tombstone(key), false)
    }

    fn delete_sync(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.write("delete_sync", Entry::Tombstone(key), true)
    }

    fn scan(&self, range: &KeyRange, direction: Direction) -> Result<RecordSource> {
        let mut locations = self.shared.with_data("scan", |data| {
            if range.is_empty() {
                return Ok(Vec::new());
            }
            Ok(data
                .keydir
                .range::<[u8], _>(range.as_bounds())
                .map(|(key, location)| (key.clone(), *location))
                .collect::<Vec<_>>())
        })?;

        if direction == Direction::Reverse {
            locations.reverse();
        }
        Ok(Box::new(Iter::new(Arc::clone(&self.shared), locations)))
    }

    fn new_batch(&self) -> Result<Box<dyn Batch>> {
        if self.shared.data.lock().is_none() {
            return Err(Error::StoreClosed);
        }
        Ok(Box::new(BufferedBatch::new(Arc::clone(&self.shared))))
    }

    fn close(&self) -> Result<()> {
        let data = self.shared.data.lock().take().ok_or(Error::StoreClosed)?;
        data.file
            .sync_all()
            .map_err(|e| Error::engine(BackendType::BITCASK, "close", e))?;
        log::debug!("closed bitcask {}", data.path.display());
        Ok(())
    }

    fn stats(&self) -> HashMap<String, String> {
        let mut stats = HashMap::new();
        if let Some(data) = self.shared.data.lock().as_ref() {
            stats.insert("bitcask.keys".to_string(), data.keydir.len().to_string());
            stats.insert("bitcask.log_size".to_string(), data.len.to_string());
            stats.insert("bitcask.path".to_string(), data.path.display().to_string());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::iter::KvIterator;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    fn data_file(root: &Path) -> PathBuf {
        root.join(DATA_FILE).with_extension(FILE_EXT)
    }

    #[test]
    fn open_empty() {
        let temp_dir = tempdir().unwrap();
        let db = BitCask::open(temp_dir.path()).unwrap();

        let stats = db.stats();
        assert_eq!(stats["bitcask.keys"], "0");
        assert_eq!(stats["bitcask.log_size"], "0");
        assert!(data_file(temp_dir.path()).exists());
    }

    #[test]
    fn put() {
        let temp_dir = tempdir().unwrap();
        let db = BitCask::open(temp_dir.path()).unwrap();

        db.set(b"test_key", Some(b"test_value")).unwrap();
        assert_eq!(db.get(b"test_key").unwrap(), Some(b"test_value".to_vec()));

        db.set_sync(b"test_key", Some(b"")).unwrap();
        assert_eq!(db.get(b"test_key").unwrap(), Some(Vec::new()));

        let len = fs::metadata(data_file(temp_dir.path())).unwrap().len();
        assert!(len > 0);
    }

    #[test]
    fn delete() {
        let temp_dir = tempdir().unwrap();
        let db = BitCask::open(temp_dir.path()).unwrap();

        db.set(b"test_key", Some(b"test_value")).unwrap();
        assert!(db.get(b"test_key").unwrap().is_some());

        db.delete(b"test_key").unwrap();
        assert_eq!(db.get(b"test_key").unwrap(), None);

        // deleting a missing key still succeeds
        db.delete_sync(b"missing").unwrap();
    }

    #[test]
    fn reopen_replays_log() {
        let temp_dir = tempdir().unwrap();
        {
            let db = BitCask::open(temp_dir.path()).unwrap();
            db.set(b"key1", Some(b"value1")).unwrap();
            db.set(b"key2", Some(b"value2")).unwrap();
            db.set(b"key1", Some(b"value3")).unwrap();
            db.delete(b"key2").unwrap();
            db.close().unwrap();
        }

        let db = BitCask::open(temp_dir.path()).unwrap();
        assert_eq!(db.get(b"key1").unwrap(), Some(b"value3".to_vec()));
        assert_eq!(db.get(b"key2").unwrap(), None);
    }

    #[test]
    fn torn_tail_is_discarded() {
        let temp_dir = tempdir().unwrap();
        {
            let db = BitCask::open(temp_dir.path()).unwrap();
            db.set_sync(b"key", Some(b"value")).unwrap();
            db.close().unwrap();
        }

        let path = data_file(temp_dir.path());
        let valid_len = fs::metadata(&path).unwrap().len();
        {
            // a frame header promising more payload than was written
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_be_bytes()).unwrap();
            file.write_all(&1u32.to_be_bytes()).unwrap();
            file.write_all(&[PUT, 0, 0]).unwrap();
        }

        let db = BitCask::open(temp_dir.path()).unwrap();
        assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));
        assert_eq!(fs::metadata(&path).unwrap().len(), valid_len);

        db.set(b"other", Some(b"v")).unwrap();
        db.close().unwrap();

        let db = BitCask::open(temp_dir.path()).unwrap();
        assert_eq!(db.get(b"other").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn batch_is_one_frame() {
        let temp_dir = tempdir().unwrap();
        {
            let db = BitCask::open(temp_dir.path()).unwrap();
            db.set(b"k2", Some(b"old")).unwrap();

            let mut batch = db.new_batch().unwrap();
            batch.set(b"k1", Some(b"v1")).unwrap();
            batch.delete(b"k2").unwrap();
            batch.set(b"k1", Some(b"v2")).unwrap();
            batch.write_sync().unwrap();

            assert_eq!(db.get(b"k1").unwrap(), Some(b"v2".to_vec()));
            assert_eq!(db.get(b"k2").unwrap(), None);
            db.close().unwrap();
        }

        let path = data_file(temp_dir.path());
        let len = fs::metadata(&path).unwrap().len();
        {
            // chop the last byte off the batch frame: none of it may survive
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(len - 1).unwrap();
        }

        let db = BitCask::open(temp_dir.path()).unwrap();
        assert_eq!(db.get(b"k1").unwrap(), None);
        assert_eq!(db.get(b"k2").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn poisoned_log_refuses_appends() {
        let temp_dir = tempdir().unwrap();
        let db = BitCask::open(temp_dir.path()).unwrap();
        db.set(b"key", Some(b"value")).unwrap();

        // what a failed rollback of a partial frame leaves behind
        db.shared.data.lock().as_mut().unwrap().poisoned = true;

        let err = db.set(b"other", Some(b"v")).unwrap_err();
        assert!(matches!(err, Error::Engine { .. }));
        let mut batch = db.new_batch().unwrap();
        batch.delete(b"key").unwrap();
        assert!(matches!(batch.write(), Err(Error::Engine { .. })));
        assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));
        assert_eq!(db.get(b"other").unwrap(), None);
        db.close().unwrap();

        let db = BitCask::open(temp_dir.path()).unwrap();
        db.set(b"other", Some(b"v")).unwrap();
        assert_eq!(db.get(b"other").unwrap(), Some(b"v".to_vec()));
        assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn iterator_reads_snapshot() {
        let temp_dir = tempdir().unwrap();
        let db = BitCask::open(temp_dir.path()).unwrap();
        db.set(b"a", Some(b"1")).unwrap();
        db.set(b"b", Some(b"2")).unwrap();

        let mut iter = db.iterator(None, None).unwrap();
        db.set(b"a", Some(b"changed")).unwrap();
        db.delete(b"b").unwrap();
        db.set(b"c", Some(b"3")).unwrap();

        let mut seen = Vec::new();
        while iter.valid() {
            seen.push((iter.key().unwrap().to_vec(), iter.value().unwrap().to_vec()));
            iter.next().unwrap();
        }
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec())
            ]
        );
    }

    #[test]
    fn iterator_fails_after_store_close() {
        let temp_dir = tempdir().unwrap();
        let db = BitCask::open(temp_dir.path()).unwrap();
        db.set(b"a", Some(b"1")).unwrap();
        db.set(b"b", Some(b"2")).unwrap();

        let mut iter = db.iterator(None, None).unwrap();
        db.close().unwrap();
        assert!(matches!(iter.next(), Err(Error::StoreClosed)));
        assert!(!iter.valid());
    }

    #[test]
    fn closed_store() {
        let temp_dir = tempdir().unwrap();
        let db = BitCask::open(temp_dir.path()).unwrap();
        db.close().unwrap();

        assert!(matches!(db.get(b"k"), Err(Error::StoreClosed)));
        assert!(matches!(db.set(b"k", Some(b"v")), Err(Error::StoreClosed)));
        assert!(matches!(db.new_batch().err().unwrap(), Error::StoreClosed));
        assert!(matches!(db.close(), Err(Error::StoreClosed)));
        assert!(db.stats().is_empty());
    }
}
