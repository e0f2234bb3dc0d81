use std::sync::Arc;

use super::Key;
use super::Shared;
use super::ValueLocation;
use crate::error::Result;

/// Walks a snapshot of keydir entries, reading each value from the log as it goes.
pub(super) struct Iter {
    inner: std::vec::IntoIter<(Key, ValueLocation)>,
    shared: Arc<Shared>,
}

impl Iter {
    pub(super) fn new(shared: Arc<Shared>, locations: Vec<(Key, ValueLocation)>) -> Self {
        let inner = locations.into_iter();
        Self { inner, shared }
    }
}

impl std::iter::Iterator for Iter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, location) = self.inner.next()?;
        Some(self.shared.read(location).map(|value| (key, value)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::engine::bitcask::BitCask;
    use crate::storage::iter::KvIterator;
    use crate::storage::store::Store;
    use tempfile::tempdir;

    fn collect(iter: &mut dyn KvIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut records = Vec::new();
        while iter.valid() {
            records.push((iter.key().unwrap().to_vec(), iter.value().unwrap().to_vec()));
            iter.next().unwrap();
        }
        records
    }

    #[test]
    fn iter_keys() {
        let temp_dir = tempdir().unwrap();
        let db = BitCask::open(temp_dir.path()).unwrap();

        let keys = vec![b"key3".to_vec(), b"key1".to_vec(), b"key2".to_vec()];
        for key in &keys {
            db.set(key, Some(b"value")).unwrap();
        }

        let mut iter = db.iterator(None, None).unwrap();
        let iter_keys: Vec<Vec<u8>> = collect(iter.as_mut()).into_iter().map(|(k, _)| k).collect();

        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(iter_keys, expected);
    }

    #[test]
    fn iter_values_reverse() {
        let temp_dir = tempdir().unwrap();
        let db = BitCask::open(temp_dir.path()).unwrap();

        let keys = vec![b"key1".to_vec(), b"key2".to_vec(), b"key3".to_vec()];
        let values = vec![b"value1".to_vec(), b"value2".to_vec(), b"value3".to_vec()];

        for (key, value) in keys.iter().zip(values.iter()) {
            db.set(key, Some(value.as_slice())).unwrap();
        }

        let mut iter = db.reverse_iterator(Some(b"key2"), None).unwrap();
        let iter_values: Vec<Vec<u8>> =
            collect(iter.as_mut()).into_iter().map(|(_, v)| v).collect();

        assert_eq!(iter_values, vec![b"value3".to_vec(), b"value2".to_vec()]);
    }
}
