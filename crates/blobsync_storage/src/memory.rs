//! In-memory key/value backend.

use crate::backend::KvBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key/value backend.
///
/// This backend stores all data in a process-local map and is suitable
/// for:
/// - Unit and integration tests
/// - Single-process deployments that accept losing state on restart
///
/// Transactionality falls out of holding the map's write lock for the
/// duration of each mutating call.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use blobsync_storage::{KvBackend, MemoryBackend};
///
/// let backend = MemoryBackend::new();
/// backend.put_many(&[("a".into(), vec![1]), ("b".into(), vec![2])]).unwrap();
/// assert_eq!(backend.get("a").unwrap(), Some(vec![1]));
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the backend holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Removes every key. Useful between test cases.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Option<Vec<u8>>>> {
        let data = self.data.read();
        Ok(keys.iter().map(|k| data.get(k).cloned()).collect())
    }

    fn put_many(&self, pairs: &[(String, Vec<u8>)]) -> StorageResult<()> {
        let mut data = self.data.write();
        for (key, value) in pairs {
            data.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        let mut data = self.data.write();
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    fn rename_many(&self, pairs: &[(String, String)]) -> StorageResult<()> {
        let mut data = self.data.write();

        // Validate every source before touching anything so a failed
        // transaction leaves the map unchanged.
        for (from, _) in pairs {
            if !data.contains_key(from) {
                return Err(StorageError::MissingKey(from.clone()));
            }
        }

        for (from, to) in pairs {
            if let Some(value) = data.remove(from) {
                data.insert(to.clone(), value);
            }
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_is_empty() {
        let backend = MemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.get("missing").unwrap(), None);
    }

    #[test]
    fn put_and_get_many() {
        let backend = MemoryBackend::new();
        backend
            .put_many(&[("a".into(), vec![1]), ("b".into(), vec![2])])
            .unwrap();

        let values = backend
            .get_many(&["a".into(), "missing".into(), "b".into()])
            .unwrap();
        assert_eq!(values, vec![Some(vec![1]), None, Some(vec![2])]);
    }

    #[test]
    fn delete_many_ignores_absent_keys() {
        let backend = MemoryBackend::new();
        backend.put_many(&[("a".into(), vec![1])]).unwrap();
        backend.delete_many(&["a".into(), "ghost".into()]).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn rename_moves_and_overwrites() {
        let backend = MemoryBackend::new();
        backend
            .put_many(&[("src".into(), vec![1]), ("dst".into(), vec![9])])
            .unwrap();

        backend.rename_many(&[("src".into(), "dst".into())]).unwrap();

        assert_eq!(backend.get("src").unwrap(), None);
        assert_eq!(backend.get("dst").unwrap(), Some(vec![1]));
    }

    #[test]
    fn rename_missing_source_changes_nothing() {
        let backend = MemoryBackend::new();
        backend.put_many(&[("a".into(), vec![1])]).unwrap();

        let result = backend.rename_many(&[
            ("a".into(), "b".into()),
            ("ghost".into(), "c".into()),
        ]);
        assert!(matches!(result, Err(StorageError::MissingKey(_))));

        // the valid pair must not have been applied either
        assert_eq!(backend.get("a").unwrap(), Some(vec![1]));
        assert_eq!(backend.get("b").unwrap(), None);
    }

    proptest! {
        #[test]
        fn prefix_scan_matches_naive_filter(
            keys in proptest::collection::hash_set("[a-c]{1,5}", 0..30),
            prefix in "[a-c]{0,2}",
        ) {
            let backend = MemoryBackend::new();
            let pairs: Vec<(String, Vec<u8>)> =
                keys.iter().map(|k| (k.clone(), vec![0])).collect();
            backend.put_many(&pairs).unwrap();

            let mut scanned = backend.keys_with_prefix(&prefix).unwrap();
            scanned.sort();
            let mut expected: Vec<String> = keys
                .iter()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            expected.sort();
            prop_assert_eq!(scanned, expected);
        }
    }

    #[test]
    fn keys_with_prefix_scans_range() {
        let backend = MemoryBackend::new();
        backend
            .put_many(&[
                ("blob/temp/x:data".into(), vec![1]),
                ("blob/temp/x:uuid".into(), vec![2]),
                ("blob/main/y:data".into(), vec![3]),
            ])
            .unwrap();

        let mut keys = backend.keys_with_prefix("blob/temp/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["blob/temp/x:data", "blob/temp/x:uuid"]);
        assert!(backend.keys_with_prefix("nope/").unwrap().is_empty());
    }
}
