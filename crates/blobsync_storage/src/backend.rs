//! Key/value backend trait definition.

use crate::error::StorageResult;

/// A transactional key/value backend for blobsync.
///
/// Backends are **opaque key/value stores**. Keys are flat strings; the
/// sync engine layers its namespacing scheme on top. Every mutating method
/// applies its whole key set atomically - a reader never observes some of
/// a call's keys written and others not.
///
/// # Invariants
///
/// - `get` returns exactly the bytes last written for that key
/// - `put_many`, `delete_many`, and `rename_many` are all-or-nothing
/// - `rename_many` removes every source key and writes every destination
///   key, overwriting destinations that already exist
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::MemoryBackend`] - in-process store for tests and
///   single-process deployments
pub trait KvBackend: Send + Sync {
    /// Reads a single key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Reads several keys in one transaction.
    ///
    /// The result has the same length and order as `keys`, with `None`
    /// for absent keys. All values come from one consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Option<Vec<u8>>>>;

    /// Writes several key/value pairs in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be applied as a unit;
    /// on error no key has been written.
    fn put_many(&self, pairs: &[(String, Vec<u8>)]) -> StorageResult<()>;

    /// Deletes several keys in one transaction.
    ///
    /// Absent keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be applied as a unit;
    /// on error no key has been deleted.
    fn delete_many(&self, keys: &[String]) -> StorageResult<()>;

    /// Moves several keys in one transaction.
    ///
    /// Each `(from, to)` pair removes `from` and writes its value under
    /// `to`, replacing any existing value at `to`. Pairs whose source key
    /// is absent fail the whole transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::MissingKey`] if any source key is
    /// absent; on error no key has been moved.
    fn rename_many(&self, pairs: &[(String, String)]) -> StorageResult<()>;

    /// Returns every key starting with `prefix`.
    ///
    /// Used to find residual staged keys when a write session is
    /// abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
