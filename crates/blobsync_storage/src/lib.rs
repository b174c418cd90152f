//! # blobsync Storage
//!
//! Key/value backend trait and the in-memory implementation for blobsync.
//!
//! This crate provides the lowest-level storage abstraction for the sync
//! engine. Backends are **opaque key/value stores** - they do not interpret
//! keys beyond treating them as namespaced strings, and they do not know
//! what a blob or a timestamp record is.
//!
//! ## Design Principles
//!
//! - Every mutating call is a transaction: a fixed set of keys is written,
//!   renamed, or deleted as a unit, or not at all
//! - No knowledge of blob layouts or the timestamp map format
//! - Must be `Send + Sync` for concurrent access
//! - The sync engine owns all key layout interpretation
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - For testing and single-process deployments
//!
//! ## Example
//!
//! ```rust
//! use blobsync_storage::{KvBackend, MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! backend.put_many(&[("k".into(), b"v".to_vec())]).unwrap();
//! assert_eq!(backend.get("k").unwrap(), Some(b"v".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::KvBackend;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
