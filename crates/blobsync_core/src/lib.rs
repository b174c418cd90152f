//! # blobsync Core
//!
//! The per-account synchronization engine.
//!
//! This crate provides:
//! - [`TimestampRecord`] - the logical change clock mapping document ids to
//!   their last write/delete
//! - [`BlobStore`] - the dual-mode (direct/staged) document content store
//! - [`LockManager`] - the advisory per-document lock table
//! - [`WriteSession`] - a token-scoped staging area for one device's batch
//!   of writes and deletes
//! - [`SyncManager`] - the per-account orchestrator tying the above together
//! - [`SyncRegistry`] - the process-wide lookup-or-create table of account
//!   managers
//!
//! # Architecture
//!
//! Every component is instantiated per account; accounts never share state.
//! A device batches writes into a [`WriteSession`], invisible to its peers,
//! then commits the session through [`SyncManager`], which folds the staged
//! blobs into the durable store and the staged timestamps into the main
//! change clock in one pass. Conflicts are avoided, not merged: devices
//! take advisory locks through [`LockManager`] before editing.
//!
//! # Durability
//!
//! Document content goes through a transactional key/value backend
//! ([`blobsync_storage::KvBackend`]) and is durable as soon as a commit
//! returns. The timestamp map is persisted with a debounce: rapid updates
//! coalesce into one JSON write after a quiet window, so a crash inside the
//! window loses the most recent clock updates. That loss is bounded and
//! acceptable - the lock table, which is synchronous and in-memory, is the
//! authoritative state for conflict prevention.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code must not use panic!/unwrap()/expect().
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod blob;
mod config;
mod debounce;
mod devices;
mod error;
mod lock;
mod manager;
mod registry;
mod session;
mod timestamp;

pub use blob::{BlobEntry, BlobStore};
pub use config::SyncConfig;
pub use debounce::Debouncer;
pub use devices::{DeviceDirectory, StaticDeviceDirectory};
pub use error::{CoreError, CoreResult};
pub use lock::{LockEvent, LockManager};
pub use manager::SyncManager;
pub use registry::SyncRegistry;
pub use session::WriteSession;
pub use timestamp::{TimestampRecord, EMPTY_HEAD};
