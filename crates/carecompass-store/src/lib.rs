//! CareCompass document store.
//!
//! Holds every collection in memory behind a single writer gate and
//! persists each mutation through a pluggable [`Backend`] before it becomes
//! visible to readers. Sessions and share links carry an expiry and are
//! dropped lazily on read or by [`Store::prune_expired`].

mod backend;
mod error;
mod snapshot;
mod store;

pub use backend::{backend_for, Backend, JournalBackend, JsonFileBackend, MemoryBackend};
pub use error::{Result, StoreError};
pub use snapshot::{Mutation, Snapshot};
pub use store::{PruneStats, Store, StoreStats};
