//! Checksum-keyed dependency cache

pub mod key;
pub mod snapshot;
pub mod store;

pub use key::{render_key, KeyError};
pub use snapshot::Snapshot;
pub use store::{CacheError, CacheStore, DirCacheStore, InMemoryCacheStore};
