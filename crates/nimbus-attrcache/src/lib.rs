//! Attribute caching stage for Nimbus pipelines.
//!
//! [`AttrCache`] sits between the kernel binding and the storage backend and
//! answers metadata operations (existence, size, mode, timestamps, directory
//! listings) from an in-memory tree instead of round-tripping to cloud
//! storage on every call. It stays consistent with mutations made through the
//! mount: creates, deletes, renames and writes update the tree from the
//! outcome of the downstream call, and a background [`sweeper::Sweeper`]
//! purges entries older than the configured time-to-live.
//!
//! The cache is a transparent [`Component`](nimbus_pipeline::Component): it
//! implements the same trait it consumes, so it can be dropped into any
//! position of a pipeline.
//!
//! # Consistency model
//!
//! Deletions are remembered as *tombstones* (valid entries marked
//! non-existing), so "not found" can be answered without a backend call.
//! With directory tracking enabled the cache also knows which directories are
//! backed by at least one cloud object and which exist only locally: cloud
//! object stores have no representation for empty directories, so those live
//! purely in the cache and are merged into listings.
//!
//! Externally-caused changes (another client mutating the same bucket) become
//! visible within the configured time-to-live.

pub mod cache;
pub mod item;
pub mod settings;
pub mod sweeper;
pub mod tree;

pub use cache::{AttrCache, EntryView};
pub use item::{CacheItem, ListingPage, Presence};
pub use settings::CacheSettings;
pub use sweeper::Sweeper;
pub use tree::{CacheTree, ROOT_PATH};
