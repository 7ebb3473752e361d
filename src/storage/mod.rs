//! Object storage abstraction for persisted directory entries.
//!
//! The directory service persists entries as opaque blobs through this
//! interface. A cloud bucket sits behind it in production; tests and the
//! in-process services use [`inmem::InMemoryStorage`].

pub mod inmem;

use async_trait::async_trait;

use crate::errors::Result;

/// A flat key-to-blob store with prefix listing.
///
/// Keys are canonical path strings; hierarchy exists only through the
/// listing calls. Implementations must be safe to call from many tasks
/// at once.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetches the blob under `key`, or [`crate::errors::Kind::NotExist`].
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Stores `contents` under `key`, replacing any previous blob.
    async fn put(&self, key: &str, contents: &[u8]) -> Result<()>;

    /// Removes the blob under `key`. Removing an absent key is not an
    /// error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists keys exactly one element below `dir`, which must end in a
    /// slash.
    async fn list_dir(&self, dir: &str) -> Result<Vec<String>>;

    /// Lists keys starting with `prefix` that have at most `depth`
    /// elements after it.
    async fn list_prefix(&self, prefix: &str, depth: usize) -> Result<Vec<String>>;
}
