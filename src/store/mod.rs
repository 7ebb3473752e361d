//! Block stores and the write-through store cache.
//!
//! A [`Store`] holds opaque blocks of bytes named by content-addressed
//! references. A fetch may answer with the bytes themselves or redirect
//! the caller to other locations; [`cache::StoreCache`] follows such
//! indirection, deduplicates concurrent fetches, and keeps blocks on
//! local disk under a byte budget.

pub mod cache;
mod disk;
pub mod server;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use data_encoding::HEXLOWER;
use ring::digest;
use tokio::sync::RwLock;

use crate::endpoint::{Endpoint, Location, Reference};
use crate::errors::{Error, Kind, Result};

const OP_GET: &str = "store.get";
const OP_DIAL: &str = "store.dial";

/// Outcome of fetching a reference: the block bytes, or other locations
/// to try instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Data(Vec<u8>),
    Redirect(Vec<Location>),
}

/// An upstream block store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetches a block or a redirection list, or
    /// [`Kind::NotExist`]. A temporarily unavailable
    /// store reports [`Kind::Transient`].
    async fn get(&self, reference: &Reference) -> Result<Fetched>;

    /// Stores a block, returning its content-addressed reference.
    /// Storing the same bytes twice returns the same reference.
    async fn put(&self, data: &[u8]) -> Result<Reference>;

    /// Removes a block. Removing an absent reference is not an error.
    async fn delete(&self, reference: &Reference) -> Result<()>;
}

/// Resolves an endpoint to a store instance. The cache dials through
/// this to follow indirection across endpoints.
pub trait StoreDialer: Send + Sync {
    fn dial(&self, endpoint: &Endpoint) -> Result<Arc<dyn Store>>;
}

/// Maps endpoints to store instances inside this process.
#[derive(Default)]
pub struct StoreRegistry {
    stores: DashMap<Endpoint, Arc<dyn Store>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the store serving `endpoint`, replacing any previous
    /// registration.
    pub fn register(&self, endpoint: Endpoint, store: Arc<dyn Store>) {
        self.stores.insert(endpoint, store);
    }
}

impl StoreDialer for StoreRegistry {
    fn dial(&self, endpoint: &Endpoint) -> Result<Arc<dyn Store>> {
        self.stores.get(endpoint).map(|s| Arc::clone(&s)).ok_or_else(|| {
            Error::new(OP_DIAL, Kind::NotExist).detail(format!("no store at {endpoint}"))
        })
    }
}

/// An in-memory, content-addressed [`Store`]. References are the
/// lowercase hex SHA-256 of the block bytes, so equal bytes share one
/// reference.
#[derive(Default)]
pub struct InProcessStore {
    blobs: RwLock<HashMap<Reference, Vec<u8>>>,
}

impl InProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reference the store assigns to `data`.
    pub fn reference_for(data: &[u8]) -> Reference {
        let sum = digest::digest(&digest::SHA256, data);
        Reference::new(HEXLOWER.encode(sum.as_ref()))
    }
}

#[async_trait]
impl Store for InProcessStore {
    async fn get(&self, reference: &Reference) -> Result<Fetched> {
        self.blobs
            .read()
            .await
            .get(reference)
            .map(|b| Fetched::Data(b.clone()))
            .ok_or_else(|| Error::new(OP_GET, Kind::NotExist).path(reference.as_str()))
    }

    async fn put(&self, data: &[u8]) -> Result<Reference> {
        let reference = Self::reference_for(data);
        self.blobs.write().await.insert(reference.clone(), data.to_vec());
        Ok(reference)
    }

    async fn delete(&self, reference: &Reference) -> Result<()> {
        self.blobs.write().await.remove(reference);
        Ok(())
    }
}
