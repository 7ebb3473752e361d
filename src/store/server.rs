//! The store service: a per-session front end over the block cache.
//!
//! Requests arrive with an authenticated caller identity and consult
//! the cache, which fetches from the configured upstream store and
//! follows indirection as needed.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::endpoint::{Endpoint, Reference};
use crate::errors::{Error, Kind, Result};
use crate::path::UserName;
use crate::server::Context;

use super::cache::StoreCache;

const OP_GET: &str = "store.server.get";
const OP_PUT: &str = "store.server.put";
const OP_DELETE: &str = "store.server.delete";

/// The store service. Cloning through [`StoreServer::dial`] yields an
/// instance bound to another caller over the same cache.
pub struct StoreServer {
    inner: Arc<Inner>,
    // Authenticated caller this instance serves.
    user: UserName,
}

struct Inner {
    state: RwLock<Option<Backing>>,
    refs: AtomicI64,
}

#[derive(Clone)]
struct Backing {
    cache: Arc<StoreCache>,
    upstream: Endpoint,
}

impl StoreServer {
    /// A server over `cache`, forwarding misses and writes to the store
    /// at `upstream`, serving `user`.
    pub fn new(cache: Arc<StoreCache>, upstream: Endpoint, user: UserName) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(Some(Backing { cache, upstream })),
                refs: AtomicI64::new(1),
            }),
            user,
        }
    }

    /// A server that answers [`Kind::NotConfigured`] until
    /// [`StoreServer::configure`] attaches a cache and upstream.
    pub fn unconfigured(user: UserName) -> Self {
        Self {
            inner: Arc::new(Inner { state: RwLock::new(None), refs: AtomicI64::new(1) }),
            user,
        }
    }

    /// Attaches the cache and upstream endpoint this server answers
    /// from.
    pub fn configure(&self, cache: Arc<StoreCache>, upstream: Endpoint) {
        *self.inner.state.write().unwrap() = Some(Backing { cache, upstream });
    }

    /// A new instance over the same cache, bound to the session's
    /// authenticated user.
    pub fn dial(&self, context: &Context) -> StoreServer {
        self.inner.refs.fetch_add(1, Ordering::Relaxed);
        StoreServer { inner: Arc::clone(&self.inner), user: context.user.clone() }
    }

    /// Releases this instance.
    pub fn close(&self) {
        self.inner.refs.fetch_sub(1, Ordering::AcqRel);
    }

    /// The user this instance authenticates as.
    pub fn user(&self) -> &UserName {
        &self.user
    }

    fn backing(&self, op: &'static str) -> Result<Backing> {
        self.inner
            .state
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::new(op, Kind::NotConfigured))
    }

    /// Fetches a block by reference.
    pub async fn get(&self, reference: &Reference) -> Result<Vec<u8>> {
        let backing = self.backing(OP_GET)?;
        debug!(user = %self.user, reference = %reference, "get");
        backing.cache.get(reference, &backing.upstream).await
    }

    /// Stores a block, returning its content-addressed reference.
    pub async fn put(&self, data: &[u8]) -> Result<Reference> {
        let backing = self.backing(OP_PUT)?;
        debug!(user = %self.user, bytes = data.len(), "put");
        backing.cache.put(data, &backing.upstream).await
    }

    /// Removes a block from the upstream store and the cache.
    pub async fn delete(&self, reference: &Reference) -> Result<()> {
        let backing = self.backing(OP_DELETE)?;
        debug!(user = %self.user, reference = %reference, "delete");
        backing.cache.delete(reference, &backing.upstream).await
    }
}
