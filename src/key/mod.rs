//! User identity lookups.
//!
//! The key service maps a user name to the endpoints of the services
//! holding that user's tree and blocks, plus the user's public key.
//! The core only ever consumes this interface; a real deployment backs
//! it with a networked key server.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::endpoint::Endpoint;
use crate::errors::{Error, Kind, Result};
use crate::path::UserName;

const OP_LOOKUP: &str = "key.lookup";

/// What the key service knows about one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: UserName,
    /// Directory servers holding the user's tree, in preference order.
    pub dirs: Vec<Endpoint>,
    /// Stores holding the user's blocks, in preference order.
    pub stores: Vec<Endpoint>,
    /// The user's public key, in its textual form.
    pub public_key: String,
}

/// Lookup from user identity to endpoints and public keys.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Fetches the record for `user`, or [`Kind::NotExist`].
    async fn lookup(&self, user: &UserName) -> Result<UserRecord>;
}

/// An in-memory [`KeyService`] for in-process deployments and tests.
#[derive(Default)]
pub struct InProcessKeyService {
    records: DashMap<String, UserRecord>,
}

impl InProcessKeyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the record for a user.
    pub fn register(&self, record: UserRecord) {
        self.records.insert(record.name.as_str().to_string(), record);
    }
}

#[async_trait]
impl KeyService for InProcessKeyService {
    async fn lookup(&self, user: &UserName) -> Result<UserRecord> {
        self.records
            .get(user.as_str())
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::new(OP_LOOKUP, Kind::NotExist).path(user.as_str()))
    }
}
