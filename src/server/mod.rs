//! Service lifecycle glue: session contexts, configuration options, and
//! in-process wiring of the full service stack.

use std::path::Path;
use std::sync::Arc;

use crate::client::BlockSource;
use crate::dir::DirServer;
use crate::endpoint::Endpoint;
use crate::errors::{Error, Kind, Result};
use crate::key::{InProcessKeyService, UserRecord};
use crate::path::UserName;
use crate::storage::inmem::InMemoryStorage;
use crate::storage::Storage;
use crate::store::cache::StoreCache;
use crate::store::server::StoreServer;
use crate::store::{InProcessStore, StoreDialer, StoreRegistry};

const OP_OPTIONS: &str = "server.configure";

/// An authenticated session. Transport and key exchange happen
/// elsewhere; the services only ever see the resulting identity.
#[derive(Debug, Clone)]
pub struct Context {
    pub user: UserName,
}

impl Context {
    pub fn new(user: UserName) -> Self {
        Self { user }
    }
}

/// Option key naming the storage bucket.
pub const OPT_BUCKET: &str = "bucketName";

/// Option key naming the cloud project.
pub const OPT_PROJECT: &str = "projectID";

/// Parsed `Configure` options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    pub bucket_name: String,
    pub project_id: String,
}

/// Parses `key=value` configuration options. Unknown keys are
/// [`Kind::Invalid`].
pub fn parse_options(options: &[String]) -> Result<StorageOptions> {
    let mut out = StorageOptions::default();
    for option in options {
        let (key, value) = option.split_once('=').ok_or_else(|| {
            Error::new(OP_OPTIONS, Kind::Invalid).detail(format!("malformed option {option:?}"))
        })?;
        match key {
            OPT_BUCKET => out.bucket_name = value.to_string(),
            OPT_PROJECT => out.project_id = value.to_string(),
            _ => {
                return Err(Error::new(OP_OPTIONS, Kind::Invalid)
                    .detail(format!("unknown option {key:?}")));
            }
        }
    }
    Ok(out)
}

/// Opens a storage backend from parsed options.
pub trait StorageFactory: Send + Sync {
    fn open(&self, options: &StorageOptions) -> Result<Arc<dyn Storage>>;
}

/// A factory handing out one shared in-memory backend, whatever the
/// options say.
#[derive(Default)]
pub struct InMemoryFactory {
    storage: Arc<InMemoryStorage>,
}

impl InMemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageFactory for InMemoryFactory {
    fn open(&self, _options: &StorageOptions) -> Result<Arc<dyn Storage>> {
        Ok(Arc::clone(&self.storage) as Arc<dyn Storage>)
    }
}

/// The full service stack wired inside one process.
pub struct InProcess {
    pub dir: DirServer,
    pub store: StoreServer,
    pub keys: Arc<InProcessKeyService>,
    pub cache: Arc<StoreCache>,
    pub registry: Arc<StoreRegistry>,
    pub store_endpoint: Endpoint,
}

/// Builds an in-process world: an in-memory entry backend, a
/// content-addressed in-process store, a disk cache rooted at
/// `cache_dir`, and a key service knowing `user`, all serving `user`.
pub fn in_process(
    user: &UserName,
    cache_dir: &Path,
    cache_max_bytes: i64,
    cache_max_entries: usize,
) -> Result<InProcess> {
    let registry = Arc::new(StoreRegistry::new());
    let store_endpoint = Endpoint::in_process();
    registry.register(store_endpoint.clone(), Arc::new(InProcessStore::new()));

    let cache = Arc::new(StoreCache::open(
        cache_dir.to_path_buf(),
        cache_max_bytes,
        cache_max_entries,
        Arc::clone(&registry) as Arc<dyn StoreDialer>,
    )?);
    let content = Arc::new(BlockSource::new(Arc::clone(&cache)));
    let storage = Arc::new(InMemoryStorage::new());
    let dir = DirServer::new(storage, content, user.clone());
    let store = StoreServer::new(Arc::clone(&cache), store_endpoint.clone(), user.clone());

    let keys = Arc::new(InProcessKeyService::new());
    keys.register(UserRecord {
        name: user.clone(),
        dirs: vec![Endpoint::in_process()],
        stores: vec![store_endpoint.clone()],
        public_key: String::new(),
    });

    Ok(InProcess { dir, store, keys, cache, registry, store_endpoint })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let opts = parse_options(&[
            "bucketName=my-bucket".to_string(),
            "projectID=my-project".to_string(),
        ])
        .unwrap();
        assert_eq!(opts.bucket_name, "my-bucket");
        assert_eq!(opts.project_id, "my-project");
    }

    #[test]
    fn test_parse_options_rejects_unknown_key() {
        let err = parse_options(&["region=us-east1".to_string()]).unwrap_err();
        assert_eq!(err.kind, Kind::Invalid);

        let err = parse_options(&["no-equals".to_string()]).unwrap_err();
        assert_eq!(err.kind, Kind::Invalid);
    }
}
