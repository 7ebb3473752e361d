//! Persistence of directory entries over the storage backend.
//!
//! Entries are stored as blobs keyed by canonical path; each user's
//! root is stored under the bare user name. Three LRUs sit in front of
//! the backend: a positive entry cache, a root cache, and a negative
//! cache fed by not-found reads and deletes.
//!
//! Cache coherence assumes exactly one writer per user tree. A second
//! writer mutating the same tree through another instance would need an
//! external invalidation channel; none exists here.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::access::Access;
use crate::entry::DirEntry;
use crate::errors::{Error, Kind, Result};
use crate::path::{self, Parsed, UserName};
use crate::storage::Storage;

const OP_GET: &str = "dir.store.get";
const OP_PUT: &str = "dir.store.put";
const OP_DELETE: &str = "dir.store.delete";
const OP_ROOT: &str = "dir.store.root";
const OP_LIST: &str = "dir.store.list";

const DIR_CACHE_ENTRIES: u64 = 10_000;
const NEG_CACHE_ENTRIES: u64 = 10_000;
const ROOT_CACHE_ENTRIES: u64 = 100;

/// A user's in-memory root: the root entry plus every parsed Access
/// file of the tree, keyed by the Access file's canonical path.
#[derive(Debug, Clone)]
pub struct Root {
    pub entry: DirEntry,
    pub access_files: HashMap<String, Arc<Access>>,
}

// Persisted form of a root: the entry plus each Access file serialized
// to its canonical text.
#[derive(Serialize, Deserialize)]
struct RootBlob {
    entry: DirEntry,
    access_files: std::collections::BTreeMap<String, String>,
}

impl Root {
    fn marshal(&self) -> Result<Vec<u8>> {
        let blob = RootBlob {
            entry: self.entry.clone(),
            access_files: self
                .access_files
                .iter()
                .map(|(path, access)| (path.clone(), access.marshal()))
                .collect(),
        };
        serde_json::to_vec(&blob)
            .map_err(|e| Error::new(OP_ROOT, Kind::IO).detail(e.to_string()))
    }

    fn unmarshal(data: &[u8]) -> Result<Self> {
        let blob: RootBlob = serde_json::from_slice(data)
            .map_err(|e| Error::new(OP_ROOT, Kind::IO).detail(e.to_string()))?;
        blob.entry.validate(OP_ROOT)?;

        let mut access_files = HashMap::new();
        for (access_path, text) in blob.access_files {
            let parsed = path::parse(&access_path)
                .map_err(|e| Error::new(OP_ROOT, Kind::IO).path(&access_path).cause(e))?;
            let access = Access::parse(parsed, text.as_bytes())
                .map_err(|e| Error::new(OP_ROOT, Kind::IO).path(&access_path).cause(e))?;
            access_files.insert(access_path, Arc::new(access));
        }
        Ok(Self { entry: blob.entry, access_files })
    }
}

/// Entry persistence with positive, negative, and root caches.
#[derive(Clone)]
pub struct EntryStore {
    storage: Arc<dyn Storage>,
    dir_cache: moka::sync::Cache<String, Arc<DirEntry>>,
    neg_cache: moka::sync::Cache<String, ()>,
    root_cache: moka::sync::Cache<String, Arc<Root>>,
}

impl EntryStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            dir_cache: moka::sync::Cache::new(DIR_CACHE_ENTRIES),
            neg_cache: moka::sync::Cache::new(NEG_CACHE_ENTRIES),
            root_cache: moka::sync::Cache::new(ROOT_CACHE_ENTRIES),
        }
    }

    /// Fetches a non-root entry, or [`Kind::NotExist`]. A backend miss
    /// feeds the negative cache.
    pub async fn get_non_root(&self, path: &Parsed) -> Result<Arc<DirEntry>> {
        let key = path.path();
        if self.neg_cache.get(key).is_some() {
            return Err(Error::new(OP_GET, Kind::NotExist).path(key));
        }
        if let Some(entry) = self.dir_cache.get(key) {
            return Ok(entry);
        }
        match self.storage.get(key).await {
            Ok(blob) => {
                let entry = Arc::new(DirEntry::unmarshal(&blob)?);
                self.dir_cache.insert(key.to_string(), Arc::clone(&entry));
                Ok(entry)
            }
            Err(err) if err.is(Kind::NotExist) => {
                self.neg_cache.insert(key.to_string(), ());
                Err(Error::new(OP_GET, Kind::NotExist).path(key))
            }
            Err(err) => Err(Error::new(OP_GET, Kind::IO).path(key).cause(err)),
        }
    }

    /// Writes a non-root entry and refreshes the caches.
    pub async fn put_non_root(&self, entry: DirEntry) -> Result<Arc<DirEntry>> {
        let key = entry.name.clone();
        let blob = entry.marshal()?;
        self.storage
            .put(&key, &blob)
            .await
            .map_err(|e| Error::new(OP_PUT, Kind::IO).path(&key).cause(e))?;
        let entry = Arc::new(entry);
        self.dir_cache.insert(key.clone(), Arc::clone(&entry));
        self.neg_cache.invalidate(&key);
        Ok(entry)
    }

    /// Deletes a non-root entry and feeds the negative cache.
    pub async fn delete_non_root(&self, path: &Parsed) -> Result<()> {
        let key = path.path();
        self.storage
            .delete(key)
            .await
            .map_err(|e| Error::new(OP_DELETE, Kind::IO).path(key).cause(e))?;
        self.dir_cache.invalidate(key);
        self.neg_cache.insert(key.to_string(), ());
        Ok(())
    }

    /// Fetches a user's root, or [`Kind::NotExist`].
    pub async fn get_root(&self, user: &UserName) -> Result<Arc<Root>> {
        if let Some(root) = self.root_cache.get(user.as_str()) {
            return Ok(root);
        }
        match self.storage.get(user.as_str()).await {
            Ok(blob) => {
                let root = Arc::new(Root::unmarshal(&blob)?);
                self.root_cache.insert(user.as_str().to_string(), Arc::clone(&root));
                Ok(root)
            }
            Err(err) if err.is(Kind::NotExist) => {
                Err(Error::new(OP_ROOT, Kind::NotExist).path(user.as_str()))
            }
            Err(err) => Err(Error::new(OP_ROOT, Kind::IO).path(user.as_str()).cause(err)),
        }
    }

    /// Writes a user's root and refreshes the root cache.
    pub async fn put_root(&self, user: &UserName, root: Root) -> Result<Arc<Root>> {
        let blob = root.marshal()?;
        self.storage
            .put(user.as_str(), &blob)
            .await
            .map_err(|e| Error::new(OP_ROOT, Kind::IO).path(user.as_str()).cause(e))?;
        let root = Arc::new(root);
        self.root_cache.insert(user.as_str().to_string(), Arc::clone(&root));
        Ok(root)
    }

    /// Deletes a user's root.
    pub async fn delete_root(&self, user: &UserName) -> Result<()> {
        self.storage
            .delete(user.as_str())
            .await
            .map_err(|e| Error::new(OP_ROOT, Kind::IO).path(user.as_str()).cause(e))?;
        self.root_cache.invalidate(user.as_str());
        Ok(())
    }

    /// Reports whether the directory at `path` has no children.
    pub async fn is_dir_empty(&self, path: &Parsed) -> Result<bool> {
        let prefix = child_prefix(path);
        let children = self
            .storage
            .list_dir(&prefix)
            .await
            .map_err(|e| Error::new(OP_LIST, Kind::IO).path(path.path()).cause(e))?;
        Ok(children.is_empty())
    }

    /// Lists keys under `prefix` up to `depth` elements below it.
    pub async fn list(&self, prefix: &str, depth: usize) -> Result<Vec<String>> {
        let keys = if depth == 1 {
            self.storage.list_dir(prefix).await
        } else {
            self.storage.list_prefix(prefix, depth).await
        };
        keys.map_err(|e| Error::new(OP_LIST, Kind::IO).path(prefix).cause(e))
    }

    /// Drops every cached entry and root.
    pub fn clear(&self) {
        self.dir_cache.invalidate_all();
        self.neg_cache.invalidate_all();
        self.root_cache.invalidate_all();
    }
}

/// The listing prefix for the children of `dir`.
pub fn child_prefix(dir: &Parsed) -> String {
    if dir.is_root() {
        dir.path().to_string()
    } else {
        format!("{}/", dir.path())
    }
}
