//! The directory service: a per-user tree of directory entries with
//! strongly ordered mutations.
//!
//! Every operation parses and canonicalizes its path, takes the striped
//! lock for the tree's owning user, consults the access layer, then
//! reads or mutates entries through the [`entry_store::EntryStore`].
//! The per-user lock holds across the whole mutation, so a failed Put
//! never leaves a state other callers can observe halfway.

pub mod entry_store;
mod glob;
mod lock;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::access::group::{Group, GroupCache, GroupLoader};
use crate::access::{Access, Right};
use crate::client::ContentSource;
use crate::entry::{Attr, DirEntry, Packing, Time, SEQ_BASE, SEQ_IGNORE, SEQ_NOT_EXIST};
use crate::errors::{Error, Kind, Result};
use crate::path::{self, Parsed, UserName, ACCESS_FILE, GROUP_DIR};
use crate::server::{Context, StorageFactory, StorageOptions};
use crate::storage::Storage;

use entry_store::{child_prefix, EntryStore, Root};
use glob::GlobPlan;
use lock::LockPool;

use async_trait::async_trait;

const OP_MKDIR: &str = "dir.make_directory";
const OP_PUT: &str = "dir.put";
const OP_LOOKUP: &str = "dir.lookup";
const OP_DELETE: &str = "dir.delete";
const OP_GLOB: &str = "dir.glob";
const OP_WHICH_ACCESS: &str = "dir.which_access";
const OP_CONFIGURE: &str = "dir.configure";

/// The directory service. Cloning through [`DirServer::dial`] yields an
/// instance bound to another caller over the same shared state.
pub struct DirServer {
    inner: Arc<Inner>,
    // Authenticated caller this instance serves.
    user: UserName,
}

struct Inner {
    factory: Option<Arc<dyn StorageFactory>>,
    content: Arc<dyn ContentSource>,
    state: RwLock<Option<EntryStore>>,
    groups: GroupCache,
    locks: LockPool,
    refs: AtomicI64,
}

impl DirServer {
    /// A server over an already-open storage backend, serving `user`.
    pub fn new(
        storage: Arc<dyn Storage>,
        content: Arc<dyn ContentSource>,
        user: UserName,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory: None,
                content,
                state: RwLock::new(Some(EntryStore::new(storage))),
                groups: GroupCache::new(),
                locks: LockPool::new(),
                refs: AtomicI64::new(1),
            }),
            user,
        }
    }

    /// A server that answers [`Kind::NotConfigured`] until
    /// [`DirServer::configure`] opens its backend through `factory`.
    pub fn unconfigured(
        factory: Arc<dyn StorageFactory>,
        content: Arc<dyn ContentSource>,
        user: UserName,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory: Some(factory),
                content,
                state: RwLock::new(None),
                groups: GroupCache::new(),
                locks: LockPool::new(),
                refs: AtomicI64::new(1),
            }),
            user,
        }
    }

    /// Applies `key=value` options and opens the storage backend. See
    /// [`crate::server::parse_options`] for the accepted keys.
    pub fn configure(&self, options: &[String]) -> Result<()> {
        let opts: StorageOptions = crate::server::parse_options(options)?;
        let factory = self
            .inner
            .factory
            .as_ref()
            .ok_or_else(|| {
                Error::new(OP_CONFIGURE, Kind::Invalid).detail("server has no storage factory")
            })?;
        let storage = factory.open(&opts)?;
        *self.inner.state.write().unwrap() = Some(EntryStore::new(storage));
        Ok(())
    }

    /// A new instance over the same trees, bound to the session's
    /// authenticated user.
    pub fn dial(&self, context: &Context) -> DirServer {
        self.inner.refs.fetch_add(1, Ordering::Relaxed);
        DirServer { inner: Arc::clone(&self.inner), user: context.user.clone() }
    }

    /// Releases this instance. The last release drops the shared
    /// caches.
    pub fn close(&self) {
        if self.inner.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(store) = self.inner.state.read().unwrap().as_ref() {
                store.clear();
            }
            self.inner.groups.clear();
        }
    }

    /// The user this instance authenticates as.
    pub fn user(&self) -> &UserName {
        &self.user
    }

    fn entry_store(&self, op: &'static str) -> Result<EntryStore> {
        self.inner
            .state
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::new(op, Kind::NotConfigured))
    }

    /// Creates a directory. Creating `user@domain/` creates the user's
    /// root, which only that user may do.
    pub async fn make_directory(&self, name: &str) -> Result<DirEntry> {
        let parsed = path::parse(name)?;
        let store = self.entry_store(OP_MKDIR)?;
        let _guard = self.inner.locks.for_user(parsed.user()).lock().await;
        debug!(path = %parsed, "make_directory");

        if parsed.is_root() {
            if &self.user != parsed.user() {
                return Err(Error::new(OP_MKDIR, Kind::Permission)
                    .path(parsed.path())
                    .detail("only the owner may create the root"));
            }
            match store.get_root(parsed.user()).await {
                Ok(_) => Err(Error::new(OP_MKDIR, Kind::Exist).path(parsed.path())),
                Err(err) if err.is(Kind::NotExist) => {
                    let mut entry = DirEntry::directory(&parsed, &self.user);
                    entry.sequence = SEQ_BASE;
                    let root = Root { entry: entry.clone(), access_files: HashMap::new() };
                    store.put_root(parsed.user(), root).await?;
                    Ok(entry)
                }
                Err(err) => Err(err),
            }
        } else {
            let entry = DirEntry::directory(&parsed, &self.user);
            self.apply_put(OP_MKDIR, &store, parsed, entry, true).await
        }
    }

    /// Writes an entry, enforcing access and the sequence
    /// compare-and-swap, and bumps the parent's sequence.
    pub async fn put(&self, entry: DirEntry) -> Result<DirEntry> {
        let parsed = path::parse(&entry.name)?;
        if parsed.is_root() {
            return Err(Error::new(OP_PUT, Kind::Invalid)
                .path(parsed.path())
                .detail("roots are created with make_directory"));
        }
        entry.validate(OP_PUT)?;
        match entry.attr {
            Attr::Directory => {
                return Err(Error::new(OP_PUT, Kind::Invalid)
                    .path(parsed.path())
                    .detail("directories are created with make_directory"));
            }
            Attr::Incomplete => {
                return Err(Error::new(OP_PUT, Kind::Invalid)
                    .path(parsed.path())
                    .detail("cannot Put an incomplete entry"));
            }
            Attr::None | Attr::Link => {}
        }
        let store = self.entry_store(OP_PUT)?;
        let _guard = self.inner.locks.for_user(parsed.user()).lock().await;
        debug!(path = %parsed, "put");
        self.apply_put(OP_PUT, &store, parsed, entry, false).await
    }

    /// Fetches an entry. Callers holding only the List right receive a
    /// copy with locations and packdata withheld; callers holding
    /// neither Read nor List learn nothing, not even existence.
    pub async fn lookup(&self, name: &str) -> Result<DirEntry> {
        let parsed = path::parse(name)?;
        let store = self.entry_store(OP_LOOKUP)?;
        let _guard = self.inner.locks.for_user(parsed.user()).lock().await;
        self.lookup_locked(OP_LOOKUP, &store, &parsed).await
    }

    /// Removes an entry. Directories must be empty. Deleting the root
    /// removes the tree and is owner-only.
    pub async fn delete(&self, name: &str) -> Result<DirEntry> {
        let parsed = path::parse(name)?;
        let store = self.entry_store(OP_DELETE)?;
        let _guard = self.inner.locks.for_user(parsed.user()).lock().await;
        debug!(path = %parsed, "delete");

        let root =
            store.get_root(parsed.user()).await.map_err(|e| annotate(OP_DELETE, e))?;
        if parsed.is_root() {
            if &self.user != parsed.user() {
                return Err(Error::new(OP_DELETE, Kind::Permission)
                    .path(parsed.path())
                    .detail("only the owner may delete the root"));
            }
            if !store.is_dir_empty(&parsed).await? {
                return Err(Error::new(OP_DELETE, Kind::NotDir)
                    .path(parsed.path())
                    .detail("directory not empty"));
            }
            store.delete_root(parsed.user()).await?;
            // The tree's group files went with it.
            self.inner.groups.clear();
            return Ok(root.entry.clone());
        }

        if !self.check(&store, &root, Right::Delete, &parsed).await? {
            return Err(Error::new(OP_DELETE, Kind::Permission).path(parsed.path()));
        }
        let entry = store.get_non_root(&parsed).await.map_err(|e| annotate(OP_DELETE, e))?;
        if entry.is_dir() && !store.is_dir_empty(&parsed).await? {
            return Err(Error::new(OP_DELETE, Kind::NotDir)
                .path(parsed.path())
                .detail("directory not empty"));
        }
        store.delete_non_root(&parsed).await?;

        let mut new_root = None;
        self.bump_parent(&store, &root, &parsed, &mut new_root).await?;
        if parsed.is_access_file() {
            let r = new_root.get_or_insert_with(|| (*root).clone());
            r.access_files.remove(parsed.path());
        }
        if let Some(r) = new_root {
            store.put_root(parsed.user(), r).await?;
        }
        if parsed.is_group_file() {
            self.inner.groups.remove(&parsed);
        }
        Ok((*entry).clone())
    }

    /// Expands a glob pattern, hiding entries the caller may neither
    /// read nor list. Results are sorted by name.
    pub async fn glob(&self, pattern: &str) -> Result<Vec<DirEntry>> {
        let parsed = path::parse(pattern)?;
        let store = self.entry_store(OP_GLOB)?;
        let _guard = self.inner.locks.for_user(parsed.user()).lock().await;
        debug!(pattern = %parsed, "glob");

        let plan = match GlobPlan::new(&parsed)? {
            // No metacharacters: exactly the lookup of that path.
            None => {
                return match self.lookup_locked(OP_GLOB, &store, &parsed).await {
                    Ok(entry) => Ok(vec![entry]),
                    Err(err) if err.is(Kind::NotExist) || err.is(Kind::Private) => {
                        Ok(Vec::new())
                    }
                    Err(err) => Err(err),
                };
            }
            Some(plan) => plan,
        };

        let root = store.get_root(parsed.user()).await.map_err(|e| annotate(OP_GLOB, e))?;
        let keys = store.list(&child_prefix(plan.prefix()), plan.depth()).await?;

        let mut results = Vec::new();
        for key in keys {
            if !plan.matches(&key) {
                continue;
            }
            let candidate = match path::parse(&key) {
                Ok(candidate) => candidate,
                Err(_) => continue,
            };
            let can_read = self.check(&store, &root, Right::Read, &candidate).await?;
            let can_list =
                can_read || self.check(&store, &root, Right::List, &candidate).await?;
            if !can_read && !can_list {
                continue;
            }
            let entry = match store.get_non_root(&candidate).await {
                Ok(entry) => entry,
                Err(err) if err.is(Kind::NotExist) => continue,
                Err(err) => return Err(annotate(OP_GLOB, err)),
            };
            results.push(if can_read { (*entry).clone() } else { entry.incomplete_copy() });
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    /// Returns the Access file governing `name`, or `None` when the
    /// tree has none on the path to the root.
    pub async fn which_access(&self, name: &str) -> Result<Option<DirEntry>> {
        let parsed = path::parse(name)?;
        let store = self.entry_store(OP_WHICH_ACCESS)?;
        let _guard = self.inner.locks.for_user(parsed.user()).lock().await;

        let root =
            store.get_root(parsed.user()).await.map_err(|e| annotate(OP_WHICH_ACCESS, e))?;
        let can_read = self.check(&store, &root, Right::Read, &parsed).await?;
        let can_list = can_read || self.check(&store, &root, Right::List, &parsed).await?;
        if !can_read && !can_list {
            return Err(Error::new(OP_WHICH_ACCESS, Kind::Private).path(parsed.path()));
        }

        let mut dir = parsed.parent();
        loop {
            let candidate = dir.child(ACCESS_FILE);
            if root.access_files.contains_key(candidate.path()) {
                let entry = store
                    .get_non_root(&candidate)
                    .await
                    .map_err(|e| annotate(OP_WHICH_ACCESS, e))?;
                return Ok(Some((*entry).clone()));
            }
            if dir.is_root() {
                break;
            }
            dir = dir.parent();
        }
        Ok(None)
    }

    // The common write path. Assumes the user lock is held.
    async fn apply_put(
        &self,
        op: &'static str,
        store: &EntryStore,
        parsed: Parsed,
        mut entry: DirEntry,
        is_mkdir: bool,
    ) -> Result<DirEntry> {
        let root = store.get_root(parsed.user()).await.map_err(|e| annotate(op, e))?;

        let is_access = parsed.is_access_file();
        let is_group = parsed.is_group_file();
        if is_mkdir && is_access {
            return Err(Error::new(op, Kind::Invalid)
                .path(parsed.path())
                .detail("Access is a plain file, not a directory"));
        }
        if !is_mkdir && parsed.nelem() == 1 && parsed.elem(0) == GROUP_DIR {
            return Err(Error::new(op, Kind::Invalid)
                .path(parsed.path())
                .detail("Group is a directory, not a file"));
        }
        if (is_access || is_group) && !is_mkdir {
            if entry.packing != Packing::Integrity {
                return Err(Error::new(op, Kind::Invalid)
                    .path(parsed.path())
                    .detail("Access and Group files require the integrity packing"));
            }
            if entry.is_link() {
                return Err(Error::new(op, Kind::Invalid)
                    .path(parsed.path())
                    .detail("Access and Group files may not be links"));
            }
        }

        let existing = match store.get_non_root(&parsed).await {
            Ok(existing) => Some(existing),
            Err(err) if err.is(Kind::NotExist) => None,
            Err(err) => return Err(annotate(op, err)),
        };

        let right = if existing.is_some() { Right::Write } else { Right::Create };
        if !self.check(store, &root, right, &parsed).await? {
            return Err(Error::new(op, Kind::Permission).path(parsed.path()));
        }

        if entry.sequence < SEQ_NOT_EXIST {
            return Err(Error::new(op, Kind::Invalid)
                .path(parsed.path())
                .detail("invalid sequence number"));
        }
        let new_sequence = match &existing {
            Some(current) => {
                if entry.sequence == SEQ_NOT_EXIST {
                    return Err(Error::new(op, Kind::Exist).path(parsed.path()));
                }
                if current.is_dir() {
                    return Err(if is_mkdir {
                        Error::new(op, Kind::Exist)
                            .path(parsed.path())
                            .detail("directory already exists")
                    } else {
                        Error::new(op, Kind::IsDir).path(parsed.path())
                    });
                }
                if is_mkdir {
                    return Err(Error::new(op, Kind::NotDir)
                        .path(parsed.path())
                        .detail("a file is in the way"));
                }
                if entry.sequence != SEQ_IGNORE && entry.sequence != current.sequence {
                    return Err(Error::new(op, Kind::Invalid)
                        .path(parsed.path())
                        .detail("sequence number mismatch"));
                }
                current.sequence + 1
            }
            None => {
                if entry.sequence > SEQ_IGNORE {
                    return Err(Error::new(op, Kind::NotExist)
                        .path(parsed.path())
                        .detail("sequence given for a path that does not exist"));
                }
                SEQ_BASE
            }
        };

        let parent = parsed.parent();
        let parent_entry = if parent.is_root() {
            None
        } else {
            let pe = store.get_non_root(&parent).await.map_err(|e| {
                if e.is(Kind::NotExist) {
                    Error::new(op, Kind::NotExist)
                        .path(parent.path())
                        .detail("parent directory does not exist")
                } else {
                    annotate(op, e)
                }
            })?;
            if !pe.is_dir() {
                return Err(Error::new(op, Kind::NotDir).path(parent.path()));
            }
            Some(pe)
        };

        // Validate ACL file contents before anything becomes visible.
        let new_access = if is_access && !is_mkdir {
            let data =
                self.inner.content.read_all(&entry).await.map_err(|e| annotate(op, e))?;
            Some(Arc::new(Access::parse(parsed.clone(), &data)?))
        } else {
            None
        };
        if is_group && !is_mkdir {
            let data =
                self.inner.content.read_all(&entry).await.map_err(|e| annotate(op, e))?;
            Group::parse(parsed.clone(), &data)?;
        }

        entry.name = parsed.path().to_string();
        if entry.signed_name.is_empty() {
            entry.signed_name = entry.name.clone();
        }
        entry.sequence = new_sequence;
        if entry.time == Time(0) {
            entry.time = Time::now();
        }
        entry.writer = self.user.as_str().to_string();

        store.put_non_root(entry.clone()).await?;

        let mut new_root = None;
        if let Some(pe) = parent_entry {
            let mut bumped = (*pe).clone();
            bumped.sequence += 1;
            store.put_non_root(bumped).await?;
        } else {
            let r = new_root.get_or_insert_with(|| (*root).clone());
            r.entry.sequence += 1;
        }
        if let Some(access) = new_access {
            let r = new_root.get_or_insert_with(|| (*root).clone());
            r.access_files.insert(parsed.path().to_string(), access);
        }
        if let Some(r) = new_root {
            store.put_root(parsed.user(), r).await?;
        }
        if is_group && !is_mkdir {
            self.inner.groups.remove(&parsed);
        }
        Ok(entry)
    }

    // Lookup body shared with glob. Assumes the user lock is held.
    async fn lookup_locked(
        &self,
        op: &'static str,
        store: &EntryStore,
        parsed: &Parsed,
    ) -> Result<DirEntry> {
        let root = store.get_root(parsed.user()).await.map_err(|e| annotate(op, e))?;
        let can_read = self.check(store, &root, Right::Read, parsed).await?;
        let can_list = can_read || self.check(store, &root, Right::List, parsed).await?;
        if !can_read && !can_list {
            return Err(Error::new(op, Kind::Private).path(parsed.path()));
        }
        let entry = if parsed.is_root() {
            root.entry.clone()
        } else {
            let entry = store.get_non_root(parsed).await.map_err(|e| annotate(op, e))?;
            (*entry).clone()
        };
        Ok(if can_read { entry } else { entry.incomplete_copy() })
    }

    // Increments the sequence of the immediate parent after a
    // successful mutation of a non-root path.
    async fn bump_parent(
        &self,
        store: &EntryStore,
        root: &Arc<Root>,
        parsed: &Parsed,
        new_root: &mut Option<Root>,
    ) -> Result<()> {
        let parent = parsed.parent();
        if parent.is_root() {
            let r = new_root.get_or_insert_with(|| (**root).clone());
            r.entry.sequence += 1;
        } else {
            let pe = store.get_non_root(&parent).await?;
            let mut bumped = (*pe).clone();
            bumped.sequence += 1;
            store.put_non_root(bumped).await?;
        }
        Ok(())
    }

    // Whether the session user holds `right` on `path`, per the ruling
    // Access file.
    async fn check(
        &self,
        store: &EntryStore,
        root: &Arc<Root>,
        right: Right,
        path: &Parsed,
    ) -> Result<bool> {
        let access = ruling_access(root, path);
        let loader =
            StoreGroupLoader { store: store.clone(), content: Arc::clone(&self.inner.content) };
        access.can(&self.user, right, path, &self.inner.groups, &loader).await
    }
}

// The Access file governing `path`: the nearest one at or above the
// parent directory, or the implicit default granting the owner
// everything and others nothing.
fn ruling_access(root: &Arc<Root>, path: &Parsed) -> Arc<Access> {
    let mut dir = path.parent();
    loop {
        let candidate = dir.child(ACCESS_FILE);
        if let Some(access) = root.access_files.get(candidate.path()) {
            return Arc::clone(access);
        }
        if dir.is_root() {
            break;
        }
        dir = dir.parent();
    }
    Arc::new(Access::default_for(path.user().clone()))
}

// Resolves groups against the trees this server stores.
struct StoreGroupLoader {
    store: EntryStore,
    content: Arc<dyn ContentSource>,
}

#[async_trait]
impl GroupLoader for StoreGroupLoader {
    async fn load(&self, group: &Parsed) -> Result<Vec<u8>> {
        let entry = self.store.get_non_root(group).await?;
        self.content.read_all(&entry).await
    }
}

fn annotate(op: &'static str, err: Error) -> Error {
    Error::new(op, err.kind).cause(err)
}
