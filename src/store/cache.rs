//! Write-through, content-addressed block cache.
//!
//! The cache keeps one descriptor per (reference, endpoint) pair. A
//! descriptor is born busy on first use, becomes valid when its block
//! reaches local disk, and is invalidated by eviction or delete. A
//! concurrent fetch of a busy reference waits on the descriptor rather
//! than fetching again, so a cold reference is fetched upstream exactly
//! once.
//!
//! Lock order is LRU lock, then descriptor lock, never the reverse. The
//! LRU lock is never held across disk or network I/O; the descriptor's
//! busy flag provides exclusion across the fetch.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, Location, Reference};
use crate::errors::{Error, Kind, Result};

use super::disk;
use super::{Fetched, Store, StoreDialer};

const OP_OPEN: &str = "cache.open";
const OP_GET: &str = "cache.get";
const OP_PUT: &str = "cache.put";
const OP_DELETE: &str = "cache.delete";

// One initial attempt plus three retries on transient faults.
const FETCH_ATTEMPTS: usize = 4;
const RETRY_PAUSE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    endpoint: Endpoint,
    reference: Reference,
}

struct RefState {
    size: i64,
    valid: bool,
    busy: bool,
}

struct CachedRef {
    file: PathBuf,
    state: Mutex<RefState>,
    done: Notify,
}

/// The block cache. See the module documentation for the descriptor
/// state machine.
pub struct StoreCache {
    root: PathBuf,
    max_bytes: i64,
    max_entries: usize,
    dialer: Arc<dyn StoreDialer>,
    lru: Mutex<LruCache<CacheKey, Arc<CachedRef>>>,
    bytes: AtomicI64,
}

impl StoreCache {
    /// Opens the cache rooted at `root`, seeding the LRU with every
    /// block already on disk. `max_bytes` is the soft byte budget,
    /// `max_entries` the hard entry count.
    pub fn open(
        root: PathBuf,
        max_bytes: i64,
        max_entries: usize,
        dialer: Arc<dyn StoreDialer>,
    ) -> Result<Self> {
        let scanned = disk::scan(&root).map_err(|e| Error::new(OP_OPEN, e.kind).cause(e))?;

        let mut lru = LruCache::unbounded();
        let mut bytes = 0;
        for block in scanned {
            bytes += block.size;
            let key = CacheKey { endpoint: block.endpoint, reference: block.reference };
            let cref = Arc::new(CachedRef {
                file: block.file,
                state: Mutex::new(RefState { size: block.size, valid: true, busy: false }),
                done: Notify::new(),
            });
            lru.push(key, cref);
        }
        debug!(root = %root.display(), entries = lru.len(), bytes, "opened store cache");

        Ok(Self {
            root,
            max_bytes,
            max_entries,
            dialer,
            lru: Mutex::new(lru),
            bytes: AtomicI64::new(bytes),
        })
    }

    /// Bytes of valid cached blocks currently on disk.
    pub fn bytes_in_use(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Number of descriptors in the LRU, valid or not.
    pub fn entries(&self) -> usize {
        self.lru.lock().unwrap().len()
    }

    /// Fetches a block, preferring the local copy. A miss fetches from
    /// the upstream store at `endpoint`, following any indirection it
    /// returns, and caches the bytes on disk.
    pub async fn get(&self, reference: &Reference, endpoint: &Endpoint) -> Result<Vec<u8>> {
        check_reference(OP_GET, reference)?;
        self.enforce_budget();

        let key = CacheKey { endpoint: endpoint.clone(), reference: reference.clone() };
        let cref = self.descriptor(&key);

        loop {
            // Register for completion before inspecting the state, so a
            // fetch finishing in between still wakes us.
            let notified = cref.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let became_fetcher = {
                let mut st = cref.state.lock().unwrap();
                if st.valid {
                    match std::fs::read(&cref.file) {
                        Ok(data) => return Ok(data),
                        Err(_) => {
                            // The file vanished under us; re-fetch.
                            self.bytes.fetch_sub(st.size, Ordering::Relaxed);
                            st.valid = false;
                        }
                    }
                }
                if st.busy {
                    false
                } else {
                    st.busy = true;
                    true
                }
            };
            if !became_fetcher {
                notified.await;
                continue;
            }

            // Sole fetcher for this reference from here on. The guard
            // wakes waiters if this future is dropped mid-fetch.
            let guard = BusyGuard { cref: &cref };
            let result = match self.fetch(reference, endpoint).await {
                Ok(data) => disk::write_block(&cref.file, &data).map(|_| data),
                Err(err) => Err(err),
            };
            {
                let mut st = cref.state.lock().unwrap();
                st.busy = false;
                if let Ok(data) = &result {
                    st.valid = true;
                    st.size = data.len() as i64;
                    self.bytes.fetch_add(st.size, Ordering::Relaxed);
                }
                // A failed fetch leaves the descriptor invalid but in
                // the LRU so the next caller retries.
            }
            std::mem::forget(guard);
            cref.done.notify_waiters();
            // The fetch may have pushed the cache over budget.
            self.enforce_budget();
            return result;
        }
    }

    /// Writes a block through to the upstream store at `endpoint` and
    /// caches it locally. Returns the content-addressed reference the
    /// store assigned.
    pub async fn put(&self, data: &[u8], endpoint: &Endpoint) -> Result<Reference> {
        self.enforce_budget();

        let store = self.dialer.dial(endpoint).map_err(|e| annotate(OP_PUT, e))?;
        let reference = store.put(data).await.map_err(|e| annotate(OP_PUT, e))?;
        if check_reference(OP_PUT, &reference).is_err() {
            warn!(reference = %reference, "upstream reference unsafe as a file name; not caching");
            return Ok(reference);
        }

        let key = CacheKey { endpoint: endpoint.clone(), reference: reference.clone() };
        let cref = self.descriptor(&key);
        {
            let mut st = cref.state.lock().unwrap();
            if st.valid || st.busy {
                // Someone else already holds or is producing the bytes.
                return Ok(reference);
            }
            st.busy = true;
        }
        // No await between claiming busy and releasing it, so no guard
        // is needed here.
        let written = disk::write_block(&cref.file, data);
        {
            let mut st = cref.state.lock().unwrap();
            st.busy = false;
            if written.is_ok() {
                st.valid = true;
                st.size = data.len() as i64;
                self.bytes.fetch_add(st.size, Ordering::Relaxed);
            }
        }
        cref.done.notify_waiters();
        if let Err(err) = written {
            // The upstream store holds the bytes; a cold local cache is
            // not a failure of the put.
            warn!(reference = %reference, error = %err, "failed to cache block locally");
        }
        self.enforce_budget();
        Ok(reference)
    }

    /// Removes a block from the upstream store and from the local
    /// cache. A descriptor with a fetch in flight is left alone.
    pub async fn delete(&self, reference: &Reference, endpoint: &Endpoint) -> Result<()> {
        check_reference(OP_DELETE, reference)?;
        let store = self.dialer.dial(endpoint).map_err(|e| annotate(OP_DELETE, e))?;
        store.delete(reference).await.map_err(|e| annotate(OP_DELETE, e))?;

        let key = CacheKey { endpoint: endpoint.clone(), reference: reference.clone() };
        let mut victim = None;
        {
            let mut lru = self.lru.lock().unwrap();
            if let Some(cref) = lru.peek(&key).map(Arc::clone) {
                let mut st = cref.state.lock().unwrap();
                if !st.busy {
                    if st.valid {
                        st.valid = false;
                        self.bytes.fetch_sub(st.size, Ordering::Relaxed);
                    }
                    drop(st);
                    lru.pop(&key);
                    victim = Some(cref.file.clone());
                }
            }
        }
        if let Some(file) = victim {
            let _ = std::fs::remove_file(file);
        }
        Ok(())
    }

    // Returns the descriptor for `key`, creating it cold if absent, and
    // promotes it in the LRU.
    fn descriptor(&self, key: &CacheKey) -> Arc<CachedRef> {
        let mut lru = self.lru.lock().unwrap();
        if let Some(cref) = lru.get(key) {
            return Arc::clone(cref);
        }
        let cref = Arc::new(CachedRef {
            file: disk::block_path(&self.root, &key.endpoint, &key.reference),
            state: Mutex::new(RefState { size: 0, valid: false, busy: false }),
            done: Notify::new(),
        });
        lru.push(key.clone(), Arc::clone(&cref));
        cref
    }

    // Evicts oldest-first until the budget holds, skipping busy
    // descriptors. Files are unlinked after the LRU lock is released.
    fn enforce_budget(&self) {
        let mut victims = Vec::new();
        {
            let mut lru = self.lru.lock().unwrap();
            let mut busy = Vec::new();
            let mut scans = lru.len();
            while scans > 0 && self.over_budget(lru.len() + busy.len()) {
                scans -= 1;
                let (key, cref) = match lru.pop_lru() {
                    Some(kv) => kv,
                    None => break,
                };
                let mut st = cref.state.lock().unwrap();
                if st.busy {
                    warn!(reference = %key.reference, "eviction skipping busy cache entry");
                    drop(st);
                    busy.push((key, cref));
                    continue;
                }
                if st.valid {
                    st.valid = false;
                    self.bytes.fetch_sub(st.size, Ordering::Relaxed);
                }
                drop(st);
                victims.push(cref.file.clone());
            }
            for (key, cref) in busy {
                lru.push(key, cref);
            }
        }
        for file in victims {
            let _ = std::fs::remove_file(file);
        }
    }

    fn over_budget(&self, entries: usize) -> bool {
        self.bytes.load(Ordering::Relaxed) > self.max_bytes || entries > self.max_entries
    }

    // Fetches from upstream, following indirection breadth-first with a
    // visited set so redirect cycles terminate.
    async fn fetch(&self, reference: &Reference, endpoint: &Endpoint) -> Result<Vec<u8>> {
        let mut queue = VecDeque::new();
        queue.push_back(Location::new(endpoint.clone(), reference.clone()));
        let mut visited = HashSet::new();
        let mut last_err = None;

        while let Some(location) = queue.pop_front() {
            if !visited.insert(location.clone()) {
                continue;
            }
            let store = match self.dialer.dial(&location.endpoint) {
                Ok(store) => store,
                Err(err) => {
                    last_err = Some(err);
                    continue;
                }
            };
            match get_with_retry(store.as_ref(), &location.reference).await {
                Ok(Fetched::Data(data)) => return Ok(data),
                Ok(Fetched::Redirect(locations)) => queue.extend(locations),
                // Try the next location.
                Err(err) => last_err = Some(err),
            }
        }
        Err(match last_err {
            Some(err) => annotate(OP_GET, err),
            None => Error::new(OP_GET, Kind::NotExist)
                .path(reference.as_str())
                .detail("no location held the block"),
        })
    }
}

// Retries transient upstream faults with a bounded pause; any other
// outcome returns immediately. Cancellation lands on the sleep or the
// round-trip itself.
async fn get_with_retry(store: &dyn Store, reference: &Reference) -> Result<Fetched> {
    let mut attempt = 0;
    loop {
        match store.get(reference).await {
            Err(err) if err.is(Kind::Transient) && attempt + 1 < FETCH_ATTEMPTS => {
                attempt += 1;
                debug!(reference = %reference, attempt, "transient store fault; retrying");
                tokio::time::sleep(RETRY_PAUSE).await;
            }
            other => return other,
        }
    }
}

fn annotate(op: &'static str, err: Error) -> Error {
    Error::new(op, err.kind).cause(err)
}

// References become file names; refuse anything that cannot be one.
fn check_reference(op: &'static str, reference: &Reference) -> Result<()> {
    let name = reference.as_str();
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '='));
    if ok {
        Ok(())
    } else {
        Err(Error::new(op, Kind::Invalid).detail(format!("bad reference {name:?}")))
    }
}

// Wakes waiters of a descriptor whose fetch was cancelled mid-flight.
struct BusyGuard<'a> {
    cref: &'a CachedRef,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.cref.state.lock().unwrap();
        st.busy = false;
        drop(st);
        self.cref.done.notify_waiters();
    }
}
