//! Reading and writing entry data through the store cache.
//!
//! [`BlockSource`] turns a [`DirEntry`] back into its bytes by fetching
//! each block through the cache and unpacking it. [`Client`] is the thin
//! write side used by the archive tool and the tests: it splits data
//! into blocks, packs them, stores them, and hands the entry to the
//! directory service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dir::DirServer;
use crate::endpoint::{Endpoint, Location};
use crate::entry::{Attr, Block, DirEntry, Packing, Sequence, Time};
use crate::errors::{Error, Kind, Result};
use crate::packing;
use crate::path;
use crate::store::cache::StoreCache;

const OP_READ: &str = "client.read";
const OP_PUT: &str = "client.put";

/// Largest block the client writes.
pub const BLOCK_SIZE: usize = 1024 * 1024;

/// Fetches and unpacks the full data of a directory entry.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn read_all(&self, entry: &DirEntry) -> Result<Vec<u8>>;
}

/// A [`ContentSource`] reading blocks through the store cache.
pub struct BlockSource {
    cache: Arc<StoreCache>,
}

impl BlockSource {
    pub fn new(cache: Arc<StoreCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ContentSource for BlockSource {
    async fn read_all(&self, entry: &DirEntry) -> Result<Vec<u8>> {
        if entry.is_dir() {
            return Err(Error::new(OP_READ, Kind::IsDir).path(&entry.name));
        }
        if entry.is_incomplete() {
            return Err(Error::new(OP_READ, Kind::Invalid)
                .path(&entry.name)
                .detail("entry has no block locations"));
        }
        let size = entry.size()?;
        let packer = packing::lookup(entry.packing)?;

        let mut out = Vec::with_capacity(size as usize);
        for block in &entry.blocks {
            let stored =
                self.cache.get(&block.location.reference, &block.location.endpoint).await?;
            let clear = packer.unpack(entry, block, &stored)?;
            if clear.len() as i64 != block.size {
                return Err(Error::new(OP_READ, Kind::IO)
                    .path(&entry.name)
                    .detail("block size does not match its descriptor"));
            }
            out.extend_from_slice(&clear);
        }
        Ok(out)
    }
}

/// Write-side helper over a directory service and a store cache.
pub struct Client {
    dir: DirServer,
    cache: Arc<StoreCache>,
    store_endpoint: Endpoint,
    source: BlockSource,
}

impl Client {
    pub fn new(dir: DirServer, cache: Arc<StoreCache>, store_endpoint: Endpoint) -> Self {
        let source = BlockSource::new(Arc::clone(&cache));
        Self { dir, cache, store_endpoint, source }
    }

    pub fn dir(&self) -> &DirServer {
        &self.dir
    }

    /// Stores `data` under `name`: packs it into blocks, writes them
    /// through the cache, then puts the entry.
    pub async fn put(
        &self,
        name: &str,
        data: &[u8],
        pack: Packing,
        sequence: Sequence,
    ) -> Result<DirEntry> {
        let parsed = path::parse(name)?;
        let mut entry = DirEntry {
            name: parsed.path().to_string(),
            signed_name: parsed.path().to_string(),
            attr: Attr::None,
            packing: pack,
            sequence,
            time: Time::now(),
            writer: String::new(),
            blocks: Vec::new(),
            packdata: Vec::new(),
            link: None,
        };

        let packer = packing::lookup(pack)?;
        let mut offset = 0;
        for chunk in data.chunks(BLOCK_SIZE) {
            let (stored, packdata) = packer.pack(&entry, chunk)?;
            let reference = self
                .cache
                .put(&stored, &self.store_endpoint)
                .await
                .map_err(|e| Error::new(OP_PUT, e.kind).path(parsed.path()).cause(e))?;
            entry.blocks.push(Block {
                offset,
                size: chunk.len() as i64,
                location: Location::new(self.store_endpoint.clone(), reference),
                packdata,
            });
            offset += chunk.len() as i64;
        }
        self.dir.put(entry).await
    }

    /// Fetches the full data of the entry at `name`.
    pub async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.dir.lookup(name).await?;
        if entry.is_link() {
            return Err(Error::new(OP_READ, Kind::Invalid).path(name).detail("path is a link"));
        }
        self.source.read_all(&entry).await
    }
}
