//! On-disk layout of the store cache.
//!
//! Blocks live under `<root>/<endpoint>/<first-two-chars-of-ref>/<ref>`.
//! Writes go to a `.tmp` file in the target directory and are renamed
//! into place, as atomically as the platform allows.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::endpoint::{Endpoint, Reference};
use crate::errors::{Error, Result};

const OP_WRITE: &str = "cache.write";
const OP_SCAN: &str = "cache.scan";

/// One block found on disk during the startup walk.
pub(crate) struct ScannedBlock {
    pub endpoint: Endpoint,
    pub reference: Reference,
    pub file: PathBuf,
    pub size: i64,
}

/// The file a cached block lives in.
pub(crate) fn block_path(root: &Path, endpoint: &Endpoint, reference: &Reference) -> PathBuf {
    let name = reference.as_str();
    let shard = if name.len() >= 2 { &name[..2] } else { name };
    root.join(endpoint.to_string()).join(shard).join(name)
}

/// Writes `data` to `target` via a temp file in the same directory.
pub(crate) fn write_block(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target.parent().unwrap();
    fs::create_dir_all(parent).map_err(|e| Error::io(OP_WRITE, e))?;

    let mut tmp = tempfile::Builder::new()
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| Error::io(OP_WRITE, e))?;
    tmp.write_all(data).map_err(|e| Error::io(OP_WRITE, e))?;
    tmp.persist(target)
        .map_err(|e| Error::io(OP_WRITE, e.error))?;
    Ok(())
}

/// Walks the cache root, returning every valid block and cleaning up
/// stale temp files, unreadable files, and empty directories.
pub(crate) fn scan(root: &Path) -> Result<Vec<ScannedBlock>> {
    fs::create_dir_all(root).map_err(|e| Error::io(OP_SCAN, e))?;
    let mut blocks = Vec::new();

    for endpoint_dir in read_dir(root)? {
        let endpoint_name = match endpoint_dir.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        let endpoint = match Endpoint::parse(&endpoint_name) {
            Ok(endpoint) => endpoint,
            Err(_) => {
                // Not one of ours; leave it alone.
                continue;
            }
        };
        let endpoint_path = endpoint_dir.path();

        for shard_dir in read_dir(&endpoint_path)? {
            let shard_path = shard_dir.path();
            if !shard_path.is_dir() {
                let _ = fs::remove_file(&shard_path);
                continue;
            }
            for file in read_dir(&shard_path)? {
                let path = file.path();
                let name = match file.file_name().into_string() {
                    Ok(name) => name,
                    Err(_) => {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                };
                if name.ends_with(".tmp") {
                    let _ = fs::remove_file(&path);
                    continue;
                }
                match fs::metadata(&path) {
                    Ok(meta) if meta.is_file() => blocks.push(ScannedBlock {
                        endpoint: endpoint.clone(),
                        reference: Reference::new(name),
                        file: path,
                        size: meta.len() as i64,
                    }),
                    _ => {
                        let _ = fs::remove_file(&path);
                    }
                }
            }
            // Empty after cleanup: drop the shard directory.
            let _ = fs::remove_dir(&shard_path);
        }
        let _ = fs::remove_dir(&endpoint_path);
    }
    Ok(blocks)
}

fn read_dir(path: &Path) -> Result<Vec<fs::DirEntry>> {
    let iter = fs::read_dir(path).map_err(|e| Error::io(OP_SCAN, e))?;
    let mut out = Vec::new();
    for entry in iter {
        out.push(entry.map_err(|e| Error::io(OP_SCAN, e))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_block_then_scan() {
        let tmp = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::remote("store.example.com:443");
        let reference = Reference::new("abcdef123456");

        let target = block_path(tmp.path(), &endpoint, &reference);
        write_block(&target, b"block bytes").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"block bytes");

        let scanned = scan(tmp.path()).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].endpoint, endpoint);
        assert_eq!(scanned[0].reference, reference);
        assert_eq!(scanned[0].size, 11);
    }

    #[test]
    fn test_scan_removes_stale_temp_files_and_empty_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::in_process();
        let reference = Reference::new("cafe0001");

        let target = block_path(tmp.path(), &endpoint, &reference);
        write_block(&target, b"keep").unwrap();
        let stale = target.with_file_name("orphan.tmp");
        fs::write(&stale, b"junk").unwrap();
        let empty = tmp.path().join("inprocess").join("zz");
        fs::create_dir_all(&empty).unwrap();

        let scanned = scan(tmp.path()).unwrap();
        assert_eq!(scanned.len(), 1);
        assert!(!stale.exists());
        assert!(!empty.exists());
        assert!(target.exists());
    }

    #[test]
    fn test_block_path_shards_by_reference_prefix() {
        let root = Path::new("/cache");
        let p = block_path(root, &Endpoint::in_process(), &Reference::new("abXYZ"));
        assert_eq!(p, Path::new("/cache/inprocess/ab/abXYZ"));
    }
}
