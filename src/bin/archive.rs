//! Archive utility: loads a local directory tree into a namespace and
//! emits a manifest of the resulting entries, or verifies that every
//! loaded file reads back byte-identical.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use canopy::client::Client;
use canopy::config::Config;
use canopy::entry::{Attr, DirEntry, Packing, SEQ_IGNORE};
use canopy::errors::{Error, Kind, Result};
use canopy::path::{parse, Parsed, UserName};
use canopy::server::{self, Context};

const OP_ARCHIVE: &str = "archive";
const OP_LOAD: &str = "archive.load";

#[derive(Parser)]
#[command(name = "canopy-archive", about = "Snapshot and verify a canopy user tree")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a local directory into the namespace and write a manifest
    /// of the resulting tree.
    Archive {
        /// Local directory to load.
        source: PathBuf,
        /// Where to write the JSON manifest.
        manifest: PathBuf,
    },
    /// Load a local directory and read every file back, comparing
    /// bytes.
    Verify {
        /// Local directory to load and check.
        source: PathBuf,
    },
}

#[derive(Serialize)]
struct ManifestEntry {
    path: String,
    kind: &'static str,
    size: i64,
    sequence: i64,
    writer: String,
    references: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("canopy-archive: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let user = UserName::parse(&config.user)?;

    let mut tmp = None;
    let cache_dir = match &config.cache_dir {
        Some(dir) => dir.clone(),
        None => {
            let dir = tempfile::tempdir().map_err(|e| Error::io(OP_ARCHIVE, e))?;
            let path = dir.path().to_path_buf();
            tmp = Some(dir);
            path
        }
    };

    let world = server::in_process(
        &user,
        &cache_dir,
        config.cache_max_bytes,
        config.cache_max_entries,
    )?;
    let dir = world.dir.dial(&Context::new(user.clone()));
    let client = Client::new(dir, world.cache, world.store_endpoint);

    let outcome = match cli.command {
        Command::Archive { source, manifest } => {
            let root = load_tree(&user, &client, &source).await?;
            let entries = walk_namespace(&client, &root).await?;
            write_manifest(&entries, &manifest)?;
            println!("archived {} entries to {}", entries.len(), manifest.display());
            Ok(())
        }
        Command::Verify { source } => {
            let root = load_tree(&user, &client, &source).await?;
            let checked = verify_tree(&client, &root, &source).await?;
            println!("verified {checked} files");
            Ok(())
        }
    };
    drop(tmp);
    outcome
}

// Creates the user's root and mirrors the local directory into it.
async fn load_tree(user: &UserName, client: &Client, source: &Path) -> Result<Parsed> {
    let root = Parsed::root(user.clone());
    client.dir().make_directory(root.path()).await?;
    load_dir(client, &root, source).await?;
    Ok(root)
}

async fn load_dir(client: &Client, at: &Parsed, local: &Path) -> Result<()> {
    let mut children = Vec::new();
    let iter = std::fs::read_dir(local).map_err(|e| Error::io(OP_LOAD, e))?;
    for child in iter {
        children.push(child.map_err(|e| Error::io(OP_LOAD, e))?);
    }
    children.sort_by_key(|c| c.file_name());

    for child in children {
        let name = match child.file_name().into_string() {
            Ok(name) => name,
            Err(_) => {
                tracing::warn!(dir = %local.display(), "skipping non-UTF-8 file name");
                continue;
            }
        };
        let target = parse(at.child(&name).path())?;
        let file_type = child.file_type().map_err(|e| Error::io(OP_LOAD, e))?;
        if file_type.is_dir() {
            client.dir().make_directory(target.path()).await?;
            // The recursion depth is the local tree's depth.
            Box::pin(load_dir(client, &target, &child.path())).await?;
        } else if file_type.is_file() {
            let data = std::fs::read(child.path()).map_err(|e| Error::io(OP_LOAD, e))?;
            let packing = if target.is_access_file() || target.is_group_file() {
                Packing::Integrity
            } else {
                Packing::Plain
            };
            client.put(target.path(), &data, packing, SEQ_IGNORE).await?;
        } else {
            tracing::warn!(path = %child.path().display(), "skipping special file");
        }
    }
    Ok(())
}

// Lists the whole tree level by level through Glob.
async fn walk_namespace(client: &Client, root: &Parsed) -> Result<Vec<DirEntry>> {
    let mut all = Vec::new();
    let mut pattern = format!("{}*", root.path());
    loop {
        let level = client.dir().glob(&pattern).await?;
        if level.is_empty() {
            break;
        }
        all.extend(level);
        pattern.push_str("/*");
    }
    Ok(all)
}

fn write_manifest(entries: &[DirEntry], manifest: &Path) -> Result<()> {
    let mut out = Vec::new();
    for entry in entries {
        out.push(ManifestEntry {
            path: entry.name.clone(),
            kind: match entry.attr {
                Attr::Directory => "dir",
                Attr::Link => "link",
                _ => "file",
            },
            size: entry.size()?,
            sequence: entry.sequence,
            writer: entry.writer.clone(),
            references: entry
                .blocks
                .iter()
                .map(|b| b.location.reference.as_str().to_string())
                .collect(),
        });
    }
    let blob = serde_json::to_vec_pretty(&out)
        .map_err(|e| Error::new(OP_ARCHIVE, Kind::IO).detail(e.to_string()))?;
    std::fs::write(manifest, blob).map_err(|e| Error::io(OP_ARCHIVE, e))?;
    Ok(())
}

// Reads every loaded file back through the services and compares it
// with the local copy.
async fn verify_tree(client: &Client, root: &Parsed, source: &Path) -> Result<usize> {
    let entries = walk_namespace(client, root).await?;
    let mut checked = 0;
    for entry in &entries {
        if entry.attr != Attr::None {
            continue;
        }
        let stored = client.get(&entry.name).await?;
        let parsed = parse(&entry.name)?;
        let local = source.join(parsed.file_path());
        let expect = std::fs::read(&local).map_err(|e| Error::io(OP_ARCHIVE, e))?;
        if stored != expect {
            return Err(Error::new(OP_ARCHIVE, Kind::Internal)
                .path(&entry.name)
                .detail("stored bytes differ from the local copy"));
        }
        checked += 1;
    }
    Ok(checked)
}
