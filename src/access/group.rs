//! Group files and the evaluator's group cache.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{Error, Kind, Result};
use crate::path::{Parsed, ALL_USERS, ALL_USERS_QUALIFIED};

use super::Principal;

const OP_PARSE: &str = "group.parse";

const GROUP_CACHE_CAPACITY: u64 = 1000;

/// Fetches the raw contents of a group file. Injected by the caller so
/// the evaluator need not know how files are stored; a missing group
/// reports [`Kind::NotExist`].
#[async_trait]
pub trait GroupLoader: Send + Sync {
    async fn load(&self, group: &Parsed) -> Result<Vec<u8>>;
}

/// A parsed group file: a flat list of users, wildcards, and nested
/// group paths.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    parsed: Parsed,
    members: Vec<Principal>,
}

impl Group {
    /// Parses the contents of the group file at `parsed`. Members are
    /// separated by whitespace or commas; `#` starts a comment. The
    /// universal wildcard is never permitted inside a group.
    pub fn parse(parsed: Parsed, data: &[u8]) -> Result<Self> {
        if !parsed.is_group_file() {
            return Err(Error::new(OP_PARSE, Kind::Invalid)
                .path(parsed.path())
                .detail("not a group file path"));
        }
        let text = std::str::from_utf8(data).map_err(|_| {
            Error::new(OP_PARSE, Kind::Invalid).path(parsed.path()).detail("not UTF-8")
        })?;

        let owner = parsed.user().clone();
        let mut members = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(i) => &raw[..i],
                None => raw,
            };
            for token in line.split(|c: char| c == ',' || c.is_whitespace()) {
                if token.is_empty() {
                    continue;
                }
                let member = Principal::parse(&owner, token).map_err(|e| {
                    Error::new(OP_PARSE, Kind::Invalid)
                        .path(parsed.path())
                        .detail(format!("line {}: bad member {token:?}", lineno + 1))
                        .cause(e)
                })?;
                if member == Principal::All {
                    return Err(Error::new(OP_PARSE, Kind::Invalid)
                        .path(parsed.path())
                        .detail(format!(
                            "line {}: \"{ALL_USERS}\" and \"{ALL_USERS_QUALIFIED}\" \
                             may not be group members",
                            lineno + 1
                        )));
                }
                if !members.contains(&member) {
                    members.push(member);
                }
            }
        }

        members.sort_by_key(|m| m.to_string());
        Ok(Self { parsed, members })
    }

    /// The path of the group file.
    pub fn parsed(&self) -> &Parsed {
        &self.parsed
    }

    pub fn members(&self) -> &[Principal] {
        &self.members
    }
}

/// Cache of parsed groups keyed by canonical group path. A group's
/// cache entry lives until its backing file is overwritten or removed.
#[derive(Clone)]
pub struct GroupCache {
    cache: moka::sync::Cache<String, Arc<Group>>,
}

impl GroupCache {
    pub fn new() -> Self {
        Self { cache: moka::sync::Cache::new(GROUP_CACHE_CAPACITY) }
    }

    pub fn get(&self, group: &Parsed) -> Option<Arc<Group>> {
        self.cache.get(group.path())
    }

    pub fn insert(&self, group: Group) -> Arc<Group> {
        let arc = Arc::new(group);
        self.cache.insert(arc.parsed().path().to_string(), Arc::clone(&arc));
        arc
    }

    /// Evicts a group whose backing file changed or disappeared.
    pub fn remove(&self, group: &Parsed) {
        self.cache.invalidate(group.path());
    }

    /// Drops every cached group.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for GroupCache {
    fn default() -> Self {
        Self::new()
    }
}
