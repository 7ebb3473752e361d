//! Parsing and evaluation of Access files.
//!
//! An Access file is a line-oriented UTF-8 text file granting rights to
//! principals: plain users, `*@domain` wildcards, group paths, or the
//! universal wildcard `all`. The parsed [`Access`] record answers
//! [`Access::can`] and [`Access::users`] queries, loading group files
//! lazily through an injected [`group::GroupLoader`] with cycle
//! protection.

pub mod group;

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::errors::{Error, Kind, Result};
use crate::path::{self, Parsed, UserName, ALL_USERS, ALL_USERS_QUALIFIED, GROUP_DIR};
use group::{Group, GroupCache, GroupLoader};

const OP_PARSE: &str = "access.parse";
const OP_CAN: &str = "access.can";

/// Number of concrete rights.
pub const NUM_RIGHTS: usize = 5;

/// A right a principal may hold on a path. [`Right::Any`] is the
/// synthetic "any of the five" query used for existence checks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Right {
    Read,
    Write,
    List,
    Create,
    Delete,
    Any,
}

impl Right {
    /// The five concrete rights, in canonical order.
    pub const ALL: [Right; NUM_RIGHTS] =
        [Right::Read, Right::Write, Right::List, Right::Create, Right::Delete];

    fn index(self) -> Option<usize> {
        match self {
            Right::Read => Some(0),
            Right::Write => Some(1),
            Right::List => Some(2),
            Right::Create => Some(3),
            Right::Delete => Some(4),
            Right::Any => None,
        }
    }

    /// The canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Right::Read => "read",
            Right::Write => "write",
            Right::List => "list",
            Right::Create => "create",
            Right::Delete => "delete",
            Right::Any => "any",
        }
    }

    // Parses one token from the rights position of a rule. `*` expands
    // to all five rights.
    fn parse_token(token: &str) -> Option<Vec<Right>> {
        if token == "*" {
            return Some(Right::ALL.to_vec());
        }
        let lower = token.to_ascii_lowercase();
        let right = match lower.as_str() {
            "r" | "read" => Right::Read,
            "w" | "write" => Right::Write,
            "l" | "list" => Right::List,
            "c" | "create" => Right::Create,
            "d" | "delete" => Right::Delete,
            _ => return None,
        };
        Some(vec![right])
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A principal named in an Access or Group file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The universal wildcard: every user.
    All,
    /// One user.
    User(UserName),
    /// Every user in one domain.
    Wildcard(String),
    /// The members of a group file, expanded lazily.
    Group(Parsed),
}

impl Principal {
    /// Parses one token from the users position of a rule. Unqualified
    /// group names resolve against `owner`.
    pub(crate) fn parse(owner: &UserName, token: &str) -> Result<Principal> {
        let invalid = |detail: String| Error::new(OP_PARSE, Kind::Invalid).detail(detail);

        if token.eq_ignore_ascii_case(ALL_USERS) || token.eq_ignore_ascii_case(ALL_USERS_QUALIFIED)
        {
            return Ok(Principal::All);
        }
        if let Some(domain) = token.strip_prefix("*@") {
            if domain.is_empty() || !domain.contains('.') {
                return Err(invalid(format!("bad wildcard domain {token:?}")));
            }
            return Ok(Principal::Wildcard(domain.to_ascii_lowercase()));
        }
        if token.contains('/') {
            let parsed = path::parse(token)?;
            if !parsed.is_group_file() {
                return Err(invalid(format!("{token:?} is not a group path")));
            }
            return Ok(Principal::Group(parsed));
        }
        if token.contains('@') {
            return Ok(Principal::User(UserName::parse(token)?));
        }
        // An unqualified group name belongs to the file's owner.
        let group = path::parse(&format!("{}/{}/{}", owner.as_str(), GROUP_DIR, token))?;
        Ok(Principal::Group(group))
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::All => f.write_str(ALL_USERS),
            Principal::User(u) => f.write_str(u.as_str()),
            Principal::Wildcard(d) => write!(f, "*@{d}"),
            Principal::Group(g) => f.write_str(g.path()),
        }
    }
}

/// A parsed Access file: for each right, the principals granted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    parsed: Parsed,
    owner: UserName,
    lists: [Vec<Principal>; NUM_RIGHTS],
}

impl Access {
    /// Parses the contents of the Access file at `parsed`.
    pub fn parse(parsed: Parsed, data: &[u8]) -> Result<Self> {
        if !parsed.is_access_file() {
            return Err(Error::new(OP_PARSE, Kind::Invalid)
                .path(parsed.path())
                .detail("not an Access file path"));
        }
        let text = std::str::from_utf8(data).map_err(|_| {
            Error::new(OP_PARSE, Kind::Invalid).path(parsed.path()).detail("not UTF-8")
        })?;

        let owner = parsed.user().clone();
        let mut lists: [Vec<Principal>; NUM_RIGHTS] = Default::default();

        for (lineno, raw) in text.lines().enumerate() {
            let lineno = lineno + 1;
            let line = match raw.find('#') {
                Some(i) => &raw[..i],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let invalid = |detail: String| {
                Error::new(OP_PARSE, Kind::Invalid)
                    .path(parsed.path())
                    .detail(format!("line {lineno}: {detail}"))
            };

            let (rights_part, users_part) = line
                .split_once(':')
                .ok_or_else(|| invalid("a rule is rights, a colon, then users".to_string()))?;

            let mut rights = Vec::new();
            for token in rights_part.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    return Err(invalid("blank right in rights list".to_string()));
                }
                match Right::parse_token(token) {
                    Some(parsed_rights) => rights.extend(parsed_rights),
                    None => return Err(invalid(format!("unknown right {token:?}"))),
                }
            }
            if rights.is_empty() {
                return Err(invalid("blank rights list".to_string()));
            }

            let mut users = Vec::new();
            for token in users_part.split(|c: char| c == ',' || c.is_whitespace()) {
                if token.is_empty() {
                    continue;
                }
                let principal = Principal::parse(&owner, token).map_err(|e| {
                    invalid(format!("bad user {token:?}")).cause(e)
                })?;
                if !users.contains(&principal) {
                    users.push(principal);
                }
            }
            if users.is_empty() {
                return Err(invalid("blank users list".to_string()));
            }
            if users.contains(&Principal::All) && users.len() > 1 {
                return Err(invalid(format!("\"{ALL_USERS}\" must appear alone")));
            }

            for right in rights {
                let list = &mut lists[right.index().unwrap()];
                for user in &users {
                    if !list.contains(user) {
                        list.push(user.clone());
                    }
                }
            }
        }

        for list in &mut lists {
            list.sort_by_key(|p| p.to_string());
        }

        Ok(Self { parsed, owner, lists })
    }

    /// The implicit Access record of a tree with no Access file: the
    /// owner holds every right, non-owners hold none.
    pub fn default_for(owner: UserName) -> Self {
        let parsed = Parsed::root(owner.clone()).child(path::ACCESS_FILE);
        let lists = std::array::from_fn(|_| vec![Principal::User(owner.clone())]);
        Self { parsed, owner, lists }
    }

    /// The path of the Access file this record was parsed from.
    pub fn parsed(&self) -> &Parsed {
        &self.parsed
    }

    /// The user owning the tree the Access file lives in.
    pub fn owner(&self) -> &UserName {
        &self.owner
    }

    /// The principals granted `right`, as sorted display strings.
    /// [`Right::Any`] unions all five lists.
    pub fn list(&self, right: Right) -> Vec<String> {
        let mut out = BTreeSet::new();
        for i in self.indices(right) {
            for principal in &self.lists[i] {
                out.insert(principal.to_string());
            }
        }
        out.into_iter().collect()
    }

    /// Reports whether some rule grants Read to every user.
    pub fn is_readable_by_all(&self) -> bool {
        self.lists[0].contains(&Principal::All)
    }

    /// The canonical textual form: one line per right with a sorted
    /// user list. Re-parsing it yields an equal record.
    pub fn marshal(&self) -> String {
        let mut out = String::new();
        for right in Right::ALL {
            let list = &self.lists[right.index().unwrap()];
            if list.is_empty() {
                continue;
            }
            out.push_str(right.name());
            out.push_str(": ");
            for (i, principal) in list.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&principal.to_string());
            }
            out.push('\n');
        }
        out
    }

    fn indices(&self, right: Right) -> Vec<usize> {
        match right.index() {
            Some(i) => vec![i],
            None => (0..NUM_RIGHTS).collect(),
        }
    }

    /// Decides whether `requester` holds `right` on `path`.
    ///
    /// The owner of the tree always holds Read and List anywhere in it,
    /// and every right on Access and Group files. Groups named in the
    /// rule lists are loaded on demand through `loader`; a group that
    /// does not exist only denies the rights it would have granted.
    pub async fn can(
        &self,
        requester: &UserName,
        right: Right,
        path: &Parsed,
        groups: &GroupCache,
        loader: &dyn GroupLoader,
    ) -> Result<bool> {
        if path.user() != &self.owner {
            return Err(Error::new(OP_CAN, Kind::Internal)
                .path(path.path())
                .detail("path is outside the tree this Access file governs"));
        }
        if requester == &self.owner {
            if matches!(right, Right::Read | Right::List | Right::Any) {
                return Ok(true);
            }
            if path.is_access_file() || path.is_group_file() {
                return Ok(true);
            }
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        for i in self.indices(right) {
            for principal in &self.lists[i] {
                match principal {
                    Principal::All => return Ok(true),
                    Principal::User(u) => {
                        if u == requester {
                            return Ok(true);
                        }
                    }
                    Principal::Wildcard(domain) => {
                        if requester.domain() == domain {
                            return Ok(true);
                        }
                    }
                    Principal::Group(g) => queue.push_back(g.clone()),
                }
            }
        }

        while let Some(group_path) = queue.pop_front() {
            if !visited.insert(group_path.path().to_string()) {
                continue;
            }
            let group = match load_group(&group_path, groups, loader).await? {
                Some(group) => group,
                // Missing groups only deny what they would have granted.
                None => continue,
            };
            for member in group.members() {
                match member {
                    Principal::All => return Ok(true),
                    Principal::User(u) => {
                        if u == requester {
                            return Ok(true);
                        }
                    }
                    Principal::Wildcard(domain) => {
                        if requester.domain() == domain {
                            return Ok(true);
                        }
                    }
                    Principal::Group(g) => queue.push_back(g.clone()),
                }
            }
        }
        Ok(false)
    }

    /// The users granted `right`, with groups expanded, plus the group
    /// paths that could not be loaded. Wildcards and `all` appear
    /// verbatim. The owner is included for the implicit Read and List
    /// rights.
    pub async fn users(
        &self,
        right: Right,
        groups: &GroupCache,
        loader: &dyn GroupLoader,
    ) -> Result<(Vec<String>, Vec<Parsed>)> {
        let mut out = BTreeSet::new();
        let mut missing = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if matches!(right, Right::Read | Right::List | Right::Any) {
            out.insert(self.owner.as_str().to_string());
        }
        for i in self.indices(right) {
            for principal in &self.lists[i] {
                match principal {
                    Principal::Group(g) => queue.push_back(g.clone()),
                    other => {
                        out.insert(other.to_string());
                    }
                }
            }
        }
        while let Some(group_path) = queue.pop_front() {
            if !visited.insert(group_path.path().to_string()) {
                continue;
            }
            let group = match load_group(&group_path, groups, loader).await? {
                Some(group) => group,
                None => {
                    missing.push(group_path);
                    continue;
                }
            };
            for member in group.members() {
                match member {
                    Principal::Group(g) => queue.push_back(g.clone()),
                    other => {
                        out.insert(other.to_string());
                    }
                }
            }
        }
        Ok((out.into_iter().collect(), missing))
    }
}

// Fetches a group through the cache, parsing and caching it on a miss.
// Returns None when the backing file does not exist.
async fn load_group(
    group_path: &Parsed,
    groups: &GroupCache,
    loader: &dyn GroupLoader,
) -> Result<Option<Arc<Group>>> {
    if let Some(cached) = groups.get(group_path) {
        return Ok(Some(cached));
    }
    match loader.load(group_path).await {
        Ok(bytes) => {
            let group = Group::parse(group_path.clone(), &bytes)?;
            Ok(Some(groups.insert(group)))
        }
        Err(err) if err.is(Kind::NotExist) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests;
