//! Parsing and manipulation of global path names.
//!
//! Every path is rooted at a user identity and has the form
//! `user@domain/elem/elem/...`. Parsing canonicalizes the name: the domain
//! is lowercased, redundant slashes collapse, and a trailing slash is
//! accepted on a root. Re-parsing the string form of a [`Parsed`] yields an
//! equal value.

use std::cmp::Ordering;
use std::fmt;

use crate::errors::{Error, Kind, Result};

/// Maximum number of bytes allowed in one path element.
pub const MAX_ELEM_LEN: usize = 255;

/// Maximum number of bytes allowed in a full path name.
pub const MAX_PATH_LEN: usize = 1024;

/// Reserved name of the file whose contents govern permissions for the
/// directory holding it.
pub const ACCESS_FILE: &str = "Access";

/// Reserved name of the directory, directly under a root, that holds
/// named group files.
pub const GROUP_DIR: &str = "Group";

/// The universal-wildcard user token as written in Access and Group files.
pub const ALL_USERS: &str = "all";

/// The fully qualified form of the universal wildcard.
pub const ALL_USERS_QUALIFIED: &str = "all@upspin.io";

const OP_PARSE: &str = "path.parse";
const OP_USER: &str = "path.user";

/// A validated user identity of the form `local@domain`.
///
/// The domain is stored lowercased so comparison is case-insensitive; the
/// local part is preserved as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserName(String);

impl UserName {
    /// Parses and validates a user name.
    ///
    /// The local part must be non-empty and the domain must contain at
    /// least one interior dot. The local part `all` is reserved for the
    /// universal wildcard and only permitted as `all@upspin.io`.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |detail: &str| -> Error {
            Error::new(OP_USER, Kind::Invalid).path(name).detail(detail.to_string())
        };

        let (local, domain) = match name.split_once('@') {
            Some(parts) => parts,
            None => return Err(invalid("user name must contain @")),
        };
        if local.is_empty() {
            return Err(invalid("missing local part"));
        }
        if domain.is_empty() {
            return Err(invalid("missing domain"));
        }
        if domain.contains('@') {
            return Err(invalid("user name must contain one @"));
        }
        if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
            return Err(invalid("domain must contain an interior dot"));
        }
        if domain.chars().any(|c| c == '/' || c.is_whitespace()) {
            return Err(invalid("bad character in domain"));
        }
        if local.chars().any(|c| c == '/' || c.is_whitespace()) {
            return Err(invalid("bad character in local part"));
        }

        let domain = domain.to_ascii_lowercase();
        if local.eq_ignore_ascii_case(ALL_USERS) {
            if domain != "upspin.io" {
                return Err(invalid("the local name \"all\" is reserved"));
            }
            return Ok(Self(ALL_USERS_QUALIFIED.to_string()));
        }

        Ok(Self(format!("{local}@{domain}")))
    }

    /// The canonical `local@domain` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lowercased domain part.
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map(|(_, d)| d).unwrap_or("")
    }

    /// Reports whether this is the universal wildcard `all@upspin.io`.
    pub fn is_all_users(&self) -> bool {
        self.0 == ALL_USERS_QUALIFIED
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed, canonical path name: an owning user and an ordered sequence
/// of elements. A root has zero elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parsed {
    user: UserName,
    elems: Vec<String>,
    // Canonical string form, rebuilt on construction.
    path: String,
}

/// Parses a path name of the form `user@domain[/elem]*[/]`.
pub fn parse(name: &str) -> Result<Parsed> {
    if name.len() > MAX_PATH_LEN {
        return Err(Error::new(OP_PARSE, Kind::Invalid).path(name).detail("name too long"));
    }

    let (user_part, rest) = match name.find('/') {
        Some(i) => (&name[..i], &name[i..]),
        None => (name, ""),
    };
    let user = UserName::parse(user_part)
        .map_err(|e| Error::new(OP_PARSE, Kind::Invalid).path(name).cause(e))?;

    let mut elems = Vec::new();
    for elem in rest.split('/') {
        if elem.is_empty() {
            // Collapses doubled slashes and accepts a trailing slash.
            continue;
        }
        if elem == "." || elem == ".." {
            return Err(Error::new(OP_PARSE, Kind::Invalid)
                .path(name)
                .detail("relative path element"));
        }
        if elem.len() > MAX_ELEM_LEN {
            return Err(Error::new(OP_PARSE, Kind::Invalid).path(name).detail("name element too long"));
        }
        elems.push(elem.to_string());
    }

    // Access names a file, so nothing may live beneath it; Group is a
    // directory allowed only directly under the root.
    for (i, elem) in elems.iter().enumerate() {
        if elem == ACCESS_FILE && i != elems.len() - 1 {
            return Err(Error::new(OP_PARSE, Kind::Invalid)
                .path(name)
                .detail("Access is a reserved file name"));
        }
        if elem == GROUP_DIR && i != 0 {
            return Err(Error::new(OP_PARSE, Kind::Invalid)
                .path(name)
                .detail("Group is reserved for the directory under the root"));
        }
    }

    Ok(Parsed::from_parts(user, elems))
}

impl Parsed {
    fn from_parts(user: UserName, elems: Vec<String>) -> Self {
        let mut path = String::with_capacity(user.as_str().len() + 1);
        path.push_str(user.as_str());
        if elems.is_empty() {
            path.push('/');
        } else {
            for elem in &elems {
                path.push('/');
                path.push_str(elem);
            }
        }
        Self { user, elems, path }
    }

    /// The root path for `user`.
    pub fn root(user: UserName) -> Self {
        Self::from_parts(user, Vec::new())
    }

    /// The owning user.
    pub fn user(&self) -> &UserName {
        &self.user
    }

    /// Number of elements after the user name.
    pub fn nelem(&self) -> usize {
        self.elems.len()
    }

    /// The i-th element. Panics if `i` is out of range, like slice
    /// indexing.
    pub fn elem(&self, i: usize) -> &str {
        &self.elems[i]
    }

    /// Reports whether the path is a user root.
    pub fn is_root(&self) -> bool {
        self.elems.is_empty()
    }

    /// The prefix of the path with `k` elements. `k` is clamped to the
    /// element count.
    pub fn first(&self, k: usize) -> Parsed {
        let k = k.min(self.elems.len());
        Self::from_parts(self.user.clone(), self.elems[..k].to_vec())
    }

    /// The ancestor `k` levels up. `k` is clamped to the element count.
    pub fn drop_elems(&self, k: usize) -> Parsed {
        let keep = self.elems.len().saturating_sub(k);
        self.first(keep)
    }

    /// The immediate parent. For a root this is the root itself.
    pub fn parent(&self) -> Parsed {
        self.drop_elems(1)
    }

    /// The path extended by one element. The element must already be
    /// validated.
    pub fn child(&self, elem: &str) -> Parsed {
        let mut elems = self.elems.clone();
        elems.push(elem.to_string());
        Self::from_parts(self.user.clone(), elems)
    }

    /// The slash-joined element list, without the user name.
    pub fn file_path(&self) -> String {
        self.elems.join("/")
    }

    /// The canonical string form. Roots carry a trailing slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Three-way comparison in canonical string order.
    pub fn compare(&self, other: &Parsed) -> Ordering {
        self.path.cmp(&other.path)
    }

    /// Reports whether the final element names an Access file.
    pub fn is_access_file(&self) -> bool {
        self.elems.last().map(String::as_str) == Some(ACCESS_FILE)
    }

    /// Reports whether the path names a file inside the root's Group
    /// directory.
    pub fn is_group_file(&self) -> bool {
        self.elems.len() >= 2 && self.elems[0] == GROUP_DIR
    }

    /// Reports whether `self` is `ancestor` or lies beneath it.
    pub fn has_prefix(&self, ancestor: &Parsed) -> bool {
        self.user == ancestor.user
            && self.elems.len() >= ancestor.elems.len()
            && self.elems[..ancestor.elems.len()] == ancestor.elems[..]
    }
}

impl fmt::Display for Parsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests;
