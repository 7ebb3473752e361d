//! Error representation shared by every canopy service.
//!
//! Errors carry the operation that failed, the path it was working on when
//! one applies, a [`Kind`] that callers match on instead of message text,
//! and an optional chained cause.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error classes callers can match on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Malformed input: a bad path, a bad Access file, a bad
    /// sequence number.
    Invalid,
    /// No such directory entry, group, or block reference.
    NotExist,
    /// The name or root already exists where the caller required it
    /// not to.
    Exist,
    /// The item is a directory where a plain file was required.
    IsDir,
    /// The item is not a directory where one was required, including
    /// an attempt to delete a directory that is not empty.
    NotDir,
    /// The access control check denied the operation.
    Permission,
    /// The caller holds no List right, so even the existence of the
    /// item must not leak.
    Private,
    /// Backend or local disk failure, including unmarshaling of a
    /// corrupt persisted blob.
    IO,
    /// The upstream service is temporarily unavailable; the caller
    /// may retry.
    Transient,
    /// The service has not been configured yet.
    NotConfigured,
    /// An internal invariant check failed.
    Internal,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Invalid => "invalid operation",
            Kind::NotExist => "item does not exist",
            Kind::Exist => "item already exists",
            Kind::IsDir => "item is a directory",
            Kind::NotDir => "item is not a directory",
            Kind::Permission => "permission denied",
            Kind::Private => "information withheld",
            Kind::IO => "I/O error",
            Kind::Transient => "temporarily unavailable",
            Kind::NotConfigured => "service not configured",
            Kind::Internal => "internal inconsistency",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An annotated error.
///
/// Built with [`Error::new`] and narrowed with the chaining setters:
///
/// ```text
/// Error::new("dir.put", Kind::Exist).path(name)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// Operation that failed, e.g. `"dir.put"`.
    pub op: &'static str,
    /// Class of the failure.
    pub kind: Kind,
    /// Path the operation was working on, when one applies.
    pub path: Option<String>,
    /// Free-form detail from the failure site.
    pub detail: Option<String>,
    /// Underlying error this one wraps.
    pub cause: Option<Box<Error>>,
}

impl Error {
    /// Creates an error for `op` with the given kind.
    pub fn new(op: &'static str, kind: Kind) -> Self {
        Self { op, kind, path: None, detail: None, cause: None }
    }

    /// Attaches the path the operation was working on.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attaches free-form detail.
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Chains the error that caused this one.
    pub fn cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Wraps a [`std::io::Error`] as [`Kind::IO`].
    pub fn io(op: &'static str, err: std::io::Error) -> Self {
        Self::new(op, Kind::IO).detail(err.to_string())
    }

    /// Reports whether this error, or any error in its cause chain,
    /// has the given kind.
    pub fn is(&self, kind: Kind) -> bool {
        if self.kind == kind {
            return true;
        }
        match &self.cause {
            Some(cause) => cause.is(kind),
            None => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if let Some(path) = &self.path {
            write!(f, ": {path}")?;
        }
        write!(f, ": {}", self.kind)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests;
