//! Glob pattern planning for directory listings.
//!
//! A pattern splits into its longest metacharacter-free prefix, which
//! decides what to list from the backend, and a compiled matcher applied
//! to each candidate. `*` never crosses a slash.

use glob::{MatchOptions, Pattern};

use crate::errors::{Error, Kind, Result};
use crate::path::Parsed;

const OP: &str = "dir.glob";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug)]
pub(crate) struct GlobPlan {
    pattern: Pattern,
    prefix: Parsed,
    depth: usize,
}

impl GlobPlan {
    /// Plans a glob over the parsed pattern. Returns `None` when the
    /// pattern has no metacharacters and is just a path.
    pub fn new(parsed: &Parsed) -> Result<Option<GlobPlan>> {
        let mut literal = parsed.nelem();
        for i in 0..parsed.nelem() {
            if has_meta(parsed.elem(i)) {
                literal = i;
                break;
            }
        }
        if literal == parsed.nelem() {
            return Ok(None);
        }
        let pattern = Pattern::new(parsed.path()).map_err(|e| {
            Error::new(OP, Kind::Invalid).path(parsed.path()).detail(e.to_string())
        })?;
        Ok(Some(GlobPlan {
            pattern,
            prefix: parsed.first(literal),
            depth: parsed.nelem() - literal,
        }))
    }

    /// The longest metacharacter-free prefix of the pattern.
    pub fn prefix(&self) -> &Parsed {
        &self.prefix
    }

    /// Number of pattern elements below the prefix.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Applies the pattern to a candidate key.
    pub fn matches(&self, candidate: &str) -> bool {
        self.pattern.matches_with(candidate, MATCH_OPTIONS)
    }
}

fn has_meta(elem: &str) -> bool {
    elem.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
}
