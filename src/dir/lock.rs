//! Striped per-user mutexes.
//!
//! Every directory operation serializes on the lock for the tree's
//! owning user. The pool is fixed-size, so unrelated users contend only
//! on hash collisions and the lock table never grows.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::Mutex;

/// Number of locks in the pool.
pub const NUM_USER_LOCKS: usize = 100;

pub struct LockPool {
    locks: Vec<Mutex<()>>,
}

impl LockPool {
    pub fn new() -> Self {
        Self { locks: (0..NUM_USER_LOCKS).map(|_| Mutex::new(())).collect() }
    }

    /// The lock serializing operations on `user`'s tree.
    pub fn for_user(&self, user: &crate::path::UserName) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        user.as_str().hash(&mut hasher);
        &self.locks[(hasher.finish() as usize) % NUM_USER_LOCKS]
    }
}

impl Default for LockPool {
    fn default() -> Self {
        Self::new()
    }
}
