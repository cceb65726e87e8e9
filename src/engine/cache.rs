//! Key allocation, declaration memo table and the per-parse binding map
//!
//! The [`Cache`] outlives every reparse: once `(source, parents)` has a key,
//! that declaration is never evaluated again, even if it disappears from the
//! file and comes back later. [`Bindings`] is rebuilt on every reparse.

use std::collections::{BTreeSet, HashMap};

use crate::schema::Key;

/// Deduplicated, sorted set of keys a declaration reads from
pub type ParentSet = BTreeSet<Key>;

/// Persistent map from `(source text, parent keys)` to key
#[derive(Debug, Default)]
pub struct Cache {
    next_key: u64,
    entries: HashMap<(String, ParentSet), Key>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a key that has never been issued before
    pub fn fresh_key(&mut self) -> Key {
        let key = Key(self.next_key);
        self.next_key += 1;
        key
    }

    pub fn lookup(&self, source: &str, parents: &ParentSet) -> Option<Key> {
        self.entries
            .get(&(source.to_string(), parents.clone()))
            .copied()
    }

    /// Record `key` for a declaration instance and return the key the
    /// cache now holds for it. An existing entry is never replaced, so the
    /// returned key differs from `key` only when one was already recorded.
    pub fn insert(&mut self, source: &str, parents: ParentSet, key: Key) -> Key {
        *self
            .entries
            .entry((source.to_string(), parents))
            .or_insert(key)
    }

    /// Number of memoized declaration instances
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which key most recently defined each name in the current parse
#[derive(Debug, Default)]
pub struct Bindings {
    names: HashMap<String, Key>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    /// Later bindings shadow earlier ones
    pub fn bind(&mut self, name: impl Into<String>, key: Key) {
        self.names.insert(name.into(), key);
    }

    pub fn get(&self, name: &str) -> Option<Key> {
        self.names.get(name).copied()
    }

    /// Resolve free variables to parent keys. Unbound names are globals and
    /// are dropped.
    pub fn resolve<I, S>(&self, free_vars: I) -> ParentSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        free_vars
            .into_iter()
            .filter_map(|name| self.get(name.as_ref()))
            .collect()
    }
}
