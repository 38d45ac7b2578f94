//! Ordered key/value store backing the dataset header.
//!
//! Keys map to arbitrary byte-string values; iteration is always ascending
//! lexicographic. [`KeyTable::snapshot`] copies the current key list so a
//! caller may keep iterating while mutating the store underneath.
//!
//! Chunk-hook dispatch (the side effects of setting `NAME` or
//! `NAME.<attr>` keys) lives with the dataset, which owns the chunk arena;
//! this module is storage only.

use std::collections::BTreeMap;

use crate::types::{MAX_KEY_LENGTH, MAX_VALUE_LENGTH};

/// True if `key` is a well-formed key name: 1..=255 bytes of printable
/// ASCII, no `=`, no whitespace other than tab.
pub fn valid_key_name(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LENGTH
        && key
            .bytes()
            .all(|b| b == b'\t' || ((0x21..=0x7e).contains(&b) && b != b'='))
}

/// True if `value` fits the format's value-length limit.
pub fn valid_value(value: &str) -> bool {
    value.len() <= MAX_VALUE_LENGTH
}

/// The key/value pairs of one dataset.
#[derive(Debug, Default)]
pub struct KeyTable {
    map: BTreeMap<String, String>,
}

impl KeyTable {
    pub fn new() -> KeyTable {
        KeyTable { map: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Inserts or replaces, returning the previous value if any.
    pub fn insert(&mut self, key: &str, value: &str) -> Option<String> {
        self.map.insert(key.to_string(), value.to_string())
    }

    /// Removes a key, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    /// Owned copy of the key list in ascending lexicographic order.
    pub fn snapshot(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    /// Borrowed iteration in ascending key order (header serialization).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Snapshot iterator over key names, tolerant of store mutation after
/// creation.
pub struct KeyIter {
    inner: std::vec::IntoIter<String>,
}

impl KeyIter {
    pub(crate) fn new(table: &KeyTable) -> KeyIter {
        KeyIter { inner: table.snapshot().into_iter() }
    }
}

impl Iterator for KeyIter {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_is_lexicographic() {
        let mut t = KeyTable::new();
        t.insert("zeta", "1");
        t.insert("alpha", "2");
        t.insert("alpha.x", "3");
        t.insert("!format", "pgh");
        let keys = t.snapshot();
        assert_eq!(keys, ["!format", "alpha", "alpha.x", "zeta"]);
    }

    #[test]
    fn snapshot_survives_mutation() {
        let mut t = KeyTable::new();
        t.insert("a", "1");
        t.insert("b", "2");
        let mut it = KeyIter::new(&t);
        assert_eq!(it.next().as_deref(), Some("a"));
        t.remove("b");
        assert_eq!(it.next().as_deref(), Some("b"));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn key_name_rules() {
        assert!(valid_key_name("images.extent.x"));
        assert!(valid_key_name("!format"));
        assert!(valid_key_name("with\ttab"));
        assert!(!valid_key_name(""));
        assert!(!valid_key_name("has space"));
        assert!(!valid_key_name("a=b"));
        assert!(!valid_key_name("new\nline"));
        assert!(!valid_key_name(&"k".repeat(MAX_KEY_LENGTH + 1)));
    }

    #[test]
    fn value_length_rule() {
        assert!(valid_value(&"v".repeat(MAX_VALUE_LENGTH)));
        assert!(!valid_value(&"v".repeat(MAX_VALUE_LENGTH + 1)));
    }
}
