//! Prefix trie mapping path prefixes to backend addresses.
//!
//! # Design Decisions
//! - Character-level prefixes: `/api` matches `/api`, `/api/v1` and `/apiary`
//! - Longest stored prefix wins; keys are unique so there are no ties
//! - Values are concrete `RouteEntry`s, no type erasure
//! - Built once per reload and then only read; updates go through a clone

use std::collections::BTreeMap;

use serde::Serialize;

/// A single prefix → backend mapping. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub prefix: String,
    /// Backend listen address as `host:port`.
    pub backend_address: String,
}

impl RouteEntry {
    pub fn new(prefix: impl Into<String>, backend_address: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            backend_address: backend_address.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    entry: Option<RouteEntry>,
    children: BTreeMap<char, Node>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.entry.is_none() && self.children.is_empty()
    }

    /// Remove the entry at `key` below this node, pruning emptied branches.
    fn remove(&mut self, key: &mut std::str::Chars<'_>) -> Option<RouteEntry> {
        match key.next() {
            None => self.entry.take(),
            Some(c) => {
                let child = self.children.get_mut(&c)?;
                let removed = child.remove(key);
                if child.is_empty() {
                    self.children.remove(&c);
                }
                removed
            }
        }
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a RouteEntry>) {
        if let Some(entry) = &self.entry {
            out.push(entry);
        }
        for child in self.children.values() {
            child.collect(out);
        }
    }
}

/// Longest-prefix-match index over route entries.
#[derive(Debug, Clone, Default)]
pub struct RouteStore {
    root: Node,
    len: usize,
}

impl RouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(prefix, backend_address)` pairs. Later duplicates win.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = RouteEntry>,
    {
        let mut store = Self::new();
        for entry in entries {
            store.insert(entry);
        }
        store
    }

    /// Insert or overwrite the entry for `entry.prefix`.
    /// Returns the entry that was replaced, if any.
    pub fn insert(&mut self, entry: RouteEntry) -> Option<RouteEntry> {
        let mut node = &mut self.root;
        for c in entry.prefix.chars() {
            node = node.children.entry(c).or_default();
        }
        let previous = node.entry.replace(entry);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Remove the entry stored under exactly `prefix`. Missing prefixes are a no-op.
    pub fn delete(&mut self, prefix: &str) -> Option<RouteEntry> {
        let removed = self.root.remove(&mut prefix.chars());
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Exact lookup.
    pub fn get(&self, prefix: &str) -> Option<&RouteEntry> {
        let mut node = &self.root;
        for c in prefix.chars() {
            node = node.children.get(&c)?;
        }
        node.entry.as_ref()
    }

    /// The entry whose prefix is the longest prefix of `path`.
    pub fn longest_prefix_match(&self, path: &str) -> Option<&RouteEntry> {
        let mut node = &self.root;
        let mut best = node.entry.as_ref();
        for c in path.chars() {
            match node.children.get(&c) {
                Some(child) => {
                    node = child;
                    if node.entry.is_some() {
                        best = node.entry.as_ref();
                    }
                }
                None => break,
            }
        }
        best
    }

    /// All entries, ordered by prefix.
    pub fn entries(&self) -> Vec<&RouteEntry> {
        let mut out = Vec::with_capacity(self.len);
        self.root.collect(&mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(pairs: &[(&str, &str)]) -> RouteStore {
        RouteStore::from_entries(pairs.iter().map(|(p, a)| RouteEntry::new(*p, *a)))
    }

    fn matched<'a>(s: &'a RouteStore, path: &str) -> Option<&'a str> {
        s.longest_prefix_match(path).map(|e| e.backend_address.as_str())
    }

    #[test]
    fn longest_prefix_wins() {
        let s = store(&[("/a", "A:1"), ("/a/b", "B:2")]);
        assert_eq!(matched(&s, "/a/b/c"), Some("B:2"));
        assert_eq!(matched(&s, "/a/x"), Some("A:1"));
        assert_eq!(matched(&s, "/a"), Some("A:1"));
        assert_eq!(matched(&s, "/z"), None);
    }

    #[test]
    fn matching_is_character_level() {
        let s = store(&[("/api", "A:1")]);
        assert_eq!(matched(&s, "/apiary"), Some("A:1"));
        assert_eq!(matched(&s, "/ap"), None);
    }

    #[test]
    fn empty_prefix_matches_everything() {
        let s = store(&[("", "root:1"), ("/x", "X:1")]);
        assert_eq!(matched(&s, "/y"), Some("root:1"));
        assert_eq!(matched(&s, "/x/1"), Some("X:1"));
    }

    #[test]
    fn insert_overwrites_existing_prefix() {
        let mut s = store(&[("/a", "A:1")]);
        let old = s.insert(RouteEntry::new("/a", "A:2"));
        assert_eq!(old.map(|e| e.backend_address), Some("A:1".to_string()));
        assert_eq!(s.len(), 1);
        assert_eq!(matched(&s, "/a/q"), Some("A:2"));
    }

    #[test]
    fn delete_missing_is_noop() {
        let mut s = store(&[("/a", "A:1")]);
        assert!(s.delete("/nope").is_none());
        assert!(s.delete("/").is_none());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn delete_keeps_descendants_and_ancestors() {
        let mut s = store(&[("/a", "A:1"), ("/a/b", "B:2"), ("/a/b/c", "C:3")]);
        assert!(s.delete("/a/b").is_some());
        assert_eq!(s.len(), 2);
        assert_eq!(matched(&s, "/a/b/x"), Some("A:1"));
        assert_eq!(matched(&s, "/a/b/c/d"), Some("C:3"));
        assert!(s.get("/a/b").is_none());
    }

    #[test]
    fn delete_prunes_branches() {
        let mut s = store(&[("/long/prefix", "L:1")]);
        s.delete("/long/prefix");
        assert!(s.is_empty());
        assert!(s.root.is_empty());
    }

    #[test]
    fn entries_enumerates_everything_in_order() {
        let s = store(&[("/b", "B:1"), ("/a/b", "AB:1"), ("/a", "A:1")]);
        let prefixes: Vec<&str> = s.entries().iter().map(|e| e.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["/a", "/a/b", "/b"]);
    }
}
