use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::clock::now_rfc3339;
use crate::error::PersistenceError;

use super::{read_json, write_atomic};

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Serialize)]
struct SeenFileOut<'a> {
    updated_at: String,
    seen_urls: Vec<&'a str>,
}

#[derive(Deserialize)]
struct SeenFileIn {
    #[serde(default)]
    seen_urls: Vec<String>,
}

/// Drop query string and fragment so tracking parameters don't defeat dedup.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut u) => {
            u.set_query(None);
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or(raw)
            .to_string(),
    }
}

/// Most-recent-N set of listing URLs, oldest first.
#[derive(Debug, Clone)]
pub struct SeenSet {
    order: VecDeque<String>,
    index: HashSet<String>,
    capacity: usize,
    path: PathBuf,
    dirty: bool,
}

impl SeenSet {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            index: HashSet::new(),
            capacity: capacity.max(1),
            path: path.into(),
            dirty: false,
        }
    }

    /// Missing file is an empty set. Entries beyond capacity drop the oldest.
    pub fn load(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, PersistenceError> {
        let mut set = Self::new(path, capacity);
        match read_json::<SeenFileIn>(&set.path)? {
            Some(file) => {
                for url in file.seen_urls {
                    set.push(normalize_url(&url));
                }
            }
            None => debug!("[seen] {} not found, starting empty", set.path.display()),
        }
        set.dirty = false;
        Ok(set)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains(&normalize_url(url))
    }

    /// True if the URL was new.
    pub fn insert(&mut self, url: &str) -> bool {
        let inserted = self.push(normalize_url(url));
        self.dirty |= inserted;
        inserted
    }

    fn push(&mut self, url: String) -> bool {
        if self.index.contains(&url) {
            return false;
        }
        self.index.insert(url.clone());
        self.order.push_back(url);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.index.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist only when something was added since load; returns whether it wrote.
    pub fn save_if_dirty(&mut self) -> Result<bool, PersistenceError> {
        if !self.dirty {
            return Ok(false);
        }
        let out = SeenFileOut {
            updated_at: now_rfc3339(),
            seen_urls: self.order.iter().map(String::as_str).collect(),
        };
        let json = serde_json::to_string_pretty(&out)?;
        write_atomic(&self.path, json.as_bytes())?;
        self.dirty = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_query_and_fragment() {
        assert_eq!(
            normalize_url("https://example.com/item/1?utm=x&ref=y#photo"),
            "https://example.com/item/1"
        );
        assert_eq!(normalize_url("/item/1?x=1"), "/item/1");
    }

    #[test]
    fn query_variants_are_the_same_listing() {
        let mut s = SeenSet::new("unused.json", 10);
        assert!(s.insert("https://example.com/a?from=feed"));
        assert!(s.contains("https://example.com/a"));
        assert!(!s.insert("https://example.com/a?from=search"));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn eviction_keeps_newest() {
        let mut s = SeenSet::new("unused.json", 3);
        for i in 0..5 {
            s.insert(&format!("https://example.com/{i}"));
        }
        assert_eq!(s.len(), 3);
        assert!(!s.contains("https://example.com/0"));
        assert!(!s.contains("https://example.com/1"));
        assert!(s.contains("https://example.com/4"));
    }

    #[test]
    fn save_skipped_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");
        let mut s = SeenSet::load(&path, 10).unwrap();
        assert!(!s.save_if_dirty().unwrap());
        assert!(!path.exists());

        s.insert("https://example.com/x");
        assert!(s.save_if_dirty().unwrap());
        assert!(!s.save_if_dirty().unwrap());

        let reloaded = SeenSet::load(&path, 10).unwrap();
        assert!(reloaded.contains("https://example.com/x?again=1"));
    }

    #[test]
    fn load_caps_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");
        std::fs::write(
            &path,
            r#"{"updated_at":"x","seen_urls":["https://e.com/1","https://e.com/2","https://e.com/3"]}"#,
        )
        .unwrap();
        let s = SeenSet::load(&path, 2).unwrap();
        assert_eq!(s.len(), 2);
        assert!(!s.contains("https://e.com/1"));
    }
}
