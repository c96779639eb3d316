//! Versioned persistent cache for fetched module text.
//!
//! Entries are keyed by canonical path and carry enough provenance to decide
//! whether they still match what the session asked for: the version the
//! fetch resolved to and the override location it was fetched through. A
//! mismatch on either makes the entry invisible to `lookup`, which forces a
//! network fetch; `lookup_any` ignores validity and exists as the stale
//! fallback for failed fetches.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ModuleConfig;
use crate::importer::diagnostics::ImportResult;
use crate::loader::store::Store;

const CACHE_KEY_PREFIX: &str = "esimport:cache:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub text: String,
    pub resolved_url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub override_url: String,
    pub fetched_at: DateTime<Utc>,
    pub content_hash: String,
}

impl CacheEntry {
    pub fn new(text: String, resolved_url: String, version: String, override_url: String) -> Self {
        let content_hash = content_hash(&text);
        Self {
            text,
            resolved_url,
            version,
            override_url,
            fetched_at: Utc::now(),
            content_hash,
        }
    }
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// An unset version on either side matches anything; otherwise the two must
/// be the same release (semver comparison, falling back to string equality
/// for tokens that do not parse).
pub fn versions_match(recorded: &str, requested: &str) -> bool {
    if recorded.is_empty() || requested.is_empty() {
        return true;
    }
    match (Version::parse(recorded), Version::parse(requested)) {
        (Ok(a), Ok(b)) => a == b,
        _ => recorded == requested,
    }
}

#[derive(Clone)]
pub struct CacheStore {
    store: Store,
}

impl CacheStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn key(path: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, path)
    }

    /// A hit only when the recorded version and override location both match
    /// the requested module configuration (no configuration means no pins).
    pub fn lookup(&self, path: &str, config: Option<&ModuleConfig>) -> Option<CacheEntry> {
        let entry = self.lookup_any(path)?;
        let (version, override_url) = match config {
            Some(c) => (c.version.as_str(), c.override_url.as_str()),
            None => ("", ""),
        };
        if !versions_match(&entry.version, version) {
            return None;
        }
        if entry.override_url != override_url {
            return None;
        }
        Some(entry)
    }

    /// The entry regardless of validity. Corrupt records read as a miss.
    pub fn lookup_any(&self, path: &str) -> Option<CacheEntry> {
        self.store.get_json(&Self::key(path)).ok().flatten()
    }

    pub fn record(&self, path: &str, entry: &CacheEntry) -> ImportResult<()> {
        self.store.set_json(&Self::key(path), entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: &str, override_url: &str) -> CacheEntry {
        CacheEntry::new(
            "module text".to_string(),
            "https://unpkg.com/vue@2.6.14/dist/vue.js".to_string(),
            version.to_string(),
            override_url.to_string(),
        )
    }

    fn pinned(version: &str, override_url: &str) -> ModuleConfig {
        ModuleConfig {
            module_name: "vue".to_string(),
            version: version.to_string(),
            override_url: override_url.to_string(),
        }
    }

    fn cache() -> CacheStore {
        CacheStore::new(Store::in_memory())
    }

    #[test]
    fn test_round_trip() {
        let cache = cache();
        let entry = entry("2.6.14", "");
        cache.record("https://unpkg.com/vue", &entry).unwrap();

        let found = cache.lookup_any("https://unpkg.com/vue").unwrap();
        assert_eq!(found, entry);
        assert_eq!(found.content_hash, content_hash("module text"));
    }

    #[test]
    fn test_version_mismatch_is_a_miss() {
        let cache = cache();
        cache.record("https://unpkg.com/vue", &entry("1.0.0", "")).unwrap();

        let config = pinned("2.0.0", "");
        assert!(cache.lookup("https://unpkg.com/vue", Some(&config)).is_none());
        // The stale fallback still sees it.
        assert!(cache.lookup_any("https://unpkg.com/vue").is_some());
    }

    #[test]
    fn test_unpinned_version_matches_anything() {
        let cache = cache();
        cache.record("https://unpkg.com/vue", &entry("1.0.0", "")).unwrap();

        assert!(cache.lookup("https://unpkg.com/vue", None).is_some());
        assert!(cache.lookup("https://unpkg.com/vue", Some(&pinned("", ""))).is_some());
    }

    #[test]
    fn test_override_mismatch_is_a_miss() {
        let cache = cache();
        cache
            .record("https://unpkg.com/vue", &entry("", "https://cdn.a/vue.js"))
            .unwrap();

        assert!(cache.lookup("https://unpkg.com/vue", Some(&pinned("", "https://cdn.b/vue.js"))).is_none());
        assert!(cache.lookup("https://unpkg.com/vue", Some(&pinned("", "https://cdn.a/vue.js"))).is_some());
        assert!(cache.lookup("https://unpkg.com/vue", None).is_none());
    }

    #[test]
    fn test_versions_match_rules() {
        assert!(versions_match("", "2.0.0"));
        assert!(versions_match("2.0.0", ""));
        assert!(versions_match("2.0.0", "2.0.0"));
        assert!(!versions_match("1.0.0", "2.0.0"));
        // Unparseable tokens fall back to string equality.
        assert!(versions_match("next", "next"));
        assert!(!versions_match("next", "latest"));
    }
}
