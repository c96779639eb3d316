//! Persistent key/value storage seam.
//!
//! The backing store only knows opaque strings; whether a value is a plain
//! string or a JSON structure is this layer's concern, recorded with the
//! `is_JSON` prefix so typed reads can tell the two apart.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::importer::diagnostics::{ImportError, ImportResult};

const IS_JSON_KEY: &str = "is_JSON";

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
}

/// Typed encoding layer over a [`KvStore`] backend.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn KvStore>,
}

impl Store {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn set_text(&self, key: &str, value: &str) {
        self.backend.set(key, value.to_string());
    }

    pub fn get_text(&self, key: &str) -> Option<String> {
        self.backend.get(key)
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> ImportResult<()> {
        let encoded = serde_json::to_string(value)
            .map_err(|e| ImportError::store(format!("cannot encode '{}': {}", key, e)))?;
        self.backend.set(key, format!("{}{}", IS_JSON_KEY, encoded));
        Ok(())
    }

    /// `Ok(None)` on a missing key; a present key that does not decode as
    /// the expected structure is an error, not a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> ImportResult<Option<T>> {
        let Some(found) = self.backend.get(key) else {
            return Ok(None);
        };
        let payload = found.strip_prefix(IS_JSON_KEY).ok_or_else(|| {
            ImportError::store(format!("value under '{}' is not a JSON record", key))
        })?;
        serde_json::from_str(payload)
            .map(Some)
            .map_err(|e| ImportError::store(format!("corrupt record under '{}': {}", key, e)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }
}

/// Single-file store: the whole map is read at open and rewritten on every
/// set. Good enough for a per-project cache file.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        match serde_json::to_string(entries) {
            Ok(text) => {
                if let Err(e) = fs::write(&self.path, text) {
                    eprintln!("esimport: cannot persist store to {}: {}", self.path.display(), e);
                }
            }
            Err(e) => eprintln!("esimport: cannot encode store: {}", e),
        }
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value);
        self.persist(&entries);
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_plain_string_round_trip() {
        let store = Store::in_memory();
        store.set_text("greeting", "hello");
        assert_eq!(store.get_text("greeting").as_deref(), Some("hello"));
    }

    #[test]
    fn test_json_round_trip_uses_prefix() {
        let store = Store::in_memory();
        let record = Record {
            name: "a".to_string(),
            count: 2,
        };
        store.set_json("record", &record).unwrap();

        // The raw value carries the marker; the typed read strips it.
        assert!(store.get_text("record").unwrap().starts_with("is_JSON"));
        assert_eq!(store.get_json::<Record>("record").unwrap(), Some(record));
    }

    #[test]
    fn test_missing_key_is_none() {
        let store = Store::in_memory();
        assert_eq!(store.get_json::<Record>("absent").unwrap(), None);
    }

    #[test]
    fn test_plain_value_read_as_json_is_an_error() {
        let store = Store::in_memory();
        store.set_text("record", "not json");
        assert!(store.get_json::<Record>("record").is_err());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = JsonFileStore::open(&path);
            store.set("k", "v".to_string());
        }
        let reopened = JsonFileStore::open(&path);
        assert_eq!(reopened.get("k").as_deref(), Some("v"));
    }
}
