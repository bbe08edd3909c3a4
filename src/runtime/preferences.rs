//! Persisted key/value preferences.
//!
//! The store is opaque to the rest of the runtime: strings and byte blobs
//! keyed by name. `JsonPreferenceStore` keeps them in a single JSON file;
//! `MemoryPreferenceStore` is for embedding hosts that persist elsewhere.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::api::types::ApiError;

/// Preferred plugin identifier (string)
pub const KEY_PREFERRED_PLUGIN: &str = "preferredPlugin";
/// Save directory access token (bytes)
pub const KEY_SAVE_DIRECTORY_GRANT: &str = "SaveDirectoryBookmark";
/// Last seen remote validator for the default plugin (string)
pub const KEY_UPDATE_VALIDATOR: &str = "pluginUpdateETag";

/// Key/value preference storage.
pub trait PreferenceStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    fn set_string(&self, key: &str, value: &str) -> Result<(), ApiError>;

    fn get_bytes(&self, key: &str) -> Option<Vec<u8>>;

    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<(), ApiError>;

    fn remove(&self, key: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
enum StoredValue {
    String(String),
    /// Base64 encoded so the file stays valid UTF-8 JSON
    Bytes(String),
}

fn decode_bytes(value: &StoredValue) -> Option<Vec<u8>> {
    match value {
        StoredValue::Bytes(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok(),
        StoredValue::String(_) => None,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory preference store.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, StoredValue>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get_string(&self, key: &str) -> Option<String> {
        match lock(&self.values).get(key) {
            Some(StoredValue::String(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), ApiError> {
        lock(&self.values).insert(key.to_string(), StoredValue::String(value.to_string()));
        Ok(())
    }

    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.values).get(key).and_then(decode_bytes)
    }

    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<(), ApiError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        lock(&self.values).insert(key.to_string(), StoredValue::Bytes(encoded));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ApiError> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Preference store persisted as a JSON document.
///
/// Every mutation rewrites the whole file through a temp file + rename.
/// An unreadable or corrupt file starts the store empty instead of failing.
pub struct JsonPreferenceStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, StoredValue>>,
}

impl JsonPreferenceStore {
    /// Open (or lazily create) the preference file at `path`.
    pub fn open(path: PathBuf) -> Self {
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(values) => values,
                Err(e) => {
                    log::warn!(
                        "Ignoring unreadable preferences: path={}, error={e}",
                        path.display()
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                log::warn!(
                    "Failed to read preferences: path={}, error={e}",
                    path.display()
                );
                BTreeMap::new()
            }
        };

        log::debug!(
            "Preferences opened: path={}, keys={}",
            path.display(),
            values.len()
        );

        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<String, StoredValue>)) -> Result<(), ApiError> {
        let mut values = lock(&self.values);
        let mut next = values.clone();
        apply(&mut next);
        self.persist(&next)?;
        *values = next;
        Ok(())
    }

    fn persist(&self, values: &BTreeMap<String, StoredValue>) -> Result<(), ApiError> {
        let json = serde_json::to_string_pretty(values).map_err(|e| ApiError::IoError {
            message: format!("Failed to serialize preferences: {e}"),
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApiError::IoError {
                message: format!("Failed to create preferences directory: {e}"),
            })?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "preferences.json".to_string());
        let temp_path = self.path.with_file_name(format!(".{file_name}.tmp"));

        std::fs::write(&temp_path, json).map_err(|e| ApiError::IoError {
            message: format!("Failed to write preferences: {e}"),
        })?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            ApiError::IoError {
                message: format!("Failed to replace preferences file: {e}"),
            }
        })
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn get_string(&self, key: &str) -> Option<String> {
        match lock(&self.values).get(key) {
            Some(StoredValue::String(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), ApiError> {
        self.mutate(|values| {
            values.insert(key.to_string(), StoredValue::String(value.to_string()));
        })
    }

    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.values).get(key).and_then(decode_bytes)
    }

    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<(), ApiError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        self.mutate(|values| {
            values.insert(key.to_string(), StoredValue::Bytes(encoded));
        })
    }

    fn remove(&self, key: &str) -> Result<(), ApiError> {
        self.mutate(|values| {
            values.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use uuid::Uuid;

    #[test]
    fn test_memory_store_strings_and_bytes() {
        let store = MemoryPreferenceStore::new();
        assert_eq!(store.get_string(KEY_PREFERRED_PLUGIN), None);

        store.set_string(KEY_PREFERRED_PLUGIN, "shotty").unwrap();
        store.set_bytes(KEY_SAVE_DIRECTORY_GRANT, &[0, 159, 146, 150]).unwrap();

        assert_eq!(store.get_string(KEY_PREFERRED_PLUGIN).as_deref(), Some("shotty"));
        assert_eq!(
            store.get_bytes(KEY_SAVE_DIRECTORY_GRANT),
            Some(vec![0, 159, 146, 150])
        );
        // Type mismatches read as absent
        assert_eq!(store.get_bytes(KEY_PREFERRED_PLUGIN), None);
        assert_eq!(store.get_string(KEY_SAVE_DIRECTORY_GRANT), None);

        store.remove(KEY_PREFERRED_PLUGIN).unwrap();
        assert_eq!(store.get_string(KEY_PREFERRED_PLUGIN), None);
    }

    #[test]
    fn test_json_store_persists_across_instances() {
        let dir = env::temp_dir().join(format!("prefs_{}", Uuid::new_v4()));
        let path = dir.join("preferences.json");

        {
            let store = JsonPreferenceStore::open(path.clone());
            store.set_string(KEY_UPDATE_VALIDATOR, "\"abc123\"").unwrap();
            store.set_bytes(KEY_SAVE_DIRECTORY_GRANT, b"token").unwrap();
        }

        let reopened = JsonPreferenceStore::open(path.clone());
        assert_eq!(
            reopened.get_string(KEY_UPDATE_VALIDATOR).as_deref(),
            Some("\"abc123\"")
        );
        assert_eq!(reopened.get_bytes(KEY_SAVE_DIRECTORY_GRANT), Some(b"token".to_vec()));

        std::fs::remove_dir_all(&dir).expect("failed to remove prefs dir");
    }

    #[test]
    fn test_json_store_ignores_corrupt_file() {
        let dir = env::temp_dir().join(format!("prefs_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("preferences.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonPreferenceStore::open(path.clone());
        assert_eq!(store.get_string(KEY_PREFERRED_PLUGIN), None);
        store.set_string(KEY_PREFERRED_PLUGIN, "shotty").unwrap();
        assert_eq!(
            JsonPreferenceStore::open(path)
                .get_string(KEY_PREFERRED_PLUGIN)
                .as_deref(),
            Some("shotty")
        );

        std::fs::remove_dir_all(&dir).expect("failed to remove prefs dir");
    }
}
