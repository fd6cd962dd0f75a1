use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Durable key-value store backed by a single flat JSON file.
///
/// The whole download collection lives under one logical key; values are
/// opaque serialized strings. Writes go through a temp sibling plus rename
/// so a crash mid-write never leaves a torn file behind.
pub struct StateStore {
    entries: Mutex<Map<String, Value>>,
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create state dir: {}", parent.display()))?;
        }
        let entries = if path_ref.exists() {
            let raw = std::fs::read_to_string(path_ref)
                .with_context(|| format!("read state file: {}", path_ref.display()))?;
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                // Unreadable state is dropped rather than blocking startup.
                _ => Map::new(),
            }
        } else {
            Map::new()
        };
        Ok(Self {
            entries: Mutex::new(entries),
            path: path_ref.to_path_buf(),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().expect("state store mutex poisoned");
        entries.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.lock().expect("state store mutex poisoned");
            entries.insert(key.to_string(), Value::String(value.to_string()));
            Value::Object(entries.clone())
        };
        self.flush(&snapshot)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.lock().expect("state store mutex poisoned");
            entries.remove(key);
            Value::Object(entries.clone())
        };
        self.flush(&snapshot)
    }

    fn flush(&self, snapshot: &Value) -> Result<()> {
        let serialized = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized)
            .with_context(|| format!("write state temp file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace state file: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::StateStore;

    #[test]
    fn set_get_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json")).expect("create store");
        assert_eq!(store.get("offline_tours"), None);
        store.set("offline_tours", "[]").expect("set");
        assert_eq!(store.get("offline_tours").as_deref(), Some("[]"));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        {
            let store = StateStore::new(&path).expect("create store");
            store.set("offline_tours", r#"[{"id":"1"}]"#).expect("set");
        }
        let reopened = StateStore::new(&path).expect("reopen store");
        assert_eq!(
            reopened.get("offline_tours").as_deref(),
            Some(r#"[{"id":"1"}]"#)
        );
    }

    #[test]
    fn remove_drops_the_key_durably() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path).expect("create store");
        store.set("offline_tours", "[]").expect("set");
        store.remove("offline_tours").expect("remove");
        assert_eq!(store.get("offline_tours"), None);

        let reopened = StateStore::new(&path).expect("reopen store");
        assert_eq!(reopened.get("offline_tours"), None);
    }

    #[test]
    fn corrupt_file_yields_empty_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json at all").expect("write garbage");
        let store = StateStore::new(&path).expect("open over garbage");
        assert_eq!(store.get("offline_tours"), None);
    }
}
