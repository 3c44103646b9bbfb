//! Crash-consistent JSON key-value store.
//!
//! Every write re-reads the file, three-way merges (last read, on disk, in
//! memory) and replaces the file via write-temp-then-rename, so concurrent
//! writers never drop each other's unrelated top-level keys.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{CritloopError, Result};

/// Serializes read-merge-rename cycles within the process
static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Mergeable JSON object persisted at a single path
#[derive(Debug, Clone)]
pub struct ContextStore {
    path: PathBuf,
    /// Content as of the last read or write
    base: Map<String, Value>,
    memory: Map<String, Value>,
}

impl ContextStore {
    /// Open the store at `path`, loading existing content if present
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let base = read_map(&path)?;
        Ok(Self {
            path,
            memory: base.clone(),
            base,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.memory.get(key)
    }

    /// Deserialize a key, returning `None` when absent or mistyped
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.memory
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.memory.clone()
    }

    /// Set one key and persist
    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let mut updates = Map::new();
        updates.insert(key.into(), serde_json::to_value(value)?);
        self.update(updates)
    }

    /// Apply `updates` on top of memory and persist via three-way merge
    pub fn update(&mut self, updates: Map<String, Value>) -> Result<()> {
        let mut ours = self.memory.clone();
        ours.extend(updates);
        self.persist(ours)
    }

    /// Remove one key and persist
    pub fn remove(&mut self, key: &str) -> Result<()> {
        let mut ours = self.memory.clone();
        ours.remove(key);
        self.persist(ours)
    }

    /// Pick up changes made on disk by other writers
    pub fn reload(&mut self) -> Result<()> {
        let theirs = read_map(&self.path)?;
        self.memory = merge_three_way(&self.base, &theirs, &self.memory);
        self.base = theirs;
        Ok(())
    }

    fn persist(&mut self, ours: Map<String, Value>) -> Result<()> {
        let _guard = WRITE_LOCK
            .lock()
            .map_err(|e| CritloopError::Storage(format!("context lock poisoned: {}", e)))?;

        let theirs = read_map(&self.path)?;
        let merged = merge_three_way(&self.base, &theirs, &ours);
        write_atomic(&self.path, &merged)?;

        self.base = merged.clone();
        self.memory = merged;
        Ok(())
    }
}

/// Merge two descendants of `base` key by key.
///
/// A key changed (added, modified or removed) in `ours` relative to `base`
/// takes our value; every other key takes `theirs`.
pub fn merge_three_way(
    base: &Map<String, Value>,
    theirs: &Map<String, Value>,
    ours: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = theirs.clone();

    let keys = base.keys().chain(ours.keys());
    for key in keys {
        let changed = base.get(key) != ours.get(key);
        if !changed {
            continue;
        }
        match ours.get(key) {
            Some(value) => {
                merged.insert(key.clone(), value.clone());
            }
            None => {
                merged.remove(key);
            }
        }
    }

    merged
}

fn read_map(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(map),
        other => Err(CritloopError::Storage(format!(
            "{} does not hold a JSON object (found {})",
            path.display(),
            type_name(&other)
        ))),
    }
}

fn write_atomic(path: &Path, map: &Map<String, Value>) -> Result<()> {
    let suffix: u32 = rand::rng().random();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "context.json".to_string());
    let tmp = path.with_file_name(format!(".{}.{:08x}.tmp", file_name, suffix));

    let body = serde_json::to_string_pretty(map)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        CritloopError::Storage(format!("failed to replace {}: {}", path.display(), e))
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ContextStore::open(dir.path().join("nested/context.json")).unwrap();
        assert!(store.snapshot().is_empty());
        assert!(dir.path().join("nested").exists());
    }

    #[test]
    fn test_set_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("context.json");

        let mut store = ContextStore::open(&path).unwrap();
        store.set("task", "solve it").unwrap();
        store.set("count", 3).unwrap();

        let reopened = ContextStore::open(&path).unwrap();
        assert_eq!(reopened.get("task"), Some(&json!("solve it")));
        assert_eq!(reopened.get_as::<u32>("count"), Some(3));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let mut store = ContextStore::open(dir.path().join("context.json")).unwrap();
        store.set("a", 1).unwrap();
        store.set("b", 2).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_keep_unrelated_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("context.json");

        let mut first = ContextStore::open(&path).unwrap();
        let mut second = ContextStore::open(&path).unwrap();

        first.set("a", 1).unwrap();
        second.set("b", 2).unwrap();
        first.set("c", 3).unwrap();

        let on_disk = ContextStore::open(&path).unwrap().snapshot();
        assert_eq!(Value::Object(on_disk), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_remove_survives_merge() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("context.json");

        let mut first = ContextStore::open(&path).unwrap();
        first.set("a", 1).unwrap();
        let mut second = ContextStore::open(&path).unwrap();
        second.set("b", 2).unwrap();

        first.remove("a").unwrap();
        let on_disk = ContextStore::open(&path).unwrap().snapshot();
        assert_eq!(Value::Object(on_disk), json!({"b": 2}));
    }

    #[test]
    fn test_reload_picks_up_other_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("context.json");

        let mut first = ContextStore::open(&path).unwrap();
        let mut second = ContextStore::open(&path).unwrap();
        second.set("from_second", true).unwrap();

        first.reload().unwrap();
        assert_eq!(first.get("from_second"), Some(&json!(true)));
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("context.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = ContextStore::open(&path).unwrap_err();
        assert!(matches!(err, CritloopError::Storage(_)));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let base = map(json!({"a": 1, "b": 2}));
        let theirs = map(json!({"a": 1, "b": 5, "t": 0}));
        let ours = map(json!({"a": 9, "b": 2}));

        let once = merge_three_way(&base, &theirs, &ours);
        let twice = merge_three_way(&base, &once, &ours);
        assert_eq!(once, twice);
        assert_eq!(Value::Object(once), json!({"a": 9, "b": 5, "t": 0}));
    }

    #[test]
    fn test_merge_commutative_on_disjoint_keys() {
        let base = map(json!({"shared": 0}));
        let left = map(json!({"shared": 0, "x": 1}));
        let right = map(json!({"shared": 0, "y": 2}));

        let lr = merge_three_way(&base, &left, &right);
        let rl = merge_three_way(&base, &right, &left);
        assert_eq!(lr, rl);
        assert_eq!(Value::Object(lr), json!({"shared": 0, "x": 1, "y": 2}));
    }

    #[test]
    fn test_merge_ours_wins_on_conflict() {
        let base = map(json!({"k": "base"}));
        let theirs = map(json!({"k": "theirs"}));
        let ours = map(json!({"k": "ours"}));
        assert_eq!(merge_three_way(&base, &theirs, &ours)["k"], json!("ours"));
    }
}
