//! Durable key-value storage for entity snapshots.
//!
//! Keys have the shape `{kind}/{id}` (`lobby/…`, `session/…`). Values are
//! JSON documents of the entity state.

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

pub trait Storage: Send + Sync {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in lexical order.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

pub fn lobby_key(id: &str) -> String {
    format!("lobby/{id}")
}

pub fn session_key(id: &str) -> String {
    format!("session/{id}")
}

pub fn save_json<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value)?;
    storage.put(key, bytes)
}

pub fn load_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>, StorageError> {
    match storage.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// One JSON file per entity under `root/{kind}/{id}.json`.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let (kind, id) = split_key(key)?;
        Ok(self.root.join(kind).join(format!("{id}.json")))
    }
}

fn split_key(key: &str) -> Result<(&str, &str), StorageError> {
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };
    match key.split_once('/') {
        Some((kind, id)) if valid(kind) && valid(id) => Ok((kind, id)),
        _ => Err(StorageError::InvalidKey(key.to_string())),
    }
}

fn write_atomic(path: &Path, value: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, value)?;
    fs::rename(&tmp, path)
}

impl Storage for FileStorage {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        write_atomic(&path, &value)?;
        debug!("Persisted {} ({} bytes)", key, value.len());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for kind_entry in fs::read_dir(&self.root)? {
            let kind_entry = kind_entry?;
            if !kind_entry.file_type()?.is_dir() {
                continue;
            }
            let kind = kind_entry.file_name().to_string_lossy().into_owned();
            for entry in fs::read_dir(kind_entry.path())? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if let Some(id) = name.strip_suffix(".json") {
                    let key = format!("{kind}/{id}");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Doc {
        name: String,
    }

    fn exercise(storage: &dyn Storage) {
        save_json(storage, "lobby/a", &Doc { name: "a".into() }).unwrap();
        save_json(storage, "lobby/b", &Doc { name: "b".into() }).unwrap();
        save_json(storage, "session/c", &Doc { name: "c".into() }).unwrap();

        assert_eq!(storage.keys("lobby/").unwrap(), vec!["lobby/a", "lobby/b"]);
        let doc: Option<Doc> = load_json(storage, "session/c").unwrap();
        assert_eq!(doc, Some(Doc { name: "c".into() }));

        storage.delete("lobby/a").unwrap();
        storage.delete("lobby/a").unwrap();
        assert_eq!(storage.keys("lobby/").unwrap(), vec!["lobby/b"]);
        assert!(load_json::<Doc>(storage, "lobby/a").unwrap().is_none());
    }

    #[test]
    fn memory_storage_behaviour() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn file_storage_behaviour() {
        let dir = std::env::temp_dir().join(format!("chess-storage-{}", Uuid::new_v4()));
        let storage = FileStorage::open(&dir).unwrap();
        exercise(&storage);

        // A fresh handle on the same directory sees the same data.
        let reopened = FileStorage::open(&dir).unwrap();
        assert_eq!(reopened.keys("").unwrap(), vec!["lobby/b", "session/c"]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn file_storage_rejects_path_like_keys() {
        let dir = std::env::temp_dir().join(format!("chess-storage-{}", Uuid::new_v4()));
        let storage = FileStorage::open(&dir).unwrap();
        assert!(matches!(
            storage.put("lobby/../../etc", vec![]),
            Err(StorageError::InvalidKey(_))
        ));
        fs::remove_dir_all(dir).unwrap();
    }
}
