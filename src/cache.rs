//! Local persistent cache.
//!
//! Entries are JSON values wrapped in a versioned [`Envelope`] and stored in
//! a [`LocalStore`] under a string key. An entry written with another schema
//! version is treated as missing.
use parking_lot::RwLock;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Version of the cached value layout.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    IO(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable key-value store of serialized values.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    value: T,
}

/// Read the value stored under `key`, if any.
pub fn read<L, T>(store: &L, key: &str) -> Option<T>
where
    L: LocalStore + ?Sized,
    T: DeserializeOwned,
{
    let data = store.get(key)?;
    match serde_json::from_str::<Envelope<serde_json::Value>>(&data) {
        Ok(envelope) if envelope.version == CACHE_SCHEMA_VERSION => {
            match serde_json::from_value(envelope.value) {
                Ok(value) => Some(value),
                Err(err) => {
                    log::debug!("Discarding cache entry {}: {}", key, err);
                    None
                }
            }
        }
        Ok(envelope) => {
            log::debug!(
                "Discarding cache entry {} with schema version {}",
                key,
                envelope.version
            );
            None
        }
        Err(err) => {
            log::debug!("Discarding cache entry {}: {}", key, err);
            None
        }
    }
}

/// Store `value` under `key` as compact JSON.
pub fn write<L, T>(store: &L, key: &str, value: &T) -> Result<(), CacheError>
where
    L: LocalStore + ?Sized,
    T: Serialize,
{
    let data = serde_json::to_string(&Envelope {
        version: CACHE_SCHEMA_VERSION,
        value,
    })?;
    store.set(key, data)
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.map.write().insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.map.write().remove(key);
        Ok(())
    }
}

/// Store keeping one file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        let name = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
        self.dir.join(name + ".json")
    }

    /// Keys of all stored entries.
    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = match name.to_str().and_then(|n| n.strip_suffix(".json")) {
                Some(name) => name,
                None => continue,
            };
            if let Ok(key) = percent_decode_str(name).decode_utf8() {
                keys.push(key.into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.path(key)) {
            Ok(data) => Some(data),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                log::debug!("Unable to read cache entry {}: {}", key, err);
                None
            }
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        // Write then rename so readers never see a partial entry.
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.path(key)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
