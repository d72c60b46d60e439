use std::path::PathBuf;
#[cfg(test)]
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine a data directory")]
    NoDataDir,
}

/// Durable home of the serialized session document.
pub trait SessionStorage: Send + Sync {
    /// The raw persisted document, or `None` when nothing has been written yet.
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn save(&self, document: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_default_location() -> Result<Self, StorageError> {
        Ok(Self::new(resolve_default_store_path()?))
    }

    fn io_err(&self, source: std::io::Error) -> StorageError {
        StorageError::Io { path: self.path.clone(), source }
    }
}

pub fn resolve_default_store_path() -> Result<PathBuf, StorageError> {
    let base = match std::env::var("XDG_DATA_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = std::env::var("HOME").map_err(|_| StorageError::NoDataDir)?;
            PathBuf::from(home).join(".local").join("share")
        }
    };
    Ok(base.join("flow_chat").join("chats.json"))
}

impl SessionStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn save(&self, document: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        // write a sibling then rename so a crash never leaves half a document
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, document.as_bytes()).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
struct MemoryInner {
    document: Option<String>,
    writes: usize,
}

/// In-memory storage. Clones share the same document, so a test can keep a
/// handle while the store owns another.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    pub fn with_document(document: impl Into<String>) -> Self {
        let s = Self::default();
        s.lock().document = Some(document.into());
        s
    }

    pub fn document(&self) -> Option<String> {
        self.lock().document.clone()
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.document())
    }

    fn save(&self, document: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.document = Some(document.to_string());
        inner.writes += 1;
        Ok(())
    }
}
