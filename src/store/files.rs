//! Storage for raw uploaded bytes.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::types::DocumentId;
use crate::{CardsmithError, Result};

/// Stores uploaded files under opaque paths.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store bytes for a document, returning the path to retrieve them by.
    async fn put(&self, document_id: DocumentId, extension: &str, bytes: &[u8]) -> Result<String>;

    /// Read a stored file. `NotFound` if it does not exist.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a stored file. Returns `false` if nothing was there, which is
    /// not an error so cleanup can be retried.
    async fn delete(&self, path: &str) -> Result<bool>;
}

fn object_path(document_id: DocumentId, extension: &str) -> String {
    let ext: String = extension
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if ext.is_empty() {
        format!("uploads/{document_id}")
    } else {
        format!("uploads/{document_id}.{ext}")
    }
}

/// Files on the local filesystem below a root directory.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an opaque path below the root, rejecting escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(CardsmithError::Storage(format!("invalid file path '{path}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(&self, document_id: DocumentId, extension: &str, bytes: &[u8]) -> Result<String> {
        let path = object_path(document_id, extension);
        let full = self.resolve(&path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        debug!(path, size = bytes.len(), "stored upload");
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CardsmithError::NotFound(format!("file {path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Files held in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileStore {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a file exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.files
            .read()
            .map(|f| f.contains_key(path))
            .unwrap_or(false)
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> CardsmithError {
    CardsmithError::Storage("file store lock poisoned".into())
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn put(&self, document_id: DocumentId, extension: &str, bytes: &[u8]) -> Result<String> {
        let path = object_path(document_id, extension);
        self.files
            .write()
            .map_err(|_| poisoned())?
            .insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .map_err(|_| poisoned())?
            .get(path)
            .cloned()
            .ok_or_else(|| CardsmithError::NotFound(format!("file {path}")))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        Ok(self
            .files
            .write()
            .map_err(|_| poisoned())?
            .remove(path)
            .is_some())
    }
}
