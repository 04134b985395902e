//! Cache transports. Stores move opaque bytes; decoding and content checks
//! happen in [`super::cache::KeyCache`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::KeyId;
use crate::utils::errors::PicklesError;

#[async_trait]
pub trait KeyStore: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` on a miss.
    async fn get(&self, id: &KeyId) -> Result<Option<Vec<u8>>, PicklesError>;

    async fn put(&self, id: &KeyId, bytes: &[u8]) -> Result<(), PicklesError>;

    fn writable(&self) -> bool {
        true
    }
}

/// One file per key under a root directory.
pub struct FileSystemStore {
    name: String,
    root: PathBuf,
    writable: bool,
}

impl FileSystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: format!("fs:{}", root.display()),
            root,
            writable: true,
        }
    }

    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            writable: false,
            ..Self::new(root)
        }
    }

    /// `<user cache dir>/pickles`, if the platform has one.
    pub fn default_root() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("pickles"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, id: &KeyId) -> PathBuf {
        self.root.join(id.file_name())
    }
}

#[async_trait]
impl KeyStore for FileSystemStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &KeyId) -> Result<Option<Vec<u8>>, PicklesError> {
        match tokio::fs::read(self.path(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PicklesError::cache_io(&self.name, e)),
        }
    }

    async fn put(&self, id: &KeyId, bytes: &[u8]) -> Result<(), PicklesError> {
        if !self.writable {
            return Err(PicklesError::cache_io(&self.name, "store is read-only"));
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PicklesError::cache_io(&self.name, e))?;
        // Readers never observe a partially written key
        let target = self.path(id);
        let tmp = target.with_extension(format!("tmp-{}", std::process::id()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| PicklesError::cache_io(&self.name, e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| PicklesError::cache_io(&self.name, e))
    }

    fn writable(&self) -> bool {
        self.writable
    }
}

/// In-process store; mostly useful in tests and for sharing keys between
/// compile calls without touching disk.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<KeyId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrites an entry without going through the cache.
    pub fn insert_raw(&self, id: &KeyId, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id.clone(), bytes);
        }
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, id: &KeyId) -> Result<Option<Vec<u8>>, PicklesError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| PicklesError::cache_io("memory", e))?;
        Ok(entries.get(id).cloned())
    }

    async fn put(&self, id: &KeyId, bytes: &[u8]) -> Result<(), PicklesError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| PicklesError::cache_io("memory", e))?;
        entries.insert(id.clone(), bytes.to_vec());
        Ok(())
    }
}
