//! Named cache stores persisted on disk.
//!
//! Every cache is a directory below the storage root. An entry is one bincode file named after
//! the SHA-256 of its request key, so storing the same key again replaces the previous entry.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const ENTRY_EXTENSION: &str = "entry";

/// Response as it is kept in a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_owned(), content_type.to_owned())],
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    response: CachedResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid cache name {0:?}")]
    InvalidName(String),
    #[error("cache storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt cache entry: {0}")]
    Corrupt(#[from] bincode::Error),
}

/// Root directory holding all named caches.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage in the user cache directory.
    pub fn in_user_cache_dir() -> Option<Self> {
        dirs::cache_dir().map(|dir| Self::new(dir.join("asset_cache")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the cache called `name`, creating it if it does not exist yet.
    pub async fn open(&self, name: &str) -> Result<Cache, StoreError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StoreError::InvalidName(name.to_owned()));
        }
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        log::debug!("Opened cache {} at {}", name, dir.display());

        Ok(Cache {
            name: name.to_owned(),
            dir,
        })
    }

    /// Names of all caches in this storage.
    pub async fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// A single named cache.
#[derive(Debug, Clone)]
pub struct Cache {
    name: String,
    dir: PathBuf,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `response` under `key`, replacing any previous entry.
    pub async fn put(&self, key: &str, response: &CachedResponse) -> Result<(), StoreError> {
        let entry = StoredEntry {
            key: key.to_owned(),
            response: response.clone(),
        };
        let data = bincode::serialize(&entry)?;

        // Write next to the target and rename so readers never see a partial entry
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        log::debug!("Stored {} ({} bytes) in cache {}", key, response.body.len(), &self.name);
        Ok(())
    }

    /// Look up the entry stored under `key`.
    pub async fn match_key(&self, key: &str) -> Result<Option<CachedResponse>, StoreError> {
        let data = match tokio::fs::read(self.entry_path(key)).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: StoredEntry = bincode::deserialize(&data)?;

        Ok((entry.key == key).then_some(entry.response))
    }

    /// Keys of all stored entries, sorted.
    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let stored: StoredEntry = bincode::deserialize(&tokio::fs::read(&path).await?)?;
            keys.push(stored.key);
        }
        keys.sort();
        Ok(keys)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
    }
}
