//! Install a fixed manifest into a named cache and answer requests from it.
use std::sync::Arc;

use futures::future::try_join_all;

use crate::{
    network::{Network, NetworkError},
    store::{Cache, CacheStorage, CachedResponse, StoreError},
};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("fetching {key} failed: {source}")]
    Network {
        key: String,
        #[source]
        source: NetworkError,
    },
    #[error("fetching {key} returned status {status}")]
    BadStatus { key: String, status: u16 },
}

pub struct CacheWorker {
    cache: Cache,
    manifest: Vec<String>,
    network: Arc<dyn Network>,
}

impl CacheWorker {
    /// Open (or create) the cache called `cache_name` in `storage`.
    pub async fn open(
        storage: &CacheStorage,
        cache_name: &str,
        manifest: Vec<String>,
        network: Arc<dyn Network>,
    ) -> Result<Self, WorkerError> {
        let cache = storage.open(cache_name).await?;
        Ok(Self {
            cache,
            manifest,
            network,
        })
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn manifest(&self) -> &[String] {
        &self.manifest
    }

    /// Fetch every manifest path and store it, replacing older entries.
    ///
    /// Nothing is stored unless all fetches succeed with a 2xx status.
    pub async fn install(&self) -> Result<(), WorkerError> {
        log::info!(
            "Installing {} assets into cache {}",
            self.manifest.len(),
            self.cache.name()
        );

        let responses = try_join_all(self.manifest.iter().map(|key| self.fetch_for_install(key)))
            .await?;

        for (key, response) in self.manifest.iter().zip(responses.iter()) {
            self.cache.put(key, response).await?;
        }

        log::info!("Installed cache {}", self.cache.name());
        Ok(())
    }

    async fn fetch_for_install(&self, key: &str) -> Result<CachedResponse, WorkerError> {
        let response = self
            .network
            .fetch(key)
            .await
            .map_err(|source| WorkerError::Network {
                key: key.to_owned(),
                source,
            })?;
        if !response.is_success() {
            return Err(WorkerError::BadStatus {
                key: key.to_owned(),
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Answer a request from the cache, falling back to one network fetch.
    ///
    /// Network responses are returned as they are and never written back.
    pub async fn handle_fetch(&self, key: &str) -> Result<CachedResponse, WorkerError> {
        match self.cache.match_key(key).await {
            Ok(Some(response)) => {
                log::debug!("Cache hit for {}", key);
                return Ok(response);
            }
            Ok(None) => log::debug!("Cache miss for {}", key),
            Err(err) => log::warn!("Ignoring unreadable cache entry for {}: {}", key, err),
        }

        self.network
            .fetch(key)
            .await
            .map_err(|source| WorkerError::Network {
                key: key.to_owned(),
                source,
            })
    }
}
