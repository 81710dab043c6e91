//! Origin the assets are fetched from when they are not cached.
use futures::future::BoxFuture;
use reqwest::{Client, Url};

use crate::store::CachedResponse;

/// Headers that only describe the connection to the origin.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("invalid origin url {0}")]
    InvalidUrl(String),
    #[error("{0} resolves outside of the origin")]
    OutsideOrigin(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Anything that can answer a request key with a response.
pub trait Network: Send + Sync {
    fn fetch(&self, key: &str) -> BoxFuture<'_, Result<CachedResponse, NetworkError>>;
}

/// HTTP server the assets originally come from.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: Client,
    base: Url,
}

impl HttpOrigin {
    pub fn new(client: Client, base: &str) -> Result<Self, NetworkError> {
        // Without a trailing slash `join` would replace the last path segment
        let base = if base.ends_with('/') {
            base.to_owned()
        } else {
            format!("{base}/")
        };
        let base = Url::parse(&base).map_err(|_| NetworkError::InvalidUrl(base.clone()))?;

        Ok(Self { client, base })
    }

    /// Resolve `key` against the base url. Keys must stay below the base.
    fn url_for(&self, key: &str) -> Result<Url, NetworkError> {
        let url = self
            .base
            .join(key)
            .map_err(|_| NetworkError::InvalidUrl(format!("{}{}", self.base, key)))?;

        // `join` accepts absolute urls and `..` segments
        if url.origin() != self.base.origin() || !url.path().starts_with(self.base.path()) {
            return Err(NetworkError::OutsideOrigin(key.to_owned()));
        }
        Ok(url)
    }
}

impl Network for HttpOrigin {
    fn fetch(&self, key: &str) -> BoxFuture<'_, Result<CachedResponse, NetworkError>> {
        let url = self.url_for(key);
        Box::pin(async move {
            let url = url?;
            log::debug!("Fetching {}", url);
            let res = self.client.get(url).send().await?;

            let status = res.status().as_u16();
            let headers = res
                .headers()
                .iter()
                .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_owned(), value.to_owned()))
                })
                .collect();
            let body = res.bytes().await?.to_vec();

            Ok(CachedResponse {
                status,
                headers,
                body,
            })
        })
    }
}
