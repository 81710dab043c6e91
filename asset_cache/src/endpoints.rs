use std::sync::Arc;

use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};

use crate::{
    network::NetworkError,
    store::CachedResponse,
    worker::{CacheWorker, WorkerError},
};

pub async fn healthcheck() -> &'static str {
    "Healthy"
}

/// Request key under which `uri` is cached: the path without the leading slash plus the query.
pub fn request_key(uri: &Uri) -> String {
    let path = uri.path().trim_start_matches('/');
    match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_owned(),
    }
}

/// Serve every request other than the healthcheck through the cache worker.
pub async fn intercept(
    Extension(worker): Extension<Arc<CacheWorker>>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let key = request_key(&uri);
    match worker.handle_fetch(&key).await {
        Ok(cached) => into_http_response(cached),
        Err(WorkerError::Network {
            source: NetworkError::OutsideOrigin(_),
            ..
        }) => {
            log::warn!("Refusing to fetch {} from outside the origin", key);
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err) => {
            log::warn!("Failed to serve {}: {}", key, err);
            (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
        }
    }
}

fn into_http_response(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, value) in &cached.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            // The body is re-framed by the server
            (Ok(name), _) if name == axum::http::header::CONTENT_LENGTH => {}
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => log::debug!("Dropping invalid header {}", name),
        }
    }

    (status, headers, cached.body).into_response()
}

pub fn app(worker: Arc<CacheWorker>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .fallback(intercept)
        .layer(Extension(worker))
}
