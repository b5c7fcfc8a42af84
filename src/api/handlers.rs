//! API Handlers
//!
//! The content handler that serves files and origin resources through the
//! shared cache, plus the JSON inspection endpoints.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::api::mime::content_type;
use crate::cache::{CacheManager, ResourceRequest, SharedSegment};
use crate::config::{CacheRole, Config};
use crate::error::{CacheError, Result};
use crate::models::{EntryResponse, HealthResponse, StatsResponse};
use crate::origin::OriginClient;

/// Served for request paths ending in `/`
const INDEX_FILE: &str = "index.html";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide cache front, attached to the shared segment
    pub cache: Arc<CacheManager>,
    /// Directory local resources are resolved under
    pub webroot: PathBuf,
}

impl AppState {
    /// Creates a new AppState around an existing cache manager.
    pub fn new(cache: CacheManager, webroot: impl Into<PathBuf>) -> Self {
        Self {
            cache: Arc::new(cache),
            webroot: webroot.into(),
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// An owner initializes a fresh shared segment, a worker attaches to the
    /// running owner's segment. Any error is fatal to startup.
    pub fn from_config(config: &Config) -> Result<Self> {
        let segment = match config.role {
            CacheRole::Owner => SharedSegment::initialize(&config.segment_config())?,
            CacheRole::Worker => SharedSegment::attach(&config.segment_config())?,
        };
        let cache = CacheManager::new(segment)
            .with_policy(config.eviction)
            .with_fetch_mode(config.fetch_mode)
            .with_origin_client(OriginClient::with_timeout(config.origin_timeout()));
        Ok(Self::new(cache, &config.webroot))
    }

    /// Maps a request URI onto a local file and a remote path.
    ///
    /// Paths ending in `/` name the directory's `index.html`. Any `..`
    /// component is rejected as not found.
    pub fn resolve(&self, uri: &Uri) -> Result<ResourceRequest> {
        let mut remote_path = uri.path().to_string();
        if remote_path.ends_with('/') {
            remote_path.push_str(INDEX_FILE);
        }

        let relative = Path::new(remote_path.trim_start_matches('/'));
        let mut local_path = self.webroot.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => local_path.push(part),
                Component::CurDir => {}
                _ => return Err(CacheError::NotFound(uri.path().to_string())),
            }
        }

        Ok(ResourceRequest::new(
            local_path,
            remote_path,
            uri.query().unwrap_or_default(),
        ))
    }
}

/// Fallback handler for every path outside `/_cache`.
///
/// Answers from the shared cache, populating it on a miss. Local files that
/// cannot be cached are still delivered straight from disk. A directory
/// named without a trailing `/` gets a plain-text listing instead, which is
/// never cached.
pub async fn serve_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> Result<Response> {
    if method != Method::GET && method != Method::HEAD {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }

    let request = state.resolve(&uri)?;
    if request.query.is_empty() && is_directory(&request.local_path).await {
        let listing = directory_listing(&request.local_path).await?;
        return Ok(content_response(&method, "text/plain", listing));
    }
    let mime = content_type(&request.local_path);

    let cache = state.cache.clone();
    let lookup = request.clone();
    let result = tokio::task::spawn_blocking(move || cache.lookup_or_populate_request(&lookup))
        .await
        .map_err(|e| CacheError::Io(std::io::Error::other(e)))?;

    let bytes = match result {
        Ok(content) => content.to_vec(),
        Err(err) if err.allows_uncached_delivery() && request.query.is_empty() => {
            warn!("Serving {} uncached: {}", request.local_path.display(), err);
            tokio::fs::read(&request.local_path).await?
        }
        Err(err) => return Err(err),
    };

    Ok(content_response(&method, mime, bytes))
}

fn content_response(method: &Method, mime: &str, bytes: Vec<u8>) -> Response {
    let length = bytes.len();
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(bytes)
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        body,
    )
        .into_response()
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Lists the entry names of `dir`, sorted, one per line.
///
/// A directory that cannot be read is not found.
async fn directory_listing(dir: &Path) -> Result<Vec<u8>> {
    let not_found = |e: std::io::Error| {
        warn!("Cannot list {}: {}", dir.display(), e);
        CacheError::NotFound(dir.display().to_string())
    };

    let mut reader = tokio::fs::read_dir(dir).await.map_err(not_found)?;
    let mut names = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(not_found)? {
        names.push(entry.file_name().into_encoded_bytes());
    }
    names.sort();

    let mut listing = Vec::new();
    for name in names {
        listing.extend_from_slice(&name);
        listing.push(b'\n');
    }
    Ok(listing)
}

/// Handler for GET /_cache/stats
///
/// Returns the shared counters, covering every attached worker.
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let stats = state.cache.stats()?;
    Ok(Json(StatsResponse::from(stats)))
}

/// Handler for GET /_cache/entries
pub async fn entries_handler(State(state): State<AppState>) -> Result<Json<Vec<EntryResponse>>> {
    let entries = state.cache.entries()?;
    Ok(Json(entries.into_iter().map(EntryResponse::from).collect()))
}

/// Handler for GET /_cache/health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.cache.segment().name()))
}
