//! Serving files from a public directory.
//!
//! Installed as the router fallback when `SERVE_STATIC_FILES` is on, for
//! setups where no proxy sits in front to serve them. Responses still go
//! through the middleware chain like everything else.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CACHE_CONTROL, HeaderValue};
use http::{Method, StatusCode};
use tracing::debug;

use crate::request::Request;
use crate::response::Response;

const CACHE_CONTROL_VALUE: &str = "public, max-age=3600";

/// Files under a root directory, addressed by request path.
#[derive(Clone)]
pub struct StaticFiles {
    root: Arc<PathBuf>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: Arc::new(root.into()) }
    }

    /// The fallback handler.
    pub async fn serve(self, req: Request) -> Response {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return not_found();
        }
        match self.load(req.path()).await {
            Some(bytes) => {
                let body = if req.method() == Method::HEAD { Bytes::new() } else { bytes };
                Response::builder()
                    .header(CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_VALUE))
                    .json(body)
            }
            None => not_found(),
        }
    }

    async fn load(&self, request_path: &str) -> Option<Bytes> {
        let relative = relative_path(request_path)?;
        let root = tokio::fs::canonicalize(self.root.as_path()).await.ok()?;
        let file = tokio::fs::canonicalize(root.join(relative)).await.ok()?;

        // Symlinks may point anywhere; only serve what resolves inside root.
        if !file.starts_with(&root) {
            debug!(path = %request_path, "static path escapes public root");
            return None;
        }
        if !tokio::fs::metadata(&file).await.ok()?.is_file() {
            return None;
        }
        tokio::fs::read(&file).await.ok().map(Bytes::from)
    }
}

/// Maps a URL path onto a relative filesystem path, refusing anything but
/// plain named segments.
fn relative_path(request_path: &str) -> Option<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('\\') || trimmed.contains('\0') {
        return None;
    }
    let path = Path::new(trimmed);
    path.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| path.to_path_buf())
}

fn not_found() -> Response {
    Response::failure(StatusCode::NOT_FOUND, "not_found")
}
