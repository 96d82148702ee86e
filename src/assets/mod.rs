//! Static asset resolution from a fixed content root.
//!
//! [`StaticFileResolver`] answers GET and HEAD requests straight from disk.
//! A failed lookup is not an error: it is a [`Resolution::Miss`] and the
//! request falls through to the application handler.
//!
//! Resolved paths are canonicalized and must stay inside the canonical
//! content root, so `..` segments and symlinks that leave the root miss.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};

use crate::http::{Method, OutgoingResponse, StatusCode};

pub mod mime;

/// URL prefix of fingerprinted build output.
pub const IMMUTABLE_PREFIX: &str = "/assets/";

/// `Cache-Control` for fingerprinted assets under [`IMMUTABLE_PREFIX`].
pub const CACHE_IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// `Cache-Control` for every other static hit.
pub const CACHE_SHORT: &str = "public, max-age=3600";

/// Returns the cache policy for a request pathname.
pub fn cache_control_for(pathname: &str) -> &'static str {
    if pathname.starts_with(IMMUTABLE_PREFIX) {
        CACHE_IMMUTABLE
    } else {
        CACHE_SHORT
    }
}

/// A file read from the content root.
#[derive(Debug, Clone)]
pub struct StaticAsset {
    /// Canonical on-disk path, always inside the content root.
    pub path: PathBuf,
    pub contents: Bytes,
    pub content_type: &'static str,
    pub cache_control: &'static str,
}

impl StaticAsset {
    /// Converts the asset into a `200 OK` response.
    ///
    /// The body is always attached; HEAD requests are handled by the writer,
    /// which keeps the headers (including `Content-Length`) and drops the body.
    pub fn into_response(self) -> OutgoingResponse {
        OutgoingResponse::new(StatusCode::Ok)
            .header("Content-Type", self.content_type)
            .header("Cache-Control", self.cache_control)
            .body(self.contents)
    }
}

/// Outcome of a static lookup.
#[derive(Debug)]
pub enum Resolution {
    Hit(StaticAsset),
    Miss,
}

impl Resolution {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Serves files from a content root fixed at startup.
///
/// # Examples
///
/// ```rust,no_run
/// use ingress::assets::{Resolution, StaticFileResolver};
/// use ingress::http::Method;
///
/// # async fn demo() {
/// let resolver = StaticFileResolver::new("/srv/dashboard/public");
/// match resolver.resolve(&Method::Get, "/favicon.svg").await {
///     Resolution::Hit(asset) => println!("{} bytes", asset.contents.len()),
///     Resolution::Miss => println!("fall through to the handler"),
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StaticFileResolver {
    // `None` when the configured root does not exist; every lookup misses.
    root: Option<PathBuf>,
}

impl StaticFileResolver {
    /// Creates a resolver for `root`, canonicalizing it once.
    ///
    /// A root that cannot be canonicalized is logged and turns every lookup
    /// into a miss.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        match std::fs::canonicalize(root) {
            Ok(canonical) => {
                debug!(root = %canonical.display(), "static content root ready");
                Self {
                    root: Some(canonical),
                }
            }
            Err(e) => {
                warn!(root = %root.display(), error = %e, "static content root unavailable; serving no static files");
                Self { root: None }
            }
        }
    }

    /// Returns the canonical content root, if it exists.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Attempts to satisfy a request from the content root.
    ///
    /// Only GET and HEAD are eligible. Every failure along the way (bad
    /// percent-encoding, missing file, directory, permission or I/O error,
    /// path escaping the root) is a [`Resolution::Miss`].
    pub async fn resolve(&self, method: &Method, pathname: &str) -> Resolution {
        if !method.is_get_or_head() {
            return Resolution::Miss;
        }
        let Some(root) = self.root.as_deref() else {
            return Resolution::Miss;
        };

        let Some(path) = contained_path(root, pathname).await else {
            return Resolution::Miss;
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Resolution::Miss,
        }

        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => Bytes::from(contents),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "static read failed");
                return Resolution::Miss;
            }
        };

        let decoded = decoded_pathname(pathname);
        Resolution::Hit(StaticAsset {
            content_type: mime::for_path(&decoded),
            cache_control: cache_control_for(&decoded),
            path,
            contents,
        })
    }
}

// Decodes `pathname`, joins it onto `root`, and canonicalizes the result.
// `None` if any step fails or the canonical path leaves the root.
async fn contained_path(root: &Path, pathname: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(pathname).decode_utf8().ok()?;
    if decoded.contains('\0') {
        return None;
    }

    let candidate = root.join(decoded.trim_start_matches('/'));
    let canonical = tokio::fs::canonicalize(&candidate).await.ok()?;

    if canonical.starts_with(root) {
        Some(canonical)
    } else {
        debug!(pathname, "static path escapes content root");
        None
    }
}

// Cache policy and media type follow the decoded path, like the file lookup.
fn decoded_pathname(pathname: &str) -> String {
    percent_decode_str(pathname).decode_utf8_lossy().into_owned()
}
