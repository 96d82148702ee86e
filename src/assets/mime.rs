//! Extension → media type table for static assets.

use std::path::Path;

/// Media type served for files whose extension is not in the table.
pub const FALLBACK: &str = "application/octet-stream";

// Lowercase extension without the leading dot.
const TABLE: &[(&str, &str)] = &[
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("css", "text/css"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("txt", "text/plain; charset=utf-8"),
    ("xml", "application/xml"),
    ("webmanifest", "application/manifest+json"),
    ("wasm", "application/wasm"),
];

/// Returns the media type for `path` based on its extension.
///
/// The lookup ignores ASCII case; unknown or missing extensions map to
/// [`FALLBACK`].
///
/// # Examples
///
/// ```
/// use ingress::assets::mime;
///
/// assert_eq!(mime::for_path("/assets/app.JS"), "application/javascript");
/// assert_eq!(mime::for_path("/robots"), "application/octet-stream");
/// ```
pub fn for_path(path: impl AsRef<Path>) -> &'static str {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| {
            TABLE
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(ext))
                .map(|(_, media_type)| *media_type)
        })
        .unwrap_or(FALLBACK)
}
