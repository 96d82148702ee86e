//! The response value returned by handlers.
//!
//! Provides a fluent builder API for constructing an [`OutgoingResponse`].
//! Serialization onto the connection is the adapter's job; a response here is
//! just status, headers, and an optional [`ChunkSource`].

use std::fmt;

use bytes::Bytes;
use serde::Serialize;

use super::{ChunkSource, Headers, StatusCode, body};

/// An HTTP response produced by the handler capability.
///
/// # Examples
///
/// ```
/// use ingress::http::{OutgoingResponse, StatusCode};
///
/// let response = OutgoingResponse::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.status(), 200);
/// assert_eq!(response.headers().get("content-length"), Some("15"));
/// assert_eq!(response.reason_phrase(), "OK");
/// ```
pub struct OutgoingResponse {
    status: u16,
    status_text: Option<String>,
    headers: Headers,
    body: Option<ChunkSource>,
}

impl OutgoingResponse {
    /// Creates a new response with the given status and no body.
    pub fn new(status: impl Into<u16>) -> Self {
        Self {
            status: status.into(),
            status_text: None,
            headers: Headers::new(),
            body: None,
        }
    }

    /// A `text/plain` response whose body is the canonical reason phrase.
    ///
    /// This is the shape of every response the adapter produces on its own
    /// behalf (`500 Internal Server Error`, `400 Bad Request`, ...).
    pub fn plain(status: StatusCode) -> Self {
        Self::new(status)
            .header("Content-Type", "text/plain")
            .body(status.canonical_reason())
    }

    /// Overrides the reason phrase written on the status line.
    #[must_use]
    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a fully-buffered body and its `Content-Length`.
    #[must_use]
    pub fn body(mut self, data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        self.headers.set("Content-Length", data.len().to_string());
        self.body = Some(body::once(data));
        self
    }

    /// Serializes `value` as a JSON body.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be represented as JSON.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_vec(value)?;
        Ok(self.header("Content-Type", "application/json").body(data))
    }

    /// Sets a streaming body. Without a `Content-Length` header the adapter
    /// frames it with chunked transfer encoding.
    #[must_use]
    pub fn stream(mut self, source: ChunkSource) -> Self {
        self.body = Some(source);
        self
    }

    /// Returns the numeric status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the phrase for the status line: the explicit status text if set,
    /// else the canonical reason for known codes, else an empty string.
    pub fn reason_phrase(&self) -> &str {
        match &self.status_text {
            Some(text) => text.as_str(),
            None => StatusCode::from_u16(self.status)
                .map(StatusCode::canonical_reason)
                .unwrap_or(""),
        }
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns `true` if a body source is attached.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Takes the body source out, leaving the response bodiless.
    pub fn take_body(&mut self) -> Option<ChunkSource> {
        self.body.take()
    }
}

impl fmt::Debug for OutgoingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<chunk source>"))
            .finish()
    }
}

impl Default for OutgoingResponse {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
