//! Request-side types: the raw [`IncomingRequest`] parsed off the wire with
//! [`httparse`], and the transport-independent [`NormalizedRequest`] handed
//! to the application handler.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

use super::{Headers, Method, StatusCode};

// Upper bound on buffer space reserved up front for a length-delimited body.
const MAX_RESERVE: usize = 64 * 1024;

/// Errors that can occur while reading or normalizing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request head exceeds maximum allowed size of {max_bytes} bytes")]
    HeadTooLarge { max_bytes: usize },

    #[error("request target cannot form a valid URL: {target}")]
    InvalidUrl {
        target: String,
        #[source]
        source: Option<url::ParseError>,
    },

    #[error("invalid Content-Length header: {0}")]
    InvalidContentLength(String),

    #[error("invalid chunked transfer encoding")]
    InvalidChunk,

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },

    #[error("connection closed before the request body was complete")]
    UnexpectedEof,

    #[error("I/O error while reading request: {0}")]
    Io(#[from] std::io::Error),
}

impl RequestError {
    /// The status a client should see when this error ends the request.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Parse(httparse::Error::TooManyHeaders) | Self::HeadTooLarge { .. } => {
                StatusCode::RequestHeaderFieldsTooLarge
            }
            Self::BodyTooLarge { .. } => StatusCode::PayloadTooLarge,
            Self::Io(_) | Self::UnexpectedEof => StatusCode::InternalServerError,
            _ => StatusCode::BadRequest,
        }
    }
}

/// How the request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body (no `Content-Length`, no chunked encoding).
    Empty,
    /// Exactly this many bytes follow the head.
    Length(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// A request head as received from the transport.
///
/// Created by [`IncomingRequest::parse`] from a raw byte buffer. Headers keep
/// every value exactly as received; the bytes already read past the head are
/// kept in `body_prefix` for the body drain.
///
/// # Examples
///
/// ```
/// use ingress::http::IncomingRequest;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = IncomingRequest::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct IncomingRequest {
    method: Method,
    target: String,
    path: String,
    query: Option<String>,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body_prefix: Bytes,
}

impl IncomingRequest {
    /// Maximum number of headers we support per request.
    pub const MAX_HEADERS: usize = 64;

    /// Maximum size of the request line plus header section (64 KiB).
    pub const MAX_HEAD_SIZE: usize = 64 * 1024;

    /// Parse a raw HTTP/1.1 request head from a byte slice.
    ///
    /// Returns the parsed request and the byte offset at which the body begins
    /// in `buf` (immediately after the `\r\n\r\n` header terminator).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the head.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: method, target, or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
            .unwrap_or_else(|never| match never {});

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?
            .to_owned();

        let (path, query) = match target.find('?') {
            Some(pos) => (target[..pos].to_owned(), Some(target[pos + 1..].to_owned())),
            None => (target.clone(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            // obs-text bytes are kept as U+FFFD rather than dropping the field.
            header_map.insert(header.name, String::from_utf8_lossy(header.value));
        }

        let body_prefix = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((
            Self {
                method,
                target,
                path,
                query,
                version,
                headers: header_map,
                body_prefix,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target exactly as sent (path plus query).
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers with every received value.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body bytes that arrived in the same reads as the head.
    pub fn body_prefix(&self) -> &Bytes {
        &self.body_prefix
    }

    /// Determines how the body is delimited.
    ///
    /// Chunked transfer encoding takes precedence over `Content-Length`.
    pub fn body_framing(&self) -> Result<BodyFraming, RequestError> {
        let chunked = self
            .headers
            .get_all("transfer-encoding")
            .flat_map(|v| v.split(','))
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        if chunked {
            return Ok(BodyFraming::Chunked);
        }

        match self.headers.get_joined("content-length") {
            Some(raw) => raw
                .trim()
                .parse()
                .map(BodyFraming::Length)
                .map_err(|_| RequestError::InvalidContentLength(raw)),
            None => Ok(BodyFraming::Empty),
        }
    }
}

/// Reads a complete request body from `reader`.
///
/// `buf` holds the bytes already read past the head. The drain suspends
/// until the peer has sent the whole body; there is no timeout. When
/// `limit` is set, a body larger than `limit` bytes is rejected with
/// [`RequestError::BodyTooLarge`].
pub async fn drain_body<R>(
    reader: &mut R,
    mut buf: BytesMut,
    framing: BodyFraming,
    limit: Option<usize>,
) -> Result<Bytes, RequestError>
where
    R: AsyncRead + Unpin,
{
    let over_limit = |len: usize| matches!(limit, Some(max) if len > max);

    match framing {
        BodyFraming::Empty => Ok(Bytes::new()),
        BodyFraming::Length(len) => {
            if over_limit(len) {
                return Err(RequestError::BodyTooLarge {
                    max_bytes: limit.unwrap_or_default(),
                });
            }
            // The declared length is untrusted; grow with the bytes that arrive.
            buf.reserve(len.saturating_sub(buf.len()).min(MAX_RESERVE));
            while buf.len() < len {
                if reader.read_buf(&mut buf).await? == 0 {
                    return Err(RequestError::UnexpectedEof);
                }
            }
            buf.truncate(len);
            Ok(buf.freeze())
        }
        BodyFraming::Chunked => {
            let mut body = BytesMut::new();
            loop {
                let (offset, size) = match httparse::parse_chunk_size(&buf) {
                    Ok(httparse::Status::Complete(pair)) => pair,
                    Ok(httparse::Status::Partial) => {
                        read_more(reader, &mut buf).await?;
                        continue;
                    }
                    Err(_) => return Err(RequestError::InvalidChunk),
                };
                let size = usize::try_from(size).map_err(|_| RequestError::InvalidChunk)?;

                if size == 0 {
                    buf.advance(offset);
                    skip_trailers(reader, &mut buf).await?;
                    return Ok(body.freeze());
                }

                let total = body.len().checked_add(size).ok_or(RequestError::InvalidChunk)?;
                if over_limit(total) {
                    return Err(RequestError::BodyTooLarge {
                        max_bytes: limit.unwrap_or_default(),
                    });
                }

                let needed = offset
                    .checked_add(size)
                    .and_then(|n| n.checked_add(2))
                    .ok_or(RequestError::InvalidChunk)?;
                while buf.len() < needed {
                    read_more(reader, &mut buf).await?;
                }
                if &buf[offset + size..needed] != b"\r\n" {
                    return Err(RequestError::InvalidChunk);
                }
                body.extend_from_slice(&buf[offset..offset + size]);
                buf.advance(needed);
            }
        }
    }
}

// Trailer fields after the last chunk are read and discarded up to the blank line.
async fn skip_trailers<R>(reader: &mut R, buf: &mut BytesMut) -> Result<(), RequestError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match buf.windows(2).position(|w| w == b"\r\n") {
            Some(0) => {
                buf.advance(2);
                return Ok(());
            }
            Some(pos) => buf.advance(pos + 2),
            None => read_more(reader, buf).await?,
        }
    }
}

async fn read_more<R>(reader: &mut R, buf: &mut BytesMut) -> Result<(), RequestError>
where
    R: AsyncRead + Unpin,
{
    if reader.read_buf(buf).await? == 0 {
        return Err(RequestError::UnexpectedEof);
    }
    Ok(())
}

/// The transport-independent request handed to the handler.
///
/// Headers hold a single value per (lowercased) name; repeated incoming
/// values are joined with `", "`. The body is present for every method other
/// than GET and HEAD and is always fully buffered.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    url: Url,
    method: Method,
    headers: Headers,
    body: Option<Bytes>,
}

impl NormalizedRequest {
    /// Builds a normalized request.
    ///
    /// The absolute URL is `http://` + the `Host` header (or `fallback_host`
    /// when the client sent none) + the request target. Absolute-form targets
    /// are used as they are.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidUrl`] if no valid URL can be formed.
    pub fn from_incoming(
        incoming: &IncomingRequest,
        fallback_host: &str,
        body: Option<Bytes>,
    ) -> Result<Self, RequestError> {
        let target = incoming.target();
        let invalid = |source| RequestError::InvalidUrl {
            target: target.to_owned(),
            source,
        };

        let url = if target.starts_with('/') {
            let host = incoming
                .headers()
                .get("host")
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .unwrap_or(fallback_host);
            // A host carrying delimiters would shift part of itself into the path or userinfo.
            if host.contains(['/', '?', '#', '@', '\\']) || host.contains(char::is_whitespace) {
                return Err(invalid(None));
            }
            Url::parse(&format!("http://{host}{target}")).map_err(|e| invalid(Some(e)))?
        } else {
            let url = Url::parse(target).map_err(|e| invalid(Some(e)))?;
            if !url.has_host() {
                return Err(invalid(None));
            }
            url
        };

        Ok(Self {
            url,
            method: incoming.method().clone(),
            headers: incoming.headers().merged(),
            body: if incoming.method().is_get_or_head() {
                None
            } else {
                Some(body.unwrap_or_default())
            },
        })
    }

    /// Creates a request directly, for handlers composed in-process and tests.
    pub fn new(method: Method, url: Url, headers: Headers, body: Option<Bytes>) -> Self {
        Self {
            url,
            method,
            headers: headers.merged(),
            body,
        }
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = Some(body);
    }

    /// Returns the absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the merged, single-valued headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the buffered body, if the method carries one.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Consumes the request and returns its body.
    pub fn into_body(self) -> Option<Bytes> {
        self.body
    }

    /// Deserializes the body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.body.as_deref().unwrap_or_default())
    }
}
