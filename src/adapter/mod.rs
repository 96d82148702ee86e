//! The per-connection request adapter.
//!
//! [`RequestAdapter::handle`] runs one complete exchange on an accepted
//! connection: read the request head, try the static resolver, otherwise
//! normalize the request, dispatch it to the [`Handler`], and stream the
//! handler's response back. Each connection serves exactly one request.
//!
//! Failures never leave the connection. Before any response bytes are
//! written a failure is answered with a fixed plain-text fallback
//! (`500 Internal Server Error`, or `400`/`413`/`431` for client errors);
//! after that the connection is simply closed.
//!
//! There are no timeouts: a peer that never finishes sending its body, or a
//! handler that never resolves, holds only its own connection open.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufWriter};
use tracing::{debug, error, info, warn};

use crate::assets::{Resolution, StaticFileResolver};
use crate::handler::{BoxError, Handler};
use crate::http::{
    BodyError, IncomingRequest, Method, NormalizedRequest, OutgoingResponse, RequestError,
    StatusCode, request::drain_body,
};

mod state;
mod writer;

pub use state::{ConnectionState, StateTrace};
use writer::{WriteProgress, write_response};

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Errors that end an exchange.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connection closed before a request head arrived")]
    ClosedBeforeHead,

    #[error("bad request: {0}")]
    Request(#[from] RequestError),

    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("handler returned an invalid header: {name:?}")]
    InvalidHeader { name: String },

    #[error("handler returned an invalid status text: {text:?}")]
    InvalidStatusText { text: String },

    #[error("response body failed: {0}")]
    ChunkRead(#[source] BodyError),

    #[error("response body length mismatch: declared {declared}, produced {produced}")]
    LengthMismatch { declared: u64, produced: u64 },

    #[error("write to connection failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl AdapterError {
    /// The status of the fallback response sent when this error happens
    /// before any response bytes were written.
    pub fn fallback_status(&self) -> StatusCode {
        match self {
            Self::Request(e) => e.status(),
            _ => StatusCode::InternalServerError,
        }
    }
}

/// What happened on one connection.
#[derive(Debug)]
pub struct ConnectionOutcome {
    /// Every state visited, ending in a terminal state.
    pub trace: StateTrace,
    /// Status line written to the client, if any.
    pub status: Option<u16>,
    /// The error that ended the exchange, if it failed.
    pub error: Option<AdapterError>,
}

impl ConnectionOutcome {
    pub fn final_state(&self) -> ConnectionState {
        self.trace.current()
    }
}

/// Bridges raw connections to the static resolver and the handler.
///
/// Cheap to share: the resolver and handler sit behind [`Arc`]s and are
/// never mutated after construction.
///
/// # Examples
///
/// ```rust,no_run
/// use ingress::adapter::RequestAdapter;
/// use ingress::assets::StaticFileResolver;
/// use ingress::http::{NormalizedRequest, OutgoingResponse, StatusCode};
///
/// let adapter = RequestAdapter::new(
///     StaticFileResolver::new("./public"),
///     |_req: NormalizedRequest| async {
///         Ok::<_, std::io::Error>(OutgoingResponse::new(StatusCode::NotFound))
///     },
/// );
/// ```
#[derive(Clone)]
pub struct RequestAdapter {
    resolver: Arc<StaticFileResolver>,
    handler: Arc<dyn Handler>,
    max_body_bytes: Option<usize>,
    fallback_host: String,
}

impl RequestAdapter {
    /// Creates an adapter with no request-body limit.
    pub fn new(resolver: StaticFileResolver, handler: impl Handler) -> Self {
        Self::from_parts(Arc::new(resolver), Arc::new(handler))
    }

    /// Creates an adapter from already-shared parts.
    pub fn from_parts(resolver: Arc<StaticFileResolver>, handler: Arc<dyn Handler>) -> Self {
        Self {
            resolver,
            handler,
            max_body_bytes: None,
            fallback_host: "localhost".to_owned(),
        }
    }

    /// Rejects request bodies larger than `limit` bytes with `413`.
    ///
    /// Unset by default: bodies are buffered without bound.
    #[must_use]
    pub fn max_body_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Host used to build the request URL when the client sent no `Host`.
    #[must_use]
    pub fn fallback_host(mut self, host: impl Into<String>) -> Self {
        self.fallback_host = host.into();
        self
    }

    /// Runs one exchange on `stream` and closes it.
    ///
    /// Never fails: errors are logged, answered with a fallback when still
    /// possible, and reported in the returned [`ConnectionOutcome`].
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr) -> ConnectionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();
        let mut io = BufWriter::new(stream);
        let mut exchange = Exchange::default();

        match self.drive(&mut io, &mut exchange).await {
            Ok(status) => {
                info!(
                    peer = %peer,
                    method = %exchange.method(),
                    path = %exchange.path,
                    status,
                    elapsed = ?started.elapsed(),
                    "request complete"
                );
                ConnectionOutcome {
                    trace: exchange.trace,
                    status: Some(status),
                    error: None,
                }
            }
            Err(err) => self.fail(io, peer, exchange, err).await,
        }
    }

    async fn drive<S>(
        &self,
        io: &mut BufWriter<S>,
        exchange: &mut Exchange,
    ) -> Result<u16, AdapterError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let incoming = read_head(io).await?;
        exchange.method = Some(incoming.method().clone());
        exchange.path = incoming.path().to_owned();
        let is_head = *incoming.method() == Method::Head;

        if let Resolution::Hit(asset) = self
            .resolver
            .resolve(incoming.method(), incoming.path())
            .await
        {
            exchange.trace.advance(ConnectionState::StaticHit)?;
            debug!(path = %exchange.path, file = %asset.path.display(), "static hit");
            let status =
                write_response(io, asset.into_response(), is_head, &mut exchange.progress)
                    .await?;
            exchange.trace.advance(ConnectionState::Served)?;
            return Ok(status);
        }

        exchange.trace.advance(ConnectionState::BodyBuffering)?;
        let mut request = NormalizedRequest::from_incoming(&incoming, &self.fallback_host, None)?;
        if !incoming.method().is_get_or_head() {
            let body = drain_body(
                io,
                BytesMut::from(&incoming.body_prefix()[..]),
                incoming.body_framing()?,
                self.max_body_bytes,
            )
            .await?;
            request.set_body(body);
        }

        exchange.trace.advance(ConnectionState::HandlerInvoked)?;
        debug!(method = %request.method(), url = %request.url(), "dispatching to handler");
        let response = self
            .handler
            .fetch(request)
            .await
            .map_err(AdapterError::Handler)?;

        exchange.trace.advance(ConnectionState::StreamingBody)?;
        let status = write_response(io, response, is_head, &mut exchange.progress).await?;
        exchange.trace.advance(ConnectionState::Done)?;
        Ok(status)
    }

    async fn fail<S>(
        &self,
        mut io: BufWriter<S>,
        peer: SocketAddr,
        mut exchange: Exchange,
        err: AdapterError,
    ) -> ConnectionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let state = exchange.trace.current();
        exchange.trace.fail();

        if matches!(err, AdapterError::ClosedBeforeHead) {
            debug!(peer = %peer, "connection closed before request");
            return ConnectionOutcome {
                trace: exchange.trace,
                status: None,
                error: Some(err),
            };
        }

        if exchange.progress.head_started {
            warn!(
                peer = %peer,
                method = %exchange.method(),
                path = %exchange.path,
                state = %state,
                body_bytes = exchange.progress.body_bytes,
                error = %err,
                "response aborted after head was sent; closing connection"
            );
            return ConnectionOutcome {
                trace: exchange.trace,
                status: None,
                error: Some(err),
            };
        }

        let fallback = err.fallback_status();
        if fallback.as_u16() >= 500 {
            error!(peer = %peer, method = %exchange.method(), path = %exchange.path, state = %state, error = %err, "request failed");
        } else {
            warn!(peer = %peer, method = %exchange.method(), path = %exchange.path, state = %state, error = %err, "rejecting request");
        }

        let mut progress = WriteProgress::default();
        let status = match write_response(
            &mut io,
            OutgoingResponse::plain(fallback),
            false,
            &mut progress,
        )
        .await
        {
            Ok(status) => Some(status),
            Err(write_err) => {
                debug!(peer = %peer, error = %write_err, "fallback response could not be written");
                None
            }
        };

        ConnectionOutcome {
            trace: exchange.trace,
            status,
            error: Some(err),
        }
    }
}

// Bookkeeping for one exchange, kept outside `drive` so the failure path can
// see how far it got.
#[derive(Default)]
struct Exchange {
    trace: StateTrace,
    progress: WriteProgress,
    method: Option<Method>,
    path: String,
}

impl Exchange {
    fn method(&self) -> &str {
        self.method.as_ref().map(Method::as_str).unwrap_or("-")
    }
}

/// Reads from `io` until a complete request head is buffered.
async fn read_head<R>(io: &mut R) -> Result<IncomingRequest, AdapterError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    loop {
        let bytes_read = io.read_buf(&mut buf).await.map_err(RequestError::Io)?;
        if bytes_read == 0 {
            return Err(if buf.is_empty() {
                AdapterError::ClosedBeforeHead
            } else {
                RequestError::UnexpectedEof.into()
            });
        }

        match IncomingRequest::parse(&buf) {
            Ok((_, body_offset)) if body_offset > IncomingRequest::MAX_HEAD_SIZE => {
                return Err(RequestError::HeadTooLarge {
                    max_bytes: IncomingRequest::MAX_HEAD_SIZE,
                }
                .into());
            }
            Ok((request, _)) => return Ok(request),
            Err(RequestError::Incomplete) if buf.len() <= IncomingRequest::MAX_HEAD_SIZE => {
                continue;
            }
            Err(RequestError::Incomplete) => {
                return Err(RequestError::HeadTooLarge {
                    max_bytes: IncomingRequest::MAX_HEAD_SIZE,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }
    }
}
