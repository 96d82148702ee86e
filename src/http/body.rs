//! Response body chunk sources.
//!
//! A [`ChunkSource`] is a lazy, pull-based, finite sequence of byte chunks.
//! Each pull yields a chunk, an error, or `None` (done). Sources are not
//! restartable. The adapter pulls one chunk, writes it, and only then pulls
//! the next, so a slow client slows the producer down instead of piling
//! chunks up in memory.

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors a chunk source can yield in place of a chunk.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("chunk source failed: {0}")]
    Source(String),

    #[error("body channel closed by the consumer")]
    Closed,

    #[error("I/O error while producing body: {0}")]
    Io(#[from] std::io::Error),
}

impl BodyError {
    /// Shorthand for [`BodyError::Source`].
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }
}

/// A type-erased, fallible stream of byte chunks.
pub type ChunkSource = Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>> + Send>>;

/// Builds a source that yields the given chunks in order, then ends.
///
/// # Examples
///
/// ```
/// use ingress::http::{OutgoingResponse, StatusCode, body};
///
/// let response = OutgoingResponse::new(StatusCode::Ok)
///     .header("Content-Type", "text/plain")
///     .stream(body::from_chunks(["c1", "c2", "c3"]));
/// assert!(response.has_body());
/// ```
pub fn from_chunks<I>(chunks: I) -> ChunkSource
where
    I: IntoIterator,
    I::Item: Into<Bytes>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures_util::stream::iter(
        chunks.into_iter().map(|chunk| Ok(chunk.into())),
    ))
}

/// Builds a source yielding a single buffer.
pub fn once(data: impl Into<Bytes>) -> ChunkSource {
    let data: Bytes = data.into();
    Box::pin(futures_util::stream::once(async move { Ok(data) }))
}

/// Wraps an arbitrary stream as a chunk source.
pub fn from_stream<S>(stream: S) -> ChunkSource
where
    S: Stream<Item = Result<Bytes, BodyError>> + Send + 'static,
{
    Box::pin(stream)
}

/// Producer half of a channel-fed chunk source.
///
/// Dropping the sender ends the body cleanly; [`abort`](Self::abort) ends it
/// with an error instead.
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::Sender<Result<Bytes, BodyError>>,
}

impl BodySender {
    /// Sends one chunk, waiting while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::Closed`] once the consumer has gone away (for
    /// example after the client disconnected).
    pub async fn send(&self, chunk: impl Into<Bytes>) -> Result<(), BodyError> {
        self.tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| BodyError::Closed)
    }

    /// Terminates the body with an error visible to the consumer.
    pub async fn abort(self, error: BodyError) {
        let _ = self.tx.send(Err(error)).await;
    }
}

/// Creates a channel-fed chunk source holding at most `capacity` pending chunks.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel(capacity: usize) -> (BodySender, ChunkSource) {
    let (tx, rx) = mpsc::channel(capacity);
    let source = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (BodySender { tx }, Box::pin(source))
}

/// Drains a chunk source into one contiguous buffer.
pub async fn to_bytes(mut source: ChunkSource) -> Result<Bytes, BodyError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = source.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_come_out_in_order() {
        let mut source = from_chunks(vec!["c1", "c2", "c3"]);
        assert_eq!(source.next().await.unwrap().unwrap(), "c1");
        assert_eq!(source.next().await.unwrap().unwrap(), "c2");
        assert_eq!(source.next().await.unwrap().unwrap(), "c3");
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn once_yields_single_buffer() {
        let bytes = to_bytes(once("hello")).await.unwrap();
        assert_eq!(bytes, "hello");
    }

    #[tokio::test]
    async fn channel_ends_when_sender_dropped() {
        let (tx, source) = channel(1);
        tokio::spawn(async move {
            tx.send("a").await.unwrap();
            tx.send("b").await.unwrap();
        });
        assert_eq!(to_bytes(source).await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn channel_abort_surfaces_error() {
        let (tx, source) = channel(4);
        tx.send("partial").await.unwrap();
        tx.abort(BodyError::msg("upstream reset")).await;
        let err = to_bytes(source).await.unwrap_err();
        assert!(matches!(err, BodyError::Source(ref m) if m == "upstream reset"));
    }

    #[tokio::test]
    async fn send_after_consumer_drop_fails() {
        let (tx, source) = channel(1);
        drop(source);
        assert!(matches!(tx.send("x").await, Err(BodyError::Closed)));
    }
}
