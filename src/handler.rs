//! The application seam: the handler capability the adapter dispatches to.
//!
//! Everything behind this trait (page rendering, routing, API endpoints) is
//! the application's business. The adapter only knows that a
//! [`NormalizedRequest`] goes in and an [`OutgoingResponse`] or an error
//! comes out.

use std::future::Future;
use std::pin::Pin;

use crate::http::{NormalizedRequest, OutgoingResponse};

/// A type-erased error returned by a handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The boxed future returned by [`Handler::fetch`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<OutgoingResponse, BoxError>> + Send>>;

/// Turns a normalized request into a response.
///
/// Any `Fn(NormalizedRequest) -> impl Future<Output = Result<OutgoingResponse, E>>`
/// implements this trait through the blanket impl below, so a closure is
/// enough to stand up a handler in tests.
///
/// # Examples
///
/// ```rust,no_run
/// use ingress::handler::Handler;
/// use ingress::http::{NormalizedRequest, OutgoingResponse, StatusCode};
///
/// fn assert_handler<H: Handler>(_: H) {}
///
/// assert_handler(|req: NormalizedRequest| async move {
///     Ok::<_, std::io::Error>(OutgoingResponse::new(StatusCode::Ok).body(req.url().path().to_owned()))
/// });
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Produces the response for `request`. Called at most once per request.
    fn fetch(&self, request: NormalizedRequest) -> HandlerFuture;
}

impl<T, F, E> Handler for T
where
    T: Fn(NormalizedRequest) -> F + Send + Sync + 'static,
    F: Future<Output = Result<OutgoingResponse, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn fetch(&self, request: NormalizedRequest) -> HandlerFuture {
        let fut = (self)(request);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}
