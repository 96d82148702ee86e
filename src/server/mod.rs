//! Async TCP listener using Tokio.
//!
//! Accepts TCP connections and hands each one to a [`RequestAdapter`] on its
//! own task. Connections are independent: a slow handler or a stalled peer
//! only holds up its own task.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::adapter::RequestAdapter;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// The ingress listener.
///
/// # Examples
///
/// ```rust,no_run
/// use ingress::adapter::RequestAdapter;
/// use ingress::assets::StaticFileResolver;
/// use ingress::http::{NormalizedRequest, OutgoingResponse, StatusCode};
/// use ingress::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let adapter = RequestAdapter::new(
///         StaticFileResolver::new("./public"),
///         |_req: NormalizedRequest| async {
///             Ok::<_, std::io::Error>(OutgoingResponse::new(StatusCode::NotFound))
///         },
///     );
///     let server = Server::bind("127.0.0.1:3000").await?;
///     server.run(adapter).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, one task per connection.
    ///
    /// # Errors
    ///
    /// Currently never returns; accept errors are logged and the loop goes on.
    pub async fn run(self, adapter: RequestAdapter) -> Result<(), ServerError> {
        self.run_until(adapter, std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// In-flight connections are not cancelled; they finish on their own tasks.
    pub async fn run_until<F>(self, adapter: RequestAdapter, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!(address = %self.local_addr, "ingress listening");
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested; no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let adapter = adapter.clone();

            tokio::spawn(async move {
                adapter.handle(stream, peer_addr).await;
            });
        }
    }
}

/// Waits for a shutdown signal such as `tokio::signal::ctrl_c()`.
///
/// If the signal handler cannot be installed the error is logged and the
/// returned future never resolves, so the server keeps running instead of
/// stopping right after startup.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "failed to install signal handler; graceful shutdown disabled");
            std::future::pending::<()>().await;
        }
    }
}
