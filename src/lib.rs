//! # ingress
//!
//! The HTTP/1.1 ingress adapter in front of the admin dashboard.
//!
//! Every accepted connection carries one request. GET and HEAD requests are
//! first tried against a static content root; everything else (and every
//! static miss) is normalized and dispatched to an application [`Handler`],
//! whose response body is streamed back chunk by chunk.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ingress::{NormalizedRequest, OutgoingResponse, RequestAdapter, Server, StaticFileResolver, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = RequestAdapter::new(
//!         StaticFileResolver::new("./public"),
//!         |req: NormalizedRequest| async move {
//!             Ok::<_, std::io::Error>(
//!                 OutgoingResponse::new(StatusCode::Ok).body(format!("you asked for {}", req.url())),
//!             )
//!         },
//!     );
//!     let server = Server::bind("127.0.0.1:3000").await?;
//!     server.run(adapter).await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod assets;
pub mod config;
pub mod handler;
pub mod http;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use adapter::{AdapterError, ConnectionOutcome, ConnectionState, RequestAdapter};
pub use assets::{Resolution, StaticAsset, StaticFileResolver};
pub use config::{ConfigError, ServerConfig};
pub use handler::{BoxError, Handler};
pub use http::{
    ChunkSource, Headers, IncomingRequest, Method, NormalizedRequest, OutgoingResponse,
    StatusCode,
};
pub use server::{Server, ServerError};
