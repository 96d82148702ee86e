use std::sync::Arc;

use ingress::server::shutdown_on;
use ingress::{
    BoxError, NormalizedRequest, OutgoingResponse, RequestAdapter, Server, ServerConfig,
    StaticFileResolver, StatusCode,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Stand-in for the application: the dashboard handler is linked in by the
// embedding binary. Every dispatched request answers 404 here.
async fn not_found(req: NormalizedRequest) -> Result<OutgoingResponse, BoxError> {
    warn!(url = %req.url(), "no application handler configured");
    Ok(OutgoingResponse::plain(StatusCode::NotFound))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let resolver = Arc::new(StaticFileResolver::new(&config.static_root));
    let server = Server::bind(config.bind_addr()).await?;

    let adapter = RequestAdapter::from_parts(resolver, Arc::new(not_found))
        .max_body_bytes(config.max_body_bytes)
        .fallback_host(server.local_addr().to_string());

    info!(
        static_root = %config.static_root.display(),
        max_body_bytes = ?config.max_body_bytes,
        "starting ingress"
    );

    server
        .run_until(adapter, shutdown_on(tokio::signal::ctrl_c()))
        .await?;
    Ok(())
}
