#![forbid(unsafe_code)]

//! HTTP façade over the status store, the lifecycle engines, and the
//! indexer registry.
//!
//! This layer is a thin projection: every response shape mirrors a store
//! query or an engine command outcome. The only write path it owns is
//! indexer-initiated download registration.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub mod errors;
pub mod handlers;
pub mod indexer;
pub mod models;
pub mod state;

pub use indexer::{Indexer, RegisteredDownload, ResourceDetail};
pub use state::ApiState;

/// Axum router wrapper that hosts the AutoGet API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Construct the server with shared dependencies wired through state.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        let router = Router::new()
            .route("/api/v1/indexers", get(handlers::list_indexers))
            .route(
                "/api/v1/indexers/{indexer}/resources/{resource}/download",
                get(handlers::register_download),
            )
            .route("/api/v1/downloaders", get(handlers::list_downloaders))
            .route(
                "/api/v1/downloaders/{downloader}",
                get(handlers::downloader_statuses),
            )
            .route(
                "/api/v1/download/{id}/organize",
                post(handlers::organize_download),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(state);
        Self { router }
    }

    /// Serve the API until the shutdown future resolves, then drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server
    /// terminates unexpectedly.
    pub async fn serve(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        tracing::info!(addr = %addr, "starting API listener");
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("api server terminated unexpectedly")?;
        Ok(())
    }

    /// Access the router, for in-process tests.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }
}
