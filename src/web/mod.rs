//! Web layer
//!
//! The HTTP surface of the router: OpenAI-compatible inference paths that
//! proxy to a chosen backend, plus the model listing and the operational
//! endpoints. Handlers are thin; routing and streaming live in the proxy
//! module and are reached through the shared context.

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::Config;
use crate::proxy::RouterContext;

pub mod handlers;
pub mod responses;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<RouterContext>,
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, context: Arc<RouterContext>) -> Result<Self> {
        let app = create_router(AppState { context });
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;
        Ok(Self { app, addr })
    }

    /// Start serving until the shutdown signal fires, then drain in-flight
    /// handlers.
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Build the route table.
///
/// Exposed separately so tests can drive the full router in-process.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Routed inference endpoints
        .route("/v1/chat/completions", post(handlers::inference::chat_completions))
        .route("/v1/completions", post(handlers::inference::completions))
        .route("/v1/embeddings", post(handlers::inference::embeddings))
        .route("/v1/rerank", post(handlers::inference::rerank_v1))
        .route("/rerank", post(handlers::inference::rerank))
        .route("/v1/score", post(handlers::inference::score_v1))
        .route("/score", post(handlers::inference::score))
        // Fleet-wide model listing
        .route("/v1/models", get(handlers::models::list_models))
        // Operational endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/version", get(handlers::health::version))
        // Middleware (applied in reverse order)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining in-flight requests");
}
