//! HTTP surface of the frame classifier.
//!
//! Endpoints:
//! - `GET /`: liveness message
//! - `POST /analyze-frame/` (and `/analyze-frame`): multipart upload, field `file`
//!
//! CORS admits a single configured origin with credentials, mirroring the
//! requested method and headers.

mod error;
mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use dfscan_core::FrameAnalyzer;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{ApiError, ErrorBody};
pub use handlers::{AnalyzeResponse, RootResponse};

/// Origin of the companion web frontend.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Default upload ceiling (16 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Settings fixed when the router is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// The one origin allowed to call the API from a browser.
    pub allowed_origin: String,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    analyzer: Arc<FrameAnalyzer>,
}

/// Builds the application router around a loaded analyzer.
///
/// # Errors
///
/// Returns an error if the allowed origin is not a valid header value.
pub fn router(analyzer: Arc<FrameAnalyzer>, config: &HttpConfig) -> Result<Router> {
    let origin = HeaderValue::from_str(&config.allowed_origin)
        .with_context(|| format!("Invalid allowed origin: {}", config.allowed_origin))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Ok(Router::new()
        .route("/", get(handlers::root))
        .route("/analyze-frame/", post(handlers::analyze_frame))
        .route("/analyze-frame", post(handlers::analyze_frame))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { analyzer }))
}

/// Serves `app` on `listener` until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("Listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
