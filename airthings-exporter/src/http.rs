//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::collector::SharedCollector;
use crate::error::CollectError;
use crate::stats::{ExporterStats, ScrapeOutcome};

/// Content type of the text exposition format.
pub const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    collector: SharedCollector,
    stats: Arc<ExporterStats>,
}

/// Create the HTTP router.
pub fn create_router(
    collector: SharedCollector,
    stats: Arc<ExporterStats>,
    metrics_path: &str,
) -> Router {
    let state = AppState { collector, stats };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
///
/// Holding the collector lock for the whole cycle serializes scrapes.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let (result, remaining) = {
        let mut collector = state.collector.lock().await;
        let result = collector.collect().await;
        (result, collector.rate_limit_remaining())
    };

    state.stats.set_rate_limit(remaining);

    match result {
        Ok(family) => {
            if family.is_skipped() {
                state.stats.record_scrape(ScrapeOutcome::Skipped);
            } else {
                state.stats.record_scrape(ScrapeOutcome::Success);
                state.stats.set_samples(family.len());
            }

            let mut body = family.render();
            match state.stats.encode() {
                Ok(encoded) => body.push_str(&encoded),
                Err(e) => warn!(error = %e, "Failed to encode exporter stats"),
            }

            (StatusCode::OK, [(CONTENT_TYPE, TEXT_FORMAT)], body).into_response()
        }
        Err(e) if e.is_rate_limited() => {
            state.stats.record_scrape(ScrapeOutcome::RateLimited);

            let retry_after = e.retry_after_secs().unwrap_or_default();
            let until = e
                .blocked_until()
                .map(|until| until.to_string())
                .unwrap_or_default();

            (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    (RETRY_AFTER, retry_after.to_string()),
                    (CONTENT_TYPE, "text/plain".to_string()),
                ],
                format!("Rate limited. Retry after {}", until),
            )
                .into_response()
        }
        Err(e) => {
            state.stats.record_scrape(ScrapeOutcome::Error);
            error!(error = %e, "Collection failed");

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, "text/plain")],
                format!("Error generating metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, "text/plain")], "OK").into_response()
}

/// Run one collection before serving, logging the outcome.
///
/// Failures here never stop the exporter from starting.
pub async fn preflight(collector: &SharedCollector) {
    let mut collector = collector.lock().await;

    match collector.collect().await {
        Ok(family) => info!(samples = family.len(), "Initial API check successful"),
        Err(CollectError::RateLimited { until, .. }) => {
            warn!(until = %until, "Rate limited at startup")
        }
        Err(e) => error!(error = %e, "Initial API check failed"),
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    collector: SharedCollector,
    stats: Arc<ExporterStats>,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        collector: SharedCollector,
        stats: Arc<ExporterStats>,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Self {
        Self {
            collector,
            stats,
            listen_addr,
            metrics_path,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.collector, self.stats, &self.metrics_path);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
