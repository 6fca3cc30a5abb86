use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use axum::{Json, Router, routing::get, extract::State, response::IntoResponse};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info};

use crate::server::ServerState;
use crate::utils::ServerError;

/// Struct for managing server health metrics.
#[derive(Clone)]
pub struct HealthMetrics {
    /// Sessions currently open.
    pub active_sessions: IntGauge,
    /// Connections accepted since start.
    pub connections_total: IntCounter,
    /// Requests dispatched.
    pub requests_total: IntCounter,
    /// Responses that carried an `ERROR` marker.
    pub error_responses_total: IntCounter,
    /// Signature occurrences found in submitted samples.
    pub findings_total: IntCounter,
    /// Sessions closed because of a malformed frame.
    pub protocol_errors_total: IntCounter,
    /// Prometheus registry used to store and manage the metrics.
    registry: Registry,
}

impl HealthMetrics {
    /// Creates a new instance of `HealthMetrics` and registers the metrics with Prometheus.
    ///
    /// # Errors
    /// Returns the Prometheus error if a metric cannot be created or registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let active_sessions = IntGauge::new("active_sessions", "Open sessions")?;
        let connections_total = IntCounter::new("connections_total", "Total connections accepted")?;
        let requests_total = IntCounter::new("requests_total", "Total requests dispatched")?;
        let error_responses_total = IntCounter::new("error_responses_total", "Total error responses")?;
        let findings_total = IntCounter::new("findings_total", "Total signature findings")?;
        let protocol_errors_total = IntCounter::new("protocol_errors_total", "Total framing errors")?;

        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(error_responses_total.clone()))?;
        registry.register(Box::new(findings_total.clone()))?;
        registry.register(Box::new(protocol_errors_total.clone()))?;

        Ok(Self {
            active_sessions,
            connections_total,
            requests_total,
            error_responses_total,
            findings_total,
            protocol_errors_total,
            registry,
        })
    }

    /// Exposes the current state of all registered metrics in Prometheus-compatible format.
    pub fn expose_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Serves `/metrics` and `/health` on the configured metrics port until
/// `shutdown` turns `true`.
///
/// # Errors
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve_metrics_http(
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.metrics_port)
        .parse()
        .map_err(|e| ServerError::ConfigurationError(format!("Invalid metrics address: {}", e)))?;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let server = axum::Server::try_bind(&addr)
        .map_err(|e| ServerError::ConfigurationError(format!("Metrics bind error: {}", e)))?;
    info!("Metrics listening on {}", addr);

    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| ServerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
}

/// Handles the `/metrics` HTTP request and returns the current metrics data.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.metrics.expose_metrics()
}

/// Liveness summary with registry sizes.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(health_summary(&state))
}

pub fn health_summary(state: &ServerState) -> serde_json::Value {
    let registries = &state.dispatcher.services().registries;
    json!({
        "status": "ok",
        "tls": state.tls_acceptor.is_some(),
        "active_sessions": state.sessions.len(),
        "patients": registries.subjects.len(),
        "signatures": registries.signatures.len(),
        "samples": registries.samples.len(),
    })
}
