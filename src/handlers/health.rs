//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = concat!(
    "Project: ",
    env!("CARGO_PKG_REPOSITORY"),
    " - More info: https://www.herakles.io - Support: proc-usage@herakles.io"
);

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let cache = state.cache.read().await;

    // Derive HTTP status from the last refresh
    let status = if cache.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let message = match (&cache.last_error, cache.update_success) {
        (_, true) => "OK".to_string(),
        (Some(e), false) => format!("Usage sample failed: {e}"),
        (None, false) => "No usage sample yet".to_string(),
    };
    drop(cache);

    let table = state.health_stats.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\n{table}\n{FOOTER_TEXT}"),
    )
}
