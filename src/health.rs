//! Liveness HTTP endpoint.
//!
//! Serves GET `/` and `/health` with a fixed 200 "OK" body for external
//! process supervisors. Runs as an independent task and shares no state
//! with the relay or poll components.

use axum::{routing::get, Router};
use tracing::{error, info};

/// GET / and /health — fixed liveness response.
async fn health_check() -> &'static str {
    "OK"
}

/// Bind and serve the liveness endpoint on `port`.
///
/// Failures are logged rather than propagated: a broken liveness listener
/// must not take down the bot.
pub async fn serve(port: u16) {
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check));

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind health endpoint on port {port}: {e}");
            return;
        }
    };

    info!("Health endpoint listening on port {port}");
    if let Err(e) = axum::serve(listener, app).await {
        error!("Health endpoint terminated: {e}");
    }
}
