//! REST API for inspecting and driving a running node.
//!
//! Routes:
//! - `GET /batteries`: status rows of every battery
//! - `GET /batteries/{name}`: one battery's status row
//! - `POST /batteries/{name}/current`: set the current, body `{"current": <A>}`
//! - `POST /batteries/{name}/refresh`: force a fresh status read
//! - `GET /policies/{name}`: partition bookkeeping of a splitter policy

mod handlers;
mod types;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use crate::bos::Bos;

pub use types::{ApiError, CurrentRequest, ErrorResponse};

/// State shared across all request handlers.
pub struct AppState {
    pub bos: Arc<Bos>,
}

/// Builds the axum router with all API routes.
///
/// # Arguments
///
/// * `state` - Shared application state
///
/// # Returns
///
/// Configured `Router` ready to serve.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/batteries", get(handlers::list_batteries))
        .route("/batteries/{name}", get(handlers::get_battery))
        .route("/batteries/{name}/current", post(handlers::set_current))
        .route("/batteries/{name}/refresh", post(handlers::refresh))
        .route("/policies/{name}", get(handlers::get_policy))
        .with_state(state)
}

/// Binds to the given address and serves the API until the process exits.
///
/// # Arguments
///
/// * `state` - Shared application state
/// * `addr` - Socket address to bind to
///
/// # Errors
///
/// Returns an `io::Error` if the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "API server listening");
    axum::serve(listener, app).await
}
