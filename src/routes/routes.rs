//! Defines routes for the share-link API.
//!
//! ## Structure
//! - `POST   /shares` — upload a file, returns the share id and link
//! - `GET    /shares/{id}` — validity status (no content, no counter change)
//! - `GET    /shares/{id}/download` — deliver the file, consumes quota
//! - `GET    /shares/{id}/preview` — deliver inline, never consumes quota
//!
//! Plus `/healthz` and `/readyz` probes at the root.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    share_handlers::{create_share, download_share, preview_share, share_status},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all share endpoints.
///
/// The router carries shared state (`AppState`) to all handlers. The body
/// limit is slightly above the configured upload cap so the handler can
/// return a proper "too large" response for payloads just over the line.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Share endpoints
        .route("/shares", post(create_share))
        .route("/shares/{id}", get(share_status))
        .route("/shares/{id}/download", get(download_share))
        .route("/shares/{id}/preview", get(preview_share))
        .layer(DefaultBodyLimit::max(max_upload_bytes.saturating_mul(2)))
}
