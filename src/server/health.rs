//! Liveness endpoint.

use axum::http::StatusCode;

/// Returns 200 OK with the text "OK" while the server accepts connections.
///
/// Does not touch the ledger: an unavailable ledger makes the guard skip
/// events, but the process itself is still alive.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
