//! OAuth 2.0 authorization server endpoints
//!
//! ## Supported flows
//! - Authorization Code Grant, for web backends
//! - Implicit Grant, for web and android apps
//! - Resource Owner Password Credentials Grant, for owner clients. Untrusted
//!   owner clients have the password verified by the identity endpoint.
//! - Client Credentials Grant
//! - Refresh Token Grant, rotating the refresh token on every use
//!
//! The flows share one rule set: requested scopes must be granted by the
//! client's scope list, and user grants accumulate in the user's connection
//! with the client.

pub mod handlers;
mod issuer;
pub mod models;

use crate::state::AppState;
use axum::routing::{get, post, Router};

/// Creates OAuth 2.0 routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/auth",
            get(handlers::authorize).post(handlers::authorize_form),
        )
        .route("/token", post(handlers::token))
}
