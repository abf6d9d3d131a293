//! Scope-gated reverse proxy.
//!
//! Every request that no authority route matches is resolved against the
//! site table. Routes without scopes are forwarded as they are. Routes with
//! scopes need a bearer token granting all of them; the validated token and
//! its claims are then passed to the backend as `X-Scopegate-*` headers.

mod authorize;
mod forward;

pub(crate) use authorize::authorize;
pub(crate) use forward::forward;

use crate::state::AppState;
use axum::{middleware, routing::any, Router};

/// Reserved for headers set by the gateway. Client-supplied copies are dropped.
pub(crate) const HEADER_PREFIX: &str = "x-scopegate-";

/// Creates the catch-all gateway router
pub(crate) fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .fallback(any(forward))
        // we must use layer here and not route_layer because, route_layer only
        // affects routes that are defined on the router which doesn't affect fallback
        .layer(middleware::from_fn_with_state(state.clone(), authorize))
}
