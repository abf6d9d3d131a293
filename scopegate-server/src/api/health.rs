use crate::openapi::HEALTH_TAG;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Liveness {
    status: &'static str,
}

/// Store reachability and the size of the installed routing table
#[derive(Debug, Serialize, ToSchema)]
pub struct Readiness {
    status: &'static str,
    /// Store backend name, `in-memory` or `redis`
    store: &'static str,
    store_status: &'static str,
    /// Hosts in the routing table currently served by the gateway
    site_hosts: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Process is up", body = Liveness)
    )
)]
pub async fn health_check() -> Json<Liveness> {
    Json(Liveness { status: "ok" })
}

/// Ready once the store answers
#[utoipa::path(
    get,
    path = "/ready",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Store reachable", body = Readiness),
        (status = 503, description = "Store unreachable", body = Readiness)
    )
)]
pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let healthy = state.health_check().await;
    let readiness = Readiness {
        status: if healthy { "ok" } else { "error" },
        store: state.authority.store().backend_name(),
        store_status: if healthy { "healthy" } else { "unhealthy" },
        site_hosts: state.sites.snapshot().host_count(),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
}
