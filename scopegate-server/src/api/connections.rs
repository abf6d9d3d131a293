//! The calling user's connections: which clients hold which of their grants.

use crate::api::auth::Authenticated;
use crate::errors::{ApiError, ErrorBody};
use crate::openapi::CONNECTIONS_TAG;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use scopegate_core::AuthorityError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionView {
    pub id: String,
    pub client_id: String,
    pub client_name: String,
    /// Every scope the user granted the client so far
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[utoipa::path(
    get,
    path = "/connections",
    responses(
        (status = 200, description = "Connections of the calling user", body = Vec<ConnectionView>),
        (status = 401, description = "Invalid bearer token", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = CONNECTIONS_TAG
)]
pub async fn list_connections(
    State(state): State<AppState>,
    caller: Authenticated,
) -> Result<Json<Vec<ConnectionView>>, ApiError> {
    let user_id = caller.user_id()?;
    let connections = state.authority.connections.list_for_user(user_id).await?;

    let mut views = Vec::with_capacity(connections.len());
    for connection in connections {
        let client = match state.authority.clients.lookup(&connection.client_id).await {
            Ok(client) => client,
            Err(AuthorityError::RecordNotFound) => {
                warn!(
                    "Connection {} refers to missing client {}",
                    connection.id, connection.client_id
                );
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        views.push(ConnectionView {
            scopes: connection.scope_list(),
            id: connection.id,
            client_id: client.id,
            client_name: client.name,
            created_at: connection.created_at,
            updated_at: connection.updated_at,
        });
    }
    Ok(Json(views))
}

/// Revoke a connection. Tokens issued under it stop validating.
#[utoipa::path(
    delete,
    path = "/connections/{id}",
    params(("id" = String, Path, description = "Connection identifier")),
    responses(
        (status = 204, description = "Connection revoked"),
        (status = 403, description = "Connection belongs to another user", body = ErrorBody),
        (status = 404, description = "Unknown connection", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = CONNECTIONS_TAG
)]
pub async fn revoke_connection(
    State(state): State<AppState>,
    caller: Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id = caller.user_id()?;
    state.authority.connections.revoke(&id, user_id).await?;
    info!("Connection {} revoked by {}", id, user_id);
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connections", get(list_connections))
        .route("/connections/{id}", delete(revoke_connection))
}
