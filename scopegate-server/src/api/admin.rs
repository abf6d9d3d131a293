//! Client administration. Every route requires a token granting `admin`.

use crate::api::auth::Authenticated;
use crate::errors::{ApiError, ErrorBody};
use crate::openapi::ADMIN_TAG;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use log::info;
use scopegate_core::{AppKind, Client, ClientUpdate, Scope};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub(crate) const ADMIN_SCOPE: &str = "admin";

/// A registered client, without its secret
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClientView {
    pub id: String,
    pub name: String,
    /// `app_type` and its fields
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub app: AppKind,
    #[schema(value_type = Vec<Object>)]
    pub scopes: Vec<Scope>,
    pub trusted: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Client> for ClientView {
    fn from(client: Client) -> Self {
        Self {
            id: client.id,
            name: client.name,
            app: client.app,
            scopes: client.scopes,
            trusted: client.trusted,
            created_at: client.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterClientRequest {
    pub name: String,
    /// `app_type` plus the fields of that app type
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub app: AppKind,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub scopes: Vec<Scope>,
    /// Trusted owner clients skip the identity endpoint
    #[serde(default)]
    pub trusted: bool,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    /// Same app type with new fields; the type itself cannot change
    #[schema(value_type = Option<Object>)]
    pub app: Option<AppKind>,
    #[schema(value_type = Option<Vec<Object>>)]
    pub scopes: Option<Vec<Scope>>,
}

/// A client secret, shown once
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SecretResponse {
    pub id: String,
    pub secret: String,
}

/// List registered clients
#[utoipa::path(
    get,
    path = "/admin/clients",
    responses(
        (status = 200, description = "Registered clients", body = Vec<ClientView>),
        (status = 403, description = "Token does not grant admin", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = ADMIN_TAG
)]
pub async fn list_clients(
    State(state): State<AppState>,
    caller: Authenticated,
) -> Result<Json<Vec<ClientView>>, ApiError> {
    caller.require_scopes(&[ADMIN_SCOPE])?;
    let clients = state.authority.clients.list().await?;
    Ok(Json(clients.into_iter().map(ClientView::from).collect()))
}

/// Register a client. The secret is returned once.
#[utoipa::path(
    post,
    path = "/admin/clients",
    request_body = RegisterClientRequest,
    responses(
        (status = 201, description = "Client registered", body = SecretResponse),
        (status = 400, description = "Unsupported app type", body = ErrorBody),
        (status = 403, description = "Token does not grant admin", body = ErrorBody),
        (status = 409, description = "Trusted client name taken", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = ADMIN_TAG
)]
pub async fn register_client(
    State(state): State<AppState>,
    caller: Authenticated,
    Json(request): Json<RegisterClientRequest>,
) -> Result<(StatusCode, Json<SecretResponse>), ApiError> {
    caller.require_scopes(&[ADMIN_SCOPE])?;
    if request.name.trim().is_empty() {
        return Err(ApiError::invalid_request("name is required"));
    }

    let (client, secret) = state
        .authority
        .clients
        .register(&request.name, request.app, request.scopes, request.trusted)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SecretResponse {
            id: client.id,
            secret,
        }),
    ))
}

/// Update a client's name, app fields or scopes
#[utoipa::path(
    patch,
    path = "/admin/clients/{id}",
    params(("id" = String, Path, description = "Client identifier")),
    request_body = UpdateClientRequest,
    responses(
        (status = 200, description = "Updated client", body = ClientView),
        (status = 400, description = "App type cannot change", body = ErrorBody),
        (status = 404, description = "Unknown client", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = ADMIN_TAG
)]
pub async fn update_client(
    State(state): State<AppState>,
    caller: Authenticated,
    Path(id): Path<String>,
    Json(request): Json<UpdateClientRequest>,
) -> Result<Json<ClientView>, ApiError> {
    caller.require_scopes(&[ADMIN_SCOPE])?;
    let update = ClientUpdate {
        name: request.name,
        app: request.app,
        scopes: request.scopes,
    };
    let client = state.authority.clients.update(&id, update).await?;
    Ok(Json(client.into()))
}

/// Delete a client with its connections and tokens
#[utoipa::path(
    delete,
    path = "/admin/clients/{id}",
    params(("id" = String, Path, description = "Client identifier")),
    responses(
        (status = 204, description = "Client deleted"),
        (status = 404, description = "Unknown client", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = ADMIN_TAG
)]
pub async fn delete_client(
    State(state): State<AppState>,
    caller: Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    caller.require_scopes(&[ADMIN_SCOPE])?;
    state.authority.clients.delete(&id).await?;
    info!("Client {} deleted by {}", id, caller.0.claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

/// Replace a client's secret
#[utoipa::path(
    post,
    path = "/admin/clients/{id}/secret",
    params(("id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "New secret", body = SecretResponse),
        (status = 404, description = "Unknown client", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = ADMIN_TAG
)]
pub async fn reset_secret(
    State(state): State<AppState>,
    caller: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<SecretResponse>, ApiError> {
    caller.require_scopes(&[ADMIN_SCOPE])?;
    let secret = state.authority.clients.reset_secret(&id).await?;
    Ok(Json(SecretResponse { id, secret }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/clients", get(list_clients).post(register_client))
        .route(
            "/admin/clients/{id}",
            patch(update_client).delete(delete_client),
        )
        .route("/admin/clients/{id}/secret", post(reset_secret))
}
