use crate::errors::{ApiError, ErrorBody};
use crate::headers::presets;
use crate::openapi::CLIENTS_TAG;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use scopegate_core::Scope;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Public description of a client, shown to users before they grant access
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClientInfo {
    pub id: String,
    pub name: String,
    pub scopes: Vec<ScopeInfo>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ScopeInfo {
    pub name: String,
    pub required: bool,
}

impl From<&Scope> for ScopeInfo {
    fn from(scope: &Scope) -> Self {
        Self {
            name: scope.name.clone(),
            required: scope.required,
        }
    }
}

#[utoipa::path(
    get,
    path = "/client/{id}",
    params(("id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Client name and scopes", body = ClientInfo),
        (status = 404, description = "Unknown client", body = ErrorBody)
    ),
    tag = CLIENTS_TAG
)]
pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let client = state.authority.clients.lookup(&id).await?;
    let info = ClientInfo {
        scopes: client.scopes.iter().map(ScopeInfo::from).collect(),
        id: client.id,
        name: client.name,
    };

    let mut response = Json(info).into_response();
    presets::private_cache(300).apply(&mut response);
    Ok(response)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/client/{id}", get(get_client))
}
