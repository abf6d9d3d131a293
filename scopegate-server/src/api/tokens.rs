use crate::api::auth::{authenticate, basic_credentials};
use crate::errors::{ApiError, ErrorBody};
use crate::openapi::TOKENS_TAG;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::delete,
    Router,
};
use log::{info, warn};
use scopegate_core::{AppKind, Client, TokenRecord};

/// Revoke an access or refresh token by its signature
///
/// Tokens of client credential clients are revoked by the client itself,
/// authenticated with HTTP Basic. Any other token is revoked by the user it
/// was issued to. The caller is authenticated before the token is looked up.
#[utoipa::path(
    delete,
    path = "/tokens/{signature}",
    params(("signature" = String, Path, description = "Token signature")),
    responses(
        (status = 204, description = "Token revoked"),
        (status = 400, description = "No credentials presented", body = ErrorBody),
        (status = 401, description = "Invalid bearer token", body = ErrorBody),
        (status = 403, description = "Caller does not own the token", body = ErrorBody),
        (status = 404, description = "Unknown token", body = ErrorBody)
    ),
    tag = TOKENS_TAG
)]
pub async fn revoke_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(signature): Path<String>,
) -> Result<StatusCode, ApiError> {
    let caller = Caller::authenticate(&state, &headers).await?;
    let record = state.authority.credentials.find_token(&signature).await?;
    caller.ensure_owns(&record)?;

    state.authority.credentials.delete_token(&signature).await?;
    info!("Revoked token {} of client {}", signature, record.client_id());
    Ok(StatusCode::NO_CONTENT)
}

/// Who is asking for a revocation
enum Caller {
    /// A client credential client presenting HTTP Basic
    Machine(Client),
    /// A user presenting a valid bearer token
    User(String),
}

impl Caller {
    async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Self, ApiError> {
        if let Some((client_id, secret)) = basic_credentials(headers) {
            let client = state
                .authority
                .clients
                .authenticate(&client_id, Some(secret.as_str()))
                .await?;
            return Ok(Self::Machine(client));
        }
        let bearer = authenticate(state, headers).await?;
        Ok(Self::User(bearer.claims.sub))
    }

    fn ensure_owns(&self, record: &TokenRecord) -> Result<(), ApiError> {
        let owns = match self {
            Self::Machine(client) => {
                matches!(client.app, AppKind::Client) && client.id == record.client_id()
            }
            Self::User(subject) => !subject.is_empty() && subject == record.user_id(),
        };
        if !owns {
            warn!("Caller does not own token of client {}", record.client_id());
            return Err(ApiError::PermissionDenied);
        }
        Ok(())
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/tokens/{signature}", delete(revoke_token))
}
