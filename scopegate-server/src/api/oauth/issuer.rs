//! Turns a grant snapshot into signed tokens and their store records.

use crate::api::oauth::models::TokenResponse;
use crate::errors::ApiError;
use crate::state::AppState;
use log::debug;
use scopegate_core::claims::SignedToken;
use scopegate_core::scope::SCOPE_SEPARATOR;
use scopegate_core::{
    AuthorityError, Claims, Client, GrantSnapshot, GrantType, OpaqueToken, TokenKind, TokenRecord,
};

pub(crate) struct IssuedTokens {
    pub access: SignedToken,
    pub refresh: Option<OpaqueToken>,
    pub records: Vec<TokenRecord>,
    pub expires_in: i64,
    pub scopes: Vec<String>,
}

impl IssuedTokens {
    pub fn scope(&self) -> String {
        self.scopes.join(SCOPE_SEPARATOR.to_string().as_str())
    }

    pub fn response(&self) -> TokenResponse {
        TokenResponse {
            access_token: self.access.token.clone(),
            token_type: "bearer".to_string(),
            expires_in: self.expires_in,
            refresh_token: self.refresh.as_ref().map(|token| token.value.clone()),
            scope: self.scope(),
        }
    }
}

/// A refresh token is only issued to a user grant that includes the
/// mandatory scope, for a client allowed to use the refresh grant.
fn offers_refresh(state: &AppState, client: &Client, snapshot: &GrantSnapshot) -> bool {
    !snapshot.user_id.is_empty()
        && client.allows_grant(GrantType::RefreshToken)
        && snapshot
            .scopes
            .iter()
            .any(|scope| scope == &state.settings.mandatory_scope)
}

/// Signs the access token and prepares the records to persist. Nothing is
/// written to the store.
pub(crate) fn mint(
    state: &AppState,
    client: &Client,
    snapshot: &GrantSnapshot,
) -> Result<IssuedTokens, ApiError> {
    let token_settings = &state.settings.token;
    let claims = Claims::build(
        &token_settings.issuer,
        &snapshot.user_id,
        &snapshot.client_id,
        &snapshot.scopes,
        snapshot.connection_id.as_deref(),
        token_settings.access_ttl(),
    );
    let access = state.signer.sign(&claims)?;

    let mut records = vec![TokenRecord::new(
        access.signature.clone(),
        TokenKind::Access,
        snapshot.clone(),
        token_settings.access_ttl(),
    )];

    let refresh = if offers_refresh(state, client, snapshot) {
        let refresh = OpaqueToken::generate();
        records.push(TokenRecord::new(
            refresh.signature.clone(),
            TokenKind::Refresh,
            snapshot.clone(),
            token_settings.refresh_ttl(),
        ));
        Some(refresh)
    } else {
        None
    };

    debug!(
        "Minted token {} for client {} (refresh: {})",
        claims.jti,
        client.id,
        refresh.is_some()
    );
    Ok(IssuedTokens {
        access,
        refresh,
        records,
        expires_in: claims.expires_in(),
        scopes: snapshot.scopes.clone(),
    })
}

/// Mints and persists tokens for a grant that consumes nothing.
pub(crate) async fn issue(
    state: &AppState,
    client: &Client,
    snapshot: &GrantSnapshot,
) -> Result<IssuedTokens, ApiError> {
    let issued = mint(state, client, snapshot)?;
    state.authority.credentials.issue_tokens(&issued.records).await?;
    Ok(issued)
}

/// Fails with `ConnectionRevoked` when the snapshot's connection is gone.
pub(crate) async fn ensure_connection(
    state: &AppState,
    snapshot: &GrantSnapshot,
) -> Result<(), ApiError> {
    let Some(connection_id) = snapshot.connection_id.as_deref() else {
        return Ok(());
    };
    match state.authority.connections.get_by_id(connection_id).await {
        Ok(_) => Ok(()),
        Err(AuthorityError::RecordNotFound) => {
            debug!("Connection {} was revoked", connection_id);
            Err(ApiError::ConnectionRevoked)
        }
        Err(err) => Err(err.into()),
    }
}
