//! Credential extraction shared by the authority endpoints and the gateway.

use crate::errors::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::request::Parts;
use http::HeaderMap;
use log::debug;
use scopegate_core::scope::grants;
use scopegate_core::ValidatedBearer;

/// Returns the raw bearer token of the Authorization header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::TokenNotFound)?;

    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
            let token = token.trim();
            if token.is_empty() {
                Err(ApiError::TokenNotFound)
            } else {
                Ok(token)
            }
        }
        _ => Err(ApiError::TokenNotFound),
    }
}

/// Decodes HTTP Basic credentials, if present.
pub(crate) fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Validates the request's bearer token against the signature, the token
/// record and its connection.
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<ValidatedBearer, ApiError> {
    let token = bearer_token(headers)?;
    Ok(state.validator.validate_bearer(token).await?)
}

/// A request carrying a valid access token.
pub(crate) struct Authenticated(pub ValidatedBearer);

impl Authenticated {
    /// Every listed scope must be granted by the token.
    pub(crate) fn require_scopes<S: AsRef<str>>(&self, required: &[S]) -> Result<(), ApiError> {
        let held = self.0.claims.scopes();
        match required
            .iter()
            .map(AsRef::as_ref)
            .find(|scope| !grants(&held, scope))
        {
            Some(missing) => {
                debug!(
                    "Token {} lacks scope {} required by the request",
                    self.0.claims.jti, missing
                );
                Err(ApiError::PermissionDenied)
            }
            None => Ok(()),
        }
    }

    /// Subject of a user token. Client credential tokens have none.
    pub(crate) fn user_id(&self) -> Result<&str, ApiError> {
        let subject = self.0.claims.sub.as_str();
        if subject.is_empty() {
            return Err(ApiError::PermissionDenied);
        }
        Ok(subject)
    }
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers).await.map(Authenticated)
    }
}
