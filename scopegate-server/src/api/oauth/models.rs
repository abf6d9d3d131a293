//! OAuth 2.0 request and response structures

use scopegate_core::{GrantType, ResponseType};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Authorization request for the code and implicit flows
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct AuthorizationRequest {
    /// "code" or "token"
    pub response_type: String,
    /// Client identifier
    pub client_id: String,
    /// Must equal the registered redirect URI when given
    pub redirect_uri: Option<String>,
    /// Requested scopes (space-separated)
    pub scope: Option<String>,
    /// Opaque value echoed back to the client
    pub state: Option<String>,
    /// Android package name, checked before `start_activity` is returned
    pub package_name: Option<String>,
    /// Android signing key hash, checked before `start_activity` is returned
    pub key_hash: Option<String>,
}

impl AuthorizationRequest {
    pub fn response_type(&self) -> Option<ResponseType> {
        match self.response_type.as_str() {
            "code" => Some(ResponseType::Code),
            "token" => Some(ResponseType::Token),
            _ => None,
        }
    }
}

/// Token request covering every supported grant
#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// "authorization_code", "refresh_token", "password" or "client_credentials"
    pub grant_type: String,
    /// Client identifier, may be sent with HTTP Basic instead
    pub client_id: Option<String>,
    /// Client secret, may be sent with HTTP Basic instead
    pub client_secret: Option<String>,
    /// Authorization code (authorization_code grant)
    pub code: Option<String>,
    /// Redirect URI of the authorization request (authorization_code grant)
    pub redirect_uri: Option<String>,
    /// Refresh token (refresh_token grant)
    pub refresh_token: Option<String>,
    /// Resource owner name (password grant)
    pub username: Option<String>,
    /// Resource owner password (password grant)
    pub password: Option<String>,
    /// Requested scopes (space-separated, password and client_credentials grants)
    pub scope: Option<String>,
}

impl TokenRequest {
    pub fn grant_type(&self) -> Option<GrantType> {
        match self.grant_type.as_str() {
            "authorization_code" => Some(GrantType::AuthorizationCode),
            "refresh_token" => Some(GrantType::RefreshToken),
            "password" => Some(GrantType::Password),
            "client_credentials" => Some(GrantType::ClientCredentials),
            _ => None,
        }
    }
}

/// Issued token set
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// Signed access token
    pub access_token: String,
    /// Always "bearer"
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Present when the grant included the mandatory scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scopes (space-separated)
    pub scope: String,
}
