//! OAuth 2.0 endpoint handlers

use crate::api::auth::{basic_credentials, Authenticated};
use crate::api::oauth::issuer::{self, IssuedTokens};
use crate::api::oauth::models::{AuthorizationRequest, TokenRequest, TokenResponse};
use crate::errors::{ApiError, ErrorBody};
use crate::headers::presets;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::{
    extract::{Form, Query, State},
    http::{header::LOCATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use log::{debug, info, warn};
use scopegate_core::credential::opaque_signature;
use scopegate_core::scope::{grant_all, split_scopes, SCOPE_SEPARATOR};
use scopegate_core::{
    AppKind, AuthorityError, AuthorizationCode, Client, GrantSnapshot, GrantType, OpaqueToken,
    ResponseType, TokenKind,
};
use url::{form_urlencoded, Url};

/// Authorization endpoint for the code and implicit flows
///
/// The resource owner is identified by a bearer token issued to a trusted
/// client. Granted scopes are merged into the owner's connection with the
/// requesting client before anything is issued.
#[utoipa::path(
    get,
    path = "/auth",
    params(AuthorizationRequest),
    responses(
        (status = 302, description = "Redirect to the client with a code or a token fragment"),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 401, description = "Invalid bearer token", body = ErrorBody),
        (status = 403, description = "Client or owner not permitted", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = OAUTH_TAG
)]
pub async fn authorize(
    State(state): State<AppState>,
    owner: Authenticated,
    Query(request): Query<AuthorizationRequest>,
) -> Result<Response, ApiError> {
    handle_authorization(state, owner, request).await
}

/// Form-encoded variant of [`authorize`]
pub async fn authorize_form(
    State(state): State<AppState>,
    owner: Authenticated,
    Form(request): Form<AuthorizationRequest>,
) -> Result<Response, ApiError> {
    handle_authorization(state, owner, request).await
}

async fn handle_authorization(
    state: AppState,
    owner: Authenticated,
    request: AuthorizationRequest,
) -> Result<Response, ApiError> {
    info!(
        "Authorization request from client_id: {} with response_type: {}",
        request.client_id, request.response_type
    );

    // Only first-party clients may act for the owner here
    let session_client = match state.authority.clients.lookup(&owner.0.claims.aud).await {
        Ok(client) => client,
        Err(AuthorityError::RecordNotFound) => return Err(ApiError::TokenInvalid),
        Err(err) => return Err(err.into()),
    };
    if !session_client.is_trusted() {
        warn!(
            "Client {} is not trusted to authorize on behalf of users",
            session_client.id
        );
        return Err(ApiError::PermissionDenied);
    }
    let user_id = owner.user_id()?.to_string();

    let client = match state.authority.clients.lookup(&request.client_id).await {
        Ok(client) => client,
        Err(AuthorityError::RecordNotFound) => return Err(ApiError::InvalidClient),
        Err(err) => return Err(err.into()),
    };

    let response_type = request
        .response_type()
        .filter(|response_type| client.allows_response(*response_type))
        .ok_or_else(|| ApiError::UnsupportedResponseType(request.response_type.clone()))?;

    let redirect_uri = client
        .app
        .redirect_uri()
        .ok_or_else(|| ApiError::invalid_request("client has no redirect uri"))?;
    if let Some(requested) = request.redirect_uri.as_deref() {
        if requested != redirect_uri {
            return Err(ApiError::invalid_request("redirect_uri does not match"));
        }
    }
    let mut redirect = Url::parse(redirect_uri)
        .map_err(|_| ApiError::invalid_request("registered redirect uri is invalid"))?;

    let requested = split_scopes(request.scope.as_deref().unwrap_or_default(), SCOPE_SEPARATOR);
    let granted = grant_all(&client.scopes, &requested, &state.settings.mandatory_scope)?;

    // The grant is final, record it before issuing anything
    let connection = state
        .authority
        .connections
        .update_connection(&client.id, &user_id, &granted)
        .await?;

    let snapshot = GrantSnapshot {
        client_id: client.id.clone(),
        user_id,
        scopes: granted,
        connection_id: Some(connection.id),
        redirect_uri: Some(redirect_uri.to_string()),
    };

    match response_type {
        ResponseType::Code => {
            if !client.allows_grant(GrantType::AuthorizationCode) {
                return Err(ApiError::UnsupportedResponseType(
                    request.response_type.clone(),
                ));
            }
            let code = OpaqueToken::generate();
            state
                .authority
                .credentials
                .issue_authorization_code(&AuthorizationCode::new(
                    code.signature.clone(),
                    snapshot.clone(),
                    state.settings.token.code_ttl(),
                ))
                .await?;

            {
                let mut query = redirect.query_pairs_mut();
                query.append_pair("code", &code.value);
                if let Some(value) = request.state.as_deref() {
                    query.append_pair("state", value);
                }
                query.append_pair(
                    "scope",
                    &snapshot.scopes.join(SCOPE_SEPARATOR.to_string().as_str()),
                );
            }
            debug!("Issued authorization code to client {}", client.id);
        }
        ResponseType::Token => {
            let issued = issuer::issue(&state, &client, &snapshot).await?;
            let fragment = implicit_fragment(&client, &request, &issued);
            redirect.set_fragment(Some(&fragment));
            debug!("Issued implicit token to client {}", client.id);
        }
    }

    let mut response = (StatusCode::FOUND, [(LOCATION, redirect.to_string())]).into_response();
    presets::no_store().apply(&mut response);
    Ok(response)
}

/// Fragment parameters of an implicit grant redirect
fn implicit_fragment(
    client: &Client,
    request: &AuthorizationRequest,
    issued: &IssuedTokens,
) -> String {
    let mut fragment = form_urlencoded::Serializer::new(String::new());
    fragment
        .append_pair("access_token", &issued.access.token)
        .append_pair("token_type", "bearer")
        .append_pair("expires_in", &issued.expires_in.to_string())
        .append_pair("scope", &issued.scope());
    if let Some(value) = request.state.as_deref() {
        fragment.append_pair("state", value);
    }
    if let Some(refresh) = &issued.refresh {
        fragment.append_pair("refresh_token", &refresh.value);
    }
    if let Some(activity) = start_activity(client, request) {
        fragment.append_pair("start_activity", activity);
    }
    fragment.finish()
}

/// The launch activity of an android client, returned only to a caller that
/// presents the registered package name and key hash.
fn start_activity<'a>(client: &'a Client, request: &AuthorizationRequest) -> Option<&'a str> {
    match &client.app {
        AppKind::Android {
            package_name,
            key_hash,
            start_activity,
        } if request.package_name.as_deref() == Some(package_name.as_str())
            && request.key_hash.as_deref() == Some(key_hash.as_str()) =>
        {
            Some(start_activity.as_str())
        }
        _ => None,
    }
}

/// Token endpoint
#[utoipa::path(
    post,
    path = "/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 401, description = "Invalid or consumed grant", body = ErrorBody),
        (status = 403, description = "Client authentication failed or grant not permitted", body = ErrorBody),
        (status = 503, description = "A dependency timed out, retry later", body = ErrorBody)
    ),
    tag = OAUTH_TAG
)]
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Result<Response, ApiError> {
    // Form credentials win over HTTP Basic
    let (client_id, secret) = match (request.client_id.clone(), basic_credentials(&headers)) {
        (Some(id), Some((basic_id, basic_secret))) if basic_id == id => {
            let secret = request.client_secret.clone().or(Some(basic_secret));
            (id, secret)
        }
        (Some(id), _) => (id, request.client_secret.clone()),
        (None, Some((id, secret))) => (id, Some(secret)),
        (None, None) => return Err(ApiError::invalid_request("client_id is required")),
    };

    info!(
        "Token request from client_id: {} with grant_type: {}",
        client_id, request.grant_type
    );

    let client = state
        .authority
        .clients
        .authenticate(&client_id, secret.as_deref())
        .await?;

    let grant_type = request
        .grant_type()
        .filter(|grant_type| client.allows_grant(*grant_type))
        .ok_or_else(|| {
            warn!(
                "Unsupported grant type '{}' from client '{}'",
                request.grant_type, client.id
            );
            ApiError::UnsupportedGrantType(request.grant_type.clone())
        })?;

    let issued = match grant_type {
        GrantType::AuthorizationCode => exchange_code(&state, &client, &request).await?,
        GrantType::RefreshToken => refresh(&state, &client, &request).await?,
        GrantType::Password => password(&state, &client, &request).await?,
        GrantType::ClientCredentials => client_credentials(&state, &client, &request).await?,
        GrantType::Implicit => {
            return Err(ApiError::UnsupportedGrantType(request.grant_type.clone()))
        }
    };

    let mut response = Json(issued.response()).into_response();
    presets::no_store().apply(&mut response);
    Ok(response)
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::invalid_request(format!("{name} is required")))
}

async fn exchange_code(
    state: &AppState,
    client: &Client,
    request: &TokenRequest,
) -> Result<IssuedTokens, ApiError> {
    let code = required(&request.code, "code")?;
    let signature = opaque_signature(code);
    let snapshot = state
        .authority
        .credentials
        .consume_authorization_code(&signature)
        .await?;

    if snapshot.client_id != client.id {
        warn!("Client {} presented a code issued to another client", client.id);
        return Err(ApiError::TokenInvalid);
    }
    if let Some(redirect_uri) = request.redirect_uri.as_deref() {
        if snapshot.redirect_uri.as_deref() != Some(redirect_uri) {
            return Err(ApiError::invalid_request("redirect_uri does not match"));
        }
    }
    issuer::ensure_connection(state, &snapshot).await?;

    let issued = issuer::mint(state, client, &snapshot)?;
    state
        .authority
        .credentials
        .exchange_authorization_code(&signature, &issued.records)
        .await?;
    Ok(issued)
}

async fn refresh(
    state: &AppState,
    client: &Client,
    request: &TokenRequest,
) -> Result<IssuedTokens, ApiError> {
    let refresh_token = required(&request.refresh_token, "refresh_token")?;
    let signature = opaque_signature(refresh_token);
    let record = state
        .authority
        .credentials
        .consume_token(&signature, TokenKind::Refresh)
        .await?;

    if record.client_id() != client.id {
        warn!("Client {} presented a refresh token of another client", client.id);
        return Err(ApiError::TokenInvalid);
    }
    issuer::ensure_connection(state, &record.snapshot).await?;

    // The new session is a copy of the consumed one
    let issued = issuer::mint(state, client, &record.snapshot)?;
    state
        .authority
        .credentials
        .rotate_refresh_token(&signature, &issued.records)
        .await?;
    Ok(issued)
}

async fn password(
    state: &AppState,
    client: &Client,
    request: &TokenRequest,
) -> Result<IssuedTokens, ApiError> {
    let username = required(&request.username, "username")?;
    let password = required(&request.password, "password")?;

    if !client.is_trusted() {
        let Some(delegate) = &state.delegate else {
            warn!(
                "Password grant for untrusted client {} without an identity endpoint",
                client.id
            );
            return Err(ApiError::PermissionDenied);
        };
        delegate.authenticate(username, password).await?;
    }

    let requested = split_scopes(request.scope.as_deref().unwrap_or_default(), SCOPE_SEPARATOR);
    let granted = grant_all(&client.scopes, &requested, &state.settings.mandatory_scope)?;
    let connection = state
        .authority
        .connections
        .update_connection(&client.id, username, &granted)
        .await?;

    let snapshot = GrantSnapshot {
        client_id: client.id.clone(),
        user_id: username.to_string(),
        scopes: granted,
        connection_id: Some(connection.id),
        redirect_uri: None,
    };
    issuer::issue(state, client, &snapshot).await
}

async fn client_credentials(
    state: &AppState,
    client: &Client,
    request: &TokenRequest,
) -> Result<IssuedTokens, ApiError> {
    let requested = split_scopes(request.scope.as_deref().unwrap_or_default(), SCOPE_SEPARATOR);
    let granted = grant_all(&client.scopes, &requested, &state.settings.mandatory_scope)?;

    let snapshot = GrantSnapshot {
        client_id: client.id.clone(),
        user_id: String::new(),
        scopes: granted,
        connection_id: None,
        redirect_uri: None,
    };
    issuer::issue(state, client, &snapshot).await
}
