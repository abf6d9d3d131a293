use crate::api::{admin, clients, connections, health, oauth, tokens};
use crate::errors::ErrorBody;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OAUTH_TAG: &str = "OAuth API";
pub(crate) const ADMIN_TAG: &str = "Admin API";
pub(crate) const CLIENTS_TAG: &str = "Clients API";
pub(crate) const CONNECTIONS_TAG: &str = "Connections API";
pub(crate) const TOKENS_TAG: &str = "Tokens API";

/// Registers the `bearer` scheme referenced by protected endpoints
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::ready_check,
        oauth::handlers::authorize,
        oauth::handlers::token,
        admin::list_clients,
        admin::register_client,
        admin::update_client,
        admin::delete_client,
        admin::reset_secret,
        clients::get_client,
        connections::list_connections,
        connections::revoke_connection,
        tokens::revoke_token,
    ),
    components(schemas(
        ErrorBody,
        health::Liveness,
        health::Readiness,
        oauth::models::AuthorizationRequest,
        oauth::models::TokenRequest,
        oauth::models::TokenResponse,
        admin::ClientView,
        admin::RegisterClientRequest,
        admin::UpdateClientRequest,
        admin::SecretResponse,
        clients::ClientInfo,
        clients::ScopeInfo,
        connections::ConnectionView,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OAUTH_TAG, description = "Authorization and token endpoints"),
        (name = ADMIN_TAG, description = "Client administration, requires the admin scope"),
        (name = CLIENTS_TAG, description = "Public client information"),
        (name = CONNECTIONS_TAG, description = "Grants held by the calling user"),
        (name = TOKENS_TAG, description = "Token revocation"),
    ),
    info(
        title = "scopegate API",
        description = "OAuth2 authorization authority and scope-gated gateway",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_authority_endpoints() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in ["/auth", "/token", "/admin/clients", "/connections/{id}", "/ready"] {
            assert!(paths.contains(&expected), "missing {expected} in {paths:?}");
        }
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer"));
    }
}
