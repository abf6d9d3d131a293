pub(crate) mod admin;
pub(crate) mod auth;
pub(crate) mod clients;
pub(crate) mod connections;
pub(crate) mod health;
pub(crate) mod oauth;
pub(crate) mod tokens;

use crate::gateway;
use crate::state::AppState;
use axum::Router;

/// Combines all API routes into a single router. Requests no authority route
/// matches fall through to the gateway.
pub(super) fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(oauth::router())
        .merge(admin::router())
        .merge(clients::router())
        .merge(connections::router())
        .merge(tokens::router())
        .merge(gateway::router(state))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestFixture;
    use http::{Method, StatusCode};
    use scopegate_core::AppKind;
    use serde_json::Value;
    use url::Url;
    use wiremock::{matchers, Mock, ResponseTemplate};

    /// Runs the implicit flow for a web app holding `client_scopes` and
    /// returns the fragment parameters of the redirect.
    async fn implicit_grant(
        fixture: &TestFixture,
        user: &str,
        client_scopes: &[&str],
        scope: &str,
    ) -> Vec<(String, String)> {
        let session = fixture.user_token(user, "profile").await;
        let (client, _) = fixture
            .register_client(
                AppKind::WebApp {
                    redirect_uri: "https://app.test/callback".to_string(),
                },
                client_scopes,
            )
            .await;

        let response = fixture
            .get_with_token(
                format!(
                    "/auth?response_type=token&client_id={}&scope={}",
                    client.id, scope
                ),
                &session.access_token,
            )
            .await;
        response.assert_status(StatusCode::FOUND);
        let location = Url::parse(response.header("location").unwrap()).unwrap();
        url::form_urlencoded::parse(location.fragment().unwrap_or_default().as_bytes())
            .into_owned()
            .collect()
    }

    /// The caller's connection holding `scope`. The session used to run the
    /// flow has a connection of its own.
    fn connection_with<'a>(connections: &'a Value, scope: &str) -> Option<&'a Value> {
        connections.as_array()?.iter().find(|connection| {
            connection["scopes"]
                .as_array()
                .is_some_and(|scopes| scopes.iter().any(|s| s.as_str() == Some(scope)))
        })
    }

    fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[tokio::test]
    async fn test_parent_scope_grant_is_recorded_in_connection() {
        let fixture = TestFixture::new().await;
        let params = implicit_grant(&fixture, "alice", &["picture"], "picture.read").await;
        let token = param(&params, "access_token").unwrap().to_string();
        assert_eq!(param(&params, "scope"), Some("picture.read"));

        let response = fixture.get_with_token("/connections", &token).await;
        response.assert_ok();
        assert_eq!(response.json.as_array().unwrap().len(), 2);
        let connection = connection_with(&response.json, "picture.read").unwrap();
        assert!(connection["client_name"]
            .as_str()
            .unwrap()
            .starts_with("client-"));
    }

    #[tokio::test]
    async fn test_admin_token_is_forwarded_to_admin_write_route() {
        let fixture = TestFixture::new().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_string("users"))
            .expect(1)
            .mount(&fixture.upstream_mock)
            .await;

        let admin = fixture.admin_token().await;
        let response = fixture
            .gateway_get(TestFixture::SITE, "/admin/users", Some(&admin))
            .await;
        response.assert_ok();
        assert_eq!(response.text, "users");
        fixture.upstream_mock.verify().await;
    }

    #[tokio::test]
    async fn test_sibling_scope_is_denied() {
        let fixture = TestFixture::new().await;
        let token = fixture.user_token("root", "admin.read").await;

        let response = fixture
            .gateway_get(TestFixture::SITE, "/admin/users", Some(&token.access_token))
            .await;
        response.assert_error(StatusCode::FORBIDDEN, "permission_denied");
        assert!(!response.text.contains("admin.write"));
        assert!(fixture
            .upstream_mock
            .received_requests()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_revoked_connection_invalidates_token() {
        let fixture = TestFixture::new().await;
        let params = implicit_grant(&fixture, "alice", &["picture"], "picture.read").await;
        let token = param(&params, "access_token").unwrap().to_string();

        Mock::given(matchers::method("GET"))
            .and(matchers::path("/cat.png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&fixture.upstream_mock)
            .await;
        fixture
            .gateway_get(TestFixture::SITE, "/pictures/cat.png", Some(&token))
            .await
            .assert_ok();

        let connections = fixture.get_with_token("/connections", &token).await;
        let connection_id = connection_with(&connections.json, "picture.read").unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();
        fixture
            .delete_with_token(format!("/connections/{connection_id}"), &token)
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let response = fixture
            .gateway_get(TestFixture::SITE, "/pictures/cat.png", Some(&token))
            .await;
        response.assert_error(StatusCode::UNAUTHORIZED, "token_invalid");
        fixture.upstream_mock.verify().await;
    }

    #[tokio::test]
    async fn test_authority_routes_take_precedence_over_gateway() {
        let fixture = TestFixture::new().await;
        let request = fixture
            .request_builder(Method::GET, "/health")
            .header(http::header::HOST, TestFixture::SITE)
            .body(axum::body::Body::empty())
            .unwrap();
        fixture.send(request).await.assert_ok();
        assert!(fixture
            .upstream_mock
            .received_requests()
            .await
            .unwrap()
            .is_empty());
    }
}
