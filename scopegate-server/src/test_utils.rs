use crate::api::oauth::models::TokenResponse;
use crate::config::Settings;
use crate::create_app;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use scopegate_core::scope::{split_scopes, SCOPE_SEPARATOR};
use scopegate_core::{AppKind, Client, Scope, SiteTable};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::ServiceExt;
use url::form_urlencoded;
use wiremock::MockServer;

static CLIENT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Test fixture for setting up a complete test environment with mocked services.
///
/// The TestFixture provides a convenient way to test the authority endpoints and
/// the gateway. It starts a mock backend that every site of the routing table
/// points at and a mock identity endpoint, configures the application with an
/// in-memory store and HS256 signing, and provides helper methods for making
/// requests and minting tokens.
///
/// The routing table installed by [`TestFixture::new`] serves [`TestFixture::SITE`]:
///
/// | Prefix      | Required scopes             |
/// |-------------|-----------------------------|
/// | `/admin`    | `admin.write`               |
/// | `/pictures` | `picture.read`              |
/// | `/reports`  | `picture.read`, `admin.read`|
/// | `*`         | none                        |
///
/// # Examples
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///
///     // Set up a backend response
///     Mock::given(matchers::method("GET"))
///         .and(matchers::path("/cat.png"))
///         .respond_with(ResponseTemplate::new(200))
///         .mount(&fixture.upstream_mock)
///         .await;
///
///     // Mint a token and call the gateway
///     let token = fixture.user_token("alice", "picture").await;
///     let response = fixture
///         .gateway_get(TestFixture::SITE, "/pictures/cat.png", Some(&token.access_token))
///         .await;
///
///     response.assert_ok();
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Configuration settings
    pub settings: Settings,
    /// Application state shared with the router
    pub state: AppState,
    /// Mock server standing in for every gateway backend
    pub upstream_mock: MockServer,
    /// Mock server for the identity endpoint
    pub identity_mock: MockServer,
}

impl TestFixture {
    /// Host served by the default routing table
    pub const SITE: &'static str = "app.test";

    /// Key shared with the mock identity endpoint
    pub const IDENTITY_KEY: [u8; 32] = [5u8; 32];

    /// Settings used by [`TestFixture::new`], for tests that need to tweak them
    /// before the application is built.
    pub fn test_settings() -> Settings {
        Settings::for_test()
    }

    /// Creates a new test fixture with the default test settings.
    ///
    /// This method sets up:
    /// - Mock servers for the gateway backend and the identity endpoint
    /// - Application state with an in-memory store
    /// - The default routing table pointing at the backend mock
    /// - The application router
    pub async fn new() -> Self {
        Self::with_settings(Self::test_settings()).await
    }

    /// Creates a test fixture from custom settings.
    ///
    /// When the settings name no identity endpoint, the identity mock is
    /// configured as the delegate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let mut settings = TestFixture::test_settings();
    /// settings.gateway.upstream_timeout = 1;
    /// let fixture = TestFixture::with_settings(settings).await;
    /// ```
    pub async fn with_settings(mut settings: Settings) -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let upstream_mock = MockServer::start().await;
        let identity_mock = MockServer::start().await;

        if settings.identity.endpoint.is_none() {
            settings.identity.endpoint = Some(format!("{}/identity", identity_mock.uri()));
            settings.identity.shared_key = Some(STANDARD.encode(Self::IDENTITY_KEY));
        }

        let state = AppState::for_testing(&settings);
        let fixture_sites = sites_document(&upstream_mock.uri());
        state.sites.replace(
            SiteTable::from_json(&fixture_sites).expect("Failed to parse test routing table"),
        );
        let app = create_app(state.clone()).await;

        Self {
            app,
            settings,
            state,
            upstream_mock,
            identity_mock,
        }
    }

    /// Initializes the test logger with customized settings.
    ///
    /// This method can be called to configure custom log levels for tests.
    /// Note that this is automatically called by TestFixture::new() with default settings.
    /// Only use this method if you need specific logger configuration.
    ///
    /// # Examples
    ///
    /// ```rust
    /// #[tokio::test]
    /// async fn test_with_custom_logger() {
    ///     // Set up trace-level logging for this test
    ///     TestFixture::setup_logger(log::LevelFilter::Trace);
    ///
    ///     // Create the fixture and run tests
    ///     let fixture = TestFixture::new().await;
    ///     // ...
    /// }
    /// ```
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Replaces the routing table.
    pub fn install_sites(&self, document: &str) {
        self.state
            .sites
            .replace(SiteTable::from_json(document).expect("Failed to parse routing table"));
    }

    /// Creates a request builder for the given method and URI.
    ///
    /// No headers are set; add a `Host` header for gateway requests and an
    /// `Authorization` header for protected endpoints.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let request = fixture.request_builder(Method::POST, "/echo")
    ///     .header(HOST, TestFixture::SITE)
    ///     .body(Body::from("payload"))
    ///     .expect("Failed to build request");
    ///
    /// let response = fixture.send(request).await;
    /// ```
    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder().method(method).uri(uri.as_ref())
    }

    /// Sends a GET request without credentials.
    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri)
            .body(Body::empty())
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a GET request with a bearer token.
    pub async fn get_with_token(&self, uri: impl AsRef<str>, token: &str) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a request with a JSON body and a bearer token.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let admin = fixture.admin_token().await;
    /// let response = fixture
    ///     .json_with_token(Method::POST, "/admin/clients", &json!({
    ///         "name": "billing",
    ///         "app_type": "client",
    ///         "scopes": [{ "name": "invoice" }]
    ///     }), &admin)
    ///     .await;
    /// response.assert_status(StatusCode::CREATED);
    /// ```
    pub async fn json_with_token<T: Serialize>(
        &self,
        method: Method,
        uri: impl AsRef<str>,
        body: &T,
        token: &str,
    ) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let request = self
            .request_builder(method, uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json_body))
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a DELETE request with the given Authorization header value.
    pub async fn delete_with_authorization(
        &self,
        uri: impl AsRef<str>,
        authorization: &str,
    ) -> TestResponse {
        let request = self
            .request_builder(Method::DELETE, uri)
            .header(AUTHORIZATION, authorization)
            .body(Body::empty())
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a DELETE request with a bearer token.
    pub async fn delete_with_token(&self, uri: impl AsRef<str>, token: &str) -> TestResponse {
        self.delete_with_authorization(uri, &format!("Bearer {token}"))
            .await
    }

    /// Sends a form-encoded POST request with custom headers.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let response = fixture
    ///     .post_form("/token", &[
    ///         ("grant_type", "client_credentials"),
    ///         ("scope", "invoice.read"),
    ///     ], &[("Authorization", &basic)])
    ///     .await;
    /// ```
    pub async fn post_form(
        &self,
        uri: impl AsRef<str>,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let mut builder = self
            .request_builder(Method::POST, uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");

        // Add custom headers
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder
            .body(Body::from(encoded))
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a GET request through the gateway for the given host.
    pub async fn gateway_get(&self, host: &str, path: &str, token: Option<&str>) -> TestResponse {
        let mut builder = self.request_builder(Method::GET, path).header(HOST, host);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty()).expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a request and returns a TestResponse.
    ///
    /// This is a lower-level method that is used by the convenience methods
    /// like `get()` and `post_form()`. Use this method when you need more control
    /// over the request details.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body).to_string();
        // Try to parse as JSON, defaulting to empty object if parsing fails or empty body
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        TestResponse {
            status,
            headers,
            text,
            json,
        }
    }

    /// Registers an untrusted client directly in the directory.
    ///
    /// Returns the client and its plaintext secret.
    pub async fn register_client(&self, app: AppKind, scopes: &[&str]) -> (Client, String) {
        let name = format!("client-{}", CLIENT_COUNTER.fetch_add(1, Ordering::SeqCst));
        self.state
            .authority
            .clients
            .register(
                &name,
                app,
                scopes.iter().map(|scope| Scope::new(*scope)).collect(),
                false,
            )
            .await
            .expect("Failed to register test client")
    }

    /// Registers a trusted owner client holding the given scopes.
    pub async fn trusted_owner(&self, scopes: &[&str]) -> (Client, String) {
        let name = format!("first-party-{}", CLIENT_COUNTER.fetch_add(1, Ordering::SeqCst));
        self.state
            .authority
            .clients
            .register(
                &name,
                AppKind::Owner,
                scopes.iter().map(|scope| Scope::new(*scope)).collect(),
                true,
            )
            .await
            .expect("Failed to register trusted test client")
    }

    /// Requests tokens with the password grant.
    pub async fn password_grant(
        &self,
        client: &Client,
        secret: &str,
        username: &str,
        scope: &str,
    ) -> TestResponse {
        self.post_form(
            "/token",
            &[
                ("grant_type", "password"),
                ("client_id", client.id.as_str()),
                ("client_secret", secret),
                ("username", username),
                ("password", "irrelevant-for-trusted-clients"),
                ("scope", scope),
            ],
            &[],
        )
        .await
    }

    /// Mints a user token for `scope` through a trusted owner client that holds
    /// exactly the requested scopes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let token = fixture.user_token("alice", "picture offline").await;
    /// assert!(token.refresh_token.is_some());
    /// ```
    pub async fn user_token(&self, user: &str, scope: &str) -> TokenResponse {
        let held: Vec<String> = split_scopes(scope, SCOPE_SEPARATOR)
            .into_iter()
            .filter(|name| name != &self.settings.mandatory_scope)
            .collect();
        let held: Vec<&str> = held.iter().map(String::as_str).collect();
        let (client, secret) = self.trusted_owner(&held).await;

        let response = self.password_grant(&client, &secret, user, scope).await;
        response.assert_ok();
        response.json_as::<TokenResponse>()
    }

    /// Access token of user `root` granting `admin`.
    pub async fn admin_token(&self) -> String {
        self.user_token("root", "admin").await.access_token
    }
}

/// Routing table of the fixture, every backend being the mock at `backend`
fn sites_document(backend: &str) -> String {
    serde_json::json!({
        (TestFixture::SITE): {
            "/admin": { "backend": backend, "scopes": ["admin.write"] },
            "/pictures": { "backend": backend, "scopes": ["picture.read"] },
            "/reports": { "backend": backend, "scopes": ["picture.read", "admin.read"] },
            "*": { "backend": backend, "comment": "public pages" }
        }
    })
    .to_string()
}

/// Response from a test request that provides convenient access to status,
/// headers and body.
///
/// TestResponse simplifies assertions on responses and accessing their content.
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw response body
    pub text: String,
    /// Response body as JSON (if present and valid JSON)
    pub json: Value,
}

impl TestResponse {
    /// Checks if the response status is successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Asserts that the response has the expected status code.
    ///
    /// # Returns
    ///
    /// A reference to self for method chaining.
    ///
    /// # Examples
    ///
    /// ```rust
    /// // Expect a not found status
    /// response.assert_status(StatusCode::NOT_FOUND);
    ///
    /// // Chain assertions
    /// response
    ///     .assert_status(StatusCode::OK)
    ///     .json_as::<TokenResponse>();
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {} but got {} with body: {}",
            expected, self.status, self.text
        );
        self
    }

    /// Asserts that the response status is OK (200).
    ///
    /// # Panics
    ///
    /// Panics if the status code is not 200 OK.
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Asserts an error response with the given taxonomy name and status.
    pub fn assert_error(&self, status: StatusCode, name: &str) -> &Self {
        self.assert_status(status);
        assert_eq!(self.json["name"], name, "Unexpected error body: {}", self.text);
        assert_eq!(self.json["statusCode"], status.as_u16());
        self
    }

    /// Value of a response header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Converts the response body to the specified type.
    ///
    /// # Panics
    ///
    /// Panics if deserialization fails.
    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response JSON")
    }
}
