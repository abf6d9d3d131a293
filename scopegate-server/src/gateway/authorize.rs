use crate::api::auth::{authenticate, Authenticated};
use crate::errors::ApiError;
use crate::gateway::HEADER_PREFIX;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::header::{HeaderName, HOST};
use http::{HeaderMap, HeaderValue};
use log::{debug, warn};
use scopegate_core::ValidatedBearer;

const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-scopegate-token");
const CLAIM_SUB: HeaderName = HeaderName::from_static("x-scopegate-claim-sub");
const CLAIM_AUD: HeaderName = HeaderName::from_static("x-scopegate-claim-aud");
const CLAIM_SCO: HeaderName = HeaderName::from_static("x-scopegate-claim-sco");
const CLAIM_CNI: HeaderName = HeaderName::from_static("x-scopegate-claim-cni");
const CLAIM_ISS: HeaderName = HeaderName::from_static("x-scopegate-claim-iss");
const CLAIM_EXP: HeaderName = HeaderName::from_static("x-scopegate-claim-exp");
const CLAIM_IAT: HeaderName = HeaderName::from_static("x-scopegate-claim-iat");
const CLAIM_JTI: HeaderName = HeaderName::from_static("x-scopegate-claim-jti");

/// Resolves the route of a gateway request and enforces its scopes.
///
/// Checks run in a fixed order: route, token presence, token validity
/// (signature, record, connection), then every scope of the route. The
/// resolved [`Route`](scopegate_core::Route) is stored in the request
/// extensions for the forwarder.
pub(crate) async fn authorize(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let host = request_host(&request).ok_or_else(|| {
        debug!("Gateway request without a host");
        ApiError::SiteNotFound
    })?;
    let route = state
        .sites
        .resolve(&host, request.uri().path())
        .ok_or(ApiError::SiteNotFound)?;

    strip_gateway_headers(request.headers_mut());

    if !route.is_public() {
        let bearer = authenticate(&state, request.headers()).await?;
        let caller = Authenticated(bearer);
        caller.require_scopes(&route.scopes)?;
        debug!(
            "Token {} granted {} {}{}",
            caller.0.claims.jti,
            request.method(),
            host,
            request.uri().path()
        );
        inject_claims(request.headers_mut(), &caller.0);
    }

    request.extensions_mut().insert(route);
    Ok(next.run(request).await)
}

fn request_host(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().authority().map(|authority| authority.as_str()))
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}

fn strip_gateway_headers(headers: &mut HeaderMap) {
    let reserved: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(HEADER_PREFIX))
        .cloned()
        .collect();
    for name in reserved {
        warn!("Dropping client supplied header {}", name);
        headers.remove(&name);
    }
}

fn inject_claims(headers: &mut HeaderMap, bearer: &ValidatedBearer) {
    let claims = &bearer.claims;
    let values = [
        (TOKEN_HEADER, bearer.token.clone()),
        (CLAIM_SUB, claims.sub.clone()),
        (CLAIM_AUD, claims.aud.clone()),
        (CLAIM_SCO, claims.sco.clone()),
        (CLAIM_CNI, claims.cni.clone()),
        (CLAIM_ISS, claims.iss.clone()),
        (CLAIM_EXP, claims.exp.to_string()),
        (CLAIM_IAT, claims.iat.to_string()),
        (CLAIM_JTI, claims.jti.clone()),
    ];
    for (name, value) in values {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => warn!("Claim header {} has an invalid value, skipping", name),
        }
    }
}
