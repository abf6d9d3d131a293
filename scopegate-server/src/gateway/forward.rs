use crate::errors::ApiError;
use crate::state::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, Response, Uri},
};
use http::header::{self, HeaderName};
use log::{debug, error, warn};
use scopegate_core::Route;
use std::error::Error as StdError;
use url::Url;

/// Headers that describe a single connection and are not forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// Forwards an authorized request to the backend of its route
pub(crate) async fn forward(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response<Body>, ApiError> {
    let route = req
        .extensions()
        .get::<Route>()
        .cloned()
        .ok_or(ApiError::SiteNotFound)?;

    let url = upstream_url(&route, req.uri());
    debug!("Forwarding request to backend: {} {}", req.method(), url);
    let mut req_builder = state.upstream_client.request(req.method().clone(), url.clone());

    // Forward headers
    let original_host = req.headers().get(header::HOST).cloned();
    for (key, value) in req.headers() {
        if !HOP_BY_HOP.contains(key) {
            req_builder = req_builder.header(key, value);
        }
    }
    if let Some(host) = original_host {
        req_builder = req_builder.header("x-forwarded-host", host);
    }

    // Forward body if present
    let limit = state.settings.gateway.max_body_bytes;
    let body_bytes = to_bytes(req.into_body(), limit).await.map_err(|e| {
        warn!("Failed to read request body: {}", e);
        if is_length_limit(&e) {
            ApiError::PayloadTooLarge(limit)
        } else {
            ApiError::invalid_request("failed to read request body")
        }
    })?;
    if !body_bytes.is_empty() {
        req_builder = req_builder.body(body_bytes);
    }

    let response = req_builder.send().await.map_err(|e| {
        // Log detailed error information for debugging
        error!(
            "Failed to forward request: {} ({:?})\nURL: {}\nSource error: {:?}",
            e,
            e.status(),
            url,
            e.source()
        );
        if e.is_timeout() {
            ApiError::BadGateway("Backend timed out".to_string())
        } else if e.is_connect() {
            ApiError::BadGateway("Backend unreachable".to_string())
        } else {
            ApiError::BadGateway("Failed to forward request".to_string())
        }
    })?;

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.bytes().await.map_err(|e| {
        error!("Failed to read backend response body: {}", e);
        if e.is_timeout() {
            ApiError::BadGateway("Backend timed out".to_string())
        } else {
            ApiError::BadGateway("Failed to read backend response".to_string())
        }
    })?;

    let mut resp = Response::new(Body::from(bytes));
    *resp.status_mut() = status;
    for (key, value) in headers.iter() {
        if key != header::TRANSFER_ENCODING && key != header::CONNECTION {
            resp.headers_mut().append(key.clone(), value.clone());
        }
    }
    Ok(resp)
}

/// Backend URL: the target's path joined with the request path minus the
/// matched prefix, and both queries combined.
fn upstream_url(route: &Route, uri: &Uri) -> Url {
    let mut url = route.target.clone();
    let path = join_paths(route.target.path(), route.upstream_path(uri.path()));
    url.set_path(&path);

    let query = [route.target.query(), uri.query()]
        .into_iter()
        .flatten()
        .filter(|query| !query.is_empty())
        .collect::<Vec<_>>()
        .join("&");
    url.set_query(Some(query.as_str()).filter(|query| !query.is_empty()));
    url
}

/// `to_bytes` reports an exceeded limit as a `LengthLimitError` source
fn is_length_limit(err: &axum::Error) -> bool {
    let mut source = StdError::source(err);
    while let Some(cause) = source {
        if cause.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = cause.source();
    }
    false
}

fn join_paths(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}
