use axum::response::IntoResponse;
use axum::Json;
use http::StatusCode;
use log::{debug, error, warn};
use scopegate_core::{AuthorityError, DelegateError, StoreError};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Every failure a caller can observe. Each one is rendered as a single
/// `{name, description, statusCode}` JSON body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Token invalid")]
    TokenInvalid,

    #[error("Authorization header format must be bearer token")]
    TokenNotFound,

    #[error("You do not have permission on request resource")]
    PermissionDenied,

    #[error("Client has no permission on requested scopes")]
    ClientPermission,

    #[error("Record not found")]
    RecordNotFound,

    #[error("Client authentication failed")]
    InvalidClient,

    #[error("Internal server error")]
    ServerError,

    #[error("Connection has been revoked")]
    ConnectionRevoked,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    #[error("Unsupported app type: {0}")]
    UnsupportedAppType(String),

    #[error("App type of a registered client cannot be changed")]
    AppTypeImmutable,

    #[error("A trusted client named {0} already exists")]
    DuplicateTrustedClientName(String),

    #[error("No site is configured for this host and path")]
    SiteNotFound,

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("{0}")]
    BadGateway(String),

    #[error("Service temporarily unavailable, retry later")]
    TemporarilyUnavailable,
}

/// Wire format of [`ApiError`]
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub name: &'static str,
    pub description: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl ApiError {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TokenInvalid => "token_invalid",
            Self::TokenNotFound => "token_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::ClientPermission => "client_permission",
            Self::RecordNotFound => "not_found",
            Self::InvalidClient => "invalid_client",
            Self::ServerError => "server_error",
            Self::ConnectionRevoked => "connection_revoked",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::UnsupportedAppType(_) => "unsupported_app_type",
            Self::AppTypeImmutable => "app_type_immutable",
            Self::DuplicateTrustedClientName(_) => "duplicate_trusted_client_name",
            Self::SiteNotFound => "site_not_found",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::BadGateway(_) => "bad_gateway",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::TokenNotFound
            | Self::InvalidRequest(_)
            | Self::UnsupportedGrantType(_)
            | Self::UnsupportedResponseType(_)
            | Self::UnsupportedAppType(_)
            | Self::AppTypeImmutable => StatusCode::BAD_REQUEST,
            Self::PermissionDenied
            | Self::ClientPermission
            | Self::InvalidClient
            | Self::ConnectionRevoked => StatusCode::FORBIDDEN,
            Self::RecordNotFound | Self::SiteNotFound => StatusCode::NOT_FOUND,
            Self::DuplicateTrustedClientName(_) => StatusCode::CONFLICT,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Create new Invalid Request Error (400) with a detail message
    pub fn invalid_request<S: ToString>(detail: S) -> Self {
        Self::InvalidRequest(detail.to_string())
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            name: self.name(),
            description: self.to_string(),
            status_code: self.status_code().as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_timeout() {
            warn!("Store operation timed out: {}", err);
            return Self::TemporarilyUnavailable;
        }
        match err {
            StoreError::NotFound => Self::RecordNotFound,
            err => {
                error!("Store error: {}", err);
                Self::ServerError
            }
        }
    }
}

impl From<DelegateError> for ApiError {
    fn from(err: DelegateError) -> Self {
        if err.is_retryable() {
            return Self::TemporarilyUnavailable;
        }
        // Fail closed: anything but an explicit success is a denial.
        debug!("Identity delegation failed: {}", err);
        Self::PermissionDenied
    }
}

impl From<AuthorityError> for ApiError {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::TokenInvalid => Self::TokenInvalid,
            AuthorityError::TokenNotFound => Self::TokenNotFound,
            AuthorityError::PermissionDenied => Self::PermissionDenied,
            AuthorityError::ClientPermission(scope) => {
                debug!("Client may not request scope {}", scope);
                Self::ClientPermission
            }
            AuthorityError::RecordNotFound => Self::RecordNotFound,
            AuthorityError::InvalidClient => Self::InvalidClient,
            AuthorityError::ConnectionRevoked => Self::ConnectionRevoked,
            AuthorityError::DuplicateTrustedClientName(name) => {
                Self::DuplicateTrustedClientName(name)
            }
            AuthorityError::UnsupportedAppType(app) => Self::UnsupportedAppType(app),
            AuthorityError::AppTypeImmutable => Self::AppTypeImmutable,
            AuthorityError::Encoding(reason) => {
                error!("Failed to encode token: {}", reason);
                Self::ServerError
            }
            AuthorityError::Delegate(err) => err.into(),
            AuthorityError::Store(err) => err.into(),
        }
    }
}
