use crate::delegate::DelegateError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors produced by the authority components.
///
/// Lookups that miss are reported as the most general kind the caller may
/// learn about; a code that was already exchanged and one that never existed
/// both surface as [`AuthorityError::TokenInvalid`].
#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("Token is invalid")]
    TokenInvalid,

    #[error("No token was presented")]
    TokenNotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Client is not allowed to request scope: {0}")]
    ClientPermission(String),

    #[error("Record not found")]
    RecordNotFound,

    #[error("Client authentication failed")]
    InvalidClient,

    #[error("Connection has been revoked")]
    ConnectionRevoked,

    #[error("A trusted client named {0} already exists")]
    DuplicateTrustedClientName(String),

    #[error("Unsupported app type: {0}")]
    UnsupportedAppType(String),

    #[error("App type of a registered client cannot be changed")]
    AppTypeImmutable,

    #[error("Failed to encode token: {0}")]
    Encoding(String),

    #[error("Identity delegation failed: {0}")]
    Delegate(#[from] DelegateError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl AuthorityError {
    /// Timeouts of external collaborators are the only retryable failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_timeout(),
            Self::Delegate(err) => err.is_retryable(),
            _ => false,
        }
    }
}
