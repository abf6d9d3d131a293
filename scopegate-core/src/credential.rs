//! Authorization codes and access/refresh tokens, keyed by signature.
//!
//! Missing, expired and already consumed records are all reported as
//! [`AuthorityError::TokenInvalid`] so that reuse looks like fabrication.

use crate::error::AuthorityError;
use crate::store::{Store, StoreBackend, StoreError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The grant an issued credential was derived from. Refreshes copy it from
/// the consumed token instead of rebuilding it from request input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSnapshot {
    pub client_id: String,
    /// Empty for client credential grants.
    pub user_id: String,
    pub scopes: Vec<String>,
    pub connection_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub signature: String,
    pub snapshot: GrantSnapshot,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn new(signature: String, snapshot: GrantSnapshot, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            signature,
            snapshot,
            created_at: now,
            expires_at: now + ttl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub signature: String,
    pub kind: TokenKind,
    pub snapshot: GrantSnapshot,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn new(signature: String, kind: TokenKind, snapshot: GrantSnapshot, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            signature,
            kind,
            snapshot,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_refresh(&self) -> bool {
        self.kind == TokenKind::Refresh
    }

    pub fn client_id(&self) -> &str {
        &self.snapshot.client_id
    }

    pub fn user_id(&self) -> &str {
        &self.snapshot.user_id
    }
}

/// A freshly generated opaque credential. Only `signature` is persisted.
#[derive(Debug, Clone)]
pub struct OpaqueToken {
    pub value: String,
    pub signature: String,
}

impl OpaqueToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);
        let signature = opaque_signature(&value);
        Self { value, signature }
    }
}

/// Store key of an opaque code or refresh token.
pub fn opaque_signature(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

#[derive(Clone)]
pub struct CredentialStore {
    store: Store,
}

impl CredentialStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Fails with a storage error if the signature already exists.
    pub async fn issue_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), AuthorityError> {
        Ok(self.store.create_code(code).await?)
    }

    /// Looks the code up without deleting it. Use
    /// [`exchange_authorization_code`](Self::exchange_authorization_code) to
    /// consume it.
    pub async fn consume_authorization_code(
        &self,
        signature: &str,
    ) -> Result<GrantSnapshot, AuthorityError> {
        match self.store.get_code(signature).await? {
            Some(code) if code.expires_at > Utc::now() => Ok(code.snapshot),
            Some(_) => {
                debug!("Authorization code expired");
                Err(AuthorityError::TokenInvalid)
            }
            None => Err(AuthorityError::TokenInvalid),
        }
    }

    pub async fn delete_authorization_code(&self, signature: &str) -> Result<(), AuthorityError> {
        self.store.delete_code(signature).await?;
        Ok(())
    }

    pub async fn issue_token(&self, token: &TokenRecord) -> Result<(), AuthorityError> {
        Ok(self.store.create_token(token).await?)
    }

    /// Looks a token up, requiring it to be of the expected kind.
    pub async fn consume_token(
        &self,
        signature: &str,
        expected: TokenKind,
    ) -> Result<TokenRecord, AuthorityError> {
        match self.store.get_token(signature).await? {
            Some(token) if token.kind != expected => {
                warn!("Presented {:?} token where {:?} was expected", token.kind, expected);
                Err(AuthorityError::TokenInvalid)
            }
            Some(token) if token.expires_at <= Utc::now() => Err(AuthorityError::TokenInvalid),
            Some(token) => Ok(token),
            None => Err(AuthorityError::TokenInvalid),
        }
    }

    /// Looks a token up regardless of kind. Used by revocation.
    pub async fn find_token(&self, signature: &str) -> Result<TokenRecord, AuthorityError> {
        self.store
            .get_token(signature)
            .await?
            .ok_or(AuthorityError::RecordNotFound)
    }

    pub async fn delete_token(&self, signature: &str) -> Result<(), AuthorityError> {
        if self.store.delete_token(signature).await? {
            Ok(())
        } else {
            Err(AuthorityError::RecordNotFound)
        }
    }

    /// Stores freshly issued tokens together. Nothing is stored when any
    /// signature is already taken.
    pub async fn issue_tokens(&self, issued: &[TokenRecord]) -> Result<(), AuthorityError> {
        Ok(self.store.create_tokens(issued).await?)
    }

    /// Deletes the code and stores the issued tokens as one atomic unit.
    /// Losing a race against another exchange yields `TokenInvalid`.
    pub async fn exchange_authorization_code(
        &self,
        code_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), AuthorityError> {
        self.store
            .exchange_code(code_signature, issued)
            .await
            .map_err(consumed_or_store)
    }

    /// Deletes the old refresh token and stores its successors as one atomic
    /// unit. Nothing is written if the old token is already gone.
    pub async fn rotate_refresh_token(
        &self,
        old_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), AuthorityError> {
        self.store
            .rotate_refresh(old_signature, issued)
            .await
            .map_err(consumed_or_store)
    }
}

fn consumed_or_store(err: StoreError) -> AuthorityError {
    match err {
        StoreError::NotFound => AuthorityError::TokenInvalid,
        other => AuthorityError::Store(other),
    }
}
