//! Claims carried by issued access tokens and their validation.
//!
//! The `sco` and `cni` claims let the gateway authorize without asking the
//! authority, but [`BearerValidator::validate_bearer`] still requires the
//! token record and its connection to exist. A token whose server side state
//! was revoked is rejected even though its signature verifies.

use crate::client::ClientDirectory;
use crate::connection::{Connection, ConnectionLedger};
use crate::credential::{CredentialStore, TokenKind};
use crate::error::AuthorityError;
use crate::scope::{SCOPE_SEPARATOR, split_scopes};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub jti: String,
    pub iss: String,
    /// User ID, empty for client credential grants
    pub sub: String,
    /// Client ID
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    /// Space-joined granted scopes
    #[serde(default)]
    pub sco: String,
    /// Connection ID, empty when the grant has no connection
    #[serde(default)]
    pub cni: String,
}

impl Claims {
    pub fn build(
        issuer: &str,
        user_id: &str,
        client_id: &str,
        granted: &[String],
        connection_id: Option<&str>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            jti: uuid::Uuid::new_v4().to_string(),
            iss: issuer.to_string(),
            sub: user_id.to_string(),
            aud: client_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            sco: granted.join(SCOPE_SEPARATOR.to_string().as_str()),
            cni: connection_id.unwrap_or_default().to_string(),
        }
    }

    pub fn scopes(&self) -> Vec<String> {
        split_scopes(&self.sco, SCOPE_SEPARATOR)
    }

    pub fn connection_id(&self) -> Option<&str> {
        Some(self.cni.as_str()).filter(|id| !id.is_empty())
    }

    pub fn expires_in(&self) -> i64 {
        (self.exp - Utc::now().timestamp()).max(0)
    }
}

/// An encoded access token and the key its record is stored under.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub signature: String,
}

/// Store key of a signed access token: its signature segment.
pub fn token_signature(token: &str) -> Option<&str> {
    let mut parts = token.rsplitn(2, '.');
    let signature = parts.next()?;
    parts.next()?;
    Some(signature).filter(|s| !s.is_empty())
}

/// Pluggable token signing.
pub trait SigningStrategy: Send + Sync {
    fn sign(&self, claims: &Claims) -> Result<SignedToken, AuthorityError>;

    /// Verifies signature, issuer and expiry.
    fn verify(&self, token: &str) -> Result<Claims, AuthorityError>;
}

/// JWT signing with RS256 key pairs, or HS256 for tests and local setups.
pub struct JwtStrategy {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtStrategy {
    pub fn rs256(private_pem: &[u8], public_pem: &[u8], issuer: &str) -> Result<Self, AuthorityError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| AuthorityError::Encoding(format!("invalid private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| AuthorityError::Encoding(format!("invalid public key: {e}")))?;
        Ok(Self {
            algorithm: Algorithm::RS256,
            encoding_key,
            decoding_key,
            issuer: issuer.to_string(),
        })
    }

    pub fn hs256(secret: &[u8], issuer: &str) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

impl SigningStrategy for JwtStrategy {
    fn sign(&self, claims: &Claims) -> Result<SignedToken, AuthorityError> {
        let token = encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| AuthorityError::Encoding(e.to_string()))?;
        let signature = token_signature(&token)
            .ok_or_else(|| AuthorityError::Encoding("token has no signature".to_string()))?
            .to_string();
        Ok(SignedToken { token, signature })
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthorityError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        // The audience is a client ID; it is checked against the token record.
        validation.validate_aud = false;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Bearer token rejected: {}", e);
                AuthorityError::TokenInvalid
            })
    }
}

/// A bearer token that passed every server side check.
#[derive(Debug, Clone)]
pub struct ValidatedBearer {
    pub token: String,
    pub claims: Claims,
    /// Absent for client credential tokens.
    pub connection: Option<Connection>,
}

/// Validates bearer tokens against their signature and server side records.
#[derive(Clone)]
pub struct BearerValidator {
    signer: Arc<dyn SigningStrategy>,
    credentials: CredentialStore,
    connections: ConnectionLedger,
    clients: ClientDirectory,
}

impl BearerValidator {
    pub fn new(
        signer: Arc<dyn SigningStrategy>,
        credentials: CredentialStore,
        connections: ConnectionLedger,
        clients: ClientDirectory,
    ) -> Self {
        Self {
            signer,
            credentials,
            connections,
            clients,
        }
    }

    /// Checks, in order, the signature, the token record and the connection
    /// (or, for client credential tokens, the owning client). Missing server
    /// side state yields `TokenInvalid`; storage faults propagate as such.
    pub async fn validate_bearer(&self, token: &str) -> Result<ValidatedBearer, AuthorityError> {
        let claims = self.signer.verify(token)?;
        let signature = token_signature(token).ok_or(AuthorityError::TokenInvalid)?;

        let record = self
            .credentials
            .consume_token(signature, TokenKind::Access)
            .await?;
        if record.client_id() != claims.aud || record.user_id() != claims.sub {
            debug!("Token record does not match claims of token {}", claims.jti);
            return Err(AuthorityError::TokenInvalid);
        }

        let connection = match claims.connection_id() {
            Some(id) => {
                let connection = match self.connections.get_by_id(id).await {
                    Ok(connection) => connection,
                    Err(AuthorityError::RecordNotFound) => {
                        debug!("Connection {} of token {} is gone", id, claims.jti);
                        return Err(AuthorityError::TokenInvalid);
                    }
                    Err(err) => return Err(err),
                };
                if connection.client_id != claims.aud || connection.user_id != claims.sub {
                    return Err(AuthorityError::TokenInvalid);
                }
                Some(connection)
            }
            None => {
                match self.clients.lookup(&claims.aud).await {
                    Ok(_) => {}
                    Err(AuthorityError::RecordNotFound) => return Err(AuthorityError::TokenInvalid),
                    Err(err) => return Err(err),
                }
                None
            }
        };

        Ok(ValidatedBearer {
            token: token.to_string(),
            claims,
            connection,
        })
    }
}
