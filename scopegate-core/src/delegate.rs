//! Resource owner authentication delegated to an external identity endpoint.
//!
//! The credentials travel as a JWE JSON document using direct key agreement
//! and AES-256-GCM (`{"alg":"dir","enc":"A256GCM"}`) under a pre-shared key.
//! A 200 answer authenticates the owner. Every other outcome fails closed.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::{debug, warn};
use rand::RngCore;
use rand::rngs::OsRng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;
const PROTECTED_HEADER: &str = r#"{"alg":"dir","enc":"A256GCM"}"#;

#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("Identity endpoint rejected the credentials (status {0})")]
    Rejected(u16),
    #[error("Identity endpoint timed out")]
    Timeout,
    #[error("Identity endpoint unreachable: {0}")]
    Transport(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
}

impl DelegateError {
    /// Only timeouts are worth retrying. Everything else is a denial.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRequest {
    pub username: String,
    pub password: String,
}

/// JWE JSON serialization of the sealed credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedCredentials {
    pub protected: String,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm, DelegateError> {
    if key.len() != KEY_SIZE {
        return Err(DelegateError::Encryption(format!(
            "Invalid key length: expected {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| DelegateError::Encryption(e.to_string()))
}

/// Encrypts the credentials. The protected header is the associated data.
pub fn seal(key: &[u8], request: &IdentityRequest) -> Result<SealedCredentials, DelegateError> {
    let cipher = cipher(key)?;
    let plaintext =
        serde_json::to_vec(request).map_err(|e| DelegateError::Encryption(e.to_string()))?;

    let protected = URL_SAFE_NO_PAD.encode(PROTECTED_HEADER);
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &plaintext,
                aad: protected.as_bytes(),
            },
        )
        .map_err(|e| DelegateError::Encryption(e.to_string()))?;
    let tag = sealed.split_off(sealed.len() - TAG_SIZE);

    Ok(SealedCredentials {
        protected,
        iv: URL_SAFE_NO_PAD.encode(nonce),
        ciphertext: URL_SAFE_NO_PAD.encode(sealed),
        tag: URL_SAFE_NO_PAD.encode(tag),
    })
}

/// Decrypts sealed credentials, as the identity endpoint does.
pub fn open(key: &[u8], sealed: &SealedCredentials) -> Result<IdentityRequest, DelegateError> {
    let cipher = cipher(key)?;
    let decode = |field: &str| {
        URL_SAFE_NO_PAD
            .decode(field)
            .map_err(|e| DelegateError::Encryption(format!("Base64 decode failed: {e}")))
    };

    let nonce = decode(&sealed.iv)?;
    if nonce.len() != NONCE_SIZE {
        return Err(DelegateError::Encryption("Invalid iv".to_string()));
    }
    let mut ciphertext = decode(&sealed.ciphertext)?;
    ciphertext.extend_from_slice(&decode(&sealed.tag)?);

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: sealed.protected.as_bytes(),
            },
        )
        .map_err(|e| DelegateError::Encryption(e.to_string()))?;
    serde_json::from_slice(&plaintext).map_err(|e| DelegateError::Encryption(e.to_string()))
}

/// Client for the external identity endpoint.
#[derive(Clone)]
pub struct IdentityDelegate {
    client: Client,
    endpoint: Url,
    key: [u8; KEY_SIZE],
}

impl IdentityDelegate {
    pub fn new(endpoint: Url, key: &[u8], timeout: Duration) -> Result<Self, DelegateError> {
        let key: [u8; KEY_SIZE] = key.try_into().map_err(|_| {
            DelegateError::Encryption(format!(
                "Invalid key length: expected {} bytes, got {}",
                KEY_SIZE,
                key.len()
            ))
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| DelegateError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Asks the identity endpoint to authenticate a resource owner.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<(), DelegateError> {
        let sealed = seal(
            &self.key,
            &IdentityRequest {
                username: username.to_string(),
                password: password.to_string(),
            },
        )?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&sealed)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    warn!("Identity endpoint {} timed out", self.endpoint);
                    DelegateError::Timeout
                } else {
                    warn!("Identity endpoint {} unreachable: {}", self.endpoint, err);
                    DelegateError::Transport(err.to_string())
                }
            })?;

        match response.status() {
            StatusCode::OK => {
                debug!("Identity endpoint authenticated {}", username);
                Ok(())
            }
            status => {
                debug!("Identity endpoint rejected {} with {}", username, status);
                Err(DelegateError::Rejected(status.as_u16()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const KEY: [u8; KEY_SIZE] = [7u8; KEY_SIZE];

    /// Answers 200 only for alice's password, like an identity provider would.
    struct CheckingIdentity;

    impl Respond for CheckingIdentity {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let Ok(sealed) = serde_json::from_slice::<SealedCredentials>(&request.body) else {
                return ResponseTemplate::new(400);
            };
            match open(&KEY, &sealed) {
                Ok(req) if req.username == "alice" && req.password == "wonderland" => {
                    ResponseTemplate::new(200)
                }
                _ => ResponseTemplate::new(404),
            }
        }
    }

    async fn delegate(server: &MockServer, timeout: Duration) -> IdentityDelegate {
        let endpoint = Url::parse(&format!("{}/identity", server.uri())).unwrap();
        IdentityDelegate::new(endpoint, &KEY, timeout).unwrap()
    }

    #[test]
    fn test_seal_and_open() {
        let request = IdentityRequest {
            username: "alice".to_string(),
            password: "wonderland".to_string(),
        };
        let sealed = seal(&KEY, &request).unwrap();
        assert!(!sealed.ciphertext.contains("wonderland"));
        assert_eq!(open(&KEY, &sealed).unwrap(), request);

        assert!(open(&[1u8; KEY_SIZE], &sealed).is_err());

        let mut tampered = sealed.clone();
        tampered.protected = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        assert!(open(&KEY, &tampered).is_err());
    }

    #[test]
    fn test_rejects_short_key() {
        let endpoint = Url::parse("http://localhost/identity").unwrap();
        assert!(matches!(
            IdentityDelegate::new(endpoint, b"short", Duration::from_secs(1)),
            Err(DelegateError::Encryption(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity"))
            .and(header("content-type", "application/json"))
            .respond_with(CheckingIdentity)
            .mount(&server)
            .await;

        let delegate = delegate(&server, Duration::from_secs(5)).await;
        assert!(delegate.authenticate("alice", "wonderland").await.is_ok());

        let err = delegate.authenticate("alice", "guess").await.unwrap_err();
        assert!(matches!(err, DelegateError::Rejected(404)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let delegate = delegate(&server, Duration::from_millis(100)).await;
        let err = delegate.authenticate("alice", "wonderland").await.unwrap_err();
        assert!(matches!(err, DelegateError::Timeout));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_closed() {
        let endpoint = Url::parse("http://127.0.0.1:1/identity").unwrap();
        let delegate = IdentityDelegate::new(endpoint, &KEY, Duration::from_secs(1)).unwrap();

        let err = delegate.authenticate("alice", "wonderland").await.unwrap_err();
        assert!(matches!(err, DelegateError::Transport(_)));
        assert!(!err.is_retryable());
    }
}
