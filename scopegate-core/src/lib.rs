//! # scopegate-core
//!
//! Authorization engine of the scopegate OAuth2 authority and gateway.
//!
//! ## Components
//!
//! - **Scopes:** Hierarchical scope matching and grant decisions.
//! - **Clients:** Registered clients, their app types and hashed secrets.
//! - **Connections:** Merge-only record of what each user granted each client.
//! - **Credentials:** Authorization codes and access/refresh tokens with
//!   atomic exchange and rotation.
//! - **Claims:** Token claims, signing strategies and bearer validation.
//! - **Sites:** Host/path routing table for the gateway.
//! - **Delegate:** Password verification through an external identity endpoint.

pub mod claims;
pub mod client;
pub mod connection;
pub mod credential;
pub mod delegate;
pub mod error;
pub mod scope;
pub mod sites;
pub mod store;

pub use crate::claims::{BearerValidator, Claims, JwtStrategy, SigningStrategy, ValidatedBearer};
pub use crate::client::{AppKind, Client, ClientDirectory, ClientUpdate, GrantType, ResponseType};
pub use crate::connection::{Connection, ConnectionLedger};
pub use crate::credential::{
    AuthorizationCode, CredentialStore, GrantSnapshot, OpaqueToken, TokenKind, TokenRecord,
};
pub use crate::delegate::{DelegateError, IdentityDelegate};
pub use crate::error::AuthorityError;
pub use crate::scope::Scope;
pub use crate::sites::{Route, SiteError, SiteRouter, SiteTable};
pub use crate::store::{Store, StoreBackend, StoreError};

use std::sync::Arc;

/// The persistence-backed components, sharing one store.
#[derive(Clone)]
pub struct Authority {
    pub clients: ClientDirectory,
    pub connections: ConnectionLedger,
    pub credentials: CredentialStore,
    store: Store,
}

impl Authority {
    pub fn new(store: Store) -> Self {
        Self {
            clients: ClientDirectory::new(store.clone()),
            connections: ConnectionLedger::new(store.clone()),
            credentials: CredentialStore::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn bearer_validator(&self, signer: Arc<dyn SigningStrategy>) -> BearerValidator {
        BearerValidator::new(
            signer,
            self.credentials.clone(),
            self.connections.clone(),
            self.clients.clone(),
        )
    }
}
