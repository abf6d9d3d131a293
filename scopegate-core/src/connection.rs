use crate::error::AuthorityError;
use crate::scope::{SCOPE_SEPARATOR, split_scopes};
use crate::store::{Store, StoreBackend};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

/// Cumulative scope grants of one (client, user) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub client_id: String,
    pub user_id: String,
    /// Space-joined, sorted union of every scope granted to the pair.
    pub scopes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(client_id: &str, user_id: &str, scopes: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scopes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scope_list(&self) -> Vec<String> {
        split_scopes(&self.scopes, SCOPE_SEPARATOR)
    }
}

/// Durable, merge-only record of what each user has granted each client.
#[derive(Clone)]
pub struct ConnectionLedger {
    store: Store,
}

impl ConnectionLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Merges `granted` into the pair's connection, creating it on first grant.
    pub async fn update_connection(
        &self,
        client_id: &str,
        user_id: &str,
        granted: &[String],
    ) -> Result<Connection, AuthorityError> {
        Ok(self
            .store
            .merge_connection(client_id, user_id, granted)
            .await?)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Connection, AuthorityError> {
        self.store
            .get_connection(id)
            .await?
            .ok_or(AuthorityError::RecordNotFound)
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Connection>, AuthorityError> {
        Ok(self.store.list_connections(user_id).await?)
    }

    /// Deletes the connection if `requesting_user` owns it.
    pub async fn revoke(&self, id: &str, requesting_user: &str) -> Result<(), AuthorityError> {
        let connection = self.get_by_id(id).await?;
        if connection.user_id != requesting_user {
            return Err(AuthorityError::PermissionDenied);
        }

        if !self.store.delete_connection(id).await? {
            return Err(AuthorityError::RecordNotFound);
        }
        info!(
            "User {} revoked connection {} of client {}",
            requesting_user, id, connection.client_id
        );
        Ok(())
    }
}
