use super::{StoreBackend, StoreError};
use crate::client::Client;
use crate::connection::Connection;
use crate::credential::{AuthorizationCode, TokenRecord};
use crate::scope::{SCOPE_SEPARATOR, merge_scopes};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    clients: HashMap<String, Client>,
    connections: HashMap<String, Connection>,
    codes: HashMap<String, AuthorizationCode>,
    tokens: HashMap<String, TokenRecord>,
}

impl Tables {
    fn check_name(&self, client: &Client) -> Result<(), StoreError> {
        let collides = self
            .clients
            .values()
            .filter(|other| other.id != client.id && other.name == client.name)
            .any(|other| other.trusted || client.trusted);
        if collides {
            return Err(StoreError::Conflict(client.name.clone()));
        }
        Ok(())
    }

    fn replace(&mut self, consumed: Option<&str>, issued: &[TokenRecord]) -> Result<(), StoreError> {
        if let Some(taken) = issued.iter().find(|t| self.tokens.contains_key(&t.signature)) {
            return Err(StoreError::Duplicate(taken.signature.clone()));
        }
        for token in issued {
            self.tokens.insert(token.signature.clone(), token.clone());
        }
        if let Some(signature) = consumed {
            self.tokens.remove(signature);
        }
        Ok(())
    }
}

/// Store keeping every table behind one lock, so each operation is atomic.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn create_client(&self, client: &Client) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.clients.contains_key(&client.id) {
            return Err(StoreError::Duplicate(client.id.clone()));
        }
        tables.check_name(client)?;
        tables.clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn update_client(&self, client: &Client) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.clients.contains_key(&client.id) {
            return Err(StoreError::NotFound);
        }
        tables.check_name(client)?;
        tables.clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, StoreError> {
        Ok(self.tables.read().await.clients.get(id).cloned())
    }

    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        let mut clients: Vec<Client> = self.tables.read().await.clients.values().cloned().collect();
        clients.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(clients)
    }

    async fn delete_client(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.clients.remove(id).is_none() {
            return Ok(false);
        }
        tables.connections.retain(|_, c| c.client_id != id);
        tables.codes.retain(|_, c| c.snapshot.client_id != id);
        tables.tokens.retain(|_, t| t.client_id() != id);
        Ok(true)
    }

    async fn merge_connection(
        &self,
        client_id: &str,
        user_id: &str,
        scopes: &[String],
    ) -> Result<Connection, StoreError> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .connections
            .values_mut()
            .find(|c| c.client_id == client_id && c.user_id == user_id);

        if let Some(connection) = existing {
            connection.scopes = merge_scopes(&connection.scopes, scopes, SCOPE_SEPARATOR);
            connection.updated_at = Utc::now();
            return Ok(connection.clone());
        }

        let connection = Connection::new(
            client_id,
            user_id,
            merge_scopes("", scopes, SCOPE_SEPARATOR),
        );
        tables
            .connections
            .insert(connection.id.clone(), connection.clone());
        Ok(connection)
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>, StoreError> {
        Ok(self.tables.read().await.connections.get(id).cloned())
    }

    async fn list_connections(&self, user_id: &str) -> Result<Vec<Connection>, StoreError> {
        let mut connections: Vec<Connection> = self
            .tables
            .read()
            .await
            .connections
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        connections.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(connections)
    }

    async fn delete_connection(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.connections.remove(id).is_some())
    }

    async fn create_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.codes.contains_key(&code.signature) {
            return Err(StoreError::Duplicate(code.signature.clone()));
        }
        tables.codes.insert(code.signature.clone(), code.clone());
        Ok(())
    }

    async fn get_code(&self, signature: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        Ok(self.tables.read().await.codes.get(signature).cloned())
    }

    async fn delete_code(&self, signature: &str) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.codes.remove(signature).is_some())
    }

    async fn create_token(&self, token: &TokenRecord) -> Result<(), StoreError> {
        self.tables.write().await.replace(None, std::slice::from_ref(token))
    }

    async fn get_token(&self, signature: &str) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tables.read().await.tokens.get(signature).cloned())
    }

    async fn delete_token(&self, signature: &str) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.tokens.remove(signature).is_some())
    }

    async fn create_tokens(&self, issued: &[TokenRecord]) -> Result<(), StoreError> {
        self.tables.write().await.replace(None, issued)
    }

    async fn exchange_code(
        &self,
        code_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.codes.contains_key(code_signature) {
            return Err(StoreError::NotFound);
        }
        tables.replace(None, issued)?;
        tables.codes.remove(code_signature);
        Ok(())
    }

    async fn rotate_refresh(
        &self,
        old_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.tokens.contains_key(old_signature) {
            return Err(StoreError::NotFound);
        }
        tables.replace(Some(old_signature), issued)
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
