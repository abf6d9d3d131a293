use super::{StoreBackend, StoreError};
use crate::client::Client;
use crate::connection::Connection;
use crate::credential::{AuthorizationCode, TokenRecord};
use crate::scope::{SCOPE_SEPARATOR, merge_scopes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, warn};
use redis::{AsyncCommands, Client as RedisClient, Script, aio::ConnectionManager};
use serde::de::DeserializeOwned;
use std::sync::Arc;

const KEY_PREFIX: &str = "scopegate:";

/// Optimistic merges give up after this many lost races.
const MERGE_ATTEMPTS: usize = 16;

/// Creates or updates a client record while enforcing the trusted name rule.
/// KEYS: client, clients set, name set. ARGV: id, json, trusted, prefix, mode.
const SAVE_CLIENT: &str = r#"
local exists = redis.call('EXISTS', KEYS[1]) == 1
if ARGV[5] == 'create' and exists then return 'DUPLICATE' end
if ARGV[5] == 'update' and not exists then return 'NOT_FOUND' end
local trusted = ARGV[3] == '1'
for _, other in ipairs(redis.call('SMEMBERS', KEYS[3])) do
  if other ~= ARGV[1] then
    local raw = redis.call('GET', ARGV[4] .. 'client:' .. other)
    if raw and (trusted or cjson.decode(raw)['trusted']) then return 'CONFLICT' end
  end
end
if exists then
  local old = cjson.decode(redis.call('GET', KEYS[1]))
  redis.call('SREM', ARGV[4] .. 'client_name:' .. old['name'], ARGV[1])
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('SADD', KEYS[2], ARGV[1])
redis.call('SADD', KEYS[3], ARGV[1])
return 'OK'
"#;

/// KEYS: client. ARGV: id, prefix.
const DELETE_CLIENT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local client = cjson.decode(raw)
local p = ARGV[2]
for _, cid in ipairs(redis.call('SMEMBERS', p .. 'client_connections:' .. ARGV[1])) do
  local craw = redis.call('GET', p .. 'connection:' .. cid)
  if craw then
    local c = cjson.decode(craw)
    redis.call('DEL', p .. 'connection_pair:' .. c['client_id'] .. ':' .. c['user_id'])
    redis.call('SREM', p .. 'user_connections:' .. c['user_id'], cid)
    redis.call('DEL', p .. 'connection:' .. cid)
  end
end
for _, key in ipairs(redis.call('SMEMBERS', p .. 'client_credentials:' .. ARGV[1])) do
  redis.call('DEL', key)
end
redis.call('DEL', p .. 'client_connections:' .. ARGV[1], p .. 'client_credentials:' .. ARGV[1], KEYS[1])
redis.call('SREM', p .. 'clients', ARGV[1])
redis.call('SREM', p .. 'client_name:' .. client['name'], ARGV[1])
return 1
"#;

/// Compare-and-set of a connection. An empty expected value means the pair
/// must not have a connection yet.
/// KEYS: pair. ARGV: prefix, expected, json, id, client id, user id.
const CAS_CONNECTION: &str = r#"
local p = ARGV[1]
local current = redis.call('GET', KEYS[1])
if ARGV[2] == '' then
  if current then return 0 end
  redis.call('SET', KEYS[1], ARGV[4])
  redis.call('SET', p .. 'connection:' .. ARGV[4], ARGV[3])
  redis.call('SADD', p .. 'user_connections:' .. ARGV[6], ARGV[4])
  redis.call('SADD', p .. 'client_connections:' .. ARGV[5], ARGV[4])
  return 1
end
if current ~= ARGV[4] then return 0 end
if redis.call('GET', p .. 'connection:' .. ARGV[4]) ~= ARGV[2] then return 0 end
redis.call('SET', p .. 'connection:' .. ARGV[4], ARGV[3])
return 1
"#;

/// KEYS: connection. ARGV: prefix, id.
const DELETE_CONNECTION: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local c = cjson.decode(raw)
local p = ARGV[1]
redis.call('DEL', KEYS[1], p .. 'connection_pair:' .. c['client_id'] .. ':' .. c['user_id'])
redis.call('SREM', p .. 'user_connections:' .. c['user_id'], ARGV[2])
redis.call('SREM', p .. 'client_connections:' .. c['client_id'], ARGV[2])
return 1
"#;

/// Stores credentials, optionally consuming one, in one unit.
/// KEYS: client credentials set, [consumed], issued...
/// ARGV: consume flag, then json and ttl per issued key.
const ISSUE_CREDENTIALS: &str = r#"
local first = 2
if ARGV[1] == '1' then
  if redis.call('EXISTS', KEYS[2]) == 0 then return 'NOT_FOUND' end
  first = 3
end
for i = first, #KEYS do
  if redis.call('EXISTS', KEYS[i]) == 1 then return 'DUPLICATE:' .. KEYS[i] end
end
for i = first, #KEYS do
  local j = (i - first) * 2 + 2
  redis.call('SET', KEYS[i], ARGV[j], 'EX', ARGV[j + 1])
  redis.call('SADD', KEYS[1], KEYS[i])
end
if ARGV[1] == '1' then
  redis.call('DEL', KEYS[2])
  redis.call('SREM', KEYS[1], KEYS[2])
end
return 'OK'
"#;

/// KEYS: credential. ARGV: prefix.
const DELETE_CREDENTIAL: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local record = cjson.decode(raw)
redis.call('DEL', KEYS[1])
redis.call('SREM', ARGV[1] .. 'client_credentials:' .. record['snapshot']['client_id'], KEYS[1])
return 1
"#;

struct Scripts {
    save_client: Script,
    delete_client: Script,
    cas_connection: Script,
    delete_connection: Script,
    issue_credentials: Script,
    delete_credential: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            save_client: Script::new(SAVE_CLIENT),
            delete_client: Script::new(DELETE_CLIENT),
            cas_connection: Script::new(CAS_CONNECTION),
            delete_connection: Script::new(DELETE_CONNECTION),
            issue_credentials: Script::new(ISSUE_CREDENTIALS),
            delete_credential: Script::new(DELETE_CREDENTIAL),
        }
    }
}

fn key(kind: &str, id: &str) -> String {
    format!("{KEY_PREFIX}{kind}:{id}")
}

fn pair_key(client_id: &str, user_id: &str) -> String {
    format!("{KEY_PREFIX}connection_pair:{client_id}:{user_id}")
}

fn ttl_secs(expires_at: DateTime<Utc>) -> i64 {
    (expires_at - Utc::now()).num_seconds().max(1)
}

fn redis_error(context: &str, err: redis::RedisError) -> StoreError {
    error!("Redis error while {}: {}", context, err);
    StoreError::Redis(err.to_string())
}

/// Store shared between instances through Redis.
///
/// Records are JSON documents. Every operation touching more than one key
/// runs as a Lua script so that it is applied as a single unit.
// TODO derive Debug once ConnectionManager implements it
#[derive(Clone)]
pub struct RedisStore {
    conn_manager: ConnectionManager,
    scripts: Arc<Scripts>,
}

impl RedisStore {
    /// Connects and pings the server.
    pub async fn new(redis_url: &str) -> Result<Self, String> {
        let client = RedisClient::open(redis_url)
            .map_err(|err| format!("Failed to connect to Redis: {}", err))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|err| format!("Failed to create Redis connection manager: {}", err))?;

        let mut conn = conn_manager.clone();
        if let Err(err) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            return Err(format!("Failed to ping Redis: {}", err));
        }

        Ok(Self {
            conn_manager,
            scripts: Arc::new(Scripts::new()),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|err| redis_error("reading a record", err))?;
        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn get_many<T: DeserializeOwned>(&self, keys: Vec<String>) -> Result<Vec<T>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn_manager.clone();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|err| redis_error("reading records", err))?;
        raw.into_iter()
            .flatten()
            .map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .collect()
    }

    async fn save_client(&self, client: &Client, mode: &str) -> Result<(), StoreError> {
        let json = serde_json::to_string(client)?;
        let mut conn = self.conn_manager.clone();
        let outcome: String = self
            .scripts
            .save_client
            .key(key("client", &client.id))
            .key(format!("{KEY_PREFIX}clients"))
            .key(key("client_name", &client.name))
            .arg(&client.id)
            .arg(json)
            .arg(if client.trusted { "1" } else { "0" })
            .arg(KEY_PREFIX)
            .arg(mode)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| redis_error("saving a client", err))?;

        match outcome.as_str() {
            "OK" => Ok(()),
            "DUPLICATE" => Err(StoreError::Duplicate(client.id.clone())),
            "NOT_FOUND" => Err(StoreError::NotFound),
            _ => Err(StoreError::Conflict(client.name.clone())),
        }
    }

    async fn issue(
        &self,
        client_id: &str,
        consumed: Option<String>,
        issued: &[(String, String, i64)],
    ) -> Result<(), StoreError> {
        let mut invocation = self.scripts.issue_credentials.prepare_invoke();
        invocation.key(key("client_credentials", client_id));
        invocation.arg(if consumed.is_some() { "1" } else { "0" });
        if let Some(consumed) = consumed {
            invocation.key(consumed);
        }
        for (record_key, json, ttl) in issued {
            invocation.key(record_key).arg(json).arg(*ttl);
        }

        let mut conn = self.conn_manager.clone();
        let outcome: String = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|err| redis_error("issuing credentials", err))?;

        match outcome.as_str() {
            "OK" => Ok(()),
            "NOT_FOUND" => Err(StoreError::NotFound),
            other => Err(StoreError::Duplicate(
                other.trim_start_matches("DUPLICATE:").to_string(),
            )),
        }
    }

    fn token_entries(issued: &[TokenRecord]) -> Result<Vec<(String, String, i64)>, StoreError> {
        issued
            .iter()
            .map(|token| {
                Ok((
                    key("token", &token.signature),
                    serde_json::to_string(token)?,
                    ttl_secs(token.expires_at),
                ))
            })
            .collect()
    }

    async fn replace_with_tokens(
        &self,
        consumed: String,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError> {
        let Some(first) = issued.first() else {
            return Ok(());
        };
        let entries = Self::token_entries(issued)?;
        self.issue(first.client_id(), Some(consumed), &entries).await
    }

    async fn delete_credential(&self, record_key: String) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = self
            .scripts
            .delete_credential
            .key(record_key)
            .arg(KEY_PREFIX)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| redis_error("deleting a credential", err))?;
        Ok(deleted == 1)
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn create_client(&self, client: &Client) -> Result<(), StoreError> {
        self.save_client(client, "create").await
    }

    async fn update_client(&self, client: &Client) -> Result<(), StoreError> {
        self.save_client(client, "update").await
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>, StoreError> {
        self.get_json(&key("client", id)).await
    }

    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let ids: Vec<String> = conn
            .smembers(format!("{KEY_PREFIX}clients"))
            .await
            .map_err(|err| redis_error("listing clients", err))?;
        let mut clients: Vec<Client> = self
            .get_many(ids.iter().map(|id| key("client", id)).collect())
            .await?;
        clients.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(clients)
    }

    async fn delete_client(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = self
            .scripts
            .delete_client
            .key(key("client", id))
            .arg(id)
            .arg(KEY_PREFIX)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| redis_error("deleting a client", err))?;
        Ok(deleted == 1)
    }

    async fn merge_connection(
        &self,
        client_id: &str,
        user_id: &str,
        scopes: &[String],
    ) -> Result<Connection, StoreError> {
        let pair = pair_key(client_id, user_id);

        for _ in 0..MERGE_ATTEMPTS {
            let mut conn = self.conn_manager.clone();
            let current_id: Option<String> = conn
                .get(&pair)
                .await
                .map_err(|err| redis_error("reading a connection pair", err))?;

            let current: Option<String> = match &current_id {
                Some(id) => conn
                    .get(key("connection", id))
                    .await
                    .map_err(|err| redis_error("reading a connection", err))?,
                None => None,
            };

            let (expected, connection) = match (current_id, current) {
                (Some(_), Some(raw)) => {
                    let mut connection: Connection = serde_json::from_str(&raw)?;
                    connection.scopes = merge_scopes(&connection.scopes, scopes, SCOPE_SEPARATOR);
                    connection.updated_at = Utc::now();
                    (raw, connection)
                }
                (None, _) => (
                    String::new(),
                    Connection::new(client_id, user_id, merge_scopes("", scopes, SCOPE_SEPARATOR)),
                ),
                // Revoked between the two reads.
                (Some(_), None) => continue,
            };

            let swapped: i64 = self
                .scripts
                .cas_connection
                .key(&pair)
                .arg(KEY_PREFIX)
                .arg(expected)
                .arg(serde_json::to_string(&connection)?)
                .arg(&connection.id)
                .arg(client_id)
                .arg(user_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|err| redis_error("merging a connection", err))?;

            if swapped == 1 {
                return Ok(connection);
            }
        }

        warn!(
            "Gave up merging connection of client {} and user {} after {} attempts",
            client_id, user_id, MERGE_ATTEMPTS
        );
        Err(StoreError::Conflict(format!("{client_id}:{user_id}")))
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>, StoreError> {
        self.get_json(&key("connection", id)).await
    }

    async fn list_connections(&self, user_id: &str) -> Result<Vec<Connection>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let ids: Vec<String> = conn
            .smembers(key("user_connections", user_id))
            .await
            .map_err(|err| redis_error("listing connections", err))?;
        let mut connections: Vec<Connection> = self
            .get_many(ids.iter().map(|id| key("connection", id)).collect())
            .await?;
        connections.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(connections)
    }

    async fn delete_connection(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = self
            .scripts
            .delete_connection
            .key(key("connection", id))
            .arg(KEY_PREFIX)
            .arg(id)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| redis_error("deleting a connection", err))?;
        Ok(deleted == 1)
    }

    async fn create_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        let entry = (
            key("code", &code.signature),
            serde_json::to_string(code)?,
            ttl_secs(code.expires_at),
        );
        self.issue(&code.snapshot.client_id, None, &[entry])
            .await
            .map_err(|err| match err {
                StoreError::Duplicate(_) => StoreError::Duplicate(code.signature.clone()),
                other => other,
            })
    }

    async fn get_code(&self, signature: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        self.get_json(&key("code", signature)).await
    }

    async fn delete_code(&self, signature: &str) -> Result<bool, StoreError> {
        self.delete_credential(key("code", signature)).await
    }

    async fn create_token(&self, token: &TokenRecord) -> Result<(), StoreError> {
        let entries = Self::token_entries(std::slice::from_ref(token))?;
        self.issue(token.client_id(), None, &entries)
            .await
            .map_err(|err| match err {
                StoreError::Duplicate(_) => StoreError::Duplicate(token.signature.clone()),
                other => other,
            })
    }

    async fn get_token(&self, signature: &str) -> Result<Option<TokenRecord>, StoreError> {
        self.get_json(&key("token", signature)).await
    }

    async fn delete_token(&self, signature: &str) -> Result<bool, StoreError> {
        self.delete_credential(key("token", signature)).await
    }

    async fn create_tokens(&self, issued: &[TokenRecord]) -> Result<(), StoreError> {
        let Some(first) = issued.first() else {
            return Ok(());
        };
        let entries = Self::token_entries(issued)?;
        self.issue(first.client_id(), None, &entries).await
    }

    async fn exchange_code(
        &self,
        code_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError> {
        self.replace_with_tokens(key("code", code_signature), issued)
            .await
    }

    async fn rotate_refresh(
        &self,
        old_signature: &str,
        issued: &[TokenRecord],
    ) -> Result<(), StoreError> {
        self.replace_with_tokens(key("token", old_signature), issued)
            .await
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AppKind;
    use crate::credential::{GrantSnapshot, TokenKind};
    use chrono::Duration;
    use redis_test::server::RedisServer;

    fn get_redis_url(server: &RedisServer) -> String {
        match &server.addr {
            redis::ConnectionAddr::Tcp(host, port) => {
                format!("redis://{}:{}/", host, port)
            }
            _ => "redis://127.0.0.1:6379/".to_string(),
        }
    }

    fn token(signature: &str, client_id: &str, kind: TokenKind) -> TokenRecord {
        TokenRecord::new(
            signature.to_string(),
            kind,
            GrantSnapshot {
                client_id: client_id.to_string(),
                user_id: "alice".to_string(),
                scopes: vec!["offline".to_string()],
                connection_id: None,
                redirect_uri: None,
            },
            Duration::hours(1),
        )
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_client_name_rules() {
        let server = RedisServer::new();
        let store = RedisStore::new(&get_redis_url(&server)).await.unwrap();

        let (trusted, _) = Client::new("portal", AppKind::Owner, vec![], true);
        store.create_client(&trusted).await.unwrap();

        let (clash, _) = Client::new("portal", AppKind::Client, vec![], false);
        assert!(matches!(
            store.create_client(&clash).await,
            Err(StoreError::Conflict(_))
        ));

        let loaded = store.get_client(&trusted.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "portal");
        assert_eq!(store.list_clients().await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_rotation_and_cascade() {
        let server = RedisServer::new();
        let store = RedisStore::new(&get_redis_url(&server)).await.unwrap();

        let (client, _) = Client::new("gallery", AppKind::Owner, vec![], false);
        store.create_client(&client).await.unwrap();
        store
            .create_token(&token("r1", &client.id, TokenKind::Refresh))
            .await
            .unwrap();

        store
            .rotate_refresh(
                "r1",
                &[
                    token("a2", &client.id, TokenKind::Access),
                    token("r2", &client.id, TokenKind::Refresh),
                ],
            )
            .await
            .unwrap();
        assert!(store.get_token("r1").await.unwrap().is_none());
        assert!(matches!(
            store
                .rotate_refresh("r1", &[token("a3", &client.id, TokenKind::Access)])
                .await,
            Err(StoreError::NotFound)
        ));
        assert!(store.get_token("a3").await.unwrap().is_none());

        let connection = store
            .merge_connection(&client.id, "alice", &["a".to_string()])
            .await
            .unwrap();
        let merged = store
            .merge_connection(&client.id, "alice", &["b".to_string()])
            .await
            .unwrap();
        assert_eq!(connection.id, merged.id);
        assert_eq!(merged.scopes, "a b");

        assert!(store.delete_client(&client.id).await.unwrap());
        assert!(store.get_token("r2").await.unwrap().is_none());
        assert!(store.get_connection(&connection.id).await.unwrap().is_none());
        assert!(store.list_connections("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_create_tokens_is_all_or_nothing() {
        let server = RedisServer::new();
        let store = RedisStore::new(&get_redis_url(&server)).await.unwrap();

        let (client, _) = Client::new("gallery", AppKind::Owner, vec![], false);
        store.create_client(&client).await.unwrap();
        store
            .create_token(&token("r1", &client.id, TokenKind::Refresh))
            .await
            .unwrap();

        assert!(matches!(
            store
                .create_tokens(&[
                    token("a1", &client.id, TokenKind::Access),
                    token("r1", &client.id, TokenKind::Refresh),
                ])
                .await,
            Err(StoreError::Duplicate(_))
        ));
        assert!(store.get_token("a1").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_health_check() {
        let server = RedisServer::new();
        let store = RedisStore::new(&get_redis_url(&server)).await.unwrap();

        let result = store.health_check().await;
        assert!(result.is_ok(), "health check failed: {:?}", result);
    }
}
