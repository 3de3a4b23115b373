use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use broker_types::{
    BrokerError, Connection, ConnectionStore, OAuthSession, SessionStore, UpsertOperation,
    UpsertResult,
};
use chrono::Utc;
use tokio::sync::RwLock;

/// Single-process session store. Production deployments with more than one
/// broker replica should reach for the Postgres-backed store instead, whose
/// `find_and_delete` is a single `DELETE ... RETURNING` statement.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, OAuthSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: OAuthSession) -> Result<(), BrokerError> {
        self.sessions.write().await.insert(session.id.clone(), session);
        Ok(())
    }

    async fn find_and_delete(&self, id: &str) -> Result<Option<OAuthSession>, BrokerError> {
        Ok(self.sessions.write().await.remove(id))
    }

    async fn sweep_expired(&self, max_age: chrono::Duration) -> Result<usize, BrokerError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(max_age));
        Ok(before - sessions.len())
    }
}

type ConnectionKey = (String, String, String);

/// Single-process connection store, used by tests and single-instance
/// deployments. Mirrors the shape of the durable diesel-backed store in
/// `broker-store` so the two are interchangeable behind the trait.
#[derive(Default)]
pub struct InMemoryConnectionStore {
    connections: Arc<RwLock<HashMap<ConnectionKey, Connection>>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn upsert(&self, mut connection: Connection) -> Result<UpsertResult, BrokerError> {
        let key = connection.key();
        let mut connections = self.connections.write().await;
        let operation = if let Some(existing) = connections.get(&key) {
            connection.created_at = existing.created_at;
            UpsertOperation::Update
        } else {
            UpsertOperation::Creation
        };
        connection.updated_at = Utc::now();
        connections.insert(key, connection.clone());
        Ok(UpsertResult {
            connection,
            operation,
        })
    }

    async fn get(
        &self,
        environment_id: &str,
        provider_config_key: &str,
        connection_id: &str,
    ) -> Result<Option<Connection>, BrokerError> {
        let key = (
            environment_id.to_string(),
            provider_config_key.to_string(),
            connection_id.to_string(),
        );
        Ok(self.connections.read().await.get(&key).cloned())
    }

    async fn delete(
        &self,
        environment_id: &str,
        provider_config_key: &str,
        connection_id: &str,
    ) -> Result<(), BrokerError> {
        let key = (
            environment_id.to_string(),
            provider_config_key.to_string(),
            connection_id.to_string(),
        );
        self.connections.write().await.remove(&key);
        Ok(())
    }

    async fn list(
        &self,
        environment_id: &str,
        provider_config_key: &str,
    ) -> Result<Vec<Connection>, BrokerError> {
        Ok(self
            .connections
            .read()
            .await
            .values()
            .filter(|c| {
                c.environment_id == environment_id && c.provider_config_key == provider_config_key
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_types::{AuthMode, Credentials};
    use std::collections::HashMap as Map;

    fn session(id: &str) -> OAuthSession {
        OAuthSession {
            id: id.to_string(),
            environment_id: "env".into(),
            provider_config_key: "github".into(),
            provider: "github".into(),
            auth_mode: AuthMode::Oauth2,
            connection_id: "conn-1".into(),
            callback_url: "https://example.com/callback".into(),
            code_verifier: None,
            connection_config: Map::new(),
            web_socket_client_id: None,
            activity_log_id: "log-1".into(),
            request_token_secret: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn find_and_delete_is_single_use() {
        let store = InMemorySessionStore::new();
        store.create(session("s1")).await.unwrap();
        assert!(store.find_and_delete("s1").await.unwrap().is_some());
        assert!(store.find_and_delete("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_find_and_delete_resolves_once() {
        let store = Arc::new(InMemorySessionStore::new());
        store.create(session("s1")).await.unwrap();

        let a = store.clone();
        let b = store.clone();
        let (r1, r2) = tokio::join!(
            async move { a.find_and_delete("s1").await.unwrap() },
            async move { b.find_and_delete("s1").await.unwrap() }
        );
        let successes = [r1, r2].into_iter().filter(Option::is_some).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn upsert_distinguishes_creation_from_update() {
        let store = InMemoryConnectionStore::new();
        let conn = Connection {
            environment_id: "env".into(),
            provider_config_key: "github".into(),
            connection_id: "conn-1".into(),
            provider: "github".into(),
            credentials: Credentials::ApiKey {
                api_key: "k".into(),
            },
            connection_config: Map::new(),
            metadata: Map::new(),
            pending: false,
            last_auth_error: None,
            failing_since: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let first = store.upsert(conn.clone()).await.unwrap();
        assert_eq!(first.operation, UpsertOperation::Creation);
        let second = store.upsert(conn).await.unwrap();
        assert_eq!(second.operation, UpsertOperation::Update);
    }
}
