use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::Credentials;
use crate::error::BrokerError;
use crate::session::OAuthSession;

/// Persistent record of one installation of one provider for one end-user.
/// Uniquely identified by `(environment_id, provider_config_key,
/// connection_id)`. Credentials are encrypted at rest by a collaborator
/// outside the core; this struct carries the plaintext shape the core works
/// with in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub environment_id: String,
    pub provider_config_key: String,
    pub connection_id: String,
    pub provider: String,
    pub credentials: Credentials,
    #[serde(default)]
    pub connection_config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Set while a CUSTOM/APP-style installation is waiting on a second
    /// callback (e.g. a GitHub App installation id).
    #[serde(default)]
    pub pending: bool,
    /// Message from the most recent failed refresh attempt. Cleared the next
    /// time the connection's credentials are refreshed or re-authenticated
    /// successfully.
    #[serde(default)]
    pub last_auth_error: Option<String>,
    /// When the connection first started failing, preserved across repeated
    /// failed refresh attempts so operators can see how long it has been
    /// failing, not just the latest attempt.
    #[serde(default)]
    pub failing_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn key(&self) -> (String, String, String) {
        (
            self.environment_id.clone(),
            self.provider_config_key.clone(),
            self.connection_id.clone(),
        )
    }
}

/// Outcome of an upsert: whether the connection already existed. Hooks use
/// this to decide whether to run `operation=creation` or `operation=refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOperation {
    Creation,
    Update,
}

#[derive(Debug, Clone)]
pub struct UpsertResult {
    pub connection: Connection,
    pub operation: UpsertOperation,
}

/// Durable short-lived session storage. `find_and_delete` must be atomic:
/// concurrent callers racing on the same id observe at most one success.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: OAuthSession) -> Result<(), BrokerError>;
    async fn find_and_delete(&self, id: &str) -> Result<Option<OAuthSession>, BrokerError>;
    async fn sweep_expired(&self, max_age: chrono::Duration) -> Result<usize, BrokerError>;
}

/// Credential-at-rest persistence. Encryption, if any, happens below this
/// trait's implementation; the core never sees ciphertext.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn upsert(&self, connection: Connection) -> Result<UpsertResult, BrokerError>;

    async fn get(
        &self,
        environment_id: &str,
        provider_config_key: &str,
        connection_id: &str,
    ) -> Result<Option<Connection>, BrokerError>;

    async fn delete(
        &self,
        environment_id: &str,
        provider_config_key: &str,
        connection_id: &str,
    ) -> Result<(), BrokerError>;

    async fn list(
        &self,
        environment_id: &str,
        provider_config_key: &str,
    ) -> Result<Vec<Connection>, BrokerError>;
}
