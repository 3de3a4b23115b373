use std::sync::Arc;

use broker_types::{
    AuthOperation, BrokerError, Connection, ConnectionStore, Credentials, ErrorCode,
    IntegrationConfig, Provider,
};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::drivers::oauth2;
use crate::hooks::PostConnectionHooks;

/// Default staleness skew: a token within 15 minutes of expiring is treated
/// as due for refresh.
pub const DEFAULT_SKEW_SECONDS: i64 = 15 * 60;

/// Serializes concurrent refreshes of the same connection. Holds one
/// `tokio::sync::Mutex` per connection id; the first caller to acquire it
/// performs the exchange, everyone else blocks and then re-reads the (now
/// fresh) stored credential instead of refreshing again.
pub struct RefreshCoordinator {
    locks: DashMap<String, Arc<Mutex<()>>>,
    http: reqwest::Client,
}

impl RefreshCoordinator {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            locks: DashMap::new(),
            http,
        }
    }

    fn lock_for(&self, connection_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(connection_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns credentials that are fresh enough to use, refreshing first if
    /// necessary. `connection_store` is consulted again after the lock is
    /// acquired so a waiter that lost the race observes the winner's result.
    /// A refresh failure is reported through `hooks` and persisted onto the
    /// connection as a standing auth-failure record, cleared on next success.
    pub async fn get_fresh_credentials(
        &self,
        connection_store: &dyn ConnectionStore,
        hooks: &PostConnectionHooks,
        provider: &Provider,
        integration: &IntegrationConfig,
        connection: &Connection,
        skew_seconds: i64,
    ) -> Result<Credentials, BrokerError> {
        if !provider.auth_mode.is_refreshable() {
            return Ok(connection.credentials.clone());
        }

        let skew = chrono::Duration::seconds(skew_seconds);
        if !connection.credentials.needs_refresh(skew) {
            return Ok(connection.credentials.clone());
        }

        let connection_key = format!(
            "{}:{}:{}",
            connection.environment_id, connection.provider_config_key, connection.connection_id
        );
        let lock = self.lock_for(&connection_key);
        let _guard = lock.lock().await;

        let current = connection_store
            .get(
                &connection.environment_id,
                &connection.provider_config_key,
                &connection.connection_id,
            )
            .await?
            .ok_or_else(|| BrokerError::missing_connection(&connection.connection_id))?;

        if !current.credentials.needs_refresh(skew) {
            return Ok(current.credentials);
        }

        let (refresh_token, config_override) = match &current.credentials {
            Credentials::Oauth2 {
                refresh_token: Some(rt),
                config_override,
                ..
            } => (rt.clone(), config_override.clone()),
            _ => {
                let err = BrokerError::new(
                    ErrorCode::RefreshTokenExternalError,
                    "connection has no refresh_token to use",
                );
                self.persist_failure(connection_store, hooks, &current, &err).await;
                return Err(err);
            }
        };

        let client_id = config_override
            .as_ref()
            .and_then(|o| o.client_id.clone())
            .or_else(|| integration.oauth_client_id.clone())
            .unwrap_or_default();
        let client_secret = config_override
            .as_ref()
            .and_then(|o| o.client_secret.clone())
            .or_else(|| integration.oauth_client_secret.clone())
            .unwrap_or_default();

        let mut refreshed = match oauth2::refresh(
            &self.http,
            provider,
            integration,
            &current.connection_config,
            &client_id,
            &client_secret,
            &refresh_token,
        )
        .await
        {
            Ok(refreshed) => refreshed,
            Err(err) => {
                self.persist_failure(connection_store, hooks, &current, &err).await;
                return Err(err);
            }
        };

        // A start-time client-id/secret override must survive refresh (see
        // the design's Open Question decision on this).
        if let Credentials::Oauth2 {
            config_override: ref mut co,
            ..
        } = refreshed
        {
            *co = config_override;
        }

        let mut updated = current.clone();
        updated.credentials = refreshed.clone();
        updated.last_auth_error = None;
        updated.failing_since = None;
        connection_store.upsert(updated).await?;

        Ok(refreshed)
    }

    /// Notifies and persists a standing auth-failure record for `connection`.
    /// Best-effort: a failure to persist the record is logged, not returned,
    /// since the caller already has a real error to propagate.
    async fn persist_failure(
        &self,
        connection_store: &dyn ConnectionStore,
        hooks: &PostConnectionHooks,
        connection: &Connection,
        err: &BrokerError,
    ) {
        hooks
            .notify_failure(
                &connection.provider_config_key,
                &connection.connection_id,
                &connection.provider,
                AuthOperation::Refresh,
                None,
                &err.message,
            )
            .await;

        let mut failing = connection.clone();
        failing.last_auth_error = Some(err.message.clone());
        failing.failing_since = failing.failing_since.or(Some(Utc::now()));
        if let Err(store_err) = connection_store.upsert(failing).await {
            tracing::warn!(error = %store_err, "failed to persist auth-failure record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_types::{AuthMode, BodyFormat, TokenRequestAuthMethod};
    use chrono::Utc;
    use std::collections::HashMap;

    fn provider() -> Provider {
        Provider {
            name: "github".into(),
            auth_mode: AuthMode::Oauth2,
            authorization_url: None,
            token_url: Some("https://example.invalid/token".into()),
            refresh_url: None,
            access_token_url: None,
            authorization_params: HashMap::new(),
            token_params: HashMap::new(),
            refresh_params: HashMap::new(),
            authorization_url_replacements: HashMap::new(),
            token_url_encode: false,
            authorization_url_encode: false,
            disable_pkce: false,
            authorization_url_fragment: false,
            token_request_auth_method: TokenRequestAuthMethod::Body,
            body_format: BodyFormat::Form,
            scope_separator: None,
            verification: None,
            webhook_routing_script: None,
        }
    }

    fn fresh_connection() -> Connection {
        Connection {
            environment_id: "env".into(),
            provider_config_key: "github".into(),
            connection_id: "conn-1".into(),
            provider: "github".into(),
            credentials: Credentials::Oauth2 {
                access_token: "tok".into(),
                refresh_token: Some("r1".into()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(2)),
                raw: serde_json::Value::Null,
                config_override: None,
            },
            connection_config: HashMap::new(),
            metadata: HashMap::new(),
            pending: false,
            last_auth_error: None,
            failing_since: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn hooks() -> PostConnectionHooks {
        PostConnectionHooks {
            sync_scheduler: None,
            internal_script: None,
            external_script: None,
            webhook_sender: None,
            notifier: Arc::new(broker_types::LoggingNotifier),
        }
    }

    #[tokio::test]
    async fn fresh_credentials_skip_refresh_entirely() {
        let coordinator = RefreshCoordinator::new(reqwest::Client::new());
        let store = crate::memory_store::InMemoryConnectionStore::new();
        let integration = IntegrationConfig {
            provider_config_key: "github".into(),
            provider: "github".into(),
            oauth_client_id: Some("id".into()),
            oauth_client_secret: Some("secret".into()),
            oauth_scopes: None,
            app_link: None,
            custom: HashMap::new(),
        };
        let conn = fresh_connection();
        store.upsert(conn.clone()).await.unwrap();

        let creds = coordinator
            .get_fresh_credentials(&store, &hooks(), &provider(), &integration, &conn, DEFAULT_SKEW_SECONDS)
            .await
            .unwrap();
        match creds {
            Credentials::Oauth2 { access_token, .. } => assert_eq!(access_token, "tok"),
            _ => panic!("wrong variant"),
        }
    }
}
