use std::sync::Arc;

use broker_types::{
    AuthEvent, AuthOperation, Connection, ConnectionStore, Notifier, PostConnectionScript,
    SyncScheduler, WebhookSender,
};

/// Per-tenant cap on how many connections may have an initial sync scheduled
/// for a single integration, mirroring `CONNECTIONS_WITH_SCRIPTS_CAP_LIMIT`.
pub const CONNECTIONS_WITH_SCRIPTS_CAP_LIMIT: usize = 100;

/// Runs the ordered, best-effort post-connection steps in the design's
/// §4.7. Every step logs and continues on failure; none of them roll back
/// the connection that was already persisted.
pub struct PostConnectionHooks {
    pub sync_scheduler: Option<Arc<dyn SyncScheduler>>,
    pub internal_script: Option<Arc<dyn PostConnectionScript>>,
    pub external_script: Option<Arc<dyn PostConnectionScript>>,
    pub webhook_sender: Option<Arc<dyn WebhookSender>>,
    pub notifier: Arc<dyn Notifier>,
}

impl PostConnectionHooks {
    pub async fn run(
        &self,
        connections: &dyn ConnectionStore,
        connection: &Connection,
        operation: AuthOperation,
        web_socket_client_id: Option<String>,
        initiate_sync: bool,
    ) {
        if connection.last_auth_error.is_some() || connection.failing_since.is_some() {
            let mut cleared = connection.clone();
            cleared.last_auth_error = None;
            cleared.failing_since = None;
            if let Err(err) = connections.upsert(cleared).await {
                tracing::warn!(error = %err, "failed to clear persisted auth-failure state");
            }
        }

        if operation == AuthOperation::Creation && initiate_sync {
            if let Some(scheduler) = &self.sync_scheduler {
                let active = scheduler
                    .active_sync_count(&connection.environment_id, &connection.provider_config_key)
                    .await;
                if active < CONNECTIONS_WITH_SCRIPTS_CAP_LIMIT {
                    if let Err(err) = scheduler.schedule_initial_sync(connection).await {
                        tracing::warn!(error = %err, "failed to schedule initial sync");
                    }
                } else {
                    tracing::warn!(
                        provider_config_key = %connection.provider_config_key,
                        "initial sync skipped: per-integration cap reached"
                    );
                }
            }
        }

        if let Some(script) = &self.internal_script {
            if let Err(err) = script.run(connection).await {
                tracing::warn!(error = %err, "internal post-connection script failed");
            }
        }

        if let Some(script) = &self.external_script {
            if let Err(err) = script.run(connection).await {
                tracing::warn!(error = %err, "external post-connection script failed");
            }
        }

        if let Some(sender) = &self.webhook_sender {
            let payload = serde_json::json!({
                "type": "auth",
                "connectionId": connection.connection_id,
                "providerConfigKey": connection.provider_config_key,
                "provider": connection.provider,
                "operation": if operation == AuthOperation::Creation { "creation" } else { "refresh" },
                "success": true,
            });
            if let Err(err) = sender.send_auth_webhook(payload).await {
                tracing::warn!(error = %err, "outbound auth webhook failed");
            }
        }

        self.notifier
            .notify(AuthEvent {
                web_socket_client_id,
                provider_config_key: connection.provider_config_key.clone(),
                connection_id: connection.connection_id.clone(),
                provider: connection.provider.clone(),
                operation,
                success: true,
                error: None,
            })
            .await;
    }

    pub async fn notify_failure(
        &self,
        provider_config_key: &str,
        connection_id: &str,
        provider: &str,
        operation: AuthOperation,
        web_socket_client_id: Option<String>,
        error: &str,
    ) {
        self.notifier
            .notify(AuthEvent {
                web_socket_client_id,
                provider_config_key: provider_config_key.to_string(),
                connection_id: connection_id.to_string(),
                provider: provider.to_string(),
                operation,
                success: false,
                error: Some(error.to_string()),
            })
            .await;
    }
}
