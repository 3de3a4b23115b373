use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An outcome pushed to the UI client that originated a flow, and to the
/// structured log/telemetry sinks. The transport (websocket, SSE, log line)
/// is owned by the implementer; the core only knows this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    pub web_socket_client_id: Option<String>,
    pub provider_config_key: String,
    pub connection_id: String,
    pub provider: String,
    pub operation: AuthOperation,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthOperation {
    Creation,
    Refresh,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: AuthEvent);
}

/// A notifier that only logs; used by tests and by deployments with no UI
/// channel wired up.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, event: AuthEvent) {
        if event.success {
            tracing::info!(
                provider_config_key = %event.provider_config_key,
                connection_id = %event.connection_id,
                operation = ?event.operation,
                "auth succeeded"
            );
        } else {
            tracing::warn!(
                provider_config_key = %event.provider_config_key,
                connection_id = %event.connection_id,
                operation = ?event.operation,
                error = ?event.error,
                "auth failed"
            );
        }
    }
}
