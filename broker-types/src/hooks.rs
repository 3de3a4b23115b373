use async_trait::async_trait;

use crate::connection::Connection;
use crate::error::BrokerError;

/// A tenant-defined or built-in script that runs after a connection is
/// created or refreshed. External scripts execute in an isolated sandbox
/// owned outside the core; this trait is the seam the hook runner calls
/// through. Failures are logged and never roll back the connection.
#[async_trait]
pub trait PostConnectionScript: Send + Sync {
    async fn run(&self, connection: &Connection) -> Result<(), BrokerError>;
}

/// Schedules the initial sync after a brand-new connection is created.
/// Capped per integration; the orchestrator itself lives outside the core.
#[async_trait]
pub trait SyncScheduler: Send + Sync {
    async fn schedule_initial_sync(&self, connection: &Connection) -> Result<(), BrokerError>;

    /// Number of connections already syncing for this provider config key,
    /// used to enforce the per-integration cap.
    async fn active_sync_count(&self, environment_id: &str, provider_config_key: &str) -> usize;
}

/// Emits the signed outbound webhook described in the design's §6.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send_auth_webhook(&self, payload: serde_json::Value) -> Result<(), BrokerError>;
}
