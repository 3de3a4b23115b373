use std::sync::Arc;

use broker_auth::AuthEngine;

use crate::config::BrokerConfig;

/// Shared state injected into every actix-web handler. The engine itself
/// owns all business logic; handlers only translate HTTP <-> engine calls.
pub struct AppState {
    pub engine: Arc<AuthEngine>,
    pub config: BrokerConfig,
}
