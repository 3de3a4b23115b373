pub mod app;
pub mod oauth1;
pub mod oauth2;
pub mod oauth2_cc;
pub mod simple;

use std::collections::HashMap;

use broker_types::Credentials;

/// Result of a successful exchange: the minted credential plus any metadata
/// pulled out of the token/callback response that should be merged into the
/// connection's `connection_config`.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub credentials: Credentials,
    pub token_metadata: HashMap<String, serde_json::Value>,
}
