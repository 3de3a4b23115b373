use std::collections::HashMap;

use broker_types::{IntegrationConfig, OAuthSession};
use serde_json::Value;

/// Builds the interpolation context for a template render from the union of
/// the caller-supplied connection config, the tenant's `IntegrationConfig`,
/// and the in-flight session's own fields, per the invariant that every
/// templated provider field must resolve against all three. `Interpolator`
/// strips the legacy `connectionConfig.` prefix before lookup, so
/// `${connectionConfig.X}` and `${X}` both resolve against this same flat
/// map. Connection config wins ties, since it is the most call-site-specific
/// of the three sources.
pub fn build(
    connection_config: &HashMap<String, Value>,
    integration: &IntegrationConfig,
    session: Option<&OAuthSession>,
) -> Value {
    let mut merged: HashMap<String, Value> = HashMap::new();

    merged.insert(
        "providerConfigKey".to_string(),
        Value::String(integration.provider_config_key.clone()),
    );
    if let Some(client_id) = &integration.oauth_client_id {
        merged.insert("oauthClientId".to_string(), Value::String(client_id.clone()));
    }
    if let Some(app_link) = &integration.app_link {
        merged.insert("appPublicLink".to_string(), Value::String(app_link.clone()));
    }
    for (k, v) in &integration.custom {
        merged.insert(k.clone(), v.clone());
    }

    if let Some(session) = session {
        merged.insert("connectionId".to_string(), Value::String(session.connection_id.clone()));
        merged.insert("callbackUrl".to_string(), Value::String(session.callback_url.clone()));
        for (k, v) in &session.connection_config {
            merged.insert(k.clone(), v.clone());
        }
    }

    for (k, v) in connection_config {
        merged.insert(k.clone(), v.clone());
    }

    Value::Object(merged.into_iter().collect())
}
