use std::collections::HashMap;

use broker_template::Interpolator;
use broker_types::{BrokerError, ErrorCode, IntegrationConfig, OAuthSession, Provider};

use crate::interp_ctx;

/// APP / APP_STORE / CUSTOM installs redirect to a provider-hosted install
/// page; there is no token exchange at `start` time, only at `finish` (when
/// the provider posts back an `installation_id`).
pub fn build_install_url(
    provider: &Provider,
    integration: &IntegrationConfig,
    session: &OAuthSession,
) -> Result<String, BrokerError> {
    let authorization_url = provider.authorization_url.as_deref().ok_or_else(|| {
        BrokerError::new(
            ErrorCode::InvalidAuthMode,
            "provider has no authorization_url configured for an app-install auth mode",
        )
    })?;

    let ctx = interp_ctx::build(&session.connection_config, integration, Some(session));
    let interp = Interpolator::new(&ctx);
    let resolved = interp
        .interpolate(authorization_url, false)
        .map_err(|missing| BrokerError::invalid_connection_config(authorization_url, &missing))?;

    let mut url = url::Url::parse(&resolved)?;
    url.query_pairs_mut().append_pair("state", &session.id);
    Ok(url.to_string())
}

/// Extracts the fields a CUSTOM (GitHub-App-style) callback can carry:
/// `installation_id` when approval has completed, `setup_action=update` when
/// the tenant re-entered setup from an already-installed app.
pub fn installation_id(callback_params: &HashMap<String, String>) -> Option<&String> {
    callback_params.get("installation_id")
}

pub fn is_setup_update(callback_params: &HashMap<String, String>) -> bool {
    callback_params
        .get("setup_action")
        .map(|v| v == "update")
        .unwrap_or(false)
}
