use std::collections::HashMap;

use broker_template::Interpolator;
use broker_types::{BrokerError, Credentials, ErrorCode, IntegrationConfig, Provider};
use reqwest::header::CONTENT_TYPE;

use crate::drivers::ExchangeOutcome;
use crate::interp_ctx;
use crate::token_response::parse_token_response;

/// OAUTH2_CC is synchronous: no session, no redirect, a single token request.
pub async fn get_token(
    http: &reqwest::Client,
    provider: &Provider,
    integration: &IntegrationConfig,
    connection_config: &HashMap<String, serde_json::Value>,
    client_id: &str,
    client_secret: &str,
) -> Result<ExchangeOutcome, BrokerError> {
    let token_url = provider.token_url.as_deref().ok_or_else(|| {
        BrokerError::new(
            ErrorCode::Oauth2CcError,
            "provider has no token_url configured for OAUTH2_CC",
        )
    })?;

    let ctx = interp_ctx::build(connection_config, integration, None);
    let interp = Interpolator::new(&ctx);
    let resolved_url = interp
        .interpolate(token_url, provider.token_url_encode)
        .map_err(|missing| BrokerError::invalid_connection_config(token_url, &missing))?;

    let mut params: HashMap<String, String> = interp
        .interpolate_map(&provider.token_params, false)
        .map_err(|missing| BrokerError::invalid_connection_config("token_params", &missing))?;
    params.insert("grant_type".to_string(), "client_credentials".to_string());
    params.insert("client_id".to_string(), client_id.to_string());
    params.insert("client_secret".to_string(), client_secret.to_string());

    let response = http
        .post(&resolved_url)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("Accept", "application/json")
        .form(&params)
        .send()
        .await
        .map_err(|e| BrokerError::new(ErrorCode::Oauth2CcError, e.to_string()))?;

    let token = parse_token_response(response, ErrorCode::Oauth2CcError, ErrorCode::Oauth2CcError)
        .await?;

    Ok(ExchangeOutcome {
        credentials: Credentials::Oauth2 {
            access_token: token.access_token,
            refresh_token: None,
            expires_at: token.expires_at(),
            raw: token.raw,
            config_override: None,
        },
        token_metadata: HashMap::new(),
    })
}
