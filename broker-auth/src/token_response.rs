use std::collections::HashMap;

use broker_types::{BrokerError, ErrorCode};
use chrono::{DateTime, Utc};
use reqwest::Response;
use serde::Deserialize;

/// Common shape of a token-endpoint response, tolerant of either a JSON body
/// or a urlencoded one (some providers, notably older GitHub endpoints,
/// answer form-encoded unless `Accept: application/json` is sent).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl TokenResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs))
    }
}

pub async fn parse_token_response(
    response: Response,
    external_error_code: ErrorCode,
    parse_error_code: ErrorCode,
) -> Result<TokenResponse, BrokerError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BrokerError::new(external_error_code, e.to_string()))?;

    if !status.is_success() {
        return Err(BrokerError::new(
            external_error_code,
            format!("upstream returned {}: {}", status, body),
        ));
    }

    if let Ok(raw) = serde_json::from_str::<serde_json::Value>(&body) {
        let mut parsed: TokenResponse = serde_json::from_value(raw.clone())
            .map_err(|e| BrokerError::new(parse_error_code, e.to_string()))?;
        parsed.raw = raw;
        return Ok(parsed);
    }

    let parsed: HashMap<String, String> = serde_urlencoded::from_str(&body)
        .map_err(|e| BrokerError::new(parse_error_code, e.to_string()))?;
    let access_token = parsed
        .get("access_token")
        .ok_or_else(|| BrokerError::new(parse_error_code, "response is missing access_token"))?
        .clone();
    Ok(TokenResponse {
        access_token,
        token_type: parsed.get("token_type").cloned(),
        expires_in: parsed.get("expires_in").and_then(|s| s.parse().ok()),
        refresh_token: parsed.get("refresh_token").cloned(),
        scope: parsed.get("scope").cloned(),
        raw: serde_json::to_value(&parsed).unwrap_or(serde_json::Value::Null),
    })
}
