use std::collections::{BTreeMap, HashMap};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use broker_types::{BrokerError, Credentials, ErrorCode, IntegrationConfig, Provider};
use hmac::{Hmac, Mac};
use rand::RngCore;
use reqwest::header::CONTENT_TYPE;
use sha1::Sha1;

use crate::drivers::ExchangeOutcome;

type HmacSha1 = Hmac<Sha1>;

/// RFC 5849 HMAC-SHA1 signed OAuth 1.0a. No corpus repo in this workspace
/// speaks OAuth1, so this follows the protocol directly rather than
/// imitating an existing driver; the request shape mirrors the OAuth2
/// driver's use of `reqwest::Client` + form bodies.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

fn signature_base_string(method: &str, url: &str, params: &BTreeMap<String, String>) -> String {
    let param_string = params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    )
}

fn sign(base_string: &str, consumer_secret: &str, token_secret: &str) -> String {
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(base_string.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

fn oauth_header(params: &BTreeMap<String, String>) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!(r#"{}="{}""#, percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {joined}")
}

/// Requests a temporary credential (request token), storing the
/// `oauth_token_secret` on the session for the later access-token exchange.
pub async fn request_token(
    http: &reqwest::Client,
    provider: &Provider,
    integration: &IntegrationConfig,
    callback_url: &str,
) -> Result<(String, String), BrokerError> {
    let request_token_url = provider.token_url.as_deref().ok_or_else(|| {
        BrokerError::new(
            ErrorCode::InvalidAuthMode,
            "provider has no request-token url configured for OAUTH1",
        )
    })?;
    let consumer_key = integration.oauth_client_id.as_deref().unwrap_or_default();
    let consumer_secret = integration.oauth_client_secret.as_deref().unwrap_or_default();

    let mut params = BTreeMap::new();
    params.insert("oauth_callback".to_string(), callback_url.to_string());
    params.insert("oauth_consumer_key".to_string(), consumer_key.to_string());
    params.insert("oauth_nonce".to_string(), nonce());
    params.insert("oauth_signature_method".to_string(), "HMAC-SHA1".to_string());
    params.insert("oauth_timestamp".to_string(), timestamp());
    params.insert("oauth_version".to_string(), "1.0".to_string());

    let base_string = signature_base_string("POST", request_token_url, &params);
    let signature = sign(&base_string, consumer_secret, "");
    params.insert("oauth_signature".to_string(), signature);

    let response = http
        .post(request_token_url)
        .header("Authorization", oauth_header(&params))
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .send()
        .await
        .map_err(|e| BrokerError::new(ErrorCode::TokenExternalError, e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BrokerError::new(ErrorCode::TokenExternalError, e.to_string()))?;
    if !status.is_success() {
        return Err(BrokerError::new(
            ErrorCode::TokenExternalError,
            format!("request token call returned {status}: {body}"),
        ));
    }

    let parsed: HashMap<String, String> = serde_urlencoded::from_str(&body)
        .map_err(|e| BrokerError::new(ErrorCode::TokenParsingError, e.to_string()))?;
    let oauth_token = parsed
        .get("oauth_token")
        .ok_or_else(|| BrokerError::new(ErrorCode::TokenParsingError, "missing oauth_token"))?
        .clone();
    let oauth_token_secret = parsed
        .get("oauth_token_secret")
        .ok_or_else(|| {
            BrokerError::new(ErrorCode::TokenParsingError, "missing oauth_token_secret")
        })?
        .clone();

    Ok((oauth_token, oauth_token_secret))
}

/// Builds the provider's authorize redirect for a temporary credential.
pub fn authorize_url(provider: &Provider, oauth_token: &str) -> Result<String, BrokerError> {
    let authorization_url = provider.authorization_url.as_deref().ok_or_else(|| {
        BrokerError::new(
            ErrorCode::InvalidAuthMode,
            "provider has no authorization_url configured for OAUTH1",
        )
    })?;
    let mut url = url::Url::parse(authorization_url)?;
    url.query_pairs_mut().append_pair("oauth_token", oauth_token);
    Ok(url.to_string())
}

/// Exchanges the verified temporary credential for a permanent access token.
pub async fn access_token(
    http: &reqwest::Client,
    provider: &Provider,
    integration: &IntegrationConfig,
    oauth_token: &str,
    oauth_token_secret: &str,
    oauth_verifier: &str,
) -> Result<ExchangeOutcome, BrokerError> {
    let access_token_url = provider.access_token_url.as_deref().ok_or_else(|| {
        BrokerError::new(
            ErrorCode::InvalidAuthMode,
            "provider has no access_token_url configured for OAUTH1",
        )
    })?;
    let consumer_key = integration.oauth_client_id.as_deref().unwrap_or_default();
    let consumer_secret = integration.oauth_client_secret.as_deref().unwrap_or_default();

    let mut params = BTreeMap::new();
    params.insert("oauth_consumer_key".to_string(), consumer_key.to_string());
    params.insert("oauth_token".to_string(), oauth_token.to_string());
    params.insert("oauth_verifier".to_string(), oauth_verifier.to_string());
    params.insert("oauth_nonce".to_string(), nonce());
    params.insert("oauth_signature_method".to_string(), "HMAC-SHA1".to_string());
    params.insert("oauth_timestamp".to_string(), timestamp());
    params.insert("oauth_version".to_string(), "1.0".to_string());

    let base_string = signature_base_string("POST", access_token_url, &params);
    let signature = sign(&base_string, consumer_secret, oauth_token_secret);
    params.insert("oauth_signature".to_string(), signature);

    let response = http
        .post(access_token_url)
        .header("Authorization", oauth_header(&params))
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .send()
        .await
        .map_err(|e| BrokerError::new(ErrorCode::InvalidCallbackOauth1, e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BrokerError::new(ErrorCode::InvalidCallbackOauth1, e.to_string()))?;
    if !status.is_success() {
        return Err(BrokerError::new(
            ErrorCode::InvalidCallbackOauth1,
            format!("access token call returned {status}: {body}"),
        ));
    }

    let parsed: HashMap<String, String> = serde_urlencoded::from_str(&body)
        .map_err(|e| BrokerError::new(ErrorCode::TokenParsingError, e.to_string()))?;
    let access_oauth_token = parsed
        .get("oauth_token")
        .ok_or_else(|| BrokerError::new(ErrorCode::TokenParsingError, "missing oauth_token"))?
        .clone();
    let access_oauth_token_secret = parsed
        .get("oauth_token_secret")
        .ok_or_else(|| {
            BrokerError::new(ErrorCode::TokenParsingError, "missing oauth_token_secret")
        })?
        .clone();

    Ok(ExchangeOutcome {
        credentials: Credentials::Oauth1 {
            oauth_token: access_oauth_token,
            oauth_token_secret: access_oauth_token_secret,
        },
        token_metadata: HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_base_string_sorts_and_encodes_params() {
        let mut params = BTreeMap::new();
        params.insert("oauth_nonce".to_string(), "abc123".to_string());
        params.insert("oauth_consumer_key".to_string(), "key with space".to_string());
        let base = signature_base_string("POST", "https://api.example.com/oauth/request_token", &params);
        assert!(base.starts_with("POST&"));
        // space must become %2520 once percent-encoded as part of the overall
        // (already percent-encoded) param string, not the raw %20/+ forms.
        assert!(base.contains("key%2520with%2520space"));
    }

    #[test]
    fn percent_encode_leaves_unreserved_untouched() {
        assert_eq!(percent_encode("abc-._~123"), "abc-._~123");
        assert_eq!(percent_encode("a b"), "a%20b");
    }
}
