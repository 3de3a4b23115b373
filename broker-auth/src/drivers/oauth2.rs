use std::collections::HashMap;

use broker_template::Interpolator;
use broker_types::{
    BrokerError, ConfigOverride, Credentials, ErrorCode, IntegrationConfig, OAuthSession, Provider,
    TokenRequestAuthMethod,
};
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::drivers::ExchangeOutcome;
use crate::interp_ctx;
use crate::token_response::parse_token_response;

/// Builds the provider authorize URL for an OAUTH2 `start`. `session.id` is
/// the `state` value; PKCE fields are already resolved onto `session` by the
/// engine before this is called.
pub fn build_authorize_url(
    provider: &Provider,
    integration: &IntegrationConfig,
    session: &OAuthSession,
    caller_auth_params: &HashMap<String, String>,
    user_scope: Option<&str>,
) -> Result<String, BrokerError> {
    let authorization_url = provider.authorization_url.as_deref().ok_or_else(|| {
        BrokerError::new(
            ErrorCode::InvalidAuthMode,
            "provider has no authorization_url configured for OAUTH2",
        )
    })?;

    if let Some(grant_type) = provider.token_params.get("grant_type") {
        if grant_type != "authorization_code" {
            return Err(BrokerError::new(
                ErrorCode::UnknownGrantType,
                format!("unsupported grant_type '{grant_type}' for an OAUTH2 start"),
            ));
        }
    }

    let ctx = interp_ctx::build(&session.connection_config, integration, Some(session));
    let interp = Interpolator::new(&ctx);

    let resolved_url = interp
        .interpolate(authorization_url, provider.authorization_url_encode)
        .map_err(|missing| BrokerError::invalid_connection_config(authorization_url, &missing))?;

    let mut all_auth_params = interp
        .interpolate_map(&provider.authorization_params, false)
        .map_err(|missing| BrokerError::invalid_connection_config("authorization_params", &missing))?;
    for (k, v) in caller_auth_params {
        all_auth_params.insert(k.clone(), v.clone());
    }

    if !provider.disable_pkce {
        let verifier = session.code_verifier.as_deref().ok_or_else(|| {
            BrokerError::new(
                ErrorCode::InvalidAuthMode,
                "PKCE is required but no code_verifier was generated for this session",
            )
        })?;
        let challenge = broker_types::pkce_challenge(verifier);
        all_auth_params.insert("code_challenge".to_string(), challenge);
        all_auth_params.insert("code_challenge_method".to_string(), "S256".to_string());
    }

    if provider.name == "slack" {
        if let Some(scope) = user_scope {
            all_auth_params.insert("user_scope".to_string(), scope.to_string());
        }
    }

    let mut url = Url::parse(&resolved_url)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair(
            "client_id",
            integration.oauth_client_id.as_deref().unwrap_or_default(),
        );
        query.append_pair("redirect_uri", &session.callback_url);
        let scopes = integration.scopes_vec();
        if !scopes.is_empty() {
            query.append_pair("scope", &scopes.join(provider.scope_separator()));
        }
        query.append_pair("state", &session.id);
        for (k, v) in &all_auth_params {
            query.append_pair(k, v);
        }
    }

    for (from, to) in &provider.authorization_url_replacements {
        let replaced = url.as_str().replace(from.as_str(), to.as_str());
        url = Url::parse(&replaced)?;
    }

    let mut rendered = url.to_string();
    if provider.authorization_url_fragment {
        if let Some(query_start) = rendered.find('?') {
            let (path, query) = rendered.split_at(query_start);
            rendered = format!("{path}#{query}");
        }
    }

    Ok(rendered)
}

/// Exchanges an authorization `code` for tokens, per the finish sequence in
/// the design (§4.4 OAUTH2 finish steps 3-6).
pub async fn exchange_code(
    http: &reqwest::Client,
    provider: &Provider,
    integration: &IntegrationConfig,
    session: &OAuthSession,
    code: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<ExchangeOutcome, BrokerError> {
    let token_url = provider.token_url.as_deref().ok_or_else(|| {
        BrokerError::new(
            ErrorCode::InvalidAuthMode,
            "provider has no token_url configured for OAUTH2",
        )
    })?;

    let ctx = interp_ctx::build(&session.connection_config, integration, Some(session));
    let interp = Interpolator::new(&ctx);
    let resolved_token_url = interp
        .interpolate(token_url, provider.token_url_encode)
        .map_err(|missing| BrokerError::invalid_connection_config(token_url, &missing))?;

    let mut params: HashMap<String, String> = interp
        .interpolate_map(&provider.token_params, false)
        .map_err(|missing| BrokerError::invalid_connection_config("token_params", &missing))?;
    params.retain(|k, _| k != "grant_type");
    params.insert("grant_type".to_string(), "authorization_code".to_string());
    params.insert("code".to_string(), code.to_string());
    params.insert("redirect_uri".to_string(), session.callback_url.clone());
    if !provider.disable_pkce {
        if let Some(verifier) = &session.code_verifier {
            params.insert("code_verifier".to_string(), verifier.clone());
        }
    }

    let use_basic_auth = matches!(
        provider.token_request_auth_method,
        TokenRequestAuthMethod::Basic
    );
    if !use_basic_auth {
        params.insert("client_id".to_string(), client_id.to_string());
        params.insert("client_secret".to_string(), client_secret.to_string());
    }

    let mut request = http
        .post(&resolved_token_url)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("Accept", "application/json");
    if use_basic_auth {
        request = request.basic_auth(client_id, Some(client_secret));
    }
    let response = request
        .form(&params)
        .send()
        .await
        .map_err(|e| BrokerError::new(ErrorCode::TokenExternalError, e.to_string()))?;

    let token = parse_token_response(
        response,
        ErrorCode::TokenExternalError,
        ErrorCode::TokenParsingError,
    )
    .await?;

    let config_override = if integration.oauth_client_id.as_deref() != Some(client_id)
        || integration.oauth_client_secret.as_deref() != Some(client_secret)
    {
        Some(ConfigOverride {
            client_id: Some(client_id.to_string()),
            client_secret: Some(client_secret.to_string()),
        })
    } else {
        None
    };

    let credentials = Credentials::Oauth2 {
        access_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone(),
        expires_at: token.expires_at(),
        raw: token.raw.clone(),
        config_override,
    };

    let mut token_metadata = HashMap::new();
    if let Some(scope) = &token.scope {
        token_metadata.insert("scope".to_string(), serde_json::Value::String(scope.clone()));
    }

    Ok(ExchangeOutcome {
        credentials,
        token_metadata,
    })
}

/// Refreshes an OAUTH2 credential, preserving `refresh_token`/`expires_at`
/// semantics described in the design's testable properties (§8).
pub async fn refresh(
    http: &reqwest::Client,
    provider: &Provider,
    integration: &IntegrationConfig,
    session_connection_config: &HashMap<String, serde_json::Value>,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<Credentials, BrokerError> {
    let refresh_url = provider
        .refresh_url
        .as_deref()
        .or(provider.token_url.as_deref())
        .ok_or_else(|| {
            BrokerError::new(
                ErrorCode::InvalidAuthMode,
                "provider has neither refresh_url nor token_url configured",
            )
        })?;

    let ctx = interp_ctx::build(session_connection_config, integration, None);
    let interp = Interpolator::new(&ctx);
    let resolved_url = interp
        .interpolate(refresh_url, provider.token_url_encode)
        .map_err(|missing| BrokerError::invalid_connection_config(refresh_url, &missing))?;

    let refresh_params = if provider.refresh_params.is_empty() {
        &provider.token_params
    } else {
        &provider.refresh_params
    };
    let mut params: HashMap<String, String> = interp
        .interpolate_map(refresh_params, false)
        .map_err(|missing| BrokerError::invalid_connection_config("refresh_params", &missing))?;
    params.retain(|k, _| k != "grant_type");
    params.insert("grant_type".to_string(), "refresh_token".to_string());
    params.insert("refresh_token".to_string(), refresh_token.to_string());

    let use_basic_auth = matches!(
        provider.token_request_auth_method,
        TokenRequestAuthMethod::Basic
    );
    if !use_basic_auth {
        params.insert("client_id".to_string(), client_id.to_string());
        params.insert("client_secret".to_string(), client_secret.to_string());
    }

    let mut request = http
        .post(&resolved_url)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("Accept", "application/json");
    if use_basic_auth {
        request = request.basic_auth(client_id, Some(client_secret));
    }
    let response = request.form(&params).send().await.map_err(|e| {
        BrokerError::new(ErrorCode::RefreshTokenExternalError, e.to_string())
    })?;

    let token = parse_token_response(
        response,
        ErrorCode::RefreshTokenExternalError,
        ErrorCode::RefreshTokenParsingError,
    )
    .await?;

    Ok(Credentials::Oauth2 {
        access_token: token.access_token,
        refresh_token: token.refresh_token.or_else(|| Some(refresh_token.to_string())),
        expires_at: token.expires_at(),
        raw: token.raw,
        config_override: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_types::AuthMode;
    use std::collections::HashMap as Map;

    fn provider() -> Provider {
        Provider {
            name: "github".into(),
            auth_mode: AuthMode::Oauth2,
            authorization_url: Some("https://github.com/login/oauth/authorize".into()),
            token_url: Some("https://github.com/login/oauth/access_token".into()),
            refresh_url: None,
            access_token_url: None,
            authorization_params: Map::new(),
            token_params: Map::new(),
            refresh_params: Map::new(),
            authorization_url_replacements: Map::new(),
            token_url_encode: false,
            authorization_url_encode: false,
            disable_pkce: false,
            authorization_url_fragment: false,
            token_request_auth_method: TokenRequestAuthMethod::Body,
            body_format: Default::default(),
            scope_separator: None,
            verification: None,
            webhook_routing_script: None,
        }
    }

    fn integration() -> IntegrationConfig {
        IntegrationConfig {
            provider_config_key: "github".into(),
            provider: "github".into(),
            oauth_client_id: Some("abc".into()),
            oauth_client_secret: Some("shh".into()),
            oauth_scopes: Some("repo,user".into()),
            app_link: None,
            custom: Map::new(),
        }
    }

    fn session() -> OAuthSession {
        OAuthSession {
            id: "S".into(),
            environment_id: "env".into(),
            provider_config_key: "github".into(),
            provider: "github".into(),
            auth_mode: AuthMode::Oauth2,
            connection_id: "conn-1".into(),
            callback_url: "https://broker.example.com/oauth/callback".into(),
            code_verifier: Some(broker_types::generate_code_verifier()),
            connection_config: Map::new(),
            web_socket_client_id: None,
            activity_log_id: "log-1".into(),
            request_token_secret: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn authorize_url_carries_state_and_pkce() {
        let provider = provider();
        let integration = integration();
        let session = session();
        let url = build_authorize_url(&provider, &integration, &session, &Map::new(), None).unwrap();
        assert!(url.contains("state=S"));
        assert!(url.contains("code_challenge="));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("scope=repo%20user"));
    }

    #[test]
    fn pkce_omitted_when_disabled() {
        let mut provider = provider();
        provider.disable_pkce = true;
        let integration = integration();
        let mut session = session();
        session.code_verifier = None;
        let url = build_authorize_url(&provider, &integration, &session, &Map::new(), None).unwrap();
        assert!(!url.contains("code_challenge"));
    }

    #[test]
    fn missing_template_key_fails_before_persisting() {
        let mut provider = provider();
        provider.authorization_url = Some("https://${subdomain}.example.com/authorize".into());
        let integration = integration();
        let session = session();
        let err = build_authorize_url(&provider, &integration, &session, &Map::new(), None)
            .unwrap_err();
        assert_eq!(err.code, broker_types::ErrorCode::InvalidConnectionConfig);
    }
}
