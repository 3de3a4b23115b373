use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a provider authenticates. Mirrors the discriminant carried on the wire
/// by every declarative provider file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMode {
    None,
    Oauth1,
    Oauth2,
    Oauth2Cc,
    App,
    Custom,
    AppStore,
    Basic,
    ApiKey,
    Jwt,
    Signature,
    Tba,
    Tableau,
    TwoStep,
    Bill,
}

impl AuthMode {
    pub fn is_redirect_based(&self) -> bool {
        matches!(
            self,
            AuthMode::Oauth1 | AuthMode::Oauth2 | AuthMode::App | AuthMode::Custom | AuthMode::AppStore
        )
    }

    pub fn is_refreshable(&self) -> bool {
        matches!(self, AuthMode::Oauth2 | AuthMode::Oauth2Cc)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::None => "NONE",
            AuthMode::Oauth1 => "OAUTH1",
            AuthMode::Oauth2 => "OAUTH2",
            AuthMode::Oauth2Cc => "OAUTH2_CC",
            AuthMode::App => "APP",
            AuthMode::Custom => "CUSTOM",
            AuthMode::AppStore => "APP_STORE",
            AuthMode::Basic => "BASIC",
            AuthMode::ApiKey => "API_KEY",
            AuthMode::Jwt => "JWT",
            AuthMode::Signature => "SIGNATURE",
            AuthMode::Tba => "TBA",
            AuthMode::Tableau => "TABLEAU",
            AuthMode::TwoStep => "TWO_STEP",
            AuthMode::Bill => "BILL",
        }
    }

    pub fn from_str_value(value: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRequestAuthMethod {
    Basic,
    Body,
}

impl Default for TokenRequestAuthMethod {
    fn default() -> Self {
        TokenRequestAuthMethod::Body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    Form,
    Json,
}

impl Default for BodyFormat {
    fn default() -> Self {
        BodyFormat::Form
    }
}

/// A read-only probe issued right after a new non-OAuth credential is minted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationProbe {
    pub method: String,
    pub endpoint: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub base_url_override: Option<String>,
}

/// Declarative, immutable metadata describing how to talk to one third-party
/// API. Loaded from the provider registry; never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub auth_mode: AuthMode,

    pub authorization_url: Option<String>,
    pub token_url: Option<String>,
    pub refresh_url: Option<String>,
    /// OAUTH1-only: the access-token-exchange endpoint, distinct from
    /// `token_url` (the request-token endpoint). OAUTH2 providers never set
    /// this; `refresh_url` is their equivalent post-authorization endpoint.
    pub access_token_url: Option<String>,

    #[serde(default)]
    pub authorization_params: HashMap<String, String>,
    #[serde(default)]
    pub token_params: HashMap<String, String>,
    #[serde(default)]
    pub refresh_params: HashMap<String, String>,
    #[serde(default)]
    pub authorization_url_replacements: HashMap<String, String>,

    #[serde(default)]
    pub token_url_encode: bool,
    #[serde(default)]
    pub authorization_url_encode: bool,
    #[serde(default)]
    pub disable_pkce: bool,
    #[serde(default)]
    pub authorization_url_fragment: bool,

    #[serde(default)]
    pub token_request_auth_method: TokenRequestAuthMethod,
    #[serde(default)]
    pub body_format: BodyFormat,
    pub scope_separator: Option<String>,

    pub verification: Option<VerificationProbe>,
    pub webhook_routing_script: Option<String>,
}

impl Provider {
    pub fn scope_separator(&self) -> &str {
        self.scope_separator.as_deref().unwrap_or(" ")
    }
}

/// Tenant-scoped binding of a provider descriptor to concrete client
/// credentials, keyed within an environment by `provider_config_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub provider_config_key: String,
    pub provider: String,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub oauth_scopes: Option<String>,
    pub app_link: Option<String>,
    #[serde(default)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl IntegrationConfig {
    pub fn scopes_vec(&self) -> Vec<String> {
        self.oauth_scopes
            .as_deref()
            .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
            .unwrap_or_default()
    }
}
