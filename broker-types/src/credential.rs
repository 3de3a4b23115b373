use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sealed tagged union over every credential shape the broker can mint.
/// Serialized to/from the connection store with an explicit `type`
/// discriminator so storage never has to guess the auth mode back out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Credentials {
    Oauth2 {
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        #[serde(default)]
        raw: serde_json::Value,
        #[serde(default)]
        config_override: Option<ConfigOverride>,
    },
    Oauth1 {
        oauth_token: String,
        oauth_token_secret: String,
    },
    ApiKey {
        api_key: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Jwt {
        #[serde(default)]
        fields: HashMap<String, serde_json::Value>,
    },
    Signature {
        #[serde(default)]
        fields: HashMap<String, serde_json::Value>,
    },
    Tba {
        #[serde(default)]
        fields: HashMap<String, serde_json::Value>,
    },
    Tableau {
        #[serde(default)]
        fields: HashMap<String, serde_json::Value>,
    },
    TwoStep {
        #[serde(default)]
        fields: HashMap<String, serde_json::Value>,
    },
    Bill {
        #[serde(default)]
        fields: HashMap<String, serde_json::Value>,
    },
    AppStore {
        #[serde(default)]
        fields: HashMap<String, serde_json::Value>,
    },
}

/// Client id/secret overrides supplied at `start` time which must survive
/// every subsequent refresh cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOverride {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Credentials {
    pub fn is_expired(&self, skew: chrono::Duration) -> bool {
        match self {
            Credentials::Oauth2 { expires_at, .. } => match expires_at {
                Some(at) => Utc::now() + skew >= *at,
                None => false,
            },
            _ => false,
        }
    }

    pub fn needs_refresh(&self, skew: chrono::Duration) -> bool {
        match self {
            Credentials::Oauth2 {
                refresh_token,
                expires_at,
                ..
            } => refresh_token.is_some() && (expires_at.is_none() || self.is_expired(skew)),
            _ => false,
        }
    }

    pub fn refresh_token(&self) -> Option<&str> {
        match self {
            Credentials::Oauth2 { refresh_token, .. } => refresh_token.as_deref(),
            _ => None,
        }
    }
}
