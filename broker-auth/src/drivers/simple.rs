use std::collections::HashMap;

use broker_types::{AuthMode, BrokerError, Credentials, ErrorCode};
use serde_json::Value;

use crate::drivers::ExchangeOutcome;

/// Non-redirect auth modes take a credential body synchronously and mint a
/// connection directly, with no session and no provider round-trip beyond
/// the verification probe the engine runs afterwards.
pub fn build_credentials(
    auth_mode: AuthMode,
    body: &HashMap<String, Value>,
) -> Result<ExchangeOutcome, BrokerError> {
    let field = |name: &str| -> Result<String, BrokerError> {
        body.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                BrokerError::new(
                    ErrorCode::InvalidConnectionConfig,
                    format!("missing required field '{name}' for this auth mode"),
                )
            })
    };

    let credentials = match auth_mode {
        AuthMode::ApiKey => Credentials::ApiKey {
            api_key: field("api_key")?,
        },
        AuthMode::Basic => Credentials::Basic {
            username: field("username")?,
            password: field("password")?,
        },
        AuthMode::Jwt => Credentials::Jwt {
            fields: body.clone(),
        },
        AuthMode::Signature => Credentials::Signature {
            fields: body.clone(),
        },
        AuthMode::Tba => Credentials::Tba {
            fields: body.clone(),
        },
        AuthMode::Tableau => Credentials::Tableau {
            fields: body.clone(),
        },
        AuthMode::TwoStep => Credentials::TwoStep {
            fields: body.clone(),
        },
        AuthMode::Bill => Credentials::Bill {
            fields: body.clone(),
        },
        other => {
            return Err(BrokerError::new(
                ErrorCode::InvalidAuthMode,
                format!("{other:?} is not a non-redirect auth mode"),
            ))
        }
    };

    Ok(ExchangeOutcome {
        credentials,
        token_metadata: HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_key_requires_field() {
        let body: HashMap<String, Value> = HashMap::new();
        assert!(build_credentials(AuthMode::ApiKey, &body).is_err());
    }

    #[test]
    fn api_key_builds_credential() {
        let mut body = HashMap::new();
        body.insert("api_key".to_string(), json!("sk-abc"));
        let outcome = build_credentials(AuthMode::ApiKey, &body).unwrap();
        match outcome.credentials {
            Credentials::ApiKey { api_key } => assert_eq!(api_key, "sk-abc"),
            _ => panic!("wrong variant"),
        }
    }
}
