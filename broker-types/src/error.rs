use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes returned across the HTTP surface, the CLI, and outbound
/// webhooks. Every variant maps to exactly one of these on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingHmac,
    InvalidHmac,
    MissingConnection,
    UnknownProviderConfig,
    UnknownProviderTemplate,
    InvalidAuthMode,
    InvalidConnectionConfig,
    UnknownGrantType,
    InvalidCallbackOauth2,
    InvalidCallbackOauth1,
    InvalidState,
    TokenExternalError,
    TokenParsingError,
    RefreshTokenExternalError,
    RefreshTokenParsingError,
    ConnectionTestFailed,
    UpstreamTimeout,
    Oauth2CcError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingHmac => "missing_hmac",
            ErrorCode::InvalidHmac => "invalid_hmac",
            ErrorCode::MissingConnection => "missing_connection",
            ErrorCode::UnknownProviderConfig => "unknown_provider_config",
            ErrorCode::UnknownProviderTemplate => "unknown_provider_template",
            ErrorCode::InvalidAuthMode => "invalid_auth_mode",
            ErrorCode::InvalidConnectionConfig => "invalid_connection_config",
            ErrorCode::UnknownGrantType => "unknown_grant_type",
            ErrorCode::InvalidCallbackOauth2 => "invalid_callback_oauth2",
            ErrorCode::InvalidCallbackOauth1 => "invalid_callback_oauth1",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::TokenExternalError => "token_external_error",
            ErrorCode::TokenParsingError => "token_parsing_error",
            ErrorCode::RefreshTokenExternalError => "refresh_token_external_error",
            ErrorCode::RefreshTokenParsingError => "refresh_token_parsing_error",
            ErrorCode::ConnectionTestFailed => "connection_test_failed",
            ErrorCode::UpstreamTimeout => "upstream_timeout",
            ErrorCode::Oauth2CcError => "oauth2_cc_error",
            ErrorCode::UnknownError => "unknown_error",
        }
    }
}

/// The single error type returned by every public entry point of the broker.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct BrokerError {
    pub code: ErrorCode,
    pub message: String,
}

impl BrokerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn missing_connection(connection_id: &str) -> Self {
        Self::new(
            ErrorCode::MissingConnection,
            format!("no connection found for '{connection_id}'"),
        )
    }

    pub fn unknown_provider_config(key: &str) -> Self {
        Self::new(
            ErrorCode::UnknownProviderConfig,
            format!("no integration configured for provider config key '{key}'"),
        )
    }

    pub fn invalid_connection_config(template: &str, missing: &[String]) -> Self {
        Self::new(
            ErrorCode::InvalidConnectionConfig,
            format!("template '{template}' is missing connection config keys: {missing:?}"),
        )
    }

    pub fn invalid_state() -> Self {
        Self::new(
            ErrorCode::InvalidState,
            "session not found, already consumed, or expired",
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrokerError::new(ErrorCode::UpstreamTimeout, err.to_string())
        } else {
            BrokerError::new(ErrorCode::TokenExternalError, err.to_string())
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::new(ErrorCode::TokenParsingError, err.to_string())
    }
}

impl From<url::ParseError> for BrokerError {
    fn from(err: url::ParseError) -> Self {
        BrokerError::new(ErrorCode::InvalidConnectionConfig, err.to_string())
    }
}
