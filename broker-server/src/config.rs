use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{anyhow, Context, Result};
use url::{Position, Url};

/// Process configuration, loaded once at startup from environment variables
/// (mirroring `cli-auth-server::CallbackConfig::from_env`). Absence of an
/// optional variable falls back to the documented default; absence of a
/// required one is a startup error, not a panic.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub encryption_key: String,
    pub server_url: Option<String>,
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub websockets_path: String,
    pub telemetry: bool,
    pub callback_config: CallbackConfig,
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let encryption_key = std::env::var("NANGO_ENCRYPTION_KEY")
            .context("NANGO_ENCRYPTION_KEY must be set to a 32-byte base64 key")?;
        let server_url = std::env::var("NANGO_SERVER_URL").ok();
        let database_url = std::env::var("NANGO_DB_URL")
            .unwrap_or_else(|_| "broker.sqlite".to_string());

        let port: u16 = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3003);
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        if !matches!(log_level.as_str(), "debug" | "info" | "warn" | "error") {
            return Err(anyhow!(
                "LOG_LEVEL must be one of debug, info, warn, error; got '{log_level}'"
            ));
        }

        let websockets_path =
            std::env::var("NANGO_SERVER_WEBSOCKETS_PATH").unwrap_or_else(|_| "/".to_string());

        let telemetry = std::env::var("TELEMETRY")
            .ok()
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let callback_config = match std::env::var("NANGO_CALLBACK_URL") {
            Ok(raw) if !raw.trim().is_empty() => CallbackConfig::from_raw(&raw)
                .map_err(|err| anyhow!("invalid NANGO_CALLBACK_URL: {err}"))?,
            _ => CallbackConfig::from_bind_addr(bind_addr),
        };

        Ok(Self {
            encryption_key,
            server_url,
            database_url,
            bind_addr,
            log_level,
            websockets_path,
            telemetry,
            callback_config,
        })
    }
}

/// Resolves the base URL the broker uses to build `callbackUrl` for a
/// `start` request that omits one.
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    pub bind_addr: SocketAddr,
    pub callback_base_url: String,
}

impl CallbackConfig {
    pub fn from_bind_addr(bind_addr: SocketAddr) -> Self {
        let callback_base_url = format!("http://{bind_addr}");
        Self {
            bind_addr,
            callback_base_url,
        }
    }

    pub fn callback_url(&self) -> String {
        format!("{}/oauth/callback", self.callback_base_url.trim_end_matches('/'))
    }

    fn from_raw(raw: &str) -> Result<Self, String> {
        let url = Url::parse(raw).map_err(|e| format!("failed to parse url '{raw}': {e}"))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err("callback URL must use http or https".to_string());
        }

        let host = url
            .host_str()
            .ok_or_else(|| "callback URL is missing a host".to_string())?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| "callback URL must include an explicit or well-known port".to_string())?;

        let base = url[..Position::BeforePath].trim_end_matches('/').to_string();
        let bind_ip = match host {
            "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
            _ => host
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))),
        };

        Ok(Self {
            bind_addr: SocketAddr::new(bind_ip, port),
            callback_base_url: base,
        })
    }
}
