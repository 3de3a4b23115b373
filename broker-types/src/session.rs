use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::provider::AuthMode;

/// Short-lived record binding a redirect-based handshake to the request that
/// started it. `id` doubles as the OAuth `state` parameter; this is the
/// single correctness anchor for replay protection (§4.3/§4.6 of the design).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSession {
    pub id: String,
    pub environment_id: String,
    pub provider_config_key: String,
    pub provider: String,
    pub auth_mode: AuthMode,
    pub connection_id: String,
    pub callback_url: String,
    pub code_verifier: Option<String>,
    pub connection_config: HashMap<String, serde_json::Value>,
    pub web_socket_client_id: Option<String>,
    pub activity_log_id: String,
    pub request_token_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OAuthSession {
    pub fn is_expired(&self, max_age: chrono::Duration) -> bool {
        Utc::now() - self.created_at > max_age
    }
}

/// 48 random hex bytes, per the spec's PKCE code-verifier shape.
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `code_challenge = base64url(sha256(verifier))`, no padding, method S256.
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_verifier_is_96_hex_chars() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 96);
        assert!(verifier.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn challenge_is_deterministic_and_unpadded() {
        let challenge = pkce_challenge("abc");
        assert_eq!(challenge, pkce_challenge("abc"));
        assert!(!challenge.contains('='));
    }
}
