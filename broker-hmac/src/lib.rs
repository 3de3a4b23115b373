//! Secret-keyed HMAC guard for non-OAuth connect endpoints.
//!
//! Canonicalization: `HMAC-SHA256(secret, providerConfigKey || connectionId)`,
//! hex-encoded, compared in constant time so a caller probing the guard
//! cannot learn anything from response latency.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacVerdict {
    Missing,
    Invalid,
    Valid,
}

/// Computes the hex-encoded digest the caller is expected to supply.
pub fn sign(secret: &str, provider_config_key: &str, connection_id: Option<&str>) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(provider_config_key.as_bytes());
    mac.update(connection_id.unwrap_or("").as_bytes());
    hex_encode(&mac.finalize().into_bytes())
}

/// Verifies a caller-supplied hex digest against the expected one.
/// `None` means the tenant sent no `hmac` parameter at all.
pub fn verify(
    secret: &str,
    provider_config_key: &str,
    connection_id: Option<&str>,
    supplied: Option<&str>,
) -> HmacVerdict {
    let Some(supplied) = supplied else {
        return HmacVerdict::Missing;
    };

    let expected = sign(secret, provider_config_key, connection_id);
    let expected_bytes = expected.as_bytes();
    let supplied_bytes = supplied.as_bytes();

    if expected_bytes.len() != supplied_bytes.len() {
        return HmacVerdict::Invalid;
    }

    if expected_bytes.ct_eq(supplied_bytes).into() {
        HmacVerdict::Valid
    } else {
        HmacVerdict::Invalid
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let digest = sign("secret", "github", Some("conn-1"));
        assert_eq!(
            verify("secret", "github", Some("conn-1"), Some(&digest)),
            HmacVerdict::Valid
        );
    }

    #[test]
    fn missing_param_is_distinct_from_invalid() {
        assert_eq!(
            verify("secret", "github", Some("conn-1"), None),
            HmacVerdict::Missing
        );
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let digest = sign("secret", "github", Some("conn-1"));
        assert_eq!(
            verify("other", "github", Some("conn-1"), Some(&digest)),
            HmacVerdict::Invalid
        );
    }

    #[test]
    fn absent_connection_id_is_distinct_input() {
        let with_conn = sign("secret", "github", Some("conn-1"));
        let without_conn = sign("secret", "github", None);
        assert_ne!(with_conn, without_conn);
    }
}
