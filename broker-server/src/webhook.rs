use async_trait::async_trait;
use broker_types::{BrokerError, ErrorCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sends the outbound auth webhook described in the design's §6, signing the
/// JSON body with the tenant secret and carrying the digest in
/// `X-Nango-Signature`.
pub struct HttpWebhookSender {
    http: reqwest::Client,
    url: String,
    secret: String,
}

impl HttpWebhookSender {
    pub fn new(http: reqwest::Client, url: String, secret: String) -> Self {
        Self { http, url, secret }
    }

    fn sign(&self, body: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(body);
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

#[async_trait]
impl broker_types::WebhookSender for HttpWebhookSender {
    async fn send_auth_webhook(&self, payload: serde_json::Value) -> Result<(), BrokerError> {
        let body = serde_json::to_vec(&payload)?;
        let signature = self.sign(&body);

        let response = self
            .http
            .post(&self.url)
            .header("X-Nango-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BrokerError::new(
                ErrorCode::UnknownError,
                format!("webhook endpoint returned status {}", response.status()),
            ))
        }
    }
}
