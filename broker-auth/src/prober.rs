use std::sync::Arc;

use broker_types::{BrokerError, ErrorCode, Provider, ProxyClient, ProxyRequest};

/// Issues the provider's declared read-only probe through the downstream
/// proxy collaborator right after a new non-OAuth credential is minted.
pub struct VerificationProber {
    pub proxy: Arc<dyn ProxyClient>,
}

impl VerificationProber {
    pub async fn probe(&self, provider: &Provider, auth_header: &str) -> Result<(), BrokerError> {
        let Some(verification) = &provider.verification else {
            return Ok(());
        };

        let base = verification
            .base_url_override
            .clone()
            .unwrap_or_default();
        let url = format!("{base}{}", verification.endpoint);

        let mut headers = verification.headers.clone();
        headers.insert("Authorization".to_string(), auth_header.to_string());

        let response = self
            .proxy
            .send(ProxyRequest {
                method: verification.method.clone(),
                url,
                headers,
            })
            .await?;

        if response.is_success() {
            Ok(())
        } else {
            Err(BrokerError::new(
                ErrorCode::ConnectionTestFailed,
                format!("verification probe returned status {}", response.status),
            ))
        }
    }
}
