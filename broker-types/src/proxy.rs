use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::BrokerError;

/// A minimal request description the verification prober and the outer
/// downstream proxy both understand. The proxy's retry/pagination/rate-limit
/// policy lives outside the core; this trait is the seam.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
}

impl ProxyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, BrokerError>;
}
