use async_trait::async_trait;
use broker_types::{BrokerError, ProxyClient, ProxyRequest, ProxyResponse};

/// Issues the verification prober's read-only probe over a plain
/// `reqwest::Client`. The downstream data proxy's retry/rate-limit policy is
/// out of scope here; this is the seam the core calls through.
pub struct ReqwestProxyClient {
    http: reqwest::Client,
}

impl ReqwestProxyClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProxyClient for ReqwestProxyClient {
    async fn send(&self, request: ProxyRequest) -> Result<ProxyResponse, BrokerError> {
        let method = request
            .method
            .parse::<reqwest::Method>()
            .unwrap_or(reqwest::Method::GET);
        let mut builder = self.http.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        let response = builder.send().await?;
        Ok(ProxyResponse {
            status: response.status().as_u16(),
        })
    }
}
