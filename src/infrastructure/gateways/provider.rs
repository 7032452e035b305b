use crate::domain::ports::{ProviderApi, ProviderRefundRequest, SessionRequest, SessionResponse};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// How requests to a provider's merchant API are authenticated.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderAuth {
    /// Sent verbatim as the `Authorization` header.
    Header(String),
    /// Sent under a provider-specific header name.
    Named { header: String, value: String },
    None,
}

/// Merchant API client for a single provider.
///
/// Sessions are created with `POST {base_url}/sessions` and refunds with
/// `POST {base_url}/refunds`; any non-2xx answer is an upstream failure.
pub struct HttpProviderApi {
    client: Client,
    base_url: String,
    auth: ProviderAuth,
}

impl HttpProviderApi {
    pub fn new(base_url: impl Into<String>, auth: ProviderAuth) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, auth))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, auth: ProviderAuth) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<serde_json::Value> {
        let url = format!("{}/{path}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        request = match &self.auth {
            ProviderAuth::Header(value) => request.header(AUTHORIZATION, value),
            ProviderAuth::Named { header, value } => request.header(header.as_str(), value),
            ProviderAuth::None => request,
        };

        debug!(%url, "calling provider");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%url, %status, "provider rejected request");
            return Err(EngineError::Upstream(format!("{url} answered {status}: {text}")));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ProviderApi for HttpProviderApi {
    async fn register_session(&self, request: &SessionRequest) -> Result<SessionResponse> {
        let body = self.post("sessions", request).await?;
        let mut session: SessionResponse = serde_json::from_value(body.clone())
            .map_err(|e| EngineError::Upstream(format!("malformed session response: {e}")))?;
        if session.raw.is_null() {
            session.raw = body;
        }
        Ok(session)
    }

    async fn refund(&self, request: &ProviderRefundRequest) -> Result<serde_json::Value> {
        self.post("refunds", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let api = HttpProviderApi::new("https://api.example.test/v1/", ProviderAuth::None).unwrap();
        assert_eq!(api.base_url, "https://api.example.test/v1");
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_upstream_error() {
        let api = HttpProviderApi::new("http://127.0.0.1:1", ProviderAuth::None).unwrap();
        let request = ProviderRefundRequest {
            method: crate::domain::payment::PaymentMethod::Card,
            payment_id: 1,
            external_id: None,
            amount_minor: 100,
        };
        assert!(matches!(
            api.refund(&request).await,
            Err(EngineError::Upstream(_))
        ));
    }
}
