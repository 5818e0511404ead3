//! Transaction backend
//!
//! The order/transaction store is only reachable through these calls. All
//! action calls are idempotent from the caller's side: retrying after a
//! transport failure is safe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::ApiError;
use super::redirect::PageSource;
use super::types::{PaymentInitiation, PaymentMethod, TransactionId, TransactionRecord};

#[async_trait]
pub trait TransactionApi: Send + Sync {
    async fn get_transaction(&self, id: &TransactionId) -> Result<TransactionRecord, ApiError>;

    async fn confirm_arrival(&self, id: &TransactionId) -> Result<(), ApiError>;

    /// GATEWAY returns the payment URL, CASH a confirmation message
    async fn process_payment(
        &self,
        id: &TransactionId,
        method: PaymentMethod,
    ) -> Result<PaymentInitiation, ApiError>;

    async fn start_swap(&self, id: &TransactionId) -> Result<(), ApiError>;

    async fn complete_swap(&self, id: &TransactionId) -> Result<(), ApiError>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Standard backend response envelope
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessPaymentRequest<'a> {
    transaction_id: &'a str,
    method: PaymentMethod,
}

#[derive(Debug, Clone)]
pub struct HttpTransactionApi {
    client: Client,
    base_url: Url,
}

impl HttpTransactionApi {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    /// Base URL plus path segments; each segment is percent-encoded, so an
    /// id containing `/`, `?` or `#` stays one segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ApiError::Transport(format!("Base URL cannot hold a path: {}", self.base_url))
            })?
            // Keep any path prefix of the base (e.g. `/api`)
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        id: &TransactionId,
    ) -> Result<Option<T>, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(id.to_string()));
        }

        match serde_json::from_str::<ApiEnvelope<T>>(&text) {
            Ok(envelope) if status.is_success() && envelope.success => Ok(envelope.data),
            Ok(envelope) => {
                let message = envelope
                    .message
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
                Err(ApiError::Rejected(message))
            }
            Err(e) if status.is_success() => {
                warn!(error = %e, "Undecodable backend response");
                Err(ApiError::Decode(e.to_string()))
            }
            Err(_) => Err(ApiError::Transport(format!("HTTP {}", status.as_u16()))),
        }
    }

    async fn post_action(&self, id: &TransactionId, action: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["transactions", id.as_str(), action])?;
        let response = self.client.post(url).send().await?;
        Self::decode::<serde_json::Value>(response, id).await?;
        debug!(transaction_id = %id, action, "Action accepted");
        Ok(())
    }
}

#[async_trait]
impl TransactionApi for HttpTransactionApi {
    #[instrument(skip(self), fields(transaction_id = %id))]
    async fn get_transaction(&self, id: &TransactionId) -> Result<TransactionRecord, ApiError> {
        let url = self.endpoint(&["transactions", id.as_str()])?;
        let response = self.client.get(url).send().await?;
        Self::decode::<TransactionRecord>(response, id)
            .await?
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    #[instrument(skip(self), fields(transaction_id = %id))]
    async fn confirm_arrival(&self, id: &TransactionId) -> Result<(), ApiError> {
        self.post_action(id, "confirm-arrival").await
    }

    #[instrument(skip(self), fields(transaction_id = %id))]
    async fn process_payment(
        &self,
        id: &TransactionId,
        method: PaymentMethod,
    ) -> Result<PaymentInitiation, ApiError> {
        let url = self.endpoint(&["payments", "process"])?;
        let body = ProcessPaymentRequest {
            transaction_id: id.as_str(),
            method,
        };
        let response = self.client.post(url).json(&body).send().await?;
        Ok(Self::decode::<PaymentInitiation>(response, id)
            .await?
            .unwrap_or_default())
    }

    #[instrument(skip(self), fields(transaction_id = %id))]
    async fn start_swap(&self, id: &TransactionId) -> Result<(), ApiError> {
        self.post_action(id, "start-swap").await
    }

    #[instrument(skip(self), fields(transaction_id = %id))]
    async fn complete_swap(&self, id: &TransactionId) -> Result<(), ApiError> {
        self.post_action(id, "complete-swap").await
    }
}

/// Fetches the rendered body of a page over HTTP
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
    url: Url,
}

impl HttpPageSource {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn body(&self) -> Result<String, ApiError> {
        let response = self.client.get(self.url.clone()).send().await?;
        Ok(response.text().await?)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_prefix() {
        let api = HttpTransactionApi::new(
            Url::parse("http://localhost:8080/api/").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            api.endpoint(&["transactions", "TX-1", "start-swap"]).unwrap().as_str(),
            "http://localhost:8080/api/transactions/TX-1/start-swap"
        );
    }

    #[test]
    fn test_endpoint_encodes_reserved_id_characters() {
        let api = HttpTransactionApi::new(
            Url::parse("http://localhost:8080/api").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap();
        let url = api.endpoint(&["transactions", "A/B?c#d", "confirm-arrival"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/transactions/A%2FB%3Fc%23d/confirm-arrival"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_envelope_defaults() {
        let env: ApiEnvelope<PaymentInitiation> =
            serde_json::from_str(r#"{"data":{"paymentUrl":"https://gw/pay"}}"#).unwrap();
        assert!(env.success);
        assert_eq!(
            env.data.unwrap().payment_url.as_deref(),
            Some("https://gw/pay")
        );

        let env: ApiEnvelope<serde_json::Value> =
            serde_json::from_str(r#"{"success":false,"message":"Battery not ready"}"#).unwrap();
        assert!(!env.success);
        assert_eq!(env.message.as_deref(), Some("Battery not ready"));
    }

    #[test]
    fn test_process_payment_body() {
        let body = ProcessPaymentRequest {
            transaction_id: "TX-1",
            method: PaymentMethod::Gateway,
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"transactionId":"TX-1","method":"GATEWAY"}"#
        );
    }
}
