//! Shared HTTP plumbing for the provider gateway adapters: one JSON POST
//! with bearer auth and a per-request timeout, plus outcome classification.

use std::time::Duration;

use super::SendError;

#[derive(Clone)]
pub struct Gateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl Gateway {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            timeout,
        }
    }

    /// POST the request body and return the parsed JSON response.
    /// HTTP 408/429/5xx and transport-level timeouts classify as retryable,
    /// all other non-success statuses as terminal.
    pub async fn post_json(
        &self,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| SendError::Retryable(format!("Malformed gateway response: {}", e)))
        } else {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("Gateway returned {}: {}", status.as_u16(), detail);
            if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
                Err(SendError::Retryable(message))
            } else {
                Err(SendError::Terminal(message))
            }
        }
    }
}

fn classify_transport_error(e: reqwest::Error) -> SendError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SendError::Retryable(format!("Transport failure: {}", e))
    } else {
        SendError::Terminal(format!("Request could not be built: {}", e))
    }
}

/// Pull a message id out of a gateway response, falling back to a local id
/// when the provider omits one.
pub fn message_id(response: &serde_json::Value, field: &str) -> String {
    response
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Whether the gateway confirmed delivery in its synchronous response.
pub fn confirmed(response: &serde_json::Value) -> bool {
    response
        .get("status")
        .and_then(|v| v.as_str())
        .map(|s| s.eq_ignore_ascii_case("delivered"))
        .unwrap_or(false)
}
