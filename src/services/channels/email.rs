use std::time::Duration;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::services::channels::gateway::{confirmed, message_id, Gateway};
use crate::services::channels::{
    Channel, ChannelAdapter, ChannelPayload, ProviderReceipt, SendError,
};

/// Transactional email gateway adapter. Sends subject + body from a
/// configured from-address.
pub struct EmailAdapter {
    gateway: Gateway,
    from_address: String,
}

impl EmailAdapter {
    pub fn new(config: &GatewayConfig, timeout: Duration) -> Self {
        tracing::info!("Email gateway configured: {}", config.endpoint);
        Self {
            gateway: Gateway::new(config.endpoint.clone(), config.api_key.clone(), timeout),
            from_address: config
                .sender
                .clone()
                .unwrap_or_else(|| "noreply@school-notify.local".to_string()),
        }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        address: &str,
        payload: &ChannelPayload,
    ) -> Result<ProviderReceipt, SendError> {
        let ChannelPayload::Email { subject, body } = payload else {
            return Err(SendError::Terminal(
                "Email adapter received a non-email payload".to_string(),
            ));
        };
        // Minimal local sanity check; full address validation is the
        // provider's job.
        if !address.contains('@') || address.starts_with('@') || address.ends_with('@') {
            return Err(SendError::InvalidAddress(format!(
                "Not an email address: {}",
                address
            )));
        }

        let request = serde_json::json!({
            "from": self.from_address,
            "to": address,
            "subject": subject,
            "text": body,
        });

        let response = self.gateway.post_json(&request).await?;
        tracing::debug!("Email accepted for {}", address);
        Ok(ProviderReceipt {
            provider_message_id: message_id(&response, "id"),
            confirmed: confirmed(&response),
        })
    }
}
