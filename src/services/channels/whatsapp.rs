use std::time::Duration;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::services::channels::gateway::{confirmed, message_id, Gateway};
use crate::services::channels::{
    Channel, ChannelAdapter, ChannelPayload, ProviderReceipt, SendError,
};

/// WhatsApp Business gateway adapter. Addresses are phone numbers; the
/// gateway wraps the body in a text message object.
pub struct WhatsappAdapter {
    gateway: Gateway,
}

impl WhatsappAdapter {
    pub fn new(config: &GatewayConfig, timeout: Duration) -> Self {
        tracing::info!("WhatsApp gateway configured: {}", config.endpoint);
        Self {
            gateway: Gateway::new(config.endpoint.clone(), config.api_key.clone(), timeout),
        }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsappAdapter {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send(
        &self,
        address: &str,
        payload: &ChannelPayload,
    ) -> Result<ProviderReceipt, SendError> {
        let ChannelPayload::Whatsapp { body } = payload else {
            return Err(SendError::Terminal(
                "WhatsApp adapter received a non-WhatsApp payload".to_string(),
            ));
        };
        let digits = address.strip_prefix('+').unwrap_or(address);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(SendError::InvalidAddress(format!(
                "Not a phone number: {}",
                address
            )));
        }

        let request = serde_json::json!({
            "to": address,
            "type": "text",
            "text": { "body": body },
        });

        let response = self.gateway.post_json(&request).await?;
        tracing::debug!("WhatsApp message accepted for {}", address);
        Ok(ProviderReceipt {
            provider_message_id: message_id(&response, "message_id"),
            confirmed: confirmed(&response),
        })
    }
}
