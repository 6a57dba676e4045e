use std::time::Duration;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::services::channels::gateway::{confirmed, message_id, Gateway};
use crate::services::channels::{
    Channel, ChannelAdapter, ChannelPayload, ProviderReceipt, SendError,
};

/// SMS gateway adapter. Expects E.164-ish phone numbers and delivers the
/// body-only payload; the gateway bills per segment.
pub struct SmsAdapter {
    gateway: Gateway,
    sender_id: Option<String>,
}

impl SmsAdapter {
    pub fn new(config: &GatewayConfig, timeout: Duration) -> Self {
        tracing::info!("SMS gateway configured: {}", config.endpoint);
        Self {
            gateway: Gateway::new(config.endpoint.clone(), config.api_key.clone(), timeout),
            sender_id: config.sender.clone(),
        }
    }
}

fn valid_phone(address: &str) -> bool {
    let digits = address.strip_prefix('+').unwrap_or(address);
    digits.len() >= 8 && digits.len() <= 15 && digits.chars().all(|c| c.is_ascii_digit())
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(
        &self,
        address: &str,
        payload: &ChannelPayload,
    ) -> Result<ProviderReceipt, SendError> {
        let ChannelPayload::Sms { body } = payload else {
            return Err(SendError::Terminal(
                "SMS adapter received a non-SMS payload".to_string(),
            ));
        };
        if !valid_phone(address) {
            return Err(SendError::InvalidAddress(format!(
                "Not a phone number: {}",
                address
            )));
        }

        let request = serde_json::json!({
            "to": address,
            "from": self.sender_id,
            "text": body,
        });

        let response = self.gateway.post_json(&request).await?;
        tracing::debug!("SMS accepted for {}", address);
        Ok(ProviderReceipt {
            provider_message_id: message_id(&response, "message_id"),
            confirmed: confirmed(&response),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_validation() {
        assert!(valid_phone("+919876543210"));
        assert!(valid_phone("9876543210"));
        assert!(!valid_phone("not-a-number"));
        assert!(!valid_phone("+91"));
    }
}
