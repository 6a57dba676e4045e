use std::time::Duration;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::services::channels::gateway::{message_id, Gateway};
use crate::services::channels::{
    Channel, ChannelAdapter, ChannelPayload, ProviderReceipt, SendError,
};

/// Push notification gateway adapter. Addresses are device tokens; push
/// providers give no synchronous delivery confirmation, so receipts always
/// finalize as `sent`.
pub struct PushAdapter {
    gateway: Gateway,
}

impl PushAdapter {
    pub fn new(config: &GatewayConfig, timeout: Duration) -> Self {
        tracing::info!("Push gateway configured: {}", config.endpoint);
        Self {
            gateway: Gateway::new(config.endpoint.clone(), config.api_key.clone(), timeout),
        }
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(
        &self,
        address: &str,
        payload: &ChannelPayload,
    ) -> Result<ProviderReceipt, SendError> {
        let ChannelPayload::Push { title, body } = payload else {
            return Err(SendError::Terminal(
                "Push adapter received a non-push payload".to_string(),
            ));
        };
        if address.trim().is_empty() {
            return Err(SendError::InvalidAddress("Empty device token".to_string()));
        }

        let request = serde_json::json!({
            "token": address,
            "notification": { "title": title, "body": body },
        });

        let response = self.gateway.post_json(&request).await?;
        tracing::debug!("Push notification accepted for device token");
        Ok(ProviderReceipt {
            provider_message_id: message_id(&response, "id"),
            confirmed: false,
        })
    }
}
