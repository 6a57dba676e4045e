//! Delivery channels: the closed channel set, channel-shaped payloads and
//! the adapter contract every provider gateway implements.

pub mod email;
pub mod gateway;
pub mod push;
pub mod sms;
pub mod whatsapp;

pub use email::EmailAdapter;
pub use push::PushAdapter;
pub use sms::SmsAdapter;
pub use whatsapp::WhatsappAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A delivery transport with its own provider and cost. The set is closed:
/// unknown channel keys are rejected at the settings-load boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Whatsapp,
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Sms, Channel::Whatsapp, Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Whatsapp => "whatsapp",
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl std::str::FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Channel::Sms),
            "whatsapp" => Ok(Channel::Whatsapp),
            "email" => Ok(Channel::Email),
            "push" => Ok(Channel::Push),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// Rendered message in the shape the channel's provider expects.
/// SMS/WhatsApp are body-only; email and push carry a subject/title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPayload {
    Sms { body: String },
    Whatsapp { body: String },
    Email { subject: String, body: String },
    Push { title: String, body: String },
}

impl ChannelPayload {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelPayload::Sms { .. } => Channel::Sms,
            ChannelPayload::Whatsapp { .. } => Channel::Whatsapp,
            ChannelPayload::Email { .. } => Channel::Email,
            ChannelPayload::Push { .. } => Channel::Push,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            ChannelPayload::Sms { body }
            | ChannelPayload::Whatsapp { body }
            | ChannelPayload::Email { body, .. }
            | ChannelPayload::Push { body, .. } => body,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            ChannelPayload::Email { subject, .. } => Some(subject),
            ChannelPayload::Push { title, .. } => Some(title),
            _ => None,
        }
    }
}

/// Provider acknowledgement for one accepted send.
#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    pub provider_message_id: String,
    /// Whether the gateway confirmed delivery synchronously. Confirmed sends
    /// finalize as `delivered`, accepted-but-unconfirmed as `sent`.
    pub confirmed: bool,
}

/// Typed send outcome classification consumed by the retry controller.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Transient: timeout, connection failure, 408/429/5xx. Retried.
    #[error("Retryable provider failure: {0}")]
    Retryable(String),

    /// Permanent provider rejection (auth error, rejected payload). Never
    /// retried; the attempt did reach the provider.
    #[error("Terminal provider failure: {0}")]
    Terminal(String),

    /// Rejected before anything was transmitted (locally invalid address).
    /// Never retried and never charged.
    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),
}

/// One provider gateway. All four channels expose this identical contract;
/// the orchestrator never sees a provider wire API.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(
        &self,
        address: &str,
        payload: &ChannelPayload,
    ) -> Result<ProviderReceipt, SendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn channel_names_round_trip() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_str(channel.as_str()).unwrap(), channel);
        }
        assert!(Channel::from_str("telegram").is_err());
    }

    #[test]
    fn payload_shape_matches_channel() {
        let sms = ChannelPayload::Sms {
            body: "hello".to_string(),
        };
        assert_eq!(sms.channel(), Channel::Sms);
        assert!(sms.title().is_none());

        let email = ChannelPayload::Email {
            subject: "Fee due".to_string(),
            body: "hello".to_string(),
        };
        assert_eq!(email.channel(), Channel::Email);
        assert_eq!(email.title(), Some("Fee due"));
    }
}
