//! Per-message cost accounting.
//!
//! A send is charged once any attempt was transmitted to the provider,
//! regardless of the final delivery status. SMS is billed per segment;
//! the other channels are flat per message.

use crate::config::CostConfig;
use crate::services::channels::{Channel, ChannelPayload};

/// Single-segment GSM limit; concatenated messages lose 7 octets of each
/// segment to the user-data header.
const SMS_SINGLE_SEGMENT: usize = 160;
const SMS_CONCAT_SEGMENT: usize = 153;

#[derive(Debug, Clone)]
pub struct CostTable {
    sms_unit: f64,
    whatsapp_unit: f64,
    email_unit: f64,
    push_unit: f64,
}

impl CostTable {
    pub fn from_config(cfg: &CostConfig) -> Self {
        Self {
            sms_unit: cfg.sms_unit,
            whatsapp_unit: cfg.whatsapp_unit,
            email_unit: cfg.email_unit,
            push_unit: cfg.push_unit,
        }
    }

    /// Cost of one transmitted message with the given rendered payload.
    pub fn message_cost(&self, payload: &ChannelPayload) -> f64 {
        match payload.channel() {
            Channel::Sms => self.sms_unit * sms_segments(payload.body()) as f64,
            Channel::Whatsapp => self.whatsapp_unit,
            Channel::Email => self.email_unit,
            Channel::Push => self.push_unit,
        }
    }
}

/// Number of SMS segments for a rendered body. Counted in characters, which
/// matches the GSM-7 limits for the plain-ASCII bodies the templates produce.
pub fn sms_segments(body: &str) -> u32 {
    let len = body.chars().count();
    if len == 0 {
        1
    } else if len <= SMS_SINGLE_SEGMENT {
        1
    } else {
        len.div_ceil(SMS_CONCAT_SEGMENT) as u32
    }
}
