use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Durable record of one (recipient, channel) delivery.
///
/// Created in `pending` before the adapter call; after creation only
/// `status`, `error_message`, `cost`, `sent_at` and `is_read` change.
/// The dispatch engine is the only writer; the feed UI reads entries and
/// toggles `is_read`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: String,
    pub organization_id: String,
    pub recipient_id: String,
    pub notification_type: String,
    /// Empty string when the notification type has no sub key.
    pub sub_key: String,
    pub channel: String,
    pub title: Option<String>,
    pub message: String,
    pub status: String,
    pub error_message: Option<String>,
    pub cost: f64,
    /// Dedup lookup key; unique per organization, never the primary key.
    pub idempotency_key: String,
    pub sent_at: Option<NaiveDateTime>,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateNotificationLog {
    pub organization_id: String,
    pub recipient_id: String,
    pub notification_type: String,
    pub sub_key: String,
    pub channel: String,
    pub title: Option<String>,
    pub message: String,
    pub idempotency_key: String,
}

/// Log entry status machine:
/// `pending -> sent -> delivered`, `pending|sent -> failed`.
/// `delivered` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        match (self, next) {
            (DeliveryStatus::Pending, DeliveryStatus::Sent)
            | (DeliveryStatus::Pending, DeliveryStatus::Delivered)
            | (DeliveryStatus::Pending, DeliveryStatus::Failed)
            | (DeliveryStatus::Sent, DeliveryStatus::Delivered)
            | (DeliveryStatus::Sent, DeliveryStatus::Failed) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_do_not_transition() {
        for next in [
            DeliveryStatus::Pending,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
        ] {
            assert!(!DeliveryStatus::Delivered.can_transition_to(next));
            assert!(!DeliveryStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn pending_may_fail_directly() {
        // A synchronously throwing adapter call finalizes pending -> failed.
        assert!(DeliveryStatus::Pending.can_transition_to(DeliveryStatus::Failed));
        assert!(DeliveryStatus::Pending.can_transition_to(DeliveryStatus::Sent));
        assert!(!DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Pending));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in ["pending", "sent", "delivered", "failed"] {
            assert_eq!(DeliveryStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(DeliveryStatus::parse("expired").is_none());
    }
}
