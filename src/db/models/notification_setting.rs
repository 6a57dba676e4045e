use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-tenant channel preferences for one notification type (+ sub key).
///
/// `channels` holds a JSON map of channel -> {enabled, locked}; it is parsed
/// through the typed `ChannelRuleSet` at the settings-load boundary so
/// unknown channel keys are rejected there, not at use sites.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OrganizationNotificationSetting {
    pub id: String,
    pub organization_id: String,
    pub notification_type: String,
    /// Empty string when the type has no sub key.
    pub sub_key: String,
    pub channels: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
