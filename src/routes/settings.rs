use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::db::repository::NotificationSettingsRepository;
use crate::error::{AppError, AppResult};
use crate::services::catalog::EventType;
use crate::services::channels::Channel;
use crate::services::defaults::default_rules;
use crate::services::preferences::{ChannelRule, ChannelRuleSet, PreferenceResolver};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_settings))
        .route("/:notification_type", put(update_setting))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OrganizationQuery {
    pub organization_id: String,
}

#[derive(Debug, Serialize)]
pub struct SettingsListResponse {
    pub items: Vec<SettingResponse>,
}

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub notification_type: String,
    pub sub_key: Option<String>,
    pub channels: BTreeMap<String, ChannelRule>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub organization_id: String,
    pub sub_key: Option<String>,
    /// Desired enabled flags per channel key.
    pub channels: BTreeMap<String, bool>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the organization's channel preferences, seeding defaults on first
/// access so a fresh tenant sees the full table.
async fn list_settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrganizationQuery>,
) -> AppResult<Json<SettingsListResponse>> {
    PreferenceResolver::ensure_defaults(&state.db, &query.organization_id).await?;

    let rows =
        NotificationSettingsRepository::list_for_organization(&state.db, &query.organization_id)
            .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let rules = ChannelRuleSet::from_json(&row.channels)?;
        items.push(SettingResponse {
            notification_type: row.notification_type,
            sub_key: if row.sub_key.is_empty() {
                None
            } else {
                Some(row.sub_key)
            },
            channels: rules
                .iter()
                .map(|(c, r)| (c.as_str().to_string(), r))
                .collect(),
        });
    }

    Ok(Json(SettingsListResponse { items }))
}

/// Update the enabled flags for one (notification type, sub key).
///
/// Locked channels cannot be changed; attempting to flip one is rejected so
/// callers learn about the lock instead of silently losing the change.
async fn update_setting(
    State(state): State<Arc<AppState>>,
    Path(notification_type): Path<String>,
    Json(request): Json<UpdateSettingRequest>,
) -> AppResult<Json<SettingResponse>> {
    let event_type = EventType::from_str(&notification_type)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let sub_key = request.sub_key.as_deref();

    let defaults = default_rules(event_type, sub_key).ok_or_else(|| {
        AppError::NotFound(format!(
            "No settings entry for {}/{}",
            event_type.as_str(),
            sub_key.unwrap_or("-")
        ))
    })?;

    let mut updated = defaults.clone();
    for (key, enabled) in &request.channels {
        let channel =
            Channel::from_str(key).map_err(|e| AppError::Validation(e.to_string()))?;
        let Some(default_rule) = defaults.get(channel) else {
            return Err(AppError::Validation(format!(
                "Channel {} is not available for {}",
                channel.as_str(),
                event_type.as_str()
            )));
        };
        if default_rule.locked {
            if *enabled != default_rule.enabled {
                return Err(AppError::Validation(format!(
                    "Channel {} is locked for {}",
                    channel.as_str(),
                    event_type.as_str()
                )));
            }
            continue;
        }
        updated.set(
            channel,
            ChannelRule {
                enabled: *enabled,
                locked: false,
            },
        );
    }

    PreferenceResolver::ensure_defaults(&state.db, &request.organization_id).await?;
    let row = NotificationSettingsRepository::update_channels(
        &state.db,
        &request.organization_id,
        event_type.as_str(),
        sub_key.unwrap_or(""),
        &updated.to_json(),
    )
    .await?;

    let rules = ChannelRuleSet::from_json(&row.channels)?;
    Ok(Json(SettingResponse {
        notification_type: row.notification_type,
        sub_key: if row.sub_key.is_empty() {
            None
        } else {
            Some(row.sub_key)
        },
        channels: rules
            .iter()
            .map(|(c, r)| (c.as_str().to_string(), r))
            .collect(),
    }))
}
