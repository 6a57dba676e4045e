//! Preference Resolver: decides which channels are eligible for an
//! organization and event, seeding defaults on first access.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::NotificationSettingsRepository;
use crate::error::{AppError, AppResult};
use crate::services::catalog::EventType;
use crate::services::channels::Channel;
use crate::services::defaults::{default_rules, default_table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRule {
    pub enabled: bool,
    /// Locked channels always answer with the seeded default; tenant
    /// overrides are ignored.
    pub locked: bool,
}

/// Typed channel map stored as JSON in the settings row. Unknown channel
/// keys are rejected here, at the load boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelRuleSet(BTreeMap<Channel, ChannelRule>);

impl ChannelRuleSet {
    pub fn from_iter(rules: impl IntoIterator<Item = (Channel, ChannelRule)>) -> Self {
        Self(rules.into_iter().collect())
    }

    pub fn get(&self, channel: Channel) -> Option<ChannelRule> {
        self.0.get(&channel).copied()
    }

    pub fn set(&mut self, channel: Channel, rule: ChannelRule) {
        self.0.insert(channel, rule);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, ChannelRule)> + '_ {
        self.0.iter().map(|(c, r)| (*c, *r))
    }

    pub fn to_json(&self) -> String {
        let map: BTreeMap<&str, &ChannelRule> =
            self.0.iter().map(|(c, r)| (c.as_str(), r)).collect();
        serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(json: &str) -> AppResult<Self> {
        let raw: BTreeMap<String, ChannelRule> = serde_json::from_str(json)
            .map_err(|e| AppError::Settings(format!("Malformed channel map: {}", e)))?;

        let mut rules = BTreeMap::new();
        for (key, rule) in raw {
            let channel = Channel::from_str(&key)
                .map_err(|e| AppError::Settings(format!("Rejected channel map: {}", e)))?;
            rules.insert(channel, rule);
        }
        Ok(Self(rules))
    }
}

pub struct PreferenceResolver;

impl PreferenceResolver {
    /// Idempotent first-access seeding: writes the full default table for
    /// the organization with insert-if-absent. Concurrent seeds from racing
    /// dispatch calls collapse into the existing rows.
    pub async fn ensure_defaults(pool: &SqlitePool, organization_id: &str) -> AppResult<()> {
        if NotificationSettingsRepository::has_any(pool, organization_id).await? {
            return Ok(());
        }

        tracing::info!(
            "Seeding default notification settings for organization {}",
            organization_id
        );
        for (event_type, sub_key, rules) in default_table() {
            NotificationSettingsRepository::insert_if_absent(
                pool,
                organization_id,
                event_type.as_str(),
                sub_key.unwrap_or(""),
                &rules.to_json(),
            )
            .await?;
        }
        Ok(())
    }

    /// Channel eligibility for one (organization, type, sub key). An
    /// all-false map is a valid answer and turns dispatch into a no-op.
    pub async fn resolve(
        pool: &SqlitePool,
        organization_id: &str,
        event_type: EventType,
        sub_key: Option<&str>,
    ) -> AppResult<BTreeMap<Channel, bool>> {
        Self::ensure_defaults(pool, organization_id).await?;

        let defaults = default_rules(event_type, sub_key).ok_or_else(|| {
            AppError::Settings(format!(
                "No default rules for {}/{}",
                event_type.as_str(),
                sub_key.unwrap_or("-")
            ))
        })?;

        let stored = NotificationSettingsRepository::find(
            pool,
            organization_id,
            event_type.as_str(),
            sub_key.unwrap_or(""),
        )
        .await?;
        let overrides = match stored {
            Some(row) => Some(ChannelRuleSet::from_json(&row.channels)?),
            None => None,
        };

        let mut eligibility = BTreeMap::new();
        for (channel, default_rule) in defaults.iter() {
            let enabled = if default_rule.locked {
                default_rule.enabled
            } else {
                overrides
                    .as_ref()
                    .and_then(|o| o.get(channel))
                    .map(|r| r.enabled)
                    .unwrap_or(default_rule.enabled)
            };
            eligibility.insert(channel, enabled);
        }
        Ok(eligibility)
    }
}
