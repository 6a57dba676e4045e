//! Seeded default channel rules per notification type. These are the rows
//! written on first access for an organization, and the authoritative
//! answer for locked channels regardless of tenant overrides.

use crate::services::catalog::EventType;
use crate::services::channels::Channel;
use crate::services::preferences::{ChannelRule, ChannelRuleSet};

fn rule(enabled: bool) -> ChannelRule {
    ChannelRule {
        enabled,
        locked: false,
    }
}

fn locked(enabled: bool) -> ChannelRule {
    ChannelRule {
        enabled,
        locked: true,
    }
}

/// The full default table, one entry per (type, sub key).
pub fn default_table() -> Vec<(EventType, Option<&'static str>, ChannelRuleSet)> {
    vec![
        (
            EventType::Attendance,
            None,
            ChannelRuleSet::from_iter([
                (Channel::Sms, rule(true)),
                (Channel::Whatsapp, rule(true)),
                (Channel::Push, rule(true)),
                (Channel::Email, rule(false)),
            ]),
        ),
        (
            EventType::Fee,
            Some("fee_created"),
            ChannelRuleSet::from_iter([
                (Channel::Sms, rule(true)),
                (Channel::Whatsapp, rule(true)),
                (Channel::Email, rule(true)),
            ]),
        ),
        (
            EventType::Fee,
            Some("overdue_notice"),
            ChannelRuleSet::from_iter([
                (Channel::Sms, rule(true)),
                (Channel::Whatsapp, rule(true)),
                (Channel::Email, rule(true)),
            ]),
        ),
        (
            EventType::Fee,
            Some("payment_success"),
            ChannelRuleSet::from_iter([
                // Payment receipts are always emailed; tenants cannot turn
                // this off.
                (Channel::Email, locked(true)),
                (Channel::Whatsapp, rule(true)),
                (Channel::Push, rule(true)),
            ]),
        ),
        (
            EventType::Exam,
            None,
            ChannelRuleSet::from_iter([
                (Channel::Push, rule(true)),
                (Channel::Email, rule(true)),
                (Channel::Whatsapp, rule(false)),
            ]),
        ),
        (
            EventType::Notice,
            None,
            ChannelRuleSet::from_iter([
                (Channel::Push, rule(true)),
                (Channel::Email, rule(true)),
                // Notices over SMS are an administrative cost decision, not
                // a tenant one.
                (Channel::Sms, locked(false)),
            ]),
        ),
    ]
}

/// Default rules for one (type, sub key), or `None` when the pair is not in
/// the default table.
pub fn default_rules(event_type: EventType, sub_key: Option<&str>) -> Option<ChannelRuleSet> {
    default_table()
        .into_iter()
        .find(|(t, s, _)| *t == event_type && *s == sub_key)
        .map(|(_, _, rules)| rules)
}
