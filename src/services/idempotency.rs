//! Deduplication keys for dispatch requests.
//!
//! A key is a SHA-256 digest over the identity of one logical send to one
//! recipient on one channel, bucketed into a time window. Two identical
//! sends inside the same window collapse to one stored log entry; the same
//! send in a later window is a fresh notification.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::services::channels::Channel;
use crate::services::template::TemplateValue;

#[derive(Debug, Clone)]
pub struct IdempotencyKeyBuilder {
    window_seconds: u64,
}

impl IdempotencyKeyBuilder {
    pub fn new(window_seconds: u64) -> Self {
        Self {
            window_seconds: window_seconds.max(1),
        }
    }

    /// A builder for one request: its own window when it names one, this
    /// builder's window otherwise.
    pub fn with_window(&self, window_seconds: Option<u64>) -> Self {
        match window_seconds {
            Some(seconds) => Self::new(seconds),
            None => self.clone(),
        }
    }

    /// Compute the key for the window containing `unix_now`.
    ///
    /// Variables are folded in canonical form in `BTreeMap` iteration order,
    /// so key equality is independent of how the caller assembled the map.
    pub fn key(
        &self,
        organization_id: &str,
        recipient_id: &str,
        template_id: &str,
        sub_key: Option<&str>,
        channel: Channel,
        variables: &BTreeMap<String, TemplateValue>,
        unix_now: u64,
    ) -> String {
        let bucket = unix_now / self.window_seconds;

        let mut hasher = Sha256::new();
        hasher.update(organization_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(recipient_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(template_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(sub_key.unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(channel.as_str().as_bytes());
        hasher.update([0u8]);
        for (name, value) in variables {
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.canonical().as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(bucket.to_be_bytes());

        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, TemplateValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), TemplateValue::Text(v.to_string())))
            .collect()
    }

    #[test]
    fn identical_requests_in_one_window_share_a_key() {
        let builder = IdempotencyKeyBuilder::new(86_400);
        let v = vars(&[("studentName", "Aarav"), ("date", "2024-05-01")]);

        let a = builder.key("org-1", "parent-9", "STUDENT_ABSENT", None, Channel::Sms, &v, 1_000);
        let b = builder.key("org-1", "parent-9", "STUDENT_ABSENT", None, Channel::Sms, &v, 1_500);
        assert_eq!(a, b);
    }

    #[test]
    fn a_new_window_produces_a_new_key() {
        let builder = IdempotencyKeyBuilder::new(3_600);
        let v = vars(&[("studentName", "Aarav")]);

        let a = builder.key("org-1", "parent-9", "STUDENT_ABSENT", None, Channel::Sms, &v, 100);
        let b = builder.key("org-1", "parent-9", "STUDENT_ABSENT", None, Channel::Sms, &v, 3_700);
        assert_ne!(a, b);
    }

    #[test]
    fn a_request_scoped_window_overrides_the_default() {
        let builder = IdempotencyKeyBuilder::new(86_400);
        let v = vars(&[("studentName", "Aarav")]);

        // Same instants land in one daily bucket by default, but in two
        // buckets under an hourly request-scoped window.
        let narrow = builder.with_window(Some(3_600));
        let a = narrow.key("org-1", "p1", "STUDENT_ABSENT", None, Channel::Sms, &v, 100);
        let b = narrow.key("org-1", "p1", "STUDENT_ABSENT", None, Channel::Sms, &v, 3_700);
        assert_ne!(a, b);

        let default = builder.with_window(None);
        let c = default.key("org-1", "p1", "STUDENT_ABSENT", None, Channel::Sms, &v, 100);
        let d = default.key("org-1", "p1", "STUDENT_ABSENT", None, Channel::Sms, &v, 3_700);
        assert_eq!(c, d);
    }

    #[test]
    fn channel_and_sub_key_are_part_of_the_identity() {
        let builder = IdempotencyKeyBuilder::new(86_400);
        let v = vars(&[("amount", "500")]);

        let sms = builder.key("org-1", "p1", "FEE_OVERDUE", Some("overdue_notice"), Channel::Sms, &v, 10);
        let wa = builder.key("org-1", "p1", "FEE_OVERDUE", Some("overdue_notice"), Channel::Whatsapp, &v, 10);
        let no_sub = builder.key("org-1", "p1", "FEE_OVERDUE", None, Channel::Sms, &v, 10);
        assert_ne!(sms, wa);
        assert_ne!(sms, no_sub);
    }

    #[test]
    fn variable_values_change_the_key() {
        let builder = IdempotencyKeyBuilder::new(86_400);
        let a = builder.key(
            "org-1",
            "p1",
            "STUDENT_ABSENT",
            None,
            Channel::Sms,
            &vars(&[("date", "2024-05-01")]),
            10,
        );
        let b = builder.key(
            "org-1",
            "p1",
            "STUDENT_ABSENT",
            None,
            Channel::Sms,
            &vars(&[("date", "2024-05-02")]),
            10,
        );
        assert_ne!(a, b);
    }
}
