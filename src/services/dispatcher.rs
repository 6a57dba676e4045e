//! Fan-out Engine: turns one logical notification into per-recipient,
//! per-channel sends under preference resolution, chunked bounded
//! concurrency, retry and cost accounting, with a durable log entry per
//! (recipient, channel).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::time::Instant;

use crate::config::Config;
use crate::db::models::{CreateNotificationLog, DeliveryStatus};
use crate::db::repository::NotificationLogRepository;
use crate::error::AppResult;
use crate::services::catalog::{NotificationTemplate, TemplateCatalog};
use crate::services::channels::{Channel, ChannelAdapter, ChannelPayload};
use crate::services::cost::CostTable;
use crate::services::idempotency::IdempotencyKeyBuilder;
use crate::services::preferences::PreferenceResolver;
use crate::services::retry::{retry_send, RetryError, RetryPolicy};
use crate::services::template::{Locale, TemplateValue};

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub organization_id: String,
    pub template_id: String,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub variables: BTreeMap<String, TemplateValue>,
    /// Optional wall-clock budget for the whole dispatch (milliseconds).
    /// Recipients not reached in time are abandoned, not failed.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    /// Optional dedup window for this request (seconds). Falls back to the
    /// configured default window when absent.
    #[serde(default)]
    pub idempotency_window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recipient {
    pub recipient_id: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
}

impl Recipient {
    /// The address this channel delivers to, if the recipient has one.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Sms | Channel::Whatsapp => self.phone.as_deref(),
            Channel::Email => self.email.as_deref(),
            Channel::Push => self.push_token.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelCounts {
    pub sent: u32,
    pub failed: u32,
    /// Recipients with no address for the channel, plus any abandoned when
    /// the dispatch deadline expired.
    pub skipped: u32,
    /// Collapsed onto an existing log entry inside the dedup window.
    pub deduplicated: u32,
}

impl ChannelCounts {
    fn absorb(&mut self, other: ChannelCounts) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.deduplicated += other.deduplicated;
    }
}

#[derive(Debug, Serialize)]
pub struct DispatchSummary {
    pub channels: BTreeMap<Channel, ChannelCounts>,
    pub total_cost: f64,
    pub warnings: Vec<String>,
}

enum RecipientOutcome {
    Sent,
    Failed,
    Skipped,
    Deduplicated,
    /// Deadline expired with the log entry still pending; the stale-pending
    /// sweeper fails it later.
    Abandoned,
}

#[derive(Default)]
struct ChunkOutcome {
    counts: ChannelCounts,
    cost: f64,
}

pub struct Dispatcher {
    pool: SqlitePool,
    catalog: Arc<TemplateCatalog>,
    adapters: BTreeMap<Channel, Arc<dyn ChannelAdapter>>,
    policy: RetryPolicy,
    costs: CostTable,
    keys: IdempotencyKeyBuilder,
    locale: Locale,
    chunk_size: usize,
    inter_batch_pause: Duration,
    sms_concurrency: usize,
    whatsapp_concurrency: usize,
    email_concurrency: usize,
    push_concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        pool: SqlitePool,
        catalog: Arc<TemplateCatalog>,
        adapters: Vec<Arc<dyn ChannelAdapter>>,
        config: &Config,
    ) -> Self {
        let adapters = adapters.into_iter().map(|a| (a.channel(), a)).collect();

        Self {
            pool,
            catalog,
            adapters,
            policy: RetryPolicy::from_config(&config.retry),
            costs: CostTable::from_config(&config.cost),
            keys: IdempotencyKeyBuilder::new(config.dispatch.idempotency_window_seconds),
            locale: Locale::from_tag(&config.dispatch.locale),
            chunk_size: config.dispatch.chunk_size.max(1),
            inter_batch_pause: Duration::from_millis(config.dispatch.inter_batch_pause_ms),
            sms_concurrency: config.dispatch.sms_concurrency.max(1),
            whatsapp_concurrency: config.dispatch.whatsapp_concurrency.max(1),
            email_concurrency: config.dispatch.email_concurrency.max(1),
            push_concurrency: config.dispatch.push_concurrency.max(1),
        }
    }

    /// Channels with a configured gateway, in channel order.
    pub fn configured_channels(&self) -> Vec<Channel> {
        self.adapters.keys().copied().collect()
    }

    fn concurrency_for(&self, channel: Channel) -> usize {
        match channel {
            Channel::Sms => self.sms_concurrency,
            Channel::Whatsapp => self.whatsapp_concurrency,
            Channel::Email => self.email_concurrency,
            Channel::Push => self.push_concurrency,
        }
    }

    /// Run one dispatch end to end and report per-channel counts.
    ///
    /// Channels run concurrently with each other; within a channel,
    /// recipients are chunked and at most the channel's configured number
    /// of chunks is in flight at once.
    pub async fn dispatch(&self, req: &DispatchRequest) -> AppResult<DispatchSummary> {
        let template = self.catalog.get(&req.template_id)?;
        let enabled = PreferenceResolver::resolve(
            &self.pool,
            &req.organization_id,
            template.event_type,
            template.sub_key.as_deref(),
        )
        .await?;

        let deadline = req
            .deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let unix_now = Utc::now().timestamp().max(0) as u64;
        let keys = self.keys.with_window(req.idempotency_window_seconds);

        let mut warnings = Vec::new();
        let mut jobs: Vec<(Channel, Arc<dyn ChannelAdapter>, ChannelPayload)> = Vec::new();
        for channel in template.channels() {
            if !enabled.get(&channel).copied().unwrap_or(false) {
                continue;
            }
            let Some(adapter) = self.adapters.get(&channel) else {
                tracing::warn!(
                    channel = channel.as_str(),
                    "Channel enabled but no gateway configured; skipping"
                );
                continue;
            };
            let Some((payload, render_warnings)) =
                template.render_channel(channel, &req.variables, &self.locale)
            else {
                continue;
            };
            for w in render_warnings {
                warnings.push(format!(
                    "{}: no value for placeholder '{}'",
                    channel.as_str(),
                    w.placeholder
                ));
            }
            jobs.push((channel, adapter.clone(), payload));
        }

        let channel_futures = jobs.iter().map(|(channel, adapter, payload)| {
            self.run_channel(req, template, *channel, adapter.as_ref(), payload, deadline, &keys, unix_now)
        });
        let results = future::join_all(channel_futures).await;

        let mut channels = BTreeMap::new();
        let mut total_cost = 0.0;
        for (channel, outcome) in results {
            total_cost += outcome.cost;
            channels.insert(channel, outcome.counts);
        }

        tracing::info!(
            organization_id = %req.organization_id,
            template_id = %req.template_id,
            recipients = req.recipients.len(),
            total_cost,
            "Dispatch complete"
        );

        Ok(DispatchSummary {
            channels,
            total_cost,
            warnings,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_channel(
        &self,
        req: &DispatchRequest,
        template: &NotificationTemplate,
        channel: Channel,
        adapter: &dyn ChannelAdapter,
        payload: &ChannelPayload,
        deadline: Option<Instant>,
        keys: &IdempotencyKeyBuilder,
        unix_now: u64,
    ) -> (Channel, ChunkOutcome) {
        let mut total = ChunkOutcome::default();
        let chunks: Vec<&[Recipient]> = req.recipients.chunks(self.chunk_size).collect();
        let concurrency = self.concurrency_for(channel);

        let mut first_batch = true;
        for batch in chunks.chunks(concurrency) {
            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if expired {
                // Nothing for these recipients exists yet; abandoning them
                // leaves no pending rows behind.
                let remaining: u32 = batch.iter().map(|c| c.len() as u32).sum();
                total.counts.skipped += remaining;
                continue;
            }

            if !first_batch && !self.inter_batch_pause.is_zero() {
                tokio::time::sleep(self.inter_batch_pause).await;
            }
            first_batch = false;

            let chunk_futures = batch.iter().map(|chunk| {
                self.run_chunk(req, template, channel, adapter, payload, chunk, deadline, keys, unix_now)
            });
            for outcome in future::join_all(chunk_futures).await {
                total.counts.absorb(outcome.counts);
                total.cost += outcome.cost;
            }
        }

        (channel, total)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_chunk(
        &self,
        req: &DispatchRequest,
        template: &NotificationTemplate,
        channel: Channel,
        adapter: &dyn ChannelAdapter,
        payload: &ChannelPayload,
        recipients: &[Recipient],
        deadline: Option<Instant>,
        keys: &IdempotencyKeyBuilder,
        unix_now: u64,
    ) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        for recipient in recipients {
            let (result, cost) = self
                .send_one(req, template, channel, adapter, payload, recipient, deadline, keys, unix_now)
                .await;
            outcome.cost += cost;
            match result {
                RecipientOutcome::Sent => outcome.counts.sent += 1,
                RecipientOutcome::Failed => outcome.counts.failed += 1,
                RecipientOutcome::Skipped | RecipientOutcome::Abandoned => {
                    outcome.counts.skipped += 1
                }
                RecipientOutcome::Deduplicated => outcome.counts.deduplicated += 1,
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_one(
        &self,
        req: &DispatchRequest,
        template: &NotificationTemplate,
        channel: Channel,
        adapter: &dyn ChannelAdapter,
        payload: &ChannelPayload,
        recipient: &Recipient,
        deadline: Option<Instant>,
        keys: &IdempotencyKeyBuilder,
        unix_now: u64,
    ) -> (RecipientOutcome, f64) {
        let Some(address) = recipient.address_for(channel) else {
            tracing::debug!(
                recipient_id = %recipient.recipient_id,
                channel = channel.as_str(),
                "Recipient has no address for channel; skipping"
            );
            return (RecipientOutcome::Skipped, 0.0);
        };

        let idempotency_key = keys.key(
            &req.organization_id,
            &recipient.recipient_id,
            &template.template_id,
            template.sub_key.as_deref(),
            channel,
            &req.variables,
            unix_now,
        );

        let create = CreateNotificationLog {
            organization_id: req.organization_id.clone(),
            recipient_id: recipient.recipient_id.clone(),
            notification_type: template.event_type.as_str().to_string(),
            sub_key: template.sub_key.clone().unwrap_or_default(),
            channel: channel.as_str().to_string(),
            title: payload.title().map(str::to_string),
            message: payload.body().to_string(),
            idempotency_key,
        };

        let key = create.idempotency_key.clone();
        let entry = match NotificationLogRepository::create_pending(&self.pool, create).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                if let Ok(Some(existing)) = NotificationLogRepository::find_by_idempotency_key(
                    &self.pool,
                    &req.organization_id,
                    &key,
                )
                .await
                {
                    tracing::debug!(
                        recipient_id = %recipient.recipient_id,
                        channel = channel.as_str(),
                        existing_id = %existing.id,
                        "Duplicate dispatch collapsed onto existing entry"
                    );
                }
                return (RecipientOutcome::Deduplicated, 0.0);
            }
            Err(e) => {
                tracing::error!(
                    recipient_id = %recipient.recipient_id,
                    channel = channel.as_str(),
                    error = %e,
                    "Failed to create log entry"
                );
                return (RecipientOutcome::Failed, 0.0);
            }
        };

        let result = retry_send(&self.policy, deadline, channel, &recipient.recipient_id, || {
            adapter.send(address, payload)
        })
        .await;

        match result {
            Ok((receipt, attempts)) => {
                let status = if receipt.confirmed {
                    DeliveryStatus::Delivered
                } else {
                    DeliveryStatus::Sent
                };
                let cost = self.costs.message_cost(payload);
                tracing::debug!(
                    recipient_id = %recipient.recipient_id,
                    channel = channel.as_str(),
                    provider_message_id = %receipt.provider_message_id,
                    attempts,
                    "Send accepted"
                );
                match NotificationLogRepository::finalize(&self.pool, &entry.id, status, None, cost)
                    .await
                {
                    Ok(_) => (RecipientOutcome::Sent, cost),
                    Err(e) => {
                        tracing::error!(id = %entry.id, error = %e, "Failed to finalize log entry");
                        (RecipientOutcome::Failed, cost)
                    }
                }
            }
            Err(RetryError::DeadlineExceeded { attempts }) => {
                // The entry stays pending; the sweeper fails it once stale.
                tracing::warn!(
                    recipient_id = %recipient.recipient_id,
                    channel = channel.as_str(),
                    attempts,
                    "Dispatch deadline expired mid-send"
                );
                (RecipientOutcome::Abandoned, 0.0)
            }
            Err(err) => {
                // Attempts that reached the provider are charged even though
                // delivery failed.
                let cost = if err.transmitted() {
                    self.costs.message_cost(payload)
                } else {
                    0.0
                };
                let message = err.message();
                if let Err(e) = NotificationLogRepository::finalize(
                    &self.pool,
                    &entry.id,
                    DeliveryStatus::Failed,
                    Some(&message),
                    cost,
                )
                .await
                {
                    tracing::error!(id = %entry.id, error = %e, "Failed to finalize log entry");
                }
                (RecipientOutcome::Failed, cost)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use sqlx::sqlite::SqlitePoolOptions;

    use crate::db::repository::NotificationSettingsRepository;
    use crate::services::channels::{ProviderReceipt, SendError};
    use crate::services::preferences::{ChannelRule, ChannelRuleSet};

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 2;
        config.retry.jitter = 0.0;
        config.dispatch.inter_batch_pause_ms = 0;
        config
    }

    struct ScriptedAdapter {
        channel: Channel,
        script: Mutex<VecDeque<Result<ProviderReceipt, SendError>>>,
        confirmed: bool,
        calls: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(channel: Channel) -> Arc<Self> {
            Arc::new(Self {
                channel,
                script: Mutex::new(VecDeque::new()),
                confirmed: false,
                calls: AtomicU32::new(0),
            })
        }

        fn scripted(
            channel: Channel,
            script: Vec<Result<ProviderReceipt, SendError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                channel,
                script: Mutex::new(script.into()),
                confirmed: false,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ChannelAdapter for ScriptedAdapter {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(
            &self,
            _address: &str,
            _payload: &ChannelPayload,
        ) -> Result<ProviderReceipt, SendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.script.lock().unwrap().pop_front() {
                Some(result) => result,
                None => Ok(ProviderReceipt {
                    provider_message_id: format!("msg-{}", n),
                    confirmed: self.confirmed,
                }),
            }
        }
    }

    fn absent_request(recipients: Vec<Recipient>) -> DispatchRequest {
        let variables = [
            ("studentName", TemplateValue::Text("Aarav".to_string())),
            (
                "date",
                TemplateValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            ),
            (
                "schoolName",
                TemplateValue::Text("Greenview School".to_string()),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        DispatchRequest {
            organization_id: "org-1".to_string(),
            template_id: "STUDENT_ABSENT".to_string(),
            recipients,
            variables,
            deadline_ms: None,
            idempotency_window_seconds: None,
        }
    }

    fn parent(n: usize) -> Recipient {
        Recipient {
            recipient_id: format!("parent-{}", n),
            phone: Some(format!("+9198000{:05}", n)),
            email: None,
            push_token: None,
        }
    }

    fn dispatcher(pool: &SqlitePool, adapters: Vec<Arc<dyn ChannelAdapter>>) -> Dispatcher {
        Dispatcher::new(
            pool.clone(),
            Arc::new(TemplateCatalog::builtin().unwrap()),
            adapters,
            &test_config(),
        )
    }

    async fn row_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notification_log")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_dispatch_collapses_to_one_entry() {
        let pool = setup().await;
        let adapter = ScriptedAdapter::new(Channel::Whatsapp);
        let engine = dispatcher(&pool, vec![adapter.clone() as Arc<dyn ChannelAdapter>]);
        let request = absent_request(vec![parent(1)]);

        let first = engine.dispatch(&request).await.unwrap();
        assert_eq!(first.channels[&Channel::Whatsapp].sent, 1);

        let second = engine.dispatch(&request).await.unwrap();
        assert_eq!(second.channels[&Channel::Whatsapp].sent, 0);
        assert_eq!(second.channels[&Channel::Whatsapp].deduplicated, 1);

        assert_eq!(row_count(&pool).await, 1);
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn a_request_scoped_dedup_window_is_honored() {
        let pool = setup().await;
        let adapter = ScriptedAdapter::new(Channel::Whatsapp);
        let engine = dispatcher(&pool, vec![adapter.clone() as Arc<dyn ChannelAdapter>]);

        let request = absent_request(vec![parent(1)]);
        let first = engine.dispatch(&request).await.unwrap();
        assert_eq!(first.channels[&Channel::Whatsapp].sent, 1);

        // A different window puts the same send in a different bucket, so
        // it is a fresh notification rather than a duplicate.
        let mut wide = request.clone();
        wide.idempotency_window_seconds = Some(1_000_000_000);
        let second = engine.dispatch(&wide).await.unwrap();
        assert_eq!(second.channels[&Channel::Whatsapp].sent, 1);
        assert_eq!(second.channels[&Channel::Whatsapp].deduplicated, 0);
        assert_eq!(row_count(&pool).await, 2);

        // Repeating it inside that window collapses as usual.
        let third = engine.dispatch(&wide).await.unwrap();
        assert_eq!(third.channels[&Channel::Whatsapp].deduplicated, 1);
        assert_eq!(row_count(&pool).await, 2);
    }

    #[tokio::test]
    async fn an_expired_deadline_skips_recipients_without_rows() {
        let pool = setup().await;
        let adapter = ScriptedAdapter::new(Channel::Whatsapp);
        let engine = dispatcher(&pool, vec![adapter.clone() as Arc<dyn ChannelAdapter>]);

        let mut request = absent_request((0..5).map(parent).collect());
        request.deadline_ms = Some(0);

        let summary = engine.dispatch(&request).await.unwrap();

        assert_eq!(summary.channels[&Channel::Whatsapp].skipped, 5);
        assert_eq!(summary.channels[&Channel::Whatsapp].sent, 0);
        assert_eq!(adapter.calls(), 0);
        assert_eq!(row_count(&pool).await, 0);
        assert!(summary.total_cost.abs() < 1e-9);
    }

    #[tokio::test]
    async fn a_mid_send_deadline_leaves_the_entry_pending_for_the_sweeper() {
        let pool = setup().await;
        // One retryable failure, then a backoff far longer than the budget.
        let adapter = ScriptedAdapter::scripted(
            Channel::Whatsapp,
            vec![Err(SendError::Retryable("gateway 503".to_string()))],
        );
        let mut config = test_config();
        config.retry.base_delay_ms = 60_000;
        config.retry.max_delay_ms = 60_000;
        let engine = Dispatcher::new(
            pool.clone(),
            Arc::new(TemplateCatalog::builtin().unwrap()),
            vec![adapter.clone() as Arc<dyn ChannelAdapter>],
            &config,
        );

        let mut request = absent_request(vec![parent(1)]);
        request.deadline_ms = Some(50);

        let summary = engine.dispatch(&request).await.unwrap();

        assert_eq!(summary.channels[&Channel::Whatsapp].skipped, 1);
        assert_eq!(summary.channels[&Channel::Whatsapp].failed, 0);
        assert!(summary.total_cost.abs() < 1e-9);

        let status: String =
            sqlx::query_scalar("SELECT status FROM notification_log WHERE recipient_id = ?")
                .bind("parent-1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "pending");

        // The sweeper picks the abandoned entry up once it goes stale.
        let cutoff = Utc::now().naive_utc() + chrono::Duration::seconds(1);
        let swept = NotificationLogRepository::sweep_stale_pending(&pool, cutoff)
            .await
            .unwrap();
        assert_eq!(swept, 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let pool = setup().await;
        let adapter = ScriptedAdapter::scripted(
            Channel::Whatsapp,
            vec![
                Err(SendError::Retryable("gateway 503".to_string())),
                Err(SendError::Retryable("gateway timeout".to_string())),
            ],
        );
        let engine = dispatcher(&pool, vec![adapter.clone() as Arc<dyn ChannelAdapter>]);

        let summary = engine.dispatch(&absent_request(vec![parent(1)])).await.unwrap();

        assert_eq!(adapter.calls(), 3);
        assert_eq!(summary.channels[&Channel::Whatsapp].sent, 1);

        let status: String =
            sqlx::query_scalar("SELECT status FROM notification_log WHERE recipient_id = ?")
                .bind("parent-1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "sent");
    }

    #[tokio::test]
    async fn permanent_rejection_fails_after_a_single_call() {
        let pool = setup().await;
        let adapter = ScriptedAdapter::scripted(
            Channel::Whatsapp,
            vec![Err(SendError::Terminal("gateway 401".to_string()))],
        );
        let engine = dispatcher(&pool, vec![adapter.clone() as Arc<dyn ChannelAdapter>]);

        let summary = engine.dispatch(&absent_request(vec![parent(1)])).await.unwrap();

        assert_eq!(adapter.calls(), 1);
        assert_eq!(summary.channels[&Channel::Whatsapp].failed, 1);

        let (status, cost): (String, f64) = sqlx::query_as(
            "SELECT status, cost FROM notification_log WHERE recipient_id = ?",
        )
        .bind("parent-1")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "failed");
        // Transmitted attempts are charged even on failure.
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn invalid_addresses_fail_without_a_charge() {
        let pool = setup().await;
        let adapter = ScriptedAdapter::scripted(
            Channel::Whatsapp,
            vec![Err(SendError::InvalidAddress("not a phone".to_string()))],
        );
        let engine = dispatcher(&pool, vec![adapter.clone() as Arc<dyn ChannelAdapter>]);

        let summary = engine.dispatch(&absent_request(vec![parent(1)])).await.unwrap();

        assert_eq!(adapter.calls(), 1);
        assert_eq!(summary.channels[&Channel::Whatsapp].failed, 1);
        assert!(summary.total_cost.abs() < 1e-9);
    }

    #[tokio::test]
    async fn whatsapp_costs_accumulate_across_the_fan_out() {
        let pool = setup().await;
        let adapter = ScriptedAdapter::new(Channel::Whatsapp);
        let engine = dispatcher(&pool, vec![adapter.clone() as Arc<dyn ChannelAdapter>]);

        let recipients: Vec<Recipient> = (0..100).map(parent).collect();
        let summary = engine.dispatch(&absent_request(recipients)).await.unwrap();

        assert_eq!(summary.channels[&Channel::Whatsapp].sent, 100);
        assert!((summary.total_cost - 75.0).abs() < 1e-6);

        let stored: f64 =
            sqlx::query_scalar("SELECT SUM(cost) FROM notification_log")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!((stored - 75.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn disabled_channels_are_never_dispatched() {
        let pool = setup().await;
        let adapter = ScriptedAdapter::new(Channel::Whatsapp);
        let engine = dispatcher(&pool, vec![adapter.clone() as Arc<dyn ChannelAdapter>]);

        PreferenceResolver::ensure_defaults(&pool, "org-1").await.unwrap();
        let all_off = ChannelRuleSet::from_iter(Channel::ALL.map(|c| {
            (
                c,
                ChannelRule {
                    enabled: false,
                    locked: false,
                },
            )
        }));
        NotificationSettingsRepository::update_channels(
            &pool,
            "org-1",
            "attendance",
            "",
            &all_off.to_json(),
        )
        .await
        .unwrap();

        let summary = engine.dispatch(&absent_request(vec![parent(1)])).await.unwrap();

        assert!(summary.channels.is_empty());
        assert_eq!(adapter.calls(), 0);
        assert_eq!(row_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn recipients_without_an_address_are_skipped_without_a_row() {
        let pool = setup().await;
        let adapter = ScriptedAdapter::new(Channel::Whatsapp);
        let engine = dispatcher(&pool, vec![adapter.clone() as Arc<dyn ChannelAdapter>]);

        let no_phone = Recipient {
            recipient_id: "parent-1".to_string(),
            phone: None,
            email: None,
            push_token: None,
        };
        let summary = engine.dispatch(&absent_request(vec![no_phone])).await.unwrap();

        assert_eq!(summary.channels[&Channel::Whatsapp].skipped, 1);
        assert_eq!(adapter.calls(), 0);
        assert_eq!(row_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn unknown_template_is_rejected_up_front() {
        let pool = setup().await;
        let engine = dispatcher(&pool, vec![ScriptedAdapter::new(Channel::Whatsapp) as Arc<dyn ChannelAdapter>]);

        let mut request = absent_request(vec![parent(1)]);
        request.template_id = "NO_SUCH_TEMPLATE".to_string();

        assert!(matches!(
            engine.dispatch(&request).await,
            Err(crate::error::AppError::TemplateNotFound(_))
        ));
        assert_eq!(row_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn missing_variables_surface_as_warnings() {
        let pool = setup().await;
        let engine = dispatcher(&pool, vec![ScriptedAdapter::new(Channel::Whatsapp) as Arc<dyn ChannelAdapter>]);

        let mut request = absent_request(vec![parent(1)]);
        request.variables.remove("schoolName");

        let summary = engine.dispatch(&request).await.unwrap();
        assert_eq!(summary.channels[&Channel::Whatsapp].sent, 1);
        assert!(summary
            .warnings
            .iter()
            .any(|w| w.contains("schoolName")));
    }
}
