use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Notification Log Repository
// ============================================================================

const LOG_COLUMNS: &str = "id, organization_id, recipient_id, notification_type, sub_key, \
     channel, title, message, status, error_message, cost, idempotency_key, \
     sent_at, is_read, created_at";

pub struct NotificationLogRepository;

impl NotificationLogRepository {
    /// Insert a new `pending` entry. Returns `Ok(None)` when an entry with
    /// the same idempotency key already exists for the organization — the
    /// unique constraint makes the duplicate check atomic under concurrent
    /// dispatch calls.
    pub async fn create_pending(
        pool: &SqlitePool,
        log: CreateNotificationLog,
    ) -> AppResult<Option<NotificationLog>> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let result = sqlx::query_as::<_, NotificationLog>(&format!(
            r#"
            INSERT INTO notification_log (
                id, organization_id, recipient_id, notification_type, sub_key,
                channel, title, message, status, cost, idempotency_key, is_read, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, 0, ?)
            RETURNING {LOG_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&log.organization_id)
        .bind(&log.recipient_id)
        .bind(&log.notification_type)
        .bind(&log.sub_key)
        .bind(&log.channel)
        .bind(&log.title)
        .bind(&log.message)
        .bind(&log.idempotency_key)
        .bind(now)
        .fetch_one(pool)
        .await;

        match result {
            Ok(created) => Ok(Some(created)),
            Err(sqlx::Error::Database(e))
                if matches!(e.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                Ok(None)
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    pub async fn find_by_idempotency_key(
        pool: &SqlitePool,
        organization_id: &str,
        idempotency_key: &str,
    ) -> AppResult<Option<NotificationLog>> {
        sqlx::query_as::<_, NotificationLog>(&format!(
            "SELECT {LOG_COLUMNS} FROM notification_log \
             WHERE organization_id = ? AND idempotency_key = ?"
        ))
        .bind(organization_id)
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Finalize an entry after the adapter call completed: status becomes
    /// `sent`/`delivered`/`failed`, the attempted cost is attached and
    /// `sent_at` is stamped for successful transmissions.
    pub async fn finalize(
        pool: &SqlitePool,
        id: &str,
        status: DeliveryStatus,
        error_message: Option<&str>,
        cost: f64,
    ) -> AppResult<NotificationLog> {
        let sent_at = match status {
            DeliveryStatus::Sent | DeliveryStatus::Delivered => Some(Utc::now().naive_utc()),
            _ => None,
        };
        let error_message = error_message.map(|s| s.to_string());

        sqlx::query_as::<_, NotificationLog>(&format!(
            r#"
            UPDATE notification_log
            SET status = ?, error_message = ?, cost = ?, sent_at = ?
            WHERE id = ?
            RETURNING {LOG_COLUMNS}
            "#
        ))
        .bind(status.as_str())
        .bind(error_message)
        .bind(cost)
        .bind(sent_at)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Feed query: resolved entries for one recipient, newest first.
    /// `pending` rows are never surfaced.
    pub async fn find_feed(
        pool: &SqlitePool,
        organization_id: &str,
        recipient_id: &str,
        limit: i64,
        offset: i64,
        notification_type: Option<&str>,
        channel: Option<&str>,
        status: Option<&str>,
    ) -> AppResult<Vec<NotificationLog>> {
        sqlx::query_as::<_, NotificationLog>(&format!(
            r#"
            SELECT {LOG_COLUMNS} FROM notification_log
            WHERE organization_id = ? AND recipient_id = ?
            AND status != 'pending'
            AND (? IS NULL OR notification_type = ?)
            AND (? IS NULL OR channel = ?)
            AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(organization_id)
        .bind(recipient_id)
        .bind(notification_type)
        .bind(notification_type)
        .bind(channel)
        .bind(channel)
        .bind(status)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn count_feed(
        pool: &SqlitePool,
        organization_id: &str,
        recipient_id: &str,
        notification_type: Option<&str>,
        channel: Option<&str>,
        status: Option<&str>,
    ) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM notification_log
            WHERE organization_id = ? AND recipient_id = ?
            AND status != 'pending'
            AND (? IS NULL OR notification_type = ?)
            AND (? IS NULL OR channel = ?)
            AND (? IS NULL OR status = ?)
            "#,
        )
        .bind(organization_id)
        .bind(recipient_id)
        .bind(notification_type)
        .bind(notification_type)
        .bind(channel)
        .bind(channel)
        .bind(status)
        .bind(status)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn unread_count(
        pool: &SqlitePool,
        organization_id: &str,
        recipient_id: &str,
    ) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notification_log \
             WHERE organization_id = ? AND recipient_id = ? \
             AND status != 'pending' AND is_read = 0",
        )
        .bind(organization_id)
        .bind(recipient_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Returns whether an entry was actually marked.
    pub async fn mark_read(
        pool: &SqlitePool,
        organization_id: &str,
        recipient_id: &str,
        id: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE notification_log SET is_read = 1 \
             WHERE id = ? AND organization_id = ? AND recipient_id = ?",
        )
        .bind(id)
        .bind(organization_id)
        .bind(recipient_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_read(
        pool: &SqlitePool,
        organization_id: &str,
        recipient_id: &str,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE notification_log SET is_read = 1 \
             WHERE organization_id = ? AND recipient_id = ? AND is_read = 0",
        )
        .bind(organization_id)
        .bind(recipient_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Mark `pending` entries older than the cutoff as `failed`. These are
    /// entries whose dispatch call was abandoned (deadline expiry, crash)
    /// before the adapter outcome was recorded.
    pub async fn sweep_stale_pending(
        pool: &SqlitePool,
        older_than: NaiveDateTime,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE notification_log \
             SET status = 'failed', error_message = 'Stale pending entry swept' \
             WHERE status = 'pending' AND created_at < ?",
        )
        .bind(older_than)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Aggregate attempted-send cost for an organization over a period.
    pub async fn total_cost(
        pool: &SqlitePool,
        organization_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<f64> {
        sqlx::query_scalar::<_, f64>(
            "SELECT COALESCE(SUM(cost), 0.0) FROM notification_log \
             WHERE organization_id = ? AND created_at >= ? AND created_at < ?",
        )
        .bind(organization_id)
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }
}
