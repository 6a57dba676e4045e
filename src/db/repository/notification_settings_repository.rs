use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// Organization Notification Settings Repository
// ============================================================================

const SETTING_COLUMNS: &str =
    "id, organization_id, notification_type, sub_key, channels, created_at, updated_at";

pub struct NotificationSettingsRepository;

impl NotificationSettingsRepository {
    pub async fn find(
        pool: &SqlitePool,
        organization_id: &str,
        notification_type: &str,
        sub_key: &str,
    ) -> AppResult<Option<OrganizationNotificationSetting>> {
        sqlx::query_as::<_, OrganizationNotificationSetting>(&format!(
            "SELECT {SETTING_COLUMNS} FROM organization_notification_settings \
             WHERE organization_id = ? AND notification_type = ? AND sub_key = ?"
        ))
        .bind(organization_id)
        .bind(notification_type)
        .bind(sub_key)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list_for_organization(
        pool: &SqlitePool,
        organization_id: &str,
    ) -> AppResult<Vec<OrganizationNotificationSetting>> {
        sqlx::query_as::<_, OrganizationNotificationSetting>(&format!(
            "SELECT {SETTING_COLUMNS} FROM organization_notification_settings \
             WHERE organization_id = ? ORDER BY notification_type, sub_key"
        ))
        .bind(organization_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn has_any(pool: &SqlitePool, organization_id: &str) -> AppResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM organization_notification_settings WHERE organization_id = ?",
        )
        .bind(organization_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count > 0)
    }

    /// Idempotent seeding primitive: insert the row only if the
    /// (organization, type, sub key) triple is absent. Concurrent first-seed
    /// races collapse into the existing row instead of erroring.
    pub async fn insert_if_absent(
        pool: &SqlitePool,
        organization_id: &str,
        notification_type: &str,
        sub_key: &str,
        channels_json: &str,
    ) -> AppResult<()> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT OR IGNORE INTO organization_notification_settings \
             (id, organization_id, notification_type, sub_key, channels, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(organization_id)
        .bind(notification_type)
        .bind(sub_key)
        .bind(channels_json)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Replace the stored channel map for an existing row (tenant admin
    /// update path). Locked-channel enforcement happens in the resolver,
    /// not here.
    pub async fn update_channels(
        pool: &SqlitePool,
        organization_id: &str,
        notification_type: &str,
        sub_key: &str,
        channels_json: &str,
    ) -> AppResult<OrganizationNotificationSetting> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, OrganizationNotificationSetting>(&format!(
            "UPDATE organization_notification_settings \
             SET channels = ?, updated_at = ? \
             WHERE organization_id = ? AND notification_type = ? AND sub_key = ? \
             RETURNING {SETTING_COLUMNS}"
        ))
        .bind(channels_json)
        .bind(now)
        .bind(organization_id)
        .bind(notification_type)
        .bind(sub_key)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No settings row for {}/{}/{}",
                organization_id, notification_type, sub_key
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn insert_if_absent_never_overwrites() {
        let pool = test_pool().await;

        NotificationSettingsRepository::insert_if_absent(&pool, "org-1", "fee", "overdue_notice", "{\"sms\":{\"enabled\":true,\"locked\":false}}")
            .await
            .unwrap();
        // Second seed with different content is ignored.
        NotificationSettingsRepository::insert_if_absent(&pool, "org-1", "fee", "overdue_notice", "{}")
            .await
            .unwrap();

        let row = NotificationSettingsRepository::find(&pool, "org-1", "fee", "overdue_notice")
            .await
            .unwrap()
            .unwrap();
        assert!(row.channels.contains("sms"));
        assert!(NotificationSettingsRepository::has_any(&pool, "org-1")
            .await
            .unwrap());
        assert!(!NotificationSettingsRepository::has_any(&pool, "org-2")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn update_requires_existing_row() {
        let pool = test_pool().await;

        let missing =
            NotificationSettingsRepository::update_channels(&pool, "org-1", "notice", "", "{}")
                .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        NotificationSettingsRepository::insert_if_absent(&pool, "org-1", "notice", "", "{}")
            .await
            .unwrap();
        let updated = NotificationSettingsRepository::update_channels(
            &pool,
            "org-1",
            "notice",
            "",
            "{\"push\":{\"enabled\":false,\"locked\":false}}",
        )
        .await
        .unwrap();
        assert!(updated.channels.contains("push"));
    }
}
