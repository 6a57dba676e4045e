use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::db::models::DeliveryStatus;
use crate::db::repository::NotificationLogRepository;
use crate::error::{AppError, AppResult};
use crate::services::channels::Channel;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(get_unread_count))
        .route("/read-all", post(mark_all_read))
        .route("/:id/read", post(mark_read))
        .route("/cost", get(get_cost))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub organization_id: String,
    pub recipient_id: String,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub notification_type: Option<String>,
    pub channel: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub items: Vec<FeedItem>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct FeedItem {
    pub id: String,
    pub notification_type: String,
    pub sub_key: Option<String>,
    pub channel: String,
    pub title: Option<String>,
    pub message: String,
    pub status: String,
    pub is_read: bool,
    pub sent_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
pub struct RecipientQuery {
    pub organization_id: String,
    pub recipient_id: String,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub marked: u64,
}

#[derive(Debug, Deserialize)]
pub struct CostQuery {
    pub organization_id: String,
    /// Inclusive start date, `YYYY-MM-DD`.
    pub from: String,
    /// Inclusive end date, `YYYY-MM-DD`.
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct CostResponse {
    pub organization_id: String,
    pub from: String,
    pub to: String,
    pub total_cost: f64,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the notification feed for one recipient. Entries still `pending`
/// are excluded; they have not been delivered anywhere yet.
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
) -> AppResult<Json<FeedResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    if let Some(ref channel) = query.channel {
        Channel::from_str(channel)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
    }
    if let Some(ref status) = query.status {
        DeliveryStatus::parse(status)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown status: {}", status)))?;
    }

    let items = NotificationLogRepository::find_feed(
        &state.db,
        &query.organization_id,
        &query.recipient_id,
        per_page,
        offset,
        query.notification_type.as_deref(),
        query.channel.as_deref(),
        query.status.as_deref(),
    )
    .await?;

    let total = NotificationLogRepository::count_feed(
        &state.db,
        &query.organization_id,
        &query.recipient_id,
        query.notification_type.as_deref(),
        query.channel.as_deref(),
        query.status.as_deref(),
    )
    .await?;

    let items = items
        .into_iter()
        .map(|log| FeedItem {
            id: log.id,
            notification_type: log.notification_type,
            sub_key: if log.sub_key.is_empty() {
                None
            } else {
                Some(log.sub_key)
            },
            channel: log.channel,
            title: log.title,
            message: log.message,
            status: log.status,
            is_read: log.is_read,
            sent_at: log.sent_at,
            created_at: log.created_at,
        })
        .collect();

    Ok(Json(FeedResponse {
        items,
        total,
        page,
        per_page,
        total_pages: (total + per_page - 1) / per_page,
    }))
}

async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecipientQuery>,
) -> AppResult<Json<UnreadCountResponse>> {
    let unread = NotificationLogRepository::unread_count(
        &state.db,
        &query.organization_id,
        &query.recipient_id,
    )
    .await?;

    Ok(Json(UnreadCountResponse { unread }))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RecipientQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let updated = NotificationLogRepository::mark_read(
        &state.db,
        &query.organization_id,
        &query.recipient_id,
        &id,
    )
    .await?;

    if !updated {
        return Err(AppError::NotFound(format!("Notification {}", id)));
    }

    Ok(Json(serde_json::json!({ "read": true })))
}

async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecipientQuery>,
) -> AppResult<Json<MarkAllReadResponse>> {
    let marked = NotificationLogRepository::mark_all_read(
        &state.db,
        &query.organization_id,
        &query.recipient_id,
    )
    .await?;

    Ok(Json(MarkAllReadResponse { marked }))
}

/// Total notification spend for an organization over an inclusive date
/// range. Transmitted-but-failed sends are included; they were charged.
async fn get_cost(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CostQuery>,
) -> AppResult<Json<CostResponse>> {
    let from = parse_date(&query.from)?;
    let to = parse_date(&query.to)?;
    if to < from {
        return Err(AppError::BadRequest(
            "'to' must not be before 'from'".to_string(),
        ));
    }

    let from_dt = from
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::BadRequest("Invalid 'from' date".to_string()))?;
    let to_exclusive = to
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| AppError::BadRequest("Invalid 'to' date".to_string()))?;

    let total_cost = NotificationLogRepository::total_cost(
        &state.db,
        &query.organization_id,
        from_dt,
        to_exclusive,
    )
    .await?;

    Ok(Json(CostResponse {
        organization_id: query.organization_id,
        from: query.from,
        to: query.to,
        total_cost,
    }))
}

fn parse_date(s: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("Invalid date: {} (expected YYYY-MM-DD)", s)))
}
