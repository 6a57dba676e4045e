use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};

use crate::error::{AppError, AppResult};
use crate::services::dispatcher::{DispatchRequest, DispatchSummary};
use crate::AppState;

/// Fan-out is bounded per channel, but an unbounded recipient list would
/// still hold one HTTP request open for a very long time.
const MAX_RECIPIENTS_PER_DISPATCH: usize = 10_000;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(dispatch_notification))
}

/// Dispatch one logical notification to a set of recipients.
///
/// The response summarizes per-channel outcomes; per-recipient detail lands
/// in the notification log and is available through the feed endpoints.
async fn dispatch_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DispatchRequest>,
) -> AppResult<Json<DispatchSummary>> {
    if request.organization_id.trim().is_empty() {
        return Err(AppError::Validation(
            "organization_id must not be empty".to_string(),
        ));
    }
    if request.recipients.is_empty() {
        return Err(AppError::Validation(
            "At least one recipient is required".to_string(),
        ));
    }
    if request.recipients.len() > MAX_RECIPIENTS_PER_DISPATCH {
        return Err(AppError::Validation(format!(
            "Too many recipients: {} (maximum {})",
            request.recipients.len(),
            MAX_RECIPIENTS_PER_DISPATCH
        )));
    }
    if request
        .recipients
        .iter()
        .any(|r| r.recipient_id.trim().is_empty())
    {
        return Err(AppError::Validation(
            "Every recipient needs a recipient_id".to_string(),
        ));
    }

    let summary = state.dispatcher.dispatch(&request).await?;
    Ok(Json(summary))
}
