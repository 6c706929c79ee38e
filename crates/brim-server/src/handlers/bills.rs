//! Upcoming-bill and recurring-pattern handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState};
use brim_core::{classify_bills, RecurringPattern, Store, UpcomingBill};

/// GET /api/users/:id/bills - Active patterns projected onto the current
/// month (paid / overdue / pending)
pub async fn list_bills(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<UpcomingBill>>, AppError> {
    let store = state.engine.store();
    let patterns = store.list_patterns(user_id, true).await?;
    let transactions = store.list_user_transactions(user_id).await?;

    let bills = classify_bills(&patterns, &transactions, Utc::now().date_naive());
    Ok(Json(bills))
}

/// GET /api/users/:id/patterns - Active recurring patterns
pub async fn list_patterns(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<RecurringPattern>>, AppError> {
    let patterns = state.engine.store().list_patterns(user_id, true).await?;
    Ok(Json(patterns))
}

/// Request body for dismissing a pattern
#[derive(Debug, Deserialize)]
pub struct DismissPatternRequest {
    pub merchant: String,
}

/// Response for pattern dismissal
#[derive(Serialize)]
pub struct DismissPatternResponse {
    pub success: bool,
}

/// POST /api/users/:id/patterns/dismiss - Deactivate a pattern
///
/// Dismissal never deletes; the pattern stays inactive even if the
/// merchant keeps charging.
pub async fn dismiss_pattern(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(body): Json<DismissPatternRequest>,
) -> Result<Json<DismissPatternResponse>, AppError> {
    let found = state
        .engine
        .store()
        .set_pattern_active(user_id, &body.merchant, false)
        .await?;

    if !found {
        return Err(AppError::not_found(&format!(
            "No pattern '{}' for user {}",
            body.merchant, user_id
        )));
    }

    Ok(Json(DismissPatternResponse { success: true }))
}
