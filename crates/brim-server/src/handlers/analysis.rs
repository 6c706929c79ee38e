//! Analysis summary handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{AppError, AppState};
use brim_core::{AccountAnalysisSummary, Store};

/// GET /api/accounts/:id/summary - Latest per-account analysis snapshot
pub async fn get_account_summary(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<i64>,
) -> Result<Json<AccountAnalysisSummary>, AppError> {
    let summary = state
        .engine
        .store()
        .get_account_summary(account_id)
        .await?
        .ok_or_else(|| AppError::not_found(&format!("No summary for account {}", account_id)))?;

    Ok(Json(summary))
}

/// GET /api/users/:id/summary - User-level aggregate snapshot
pub async fn get_user_summary(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<AccountAnalysisSummary>, AppError> {
    let summary = state
        .engine
        .store()
        .get_user_summary(user_id)
        .await?
        .ok_or_else(|| AppError::not_found(&format!("No summary for user {}", user_id)))?;

    Ok(Json(summary))
}
