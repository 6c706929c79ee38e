//! On-demand sync trigger

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::{AppError, AppState};
use brim_core::{SyncOutcome, SyncStats};

/// Response for a sync trigger
#[derive(Serialize)]
pub struct SyncResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ghost_pairs: Option<usize>,
}

impl SyncResponse {
    fn completed(stats: &SyncStats) -> Self {
        Self {
            status: "completed",
            inserted: Some(stats.inserted),
            ghost_pairs: Some(stats.ghost_pairs),
        }
    }

    fn plain(status: &'static str) -> Self {
        Self {
            status,
            inserted: None,
            ghost_pairs: None,
        }
    }
}

/// POST /api/accounts/:id/sync - Run one sync for the account now
///
/// A sync already in flight for the same account is a no-op and answers
/// 409 immediately; the overlapping timer cycle keeps its claim.
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<i64>,
) -> Result<Json<SyncResponse>, AppError> {
    match state.engine.sync_account(account_id).await {
        Ok(SyncOutcome::Completed(stats)) => Ok(Json(SyncResponse::completed(&stats))),
        Ok(SyncOutcome::AlreadyRunning) => {
            Err(AppError::conflict("Sync already running for this account"))
        }
        Ok(SyncOutcome::NeedsReauth) => Ok(Json(SyncResponse::plain("needs_reauth"))),
        Ok(SyncOutcome::Skipped(status)) => Err(AppError::conflict(&format!(
            "Account connection is {}; reconnect to sync",
            status
        ))),
        Err(brim_core::Error::NotFound(msg)) => Err(AppError::not_found(&msg)),
        Err(e) => Err(e.into()),
    }
}
