//! Enriched transaction handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState};
use brim_core::{Store, Transaction};

/// Query params for listing transactions
#[derive(Debug, Default, Deserialize)]
pub struct ListTransactionsQuery {
    /// Restrict to one account
    pub account_id: Option<i64>,
    /// Drop rows excluded from analysis (ghost pairs, refunds)
    #[serde(default)]
    pub analysis_only: bool,
}

/// GET /api/users/:id/transactions - Enriched transactions with the
/// exclusion/transfer/recurrence annotations attached
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let mut transactions = state.engine.store().list_user_transactions(user_id).await?;

    if let Some(account_id) = query.account_id {
        transactions.retain(|t| t.account_id == account_id);
    }
    if query.analysis_only {
        transactions.retain(|t| !t.exclude_from_analysis);
    }
    transactions.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));

    Ok(Json(transactions))
}
