//! Persistence boundary
//!
//! The pipeline consumes storage through the [`Store`] trait only:
//! idempotent transaction upsert keyed by (account, external id),
//! enrichment and ghost-pair mutations, recurring-pattern upserts, and
//! atomic replacement of analysis summaries. SQL-backed implementations
//! live outside this crate; [`MemoryStore`] backs tests and the default
//! runtime.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::models::{
    AccountAnalysisSummary, AccountConnection, BudgetGroup, Category, ConnectionStatus,
    Credentials, EnrichmentSource, Frequency, GhostPairMatch, NewTransaction, RecurringPattern,
    Transaction,
};

mod memory;

pub use memory::MemoryStore;

/// One enrichment write, applied to a single transaction
#[derive(Debug, Clone)]
pub struct EnrichmentUpdate {
    pub merchant: Option<String>,
    pub category: Category,
    pub budget_group: BudgetGroup,
    pub exclude_from_analysis: bool,
    pub source: EnrichmentSource,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
}

/// Storage operations the pipeline depends on
///
/// Implementations must provide per-row upsert semantics so overlapping
/// cycles can only redundantly overwrite a row with equivalent data,
/// never corrupt it.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert new transactions, skipping any whose (account, external id)
    /// already exists. Returns the ids of rows actually inserted.
    async fn upsert_transactions(
        &self,
        account_id: i64,
        user_id: i64,
        batch: &[NewTransaction],
    ) -> Result<Vec<i64>>;

    async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>>;

    async fn list_account_transactions(&self, account_id: i64) -> Result<Vec<Transaction>>;

    /// Every transaction across all of the user's accounts; the
    /// ghost-pair detector depends on this being the full set.
    async fn list_user_transactions(&self, user_id: i64) -> Result<Vec<Transaction>>;

    /// Apply a classification to one transaction's enrichment fields.
    async fn apply_classification(&self, id: i64, update: &EnrichmentUpdate) -> Result<()>;

    /// Apply both sides of a ghost pair symmetrically. Returns the
    /// account ids touched so the caller can recalibrate them.
    async fn apply_ghost_pair(&self, pair: &GhostPairMatch) -> Result<(i64, i64)>;

    /// Flag every transaction of `merchant` (normalized) as recurring.
    async fn mark_recurring(&self, user_id: i64, merchant: &str, frequency: Frequency)
        -> Result<()>;

    /// Upsert keyed by (user, merchant).
    async fn upsert_pattern(&self, pattern: &RecurringPattern) -> Result<()>;

    async fn list_patterns(&self, user_id: i64, active_only: bool)
        -> Result<Vec<RecurringPattern>>;

    /// Flip a pattern's active flag (dismissal / stopped recurring).
    /// Returns false when no such pattern exists.
    async fn set_pattern_active(&self, user_id: i64, merchant: &str, active: bool) -> Result<bool>;

    /// Atomically replace the summary for (user, account).
    async fn replace_summary(&self, summary: &AccountAnalysisSummary) -> Result<()>;

    async fn get_account_summary(&self, account_id: i64) -> Result<Option<AccountAnalysisSummary>>;

    /// The user-level aggregate summary (`account_id = None`).
    async fn get_user_summary(&self, user_id: i64) -> Result<Option<AccountAnalysisSummary>>;

    async fn list_connections(&self) -> Result<Vec<AccountConnection>>;

    async fn get_connection(&self, account_id: i64) -> Result<Option<AccountConnection>>;

    async fn upsert_connection(&self, connection: &AccountConnection) -> Result<()>;

    /// Record status plus a human-readable reason for the outer layer.
    async fn set_connection_status(
        &self,
        account_id: i64,
        status: ConnectionStatus,
        reason: Option<&str>,
    ) -> Result<()>;

    async fn set_credentials(&self, account_id: i64, credentials: &Credentials) -> Result<()>;

    async fn mark_synced(&self, account_id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn set_next_recalibration(&self, account_id: i64, at: NaiveDate) -> Result<()>;
}
