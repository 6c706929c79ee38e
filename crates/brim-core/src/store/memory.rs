//! In-memory store
//!
//! Mutex-guarded maps behind the [`Store`] trait. Designed for a single
//! active scheduler instance; no cross-process coordination.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};
use crate::models::{
    AccountAnalysisSummary, AccountConnection, ConnectionStatus, Credentials, Frequency,
    GhostPairMatch, NewTransaction, RecurringPattern, Transaction,
};
use crate::recurring::normalize_merchant;

use super::{EnrichmentUpdate, Store};

#[derive(Default)]
struct Inner {
    next_id: i64,
    transactions: BTreeMap<i64, Transaction>,
    /// (account_id, external_id) -> transaction id; the dedupe index
    external_index: HashMap<(i64, String), i64>,
    /// (user_id, merchant) -> pattern
    patterns: BTreeMap<(i64, String), RecurringPattern>,
    /// (user_id, Option<account_id>) -> summary
    summaries: HashMap<(i64, Option<i64>), AccountAnalysisSummary>,
    connections: BTreeMap<i64, AccountConnection>,
}

/// Mutex-guarded in-memory implementation of [`Store`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-write; propagating the panic
        // is the only sound option for an in-memory store.
        self.inner.lock().expect("memory store lock poisoned")
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_transactions(
        &self,
        account_id: i64,
        user_id: i64,
        batch: &[NewTransaction],
    ) -> Result<Vec<i64>> {
        let mut inner = self.lock();
        let mut inserted = Vec::new();
        for tx in batch {
            let key = (account_id, tx.external_id.clone());
            if inner.external_index.contains_key(&key) {
                continue; // Re-delivered by the upstream feed
            }
            inner.next_id += 1;
            let id = inner.next_id;
            inner.external_index.insert(key, id);
            inner.transactions.insert(
                id,
                Transaction {
                    id,
                    external_id: tx.external_id.clone(),
                    account_id,
                    user_id,
                    date: tx.date,
                    description: tx.description.clone(),
                    amount_cents: tx.amount_cents,
                    direction: tx.direction,
                    currency: tx.currency.clone(),
                    merchant: None,
                    category: None,
                    budget_group: None,
                    recurring: false,
                    recurring_frequency: None,
                    exclude_from_analysis: false,
                    is_internal_transfer: false,
                    linked_transaction_id: None,
                    pair_id: None,
                    enrichment_source: None,
                    enrichment_confidence: None,
                    reasoning: None,
                    created_at: Utc::now(),
                },
            );
            inserted.push(id);
        }
        Ok(inserted)
    }

    async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        Ok(self.lock().transactions.get(&id).cloned())
    }

    async fn list_account_transactions(&self, account_id: i64) -> Result<Vec<Transaction>> {
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn list_user_transactions(&self, user_id: i64) -> Result<Vec<Transaction>> {
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn apply_classification(&self, id: i64, update: &EnrichmentUpdate) -> Result<()> {
        let mut inner = self.lock();
        let tx = inner
            .transactions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("transaction {}", id)))?;
        tx.merchant = update.merchant.clone();
        tx.category = Some(update.category);
        tx.budget_group = Some(update.budget_group);
        tx.exclude_from_analysis = update.exclude_from_analysis;
        tx.enrichment_source = Some(update.source);
        tx.enrichment_confidence = update.confidence;
        tx.reasoning = update.reasoning.clone();
        Ok(())
    }

    async fn apply_ghost_pair(&self, pair: &GhostPairMatch) -> Result<(i64, i64)> {
        let mut inner = self.lock();
        let incoming_account = inner
            .transactions
            .get(&pair.incoming_id)
            .map(|t| t.account_id)
            .ok_or_else(|| Error::NotFound(format!("transaction {}", pair.incoming_id)))?;

        let out = inner
            .transactions
            .get_mut(&pair.outgoing_id)
            .ok_or_else(|| Error::NotFound(format!("transaction {}", pair.outgoing_id)))?;
        out.is_internal_transfer = true;
        out.linked_transaction_id = Some(pair.incoming_id);
        out.pair_id = Some(pair.pair_id.clone());
        out.exclude_from_analysis = true;
        let outgoing_account = out.account_id;

        let inc = inner
            .transactions
            .get_mut(&pair.incoming_id)
            .expect("checked above");
        inc.is_internal_transfer = true;
        inc.linked_transaction_id = Some(pair.outgoing_id);
        inc.pair_id = Some(pair.pair_id.clone());
        inc.exclude_from_analysis = true;

        Ok((outgoing_account, incoming_account))
    }

    async fn mark_recurring(
        &self,
        user_id: i64,
        merchant: &str,
        frequency: Frequency,
    ) -> Result<()> {
        let mut inner = self.lock();
        for tx in inner.transactions.values_mut() {
            if tx.user_id != user_id {
                continue;
            }
            let name = tx.merchant.as_deref().unwrap_or(&tx.description);
            if normalize_merchant(name) == merchant {
                tx.recurring = true;
                tx.recurring_frequency = Some(frequency);
            }
        }
        Ok(())
    }

    async fn upsert_pattern(&self, pattern: &RecurringPattern) -> Result<()> {
        self.lock().patterns.insert(
            (pattern.user_id, pattern.merchant.clone()),
            pattern.clone(),
        );
        Ok(())
    }

    async fn list_patterns(
        &self,
        user_id: i64,
        active_only: bool,
    ) -> Result<Vec<RecurringPattern>> {
        Ok(self
            .lock()
            .patterns
            .values()
            .filter(|p| p.user_id == user_id && (!active_only || p.active))
            .cloned()
            .collect())
    }

    async fn set_pattern_active(&self, user_id: i64, merchant: &str, active: bool) -> Result<bool> {
        let mut inner = self.lock();
        match inner.patterns.get_mut(&(user_id, merchant.to_string())) {
            Some(p) => {
                p.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_summary(&self, summary: &AccountAnalysisSummary) -> Result<()> {
        self.lock()
            .summaries
            .insert((summary.user_id, summary.account_id), summary.clone());
        Ok(())
    }

    async fn get_account_summary(&self, account_id: i64) -> Result<Option<AccountAnalysisSummary>> {
        Ok(self
            .lock()
            .summaries
            .values()
            .find(|s| s.account_id == Some(account_id))
            .cloned())
    }

    async fn get_user_summary(&self, user_id: i64) -> Result<Option<AccountAnalysisSummary>> {
        Ok(self.lock().summaries.get(&(user_id, None)).cloned())
    }

    async fn list_connections(&self) -> Result<Vec<AccountConnection>> {
        Ok(self.lock().connections.values().cloned().collect())
    }

    async fn get_connection(&self, account_id: i64) -> Result<Option<AccountConnection>> {
        Ok(self.lock().connections.get(&account_id).cloned())
    }

    async fn upsert_connection(&self, connection: &AccountConnection) -> Result<()> {
        self.lock()
            .connections
            .insert(connection.account_id, connection.clone());
        Ok(())
    }

    async fn set_connection_status(
        &self,
        account_id: i64,
        status: ConnectionStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let conn = inner
            .connections
            .get_mut(&account_id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", account_id)))?;
        conn.status = status;
        conn.last_error = reason.map(str::to_string);
        Ok(())
    }

    async fn set_credentials(&self, account_id: i64, credentials: &Credentials) -> Result<()> {
        let mut inner = self.lock();
        let conn = inner
            .connections
            .get_mut(&account_id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", account_id)))?;
        conn.credentials = credentials.clone();
        Ok(())
    }

    async fn mark_synced(&self, account_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock();
        let conn = inner
            .connections
            .get_mut(&account_id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", account_id)))?;
        conn.last_synced_at = Some(at);
        Ok(())
    }

    async fn set_next_recalibration(&self, account_id: i64, at: NaiveDate) -> Result<()> {
        let mut inner = self.lock();
        let conn = inner
            .connections
            .get_mut(&account_id)
            .ok_or_else(|| Error::NotFound(format!("connection {}", account_id)))?;
        conn.next_recalibration_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::NaiveDate;

    fn new_tx(external_id: &str, day: u32, cents: i64) -> NewTransaction {
        NewTransaction {
            external_id: external_id.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
            description: "desc".into(),
            amount_cents: cents,
            direction: if cents < 0 {
                Direction::Outgoing
            } else {
                Direction::Incoming
            },
            currency: "USD".into(),
            labels: vec![],
            category_hint: None,
        }
    }

    #[tokio::test]
    async fn upsert_dedupes_on_external_id() {
        let store = MemoryStore::new();
        let batch = vec![new_tx("a", 1, -100), new_tx("b", 2, -200)];
        let first = store.upsert_transactions(1, 1, &batch).await.unwrap();
        assert_eq!(first.len(), 2);

        // Re-delivery of "a" plus one new record
        let batch = vec![new_tx("a", 1, -100), new_tx("c", 3, -300)];
        let second = store.upsert_transactions(1, 1, &batch).await.unwrap();
        assert_eq!(second.len(), 1);

        let all = store.list_account_transactions(1).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn same_external_id_on_other_account_is_distinct() {
        let store = MemoryStore::new();
        store
            .upsert_transactions(1, 1, &[new_tx("a", 1, -100)])
            .await
            .unwrap();
        let inserted = store
            .upsert_transactions(2, 1, &[new_tx("a", 1, -100)])
            .await
            .unwrap();
        assert_eq!(inserted.len(), 1);
    }

    #[tokio::test]
    async fn ghost_pair_mutations_are_symmetric() {
        let store = MemoryStore::new();
        let out = store
            .upsert_transactions(1, 1, &[new_tx("o", 1, -50_000)])
            .await
            .unwrap()[0];
        let inc = store
            .upsert_transactions(2, 1, &[new_tx("i", 2, 50_000)])
            .await
            .unwrap()[0];

        let pair = GhostPairMatch {
            outgoing_id: out,
            incoming_id: inc,
            pair_id: "pair-1".into(),
            amount_cents: 50_000,
            date_gap_days: 1,
        };
        let (a, b) = store.apply_ghost_pair(&pair).await.unwrap();
        assert_eq!((a, b), (1, 2));

        let o = store.get_transaction(out).await.unwrap().unwrap();
        let i = store.get_transaction(inc).await.unwrap().unwrap();
        assert!(o.is_internal_transfer && i.is_internal_transfer);
        assert_eq!(o.linked_transaction_id, Some(inc));
        assert_eq!(i.linked_transaction_id, Some(out));
        assert_eq!(o.pair_id.as_deref(), Some("pair-1"));
        assert!(o.exclude_from_analysis && i.exclude_from_analysis);
    }

    #[tokio::test]
    async fn pattern_upsert_overwrites_by_user_and_merchant() {
        let store = MemoryStore::new();
        let mut pattern = RecurringPattern {
            user_id: 1,
            merchant: "netflix".into(),
            frequency: Frequency::Monthly,
            average_amount_cents: 1499,
            min_amount_cents: 1499,
            max_amount_cents: 1499,
            anchor_day: 4,
            last_seen: NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(),
            next_due: NaiveDate::from_ymd_opt(2025, 7, 4).unwrap(),
            occurrences: 3,
            confidence: 0.8,
            active: true,
        };
        store.upsert_pattern(&pattern).await.unwrap();
        pattern.occurrences = 4;
        store.upsert_pattern(&pattern).await.unwrap();

        let patterns = store.list_patterns(1, true).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrences, 4);

        assert!(store.set_pattern_active(1, "netflix", false).await.unwrap());
        assert!(store.list_patterns(1, true).await.unwrap().is_empty());
        assert_eq!(store.list_patterns(1, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn summary_replace_is_wholesale() {
        let store = MemoryStore::new();
        let mut summary = AccountAnalysisSummary {
            account_id: Some(1),
            user_id: 1,
            avg_monthly_income_cents: 100,
            avg_salary_cents: 100,
            avg_other_income_cents: 0,
            avg_fixed_costs_cents: 0,
            avg_essentials_cents: 0,
            avg_discretionary_cents: 0,
            avg_debt_payments_cents: 0,
            safe_to_spend_cents: 100,
            available_for_debt_cents: 100,
            closed_months_analyzed: 1,
            current_month_pacing: Default::default(),
            detected_debt_payments: vec![],
            computed_at: Utc::now(),
        };
        store.replace_summary(&summary).await.unwrap();
        summary.avg_monthly_income_cents = 200;
        store.replace_summary(&summary).await.unwrap();

        let got = store.get_account_summary(1).await.unwrap().unwrap();
        assert_eq!(got.avg_monthly_income_cents, 200);
        assert!(store.get_user_summary(1).await.unwrap().is_none());
    }
}
