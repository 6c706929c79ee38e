//! Account sync engine
//!
//! Drives the pipeline per account: credentials → fetch → classify →
//! persist → ghost-pair pass → recurring pass → summary recalibration.
//! Within one account's sync the steps are strictly sequential; accounts
//! sync independently with no ordering guarantee relative to each other.
//!
//! Failures are contained at the account level (and at the user level
//! for the cross-account detector passes): one account's failure is
//! recorded on its connection and never aborts siblings in the cycle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::budget::compute_summary;
use crate::classify::{classify, ClassifierInput};
use crate::config::EngineConfig;
use crate::enrich::{EnrichedRow, Enricher, EnrichmentItem, EnrichmentOutcome, EnrichmentRequest};
use crate::error::{Error, ErrorKind, Result};
use crate::feed::BankingFeed;
use crate::ghost::detect_ghost_pairs;
use crate::models::{
    AccountConnection, ConnectionStatus, Credentials, EnrichmentSource, Frequency, Transaction,
};
use crate::recurring::detect_recurring;
use crate::store::{EnrichmentUpdate, Store};

/// Tracks accounts currently mid-sync
///
/// The only shared mutable structure in the engine. A sync attempt on an
/// account already in the set is a no-op; this is the primary mechanism
/// preventing duplicate enrichment writes from overlapping timer and
/// on-demand triggers. Injectable so it can be unit-tested and scoped
/// per engine instance.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    inner: Mutex<HashSet<i64>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an account. Returns `None` when a sync is already running;
    /// the claim releases when the guard drops.
    pub fn try_begin(&self, account_id: i64) -> Option<InFlightGuard<'_>> {
        let mut set = self.inner.lock().expect("in-flight lock poisoned");
        if set.insert(account_id) {
            Some(InFlightGuard {
                registry: self,
                account_id,
            })
        } else {
            None
        }
    }

    pub fn is_in_flight(&self, account_id: i64) -> bool {
        self.inner
            .lock()
            .expect("in-flight lock poisoned")
            .contains(&account_id)
    }

    fn release(&self, account_id: i64) {
        self.inner
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&account_id);
    }
}

/// Releases the in-flight claim on drop
pub struct InFlightGuard<'a> {
    registry: &'a InFlightRegistry,
    account_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(self.account_id);
    }
}

/// Counters from one completed account sync
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub fetched: usize,
    pub skipped_records: usize,
    pub inserted: usize,
    pub enriched: usize,
    pub fallback_classified: usize,
    pub ghost_pairs: usize,
    pub patterns_upserted: usize,
    pub patterns_deactivated: usize,
    pub summaries_recalibrated: usize,
}

/// What happened to a single sync attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncStats),
    /// Another sync holds the in-flight claim; nothing was done
    AlreadyRunning,
    /// Credential cannot be refreshed; waiting on the user
    NeedsReauth,
    /// Connection state rules out syncing (token_error / disconnected)
    Skipped(ConnectionStatus),
}

/// Counters from one scheduler cycle
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    pub needs_reauth: usize,
}

/// The per-account sync pipeline
pub struct SyncEngine {
    store: Arc<dyn Store>,
    feed: Arc<dyn BankingFeed>,
    enricher: Option<Arc<dyn Enricher>>,
    config: EngineConfig,
    in_flight: InFlightRegistry,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn BankingFeed>,
        enricher: Option<Arc<dyn Enricher>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            feed,
            enricher,
            config,
            in_flight: InFlightRegistry::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// One timer cycle: select every syncable account that is stale or
    /// due for recalibration and sync each independently.
    pub async fn run_cycle(&self) -> CycleReport {
        let now = Utc::now();
        let today = now.date_naive();

        let connections = match self.store.list_connections().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "could not list connections; skipping cycle");
                return CycleReport::default();
            }
        };

        let due: Vec<AccountConnection> = connections
            .into_iter()
            .filter(|c| {
                c.status.syncable() && (self.is_stale(c, now) || recalibration_due(c, today))
            })
            .collect();

        let mut report = CycleReport {
            selected: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return report;
        }
        info!(accounts = due.len(), "sync cycle starting");

        let results = futures::future::join_all(
            due.iter().map(|c| self.sync_account(c.account_id)),
        )
        .await;

        for (connection, result) in due.iter().zip(results) {
            match result {
                Ok(SyncOutcome::Completed(stats)) => {
                    report.completed += 1;
                    debug!(account_id = connection.account_id, ?stats, "account synced");
                }
                Ok(SyncOutcome::NeedsReauth) => report.needs_reauth += 1,
                Ok(SyncOutcome::AlreadyRunning) | Ok(SyncOutcome::Skipped(_)) => {}
                Err(e) => {
                    report.failed += 1;
                    // Contained: the failure is already recorded on the
                    // connection; siblings keep going
                    warn!(account_id = connection.account_id, error = %e, "account sync failed");
                }
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed,
            needs_reauth = report.needs_reauth,
            "sync cycle finished"
        );
        report
    }

    /// Sync one account end to end.
    pub async fn sync_account(&self, account_id: i64) -> Result<SyncOutcome> {
        let Some(_guard) = self.in_flight.try_begin(account_id) else {
            debug!(account_id, "sync already in flight; skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let connection = self
            .store
            .get_connection(account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("connection {}", account_id)))?;

        if !connection.status.syncable() {
            return Ok(SyncOutcome::Skipped(connection.status));
        }

        let now = Utc::now();
        let today = now.date_naive();
        let mut stats = SyncStats::default();

        let credentials = match self.ensure_credentials(&connection, now).await? {
            Some(c) => c,
            None => return Ok(SyncOutcome::NeedsReauth),
        };

        // Fetch new transactions since the last sync
        let since = connection.last_synced_at.map(|t| t.date_naive());
        let fetched = match self
            .feed
            .fetch_transactions(account_id, &credentials.access_token, since)
            .await
        {
            Ok(r) => r,
            Err(e) if e.kind() == ErrorKind::Credential => {
                self.store
                    .set_connection_status(account_id, ConnectionStatus::TokenError, Some(&e.to_string()))
                    .await?;
                return Ok(SyncOutcome::NeedsReauth);
            }
            Err(e) => {
                self.store
                    .set_connection_status(account_id, connection.status, Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };
        stats.fetched = fetched.transactions.len();
        stats.skipped_records = fetched.skipped;

        // Persist, deduplicating on external id
        let inserted = self
            .store
            .upsert_transactions(account_id, connection.user_id, &fetched.transactions)
            .await?;
        stats.inserted = inserted.len();

        // Classify every new transaction; the enrichment service is
        // optional and its failure falls back to the local rule cascade
        let labels_by_external: HashMap<&str, &[String]> = fetched
            .transactions
            .iter()
            .map(|t| (t.external_id.as_str(), t.labels.as_slice()))
            .collect();
        let (enriched, fallback) = self
            .classify_new(&connection, &inserted, &labels_by_external)
            .await?;
        stats.enriched = enriched;
        stats.fallback_classified = fallback;

        // Ghost-pair pass over the user's entire transaction set
        let user_transactions = self.store.list_user_transactions(connection.user_id).await?;
        let pairs = detect_ghost_pairs(&user_transactions);
        stats.ghost_pairs = pairs.len();

        let mut touched_accounts: HashSet<i64> = HashSet::new();
        touched_accounts.insert(account_id);
        for pair in &pairs {
            let (a, b) = self.store.apply_ghost_pair(pair).await?;
            touched_accounts.insert(a);
            touched_accounts.insert(b);
        }

        // Recurring pass, on the post-mutation view
        let user_transactions = self.store.list_user_transactions(connection.user_id).await?;
        let (upserted, deactivated) = self
            .refresh_patterns(connection.user_id, &user_transactions, today)
            .await?;
        stats.patterns_upserted = upserted;
        stats.patterns_deactivated = deactivated;

        // Recalibrate every account a pair mutation touched, plus the
        // one just synced, plus the user-level aggregate
        stats.summaries_recalibrated = self
            .recalibrate(connection.user_id, &touched_accounts, &user_transactions, today, now)
            .await?;

        self.store.mark_synced(account_id, now).await?;
        self.store
            .set_connection_status(account_id, ConnectionStatus::Active, None)
            .await?;

        info!(
            account_id,
            inserted = stats.inserted,
            ghost_pairs = stats.ghost_pairs,
            "sync complete"
        );
        Ok(SyncOutcome::Completed(stats))
    }

    /// Recalibrate summaries on demand (no fetch), e.g. from the monthly
    /// recalibration trigger of an otherwise idle account.
    pub async fn recalibrate_account(&self, account_id: i64) -> Result<()> {
        let connection = self
            .store
            .get_connection(account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("connection {}", account_id)))?;
        let now = Utc::now();
        let transactions = self.store.list_user_transactions(connection.user_id).await?;
        let mut accounts = HashSet::new();
        accounts.insert(account_id);
        self.recalibrate(connection.user_id, &accounts, &transactions, now.date_naive(), now)
            .await?;
        Ok(())
    }

    fn is_stale(&self, connection: &AccountConnection, now: DateTime<Utc>) -> bool {
        match connection.last_synced_at {
            Some(t) => now - t >= Duration::minutes(self.config.staleness_minutes),
            None => true,
        }
    }

    /// Valid credentials, refreshing when possible. `None` means the
    /// account needs user re-auth and the caller should stop.
    async fn ensure_credentials(
        &self,
        connection: &AccountConnection,
        now: DateTime<Utc>,
    ) -> Result<Option<Credentials>> {
        if !connection.credentials.is_expired(now) {
            return Ok(Some(connection.credentials.clone()));
        }

        let Some(refresh_token) = connection.credentials.refresh_token.clone() else {
            self.store
                .set_connection_status(
                    connection.account_id,
                    ConnectionStatus::Expired,
                    Some("credential expired; user re-auth required"),
                )
                .await?;
            return Ok(None);
        };

        match self.feed.refresh_credentials(&refresh_token).await {
            Ok(fresh) => {
                self.store
                    .set_credentials(connection.account_id, &fresh)
                    .await?;
                self.store
                    .set_connection_status(connection.account_id, ConnectionStatus::Active, None)
                    .await?;
                debug!(account_id = connection.account_id, "credentials refreshed");
                Ok(Some(fresh))
            }
            Err(e) if e.kind() == ErrorKind::Credential => {
                // Terminal until the user reconnects
                self.store
                    .set_connection_status(
                        connection.account_id,
                        ConnectionStatus::TokenError,
                        Some(&e.to_string()),
                    )
                    .await?;
                Ok(None)
            }
            Err(e) => {
                self.store
                    .set_connection_status(
                        connection.account_id,
                        connection.status,
                        Some(&e.to_string()),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Classify the newly inserted transactions. Returns
    /// (service-enriched, fallback-classified) counts.
    async fn classify_new(
        &self,
        connection: &AccountConnection,
        inserted: &[i64],
        labels_by_external: &HashMap<&str, &[String]>,
    ) -> Result<(usize, usize)> {
        if inserted.is_empty() {
            return Ok((0, 0));
        }

        let mut transactions = Vec::with_capacity(inserted.len());
        for id in inserted {
            if let Some(tx) = self.store.get_transaction(*id).await? {
                transactions.push(tx);
            }
        }

        let mut service_rows: HashMap<i64, EnrichedRow> = HashMap::new();
        if let Some(enricher) = &self.enricher {
            let request = EnrichmentRequest {
                user_id: connection.user_id,
                window_months: self.config.enrichment_window_months,
                account_holder: None,
                country: None,
                email_context_granted: false,
                transactions: transactions
                    .iter()
                    .map(|t| EnrichmentItem {
                        id: t.id,
                        description: t.description.clone(),
                        amount_cents: t.amount_cents,
                        direction: t.direction,
                        date: t.date,
                        labels: labels_by_external
                            .get(t.external_id.as_str())
                            .map(|l| l.to_vec())
                            .unwrap_or_default(),
                    })
                    .collect(),
            };

            match enricher.enrich(&request).await {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome {
                            EnrichmentOutcome::Enriched(row) => {
                                service_rows.insert(row.id, row);
                            }
                            EnrichmentOutcome::Failed { id, reason } => {
                                debug!(transaction_id = id, reason = %reason, "row-level enrichment failure");
                            }
                        }
                    }
                }
                Err(e) => {
                    // Documented fallback: classification must not block
                    // the sync when the service is down
                    warn!(error = %e, "enrichment service failed; using local classification");
                }
            }
        }

        let mut enriched = 0;
        let mut fallback = 0;
        for tx in &transactions {
            let labels = labels_by_external
                .get(tx.external_id.as_str())
                .copied()
                .unwrap_or(&[]);
            let update = match service_rows.get(&tx.id).and_then(service_update) {
                Some(update) => {
                    enriched += 1;
                    update
                }
                None => {
                    fallback += 1;
                    local_update(tx, labels)
                }
            };
            self.store.apply_classification(tx.id, &update).await?;
        }
        Ok((enriched, fallback))
    }

    /// Upsert freshly detected patterns (preserving user dismissals) and
    /// deactivate active patterns that stopped recurring.
    async fn refresh_patterns(
        &self,
        user_id: i64,
        transactions: &[Transaction],
        today: NaiveDate,
    ) -> Result<(usize, usize)> {
        let detected = detect_recurring(user_id, transactions, today);

        let existing = self.store.list_patterns(user_id, false).await?;
        let dismissed: HashSet<&str> = existing
            .iter()
            .filter(|p| !p.active)
            .map(|p| p.merchant.as_str())
            .collect();

        let mut detected_names: HashSet<String> = HashSet::new();
        for pattern in &detected {
            detected_names.insert(pattern.merchant.clone());
            let mut pattern = pattern.clone();
            // A dismissal outlives re-detection
            if dismissed.contains(pattern.merchant.as_str()) {
                pattern.active = false;
            }
            self.store.upsert_pattern(&pattern).await?;
            if pattern.active {
                self.store
                    .mark_recurring(user_id, &pattern.merchant, pattern.frequency)
                    .await?;
            }
        }

        let mut deactivated = 0;
        for pattern in existing.iter().filter(|p| p.active) {
            if !detected_names.contains(&pattern.merchant) {
                self.store
                    .set_pattern_active(user_id, &pattern.merchant, false)
                    .await?;
                deactivated += 1;
            }
        }

        Ok((detected.len(), deactivated))
    }

    /// Replace the summary of every touched account plus the user-level
    /// aggregate, and stamp each account's next recalibration date.
    async fn recalibrate(
        &self,
        user_id: i64,
        accounts: &HashSet<i64>,
        transactions: &[Transaction],
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let next_recalibration = Frequency::Monthly.advance(today, today.day());

        let mut count = 0;
        for &account_id in accounts {
            let account_transactions: Vec<Transaction> = transactions
                .iter()
                .filter(|t| t.account_id == account_id)
                .cloned()
                .collect();
            let summary =
                compute_summary(Some(account_id), user_id, &account_transactions, today, now);
            self.store.replace_summary(&summary).await?;
            self.store
                .set_next_recalibration(account_id, next_recalibration)
                .await?;
            count += 1;
        }

        // User-level aggregate over the union, so cross-account
        // exclusions count exactly once
        let aggregate = compute_summary(None, user_id, transactions, today, now);
        self.store.replace_summary(&aggregate).await?;
        count += 1;

        Ok(count)
    }
}

fn recalibration_due(connection: &AccountConnection, today: NaiveDate) -> bool {
    connection
        .next_recalibration_at
        .map(|d| d <= today)
        .unwrap_or(false)
}

/// Build an update from a service row; `None` when the service supplied
/// no usable category (the local cascade decides instead).
fn service_update(row: &EnrichedRow) -> Option<EnrichmentUpdate> {
    let category = row.category?;
    Some(EnrichmentUpdate {
        merchant: row.merchant.clone(),
        category,
        budget_group: category.budget_group(),
        exclude_from_analysis: row.exclude_from_analysis,
        source: EnrichmentSource::Service,
        confidence: Some(row.confidence),
        reasoning: row.reasoning.clone(),
    })
}

/// Deterministic local classification for one persisted transaction.
fn local_update(tx: &Transaction, labels: &[String]) -> EnrichmentUpdate {
    let input = ClassifierInput {
        description: &tx.description,
        merchant: tx.merchant.as_deref(),
        labels,
        direction: Some(tx.direction),
        has_linked_transaction: tx.linked_transaction_id.is_some(),
        context_hint: None,
    };
    let decision = classify(&input);
    EnrichmentUpdate {
        merchant: tx.merchant.clone(),
        category: decision.category,
        budget_group: decision.group,
        exclude_from_analysis: decision.exclude_from_analysis,
        source: EnrichmentSource::Fallback,
        confidence: Some(decision.confidence),
        reasoning: Some(decision.reasoning),
    }
}
