//! Enrichment service client
//!
//! The enrichment service is optional and unreliable by contract:
//! absence or failure always has a local fallback (the deterministic
//! rule cascade in [`crate::classify`]). Responses are validated into
//! sum-typed per-row outcomes here at the boundary; the rest of the
//! pipeline never sees partial JSON.

pub mod stream;

pub use stream::{EnrichStream, EventDecoder, StreamEvent};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Category, Direction};

/// One transaction handed to the service
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentItem {
    /// Store id, echoed back so responses can be correlated
    pub id: i64,
    pub description: String,
    pub amount_cents: i64,
    pub direction: Direction,
    pub date: chrono::NaiveDate,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Batch enrichment request
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentRequest {
    pub user_id: i64,
    /// Analysis window the service should consider, in months
    pub window_months: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Whether the user granted email-context access
    pub email_context_granted: bool,
    pub transactions: Vec<EnrichmentItem>,
}

/// A validated per-transaction enrichment
#[derive(Debug, Clone)]
pub struct EnrichedRow {
    pub id: i64,
    pub merchant: Option<String>,
    pub labels: Vec<String>,
    /// Only categories this crate knows survive the boundary
    pub category: Option<Category>,
    pub recurring_hint: bool,
    pub confidence: f64,
    pub reasoning: Option<String>,
    // Cascade-stage markers from the service
    pub exclude_from_analysis: bool,
    pub transaction_type: Option<String>,
    pub linked_transaction_id: Option<i64>,
}

/// Per-row outcome: the service may fail individual rows without
/// failing the batch.
#[derive(Debug, Clone)]
pub enum EnrichmentOutcome {
    Enriched(EnrichedRow),
    Failed { id: i64, reason: String },
}

/// The enrichment service, at its interface boundary
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<Vec<EnrichmentOutcome>>;

    async fn health_check(&self) -> bool;
}

/// Raw wire row; everything optional, defaulted below
#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireRow {
    id: Option<i64>,
    merchant: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    category: Option<String>,
    #[serde(default)]
    recurring: bool,
    confidence: Option<f64>,
    reasoning: Option<String>,
    #[serde(default)]
    exclude_from_analysis: bool,
    transaction_type: Option<String>,
    linked_transaction_id: Option<i64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: Vec<WireRow>,
}

/// Validate one wire row into an outcome. Unknown category strings
/// degrade to `None` rather than failing the row.
pub(crate) fn validate_row(raw: WireRow) -> Result<EnrichmentOutcome> {
    let id = raw
        .id
        .ok_or_else(|| Error::InvalidRecord("enrichment row missing id".into()))?;

    if let Some(reason) = raw.error {
        return Ok(EnrichmentOutcome::Failed { id, reason });
    }

    let category = raw.category.as_deref().and_then(|s| s.parse().ok());

    Ok(EnrichmentOutcome::Enriched(EnrichedRow {
        id,
        merchant: raw.merchant.filter(|m| !m.is_empty()),
        labels: raw.labels,
        category,
        recurring_hint: raw.recurring,
        confidence: raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        reasoning: raw.reasoning,
        exclude_from_analysis: raw.exclude_from_analysis,
        transaction_type: raw.transaction_type,
        linked_transaction_id: raw.linked_transaction_id,
    }))
}

/// HTTP implementation of [`Enricher`]
#[derive(Clone)]
pub struct HttpEnricher {
    http_client: Client,
    base_url: String,
}

impl HttpEnricher {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create from `BRIM_ENRICH_URL`, if set
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("BRIM_ENRICH_URL").ok()?;
        Some(Self::new(&url))
    }

    pub(crate) fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<Vec<EnrichmentOutcome>> {
        let url = format!("{}/enrich", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::EnrichmentUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::EnrichmentUnavailable(format!(
                "enrichment service returned {}",
                response.status()
            )));
        }

        let body: WireResponse = response.json().await?;
        let mut outcomes = Vec::with_capacity(body.results.len());
        for raw in body.results {
            match validate_row(raw) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => debug!(error = %e, "dropping unusable enrichment row"),
            }
        }
        Ok(outcomes)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http_client.get(&url).send().await {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Scriptable in-memory enricher for tests
#[derive(Default)]
pub struct MockEnricher {
    rows: std::sync::Mutex<Vec<EnrichedRow>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MockEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<EnrichedRow>) -> Self {
        Self {
            rows: std::sync::Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl Enricher for MockEnricher {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<Vec<EnrichmentOutcome>> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::EnrichmentUnavailable("mock enricher down".into()));
        }
        let rows = self.rows.lock().unwrap();
        Ok(request
            .transactions
            .iter()
            .filter_map(|item| {
                rows.iter()
                    .find(|r| r.id == item.id)
                    .cloned()
                    .map(EnrichmentOutcome::Enriched)
            })
            .collect())
    }

    async fn health_check(&self) -> bool {
        !self.fail.load(std::sync::atomic::Ordering::SeqCst)
    }
}
