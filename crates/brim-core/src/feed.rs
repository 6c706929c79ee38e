//! Banking feed client
//!
//! Talks to the upstream banking aggregator: per-account transaction
//! lists and credential refresh. Wire records are deserialized
//! permissively and validated into [`NewTransaction`] here, at the
//! boundary; malformed rows are logged and skipped rather than aborting
//! the account. Credential failures surface as typed errors so the sync
//! engine can pick refresh vs. re-auth without string matching.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{Credentials, Direction, NewTransaction};

/// Result of one transaction fetch
#[derive(Debug, Default)]
pub struct FetchResult {
    pub transactions: Vec<NewTransaction>,
    /// Malformed rows dropped at the boundary
    pub skipped: usize,
}

/// The upstream banking aggregator, at its interface boundary
#[async_trait]
pub trait BankingFeed: Send + Sync {
    /// Fetch transactions for one account, optionally only those on or
    /// after `since`.
    async fn fetch_transactions(
        &self,
        account_id: i64,
        access_token: &str,
        since: Option<NaiveDate>,
    ) -> Result<FetchResult>;

    /// Exchange a refresh credential for a new access credential.
    async fn refresh_credentials(&self, refresh_token: &str) -> Result<Credentials>;
}

/// Raw wire shape; everything optional, validated below
#[derive(Debug, Deserialize)]
struct WireTransaction {
    id: Option<String>,
    date: Option<String>,
    amount: Option<i64>,
    currency: Option<String>,
    description: Option<String>,
    direction: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTransactionPage {
    #[serde(default)]
    transactions: Vec<WireTransaction>,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in_secs: i64,
}

/// Validate one wire record into a [`NewTransaction`]
fn validate(raw: WireTransaction) -> Result<NewTransaction> {
    let external_id = raw
        .id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidRecord("missing external id".into()))?;

    let date_str = raw
        .date
        .ok_or_else(|| Error::InvalidRecord(format!("{}: missing date", external_id)))?;
    // Accept bare ISO dates and full timestamps
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .or_else(|_| {
            chrono::DateTime::parse_from_rfc3339(&date_str).map(|dt| dt.date_naive())
        })
        .map_err(|_| Error::InvalidRecord(format!("{}: bad date '{}'", external_id, date_str)))?;

    let amount_cents = raw
        .amount
        .ok_or_else(|| Error::InvalidRecord(format!("{}: missing amount", external_id)))?;

    let direction = match raw.direction.as_deref() {
        Some(s) => s
            .parse::<Direction>()
            .map_err(|e| Error::InvalidRecord(format!("{}: {}", external_id, e)))?,
        // Fall back to the amount sign
        None if amount_cents < 0 => Direction::Outgoing,
        None => Direction::Incoming,
    };

    Ok(NewTransaction {
        external_id,
        date,
        description: raw.description.unwrap_or_default(),
        amount_cents,
        direction,
        currency: raw.currency.unwrap_or_else(|| "USD".to_string()),
        labels: raw.labels,
        category_hint: raw.category,
    })
}

/// HTTP implementation of [`BankingFeed`]
#[derive(Clone)]
pub struct HttpBankingFeed {
    http_client: Client,
    base_url: String,
}

impl HttpBankingFeed {
    pub fn new(base_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create from `BRIM_FEED_URL`, if set
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("BRIM_FEED_URL").ok()?;
        Some(Self::new(&url))
    }
}

#[async_trait]
impl BankingFeed for HttpBankingFeed {
    async fn fetch_transactions(
        &self,
        account_id: i64,
        access_token: &str,
        since: Option<NaiveDate>,
    ) -> Result<FetchResult> {
        let url = format!("{}/accounts/{}/transactions", self.base_url, account_id);
        let mut request = self.http_client.get(&url).bearer_auth(access_token);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_string())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::FeedUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::CredentialRejected(format!(
                    "feed returned {} for account {}",
                    response.status(),
                    account_id
                )));
            }
            status if !status.is_success() => {
                return Err(Error::FeedUnavailable(format!(
                    "feed returned {} for account {}",
                    status, account_id
                )));
            }
            _ => {}
        }

        let page: WireTransactionPage = response.json().await?;

        let mut result = FetchResult::default();
        for raw in page.transactions {
            match validate(raw) {
                Ok(tx) => result.transactions.push(tx),
                Err(e) => {
                    warn!(account_id, error = %e, "skipping malformed feed record");
                    result.skipped += 1;
                }
            }
        }
        debug!(
            account_id,
            fetched = result.transactions.len(),
            skipped = result.skipped,
            "feed fetch complete"
        );
        Ok(result)
    }

    async fn refresh_credentials(&self, refresh_token: &str) -> Result<Credentials> {
        let url = format!("{}/oauth/refresh", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| Error::FeedUnavailable(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST => {
                return Err(Error::CredentialRejected(format!(
                    "refresh rejected with {}",
                    response.status()
                )));
            }
            status if !status.is_success() => {
                return Err(Error::FeedUnavailable(format!(
                    "refresh returned {}",
                    status
                )));
            }
            _ => {}
        }

        let body: RefreshResponse = response.json().await?;
        Ok(Credentials {
            access_token: body.access_token,
            refresh_token: body.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at: Utc::now() + Duration::seconds(body.expires_in_secs),
        })
    }
}

/// Scriptable in-memory feed for tests
#[derive(Default)]
pub struct MockFeed {
    transactions: std::sync::Mutex<Vec<NewTransaction>>,
    fail_fetch: std::sync::atomic::AtomicBool,
    fail_refresh: std::sync::atomic::AtomicBool,
    fetch_calls: std::sync::atomic::AtomicUsize,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transactions(transactions: Vec<NewTransaction>) -> Self {
        Self {
            transactions: std::sync::Mutex::new(transactions),
            ..Self::default()
        }
    }

    pub fn set_transactions(&self, transactions: Vec<NewTransaction>) {
        *self.transactions.lock().unwrap() = transactions;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of fetches actually performed; used to assert the
    /// concurrency guard suppressed duplicate work.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl BankingFeed for MockFeed {
    async fn fetch_transactions(
        &self,
        _account_id: i64,
        _access_token: &str,
        since: Option<NaiveDate>,
    ) -> Result<FetchResult> {
        self.fetch_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail_fetch.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::FeedUnavailable("mock feed down".into()));
        }
        let transactions = self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| since.map(|s| t.date >= s).unwrap_or(true))
            .cloned()
            .collect();
        Ok(FetchResult {
            transactions,
            skipped: 0,
        })
    }

    async fn refresh_credentials(&self, refresh_token: &str) -> Result<Credentials> {
        if self.fail_refresh.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::CredentialRejected("mock refresh rejected".into()));
        }
        Ok(Credentials {
            access_token: "refreshed-token".to_string(),
            refresh_token: Some(refresh_token.to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }
}
