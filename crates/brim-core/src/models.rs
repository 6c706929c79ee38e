//! Domain models for Brim

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Direction of money movement relative to the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "incoming" | "credit" | "in" => Ok(Self::Incoming),
            "outgoing" | "debit" | "out" => Ok(Self::Outgoing),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Budget groups a category rolls up into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetGroup {
    Income,
    FixedCost,
    Essential,
    Discretionary,
    Debt,
    Transfer,
    Other,
}

impl BudgetGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::FixedCost => "fixed_cost",
            Self::Essential => "essential",
            Self::Discretionary => "discretionary",
            Self::Debt => "debt",
            Self::Transfer => "transfer",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for BudgetGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction categories
///
/// Each category maps to exactly one [`BudgetGroup`]; the aggregator only
/// ever looks at the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Salary,
    OtherIncome,
    Rent,
    Mortgage,
    Utilities,
    Insurance,
    Subscriptions,
    Groceries,
    Transport,
    Healthcare,
    Dining,
    Entertainment,
    Shopping,
    Travel,
    Personal,
    DebtPayment,
    Transfer,
    Other,
}

impl Category {
    pub fn budget_group(&self) -> BudgetGroup {
        match self {
            Self::Salary | Self::OtherIncome => BudgetGroup::Income,
            Self::Rent | Self::Mortgage | Self::Utilities | Self::Insurance => {
                BudgetGroup::FixedCost
            }
            Self::Subscriptions => BudgetGroup::FixedCost,
            Self::Groceries | Self::Transport | Self::Healthcare => BudgetGroup::Essential,
            Self::Dining | Self::Entertainment | Self::Shopping | Self::Travel | Self::Personal => {
                BudgetGroup::Discretionary
            }
            Self::DebtPayment => BudgetGroup::Debt,
            Self::Transfer => BudgetGroup::Transfer,
            Self::Other => BudgetGroup::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Salary => "salary",
            Self::OtherIncome => "other_income",
            Self::Rent => "rent",
            Self::Mortgage => "mortgage",
            Self::Utilities => "utilities",
            Self::Insurance => "insurance",
            Self::Subscriptions => "subscriptions",
            Self::Groceries => "groceries",
            Self::Transport => "transport",
            Self::Healthcare => "healthcare",
            Self::Dining => "dining",
            Self::Entertainment => "entertainment",
            Self::Shopping => "shopping",
            Self::Travel => "travel",
            Self::Personal => "personal",
            Self::DebtPayment => "debt_payment",
            Self::Transfer => "transfer",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "salary" => Ok(Self::Salary),
            "other_income" => Ok(Self::OtherIncome),
            "rent" => Ok(Self::Rent),
            "mortgage" => Ok(Self::Mortgage),
            "utilities" => Ok(Self::Utilities),
            "insurance" => Ok(Self::Insurance),
            "subscriptions" => Ok(Self::Subscriptions),
            "groceries" => Ok(Self::Groceries),
            "transport" => Ok(Self::Transport),
            "healthcare" => Ok(Self::Healthcare),
            "dining" => Ok(Self::Dining),
            "entertainment" => Ok(Self::Entertainment),
            "shopping" => Ok(Self::Shopping),
            "travel" => Ok(Self::Travel),
            "personal" => Ok(Self::Personal),
            "debt_payment" => Ok(Self::DebtPayment),
            "transfer" => Ok(Self::Transfer),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where an enrichment decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentSource {
    /// The external enrichment service supplied the classification.
    Service,
    /// The local rule cascade supplied it (service absent or failed).
    Fallback,
}

impl EnrichmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Fallback => "fallback",
        }
    }
}

/// Recurrence cadence classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Fortnightly,
    Monthly,
    Quarterly,
    Annual,
}

impl Frequency {
    /// Target gap in days for this cadence
    pub fn target_days(&self) -> i64 {
        match self {
            Self::Weekly => 7,
            Self::Fortnightly => 14,
            Self::Monthly => 30,
            Self::Quarterly => 91,
            Self::Annual => 365,
        }
    }

    /// Inclusive day-gap window a median must fall into to classify as
    /// this cadence
    pub fn window(&self) -> (i64, i64) {
        match self {
            Self::Weekly => (5, 9),
            Self::Fortnightly => (12, 16),
            Self::Monthly => (27, 34),
            Self::Quarterly => (85, 100),
            Self::Annual => (350, 380),
        }
    }

    pub fn all() -> &'static [Frequency] {
        &[
            Self::Weekly,
            Self::Fortnightly,
            Self::Monthly,
            Self::Quarterly,
            Self::Annual,
        ]
    }

    /// Advance `from` by one period, clamping to month length where the
    /// cadence is month-based (a bill anchored on the 31st lands on the
    /// last day of shorter months).
    pub fn advance(&self, from: NaiveDate, anchor_day: u32) -> NaiveDate {
        match self {
            Self::Weekly => from + chrono::Duration::days(7),
            Self::Fortnightly => from + chrono::Duration::days(14),
            Self::Monthly => add_months_clamped(from, 1, anchor_day),
            Self::Quarterly => add_months_clamped(from, 3, anchor_day),
            Self::Annual => add_months_clamped(from, 12, anchor_day),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Fortnightly => "fortnightly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Annual => "annual",
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "fortnightly" | "biweekly" => Ok(Self::Fortnightly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "annual" | "yearly" => Ok(Self::Annual),
            _ => Err(format!("Unknown frequency: {}", s)),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Number of days in the month containing `date`
pub fn days_in_month(date: NaiveDate) -> u32 {
    let (y, m) = (date.year(), date.month());
    let first_next = if m == 12 {
        NaiveDate::from_ymd_opt(y + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(y, m + 1, 1)
    };
    // First of the month is always constructible
    let first = NaiveDate::from_ymd_opt(y, m, 1).unwrap();
    (first_next.unwrap() - first).num_days() as u32
}

/// Add `months` to `from`, targeting `anchor_day` and clamping to the
/// destination month's length.
fn add_months_clamped(from: NaiveDate, months: u32, anchor_day: u32) -> NaiveDate {
    let total = from.year() * 12 + from.month0() as i32 + months as i32;
    let (year, month0) = (total.div_euclid(12), total.rem_euclid(12) as u32);
    let first = NaiveDate::from_ymd_opt(year, month0 + 1, 1).unwrap();
    let day = anchor_day.max(1).min(days_in_month(first));
    NaiveDate::from_ymd_opt(year, month0 + 1, day).unwrap()
}

/// One bank ledger entry
///
/// Ingestion fields are set once from the upstream feed (idempotent on
/// external id). Enrichment fields are owned exclusively by the pipeline
/// and may be rewritten by any later run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    /// Upstream identifier, unique per account; the dedupe key
    pub external_id: String,
    pub account_id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub description: String,
    /// Signed minor units: negative = outgoing, positive = incoming
    pub amount_cents: i64,
    pub direction: Direction,
    pub currency: String,

    // Enrichment fields
    pub merchant: Option<String>,
    pub category: Option<Category>,
    pub budget_group: Option<BudgetGroup>,
    pub recurring: bool,
    pub recurring_frequency: Option<Frequency>,
    pub exclude_from_analysis: bool,
    /// Invariant: true implies `linked_transaction_id` points at a
    /// different-account, same-user transaction with equal absolute
    /// amount and opposite direction.
    pub is_internal_transfer: bool,
    pub linked_transaction_id: Option<i64>,
    /// Shared identifier across both sides of a ghost pair
    pub pair_id: Option<String>,
    pub enrichment_source: Option<EnrichmentSource>,
    pub enrichment_confidence: Option<f64>,
    /// Free-form trace explaining the classification decision
    pub reasoning: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn abs_amount_cents(&self) -> i64 {
        self.amount_cents.abs()
    }

    /// Eligible for ghost-pair consideration: not yet flagged as a
    /// transfer and not yet linked to a partner.
    pub fn pairable(&self) -> bool {
        !self.is_internal_transfer
            && self.linked_transaction_id.is_none()
            && self.category != Some(Category::Transfer)
    }
}

/// A validated feed record, pre-insert
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub external_id: String,
    pub date: NaiveDate,
    pub description: String,
    pub amount_cents: i64,
    pub direction: Direction,
    pub currency: String,
    /// Pre-existing labels supplied by the bank, if any
    pub labels: Vec<String>,
    /// Bank-provided category hint, if any
    pub category_hint: Option<String>,
}

/// Transient ghost-pair detector output; the caller applies the two
/// symmetric transaction mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhostPairMatch {
    pub outgoing_id: i64,
    pub incoming_id: i64,
    pub pair_id: String,
    pub amount_cents: i64,
    pub date_gap_days: i64,
}

/// One inferred periodic merchant relationship per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringPattern {
    pub user_id: i64,
    /// Normalized merchant name; the upsert key together with `user_id`
    pub merchant: String,
    pub frequency: Frequency,
    pub average_amount_cents: i64,
    pub min_amount_cents: i64,
    pub max_amount_cents: i64,
    /// Day-of-week (1-7, weekly) or day-of-month (1-31, otherwise)
    pub anchor_day: u32,
    pub last_seen: NaiveDate,
    pub next_due: NaiveDate,
    pub occurrences: usize,
    /// 0.0 - 1.0; patterns below 0.5 are never emitted
    pub confidence: f64,
    pub active: bool,
}

/// Status of an active pattern within the current calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Paid,
    Overdue,
    Pending,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Pending => "pending",
        }
    }
}

/// A recurring pattern projected onto the current month
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpcomingBill {
    pub merchant: String,
    pub frequency: Frequency,
    pub expected_amount_cents: i64,
    pub due_date: NaiveDate,
    pub status: BillStatus,
    pub confidence: f64,
}

/// Pacing block for the current, still-open month
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentMonthPacing {
    pub spend_to_date_cents: i64,
    pub income_to_date_cents: i64,
    pub day_of_month: u32,
    pub days_in_month: u32,
    /// Linear day-rate projection to month end
    pub projected_spend_cents: i64,
    pub projected_income_cents: i64,
}

/// Kind of lender a detected debt payment went to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtType {
    CreditCard,
    Loan,
    Bnpl,
}

impl DebtType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "credit_card",
            Self::Loan => "loan",
            Self::Bnpl => "bnpl",
        }
    }
}

/// Outgoing payments matching a known lender keyword, summed per keyword
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedDebtPayment {
    pub keyword: String,
    pub debt_type: DebtType,
    pub total_cents: i64,
    pub occurrences: usize,
}

/// Derived, fully replaceable analysis snapshot
///
/// Recomputed wholesale on every recalibration, never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountAnalysisSummary {
    /// None for the user-level aggregate
    pub account_id: Option<i64>,
    pub user_id: i64,

    pub avg_monthly_income_cents: i64,
    pub avg_salary_cents: i64,
    pub avg_other_income_cents: i64,
    pub avg_fixed_costs_cents: i64,
    pub avg_essentials_cents: i64,
    pub avg_discretionary_cents: i64,
    pub avg_debt_payments_cents: i64,

    /// Never negative
    pub safe_to_spend_cents: i64,
    /// Never negative
    pub available_for_debt_cents: i64,

    /// Distinct closed months the averages are based on, capped at 6;
    /// 0 means the figures are a projection of the active month
    pub closed_months_analyzed: u32,

    pub current_month_pacing: CurrentMonthPacing,
    pub detected_debt_payments: Vec<DetectedDebtPayment>,

    pub computed_at: DateTime<Utc>,
}

/// Connection state for a linked bank account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Token valid, syncs normally
    Active,
    /// Token needs refresh or user re-auth
    Expired,
    /// Credential rejected; skipped until the user reconnects
    TokenError,
    /// User disconnected the account
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::TokenError => "token_error",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether the timer should ever attempt a sync in this state
    pub fn syncable(&self) -> bool {
        matches!(self, Self::Active | Self::Expired)
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "token_error" => Ok(Self::TokenError),
            "disconnected" => Ok(Self::Disconnected),
            _ => Err(format!("Unknown connection status: {}", s)),
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access credentials for an account's banking feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// One connected account as the scheduler sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConnection {
    pub account_id: i64,
    pub user_id: i64,
    pub status: ConnectionStatus,
    pub credentials: Credentials,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Idle accounts still get a fresh summary once this date passes
    pub next_recalibration_at: Option<NaiveDate>,
    /// Human-readable reason for the last failure, for the outer layer
    pub last_error: Option<String>,
}
