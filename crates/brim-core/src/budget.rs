//! Budget aggregation
//!
//! Turns a stream of classified transactions into monthly financial
//! averages usable for a debt-repayment budget recommendation, while
//! staying resilient to an incomplete current month.
//!
//! Transactions are split into closed history (complete calendar months
//! strictly before the current one, the most recent 6 distinct months
//! with data) and the active month. Averages come from closed history;
//! the active month only drives the pacing block, unless there is no
//! closed history at all, in which case a linear projection of the
//! active month stands in (marked by `closed_months_analyzed = 0`).

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::models::{
    days_in_month, AccountAnalysisSummary, BudgetGroup, CurrentMonthPacing, DebtType,
    DetectedDebtPayment, Direction, Transaction,
};

/// Closed-history cap: averages never use more than this many months
pub const MAX_CLOSED_MONTHS: u32 = 6;

/// Lender keyword table for the debt-payment pass. Checked against the
/// lowercased merchant + description; each keyword accumulates its own
/// bucket.
const DEBT_KEYWORDS: &[(&str, DebtType)] = &[
    ("credit card", DebtType::CreditCard),
    ("visa payment", DebtType::CreditCard),
    ("mastercard", DebtType::CreditCard),
    ("american express", DebtType::CreditCard),
    ("amex", DebtType::CreditCard),
    ("capital one", DebtType::CreditCard),
    ("barclaycard", DebtType::CreditCard),
    ("loan payment", DebtType::Loan),
    ("loan repayment", DebtType::Loan),
    ("sofi", DebtType::Loan),
    ("lending club", DebtType::Loan),
    ("payday", DebtType::Loan),
    ("cash advance", DebtType::Loan),
    ("klarna", DebtType::Bnpl),
    ("afterpay", DebtType::Bnpl),
    ("clearpay", DebtType::Bnpl),
    ("affirm", DebtType::Bnpl),
    ("sezzle", DebtType::Bnpl),
];

#[derive(Debug, Default, Clone)]
struct GroupTotals {
    salary: i64,
    other_income: i64,
    fixed: i64,
    essentials: i64,
    discretionary: i64,
    debt: i64,
}

impl GroupTotals {
    fn income(&self) -> i64 {
        self.salary + self.other_income
    }

    fn add(&mut self, tx: &Transaction) {
        use crate::models::Category;
        match effective_group(tx) {
            BudgetGroup::Income => {
                if tx.category == Some(Category::Salary) {
                    self.salary += tx.abs_amount_cents();
                } else {
                    self.other_income += tx.abs_amount_cents();
                }
            }
            BudgetGroup::FixedCost => self.fixed += tx.abs_amount_cents(),
            BudgetGroup::Essential => self.essentials += tx.abs_amount_cents(),
            BudgetGroup::Discretionary => self.discretionary += tx.abs_amount_cents(),
            BudgetGroup::Debt => self.debt += tx.abs_amount_cents(),
            // Transfers never reach here (excluded); Other is ignored in
            // the averages but still counts toward pacing spend
            BudgetGroup::Transfer | BudgetGroup::Other => {}
        }
    }
}

/// A transaction's budget group, falling back from the enriched field to
/// the category mapping to a direction default.
fn effective_group(tx: &Transaction) -> BudgetGroup {
    if let Some(group) = tx.budget_group {
        return group;
    }
    if let Some(category) = tx.category {
        return category.budget_group();
    }
    match tx.direction {
        Direction::Incoming => BudgetGroup::Income,
        Direction::Outgoing => BudgetGroup::Other,
    }
}

fn month_key(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}

/// Compute a fully fresh analysis summary.
///
/// `account_id` of `None` computes the user-level aggregate (the caller
/// passes the union of the user's transactions so cross-account
/// exclusions are honored exactly once). The snapshot is meant to
/// replace any previous one wholesale.
pub fn compute_summary(
    account_id: Option<i64>,
    user_id: i64,
    transactions: &[Transaction],
    today: NaiveDate,
    now: DateTime<Utc>,
) -> AccountAnalysisSummary {
    let current_month = month_key(today);

    let included: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| !t.exclude_from_analysis && !t.is_internal_transfer)
        .collect();

    // Most recent closed months with data, newest first, capped
    let mut closed_months: Vec<(i32, u32)> = included
        .iter()
        .map(|t| month_key(t.date))
        .filter(|&m| m < current_month)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    closed_months.sort_unstable_by(|a, b| b.cmp(a));
    closed_months.truncate(MAX_CLOSED_MONTHS as usize);
    let window: HashSet<(i32, u32)> = closed_months.iter().copied().collect();
    let closed_months_analyzed = window.len() as u32;

    // Closed-history totals, per month for clarity of the divisor rule
    let mut by_month: BTreeMap<(i32, u32), GroupTotals> = BTreeMap::new();
    for tx in &included {
        let key = month_key(tx.date);
        if window.contains(&key) {
            by_month.entry(key).or_default().add(tx);
        }
    }
    let mut closed = GroupTotals::default();
    for totals in by_month.values() {
        closed.salary += totals.salary;
        closed.other_income += totals.other_income;
        closed.fixed += totals.fixed;
        closed.essentials += totals.essentials;
        closed.discretionary += totals.discretionary;
        closed.debt += totals.debt;
    }

    // Active month totals and pacing
    let mut active = GroupTotals::default();
    let mut spend_to_date: i64 = 0;
    let mut income_to_date: i64 = 0;
    for tx in &included {
        if month_key(tx.date) != current_month {
            continue;
        }
        active.add(tx);
        match tx.direction {
            Direction::Outgoing => spend_to_date += tx.abs_amount_cents(),
            Direction::Incoming => income_to_date += tx.abs_amount_cents(),
        }
    }

    let day_of_month = today.day();
    let days = days_in_month(today);
    let project = |to_date: i64| -> i64 {
        if day_of_month == 0 {
            return 0;
        }
        (to_date as f64 / day_of_month as f64 * days as f64).round() as i64
    };

    let pacing = CurrentMonthPacing {
        spend_to_date_cents: spend_to_date,
        income_to_date_cents: income_to_date,
        day_of_month,
        days_in_month: days,
        projected_spend_cents: project(spend_to_date),
        projected_income_cents: project(income_to_date),
    };

    // Averages: closed history over the distinct-months divisor, or a
    // projection of the active month for brand-new users
    let (avg_salary, avg_other_income, avg_fixed, avg_essentials, avg_discretionary, avg_debt) =
        if closed_months_analyzed > 0 {
            let n = closed_months_analyzed as i64;
            (
                closed.salary / n,
                closed.other_income / n,
                closed.fixed / n,
                closed.essentials / n,
                closed.discretionary / n,
                closed.debt / n,
            )
        } else {
            (
                project(active.salary),
                project(active.other_income),
                project(active.fixed),
                project(active.essentials),
                project(active.discretionary),
                project(active.debt),
            )
        };

    let avg_income = avg_salary + avg_other_income;
    let safe_to_spend = (avg_income - avg_fixed - avg_essentials).max(0);
    let available_for_debt = (safe_to_spend - avg_discretionary).max(0);

    AccountAnalysisSummary {
        account_id,
        user_id,
        avg_monthly_income_cents: avg_income,
        avg_salary_cents: avg_salary,
        avg_other_income_cents: avg_other_income,
        avg_fixed_costs_cents: avg_fixed,
        avg_essentials_cents: avg_essentials,
        avg_discretionary_cents: avg_discretionary,
        avg_debt_payments_cents: avg_debt,
        safe_to_spend_cents: safe_to_spend,
        available_for_debt_cents: available_for_debt,
        closed_months_analyzed,
        current_month_pacing: pacing,
        detected_debt_payments: detect_debt_payments(&included),
        computed_at: now,
    }
}

/// Keyword-driven pass over all non-excluded outgoing transactions,
/// including the active month. Sums per matched keyword.
fn detect_debt_payments(transactions: &[&Transaction]) -> Vec<DetectedDebtPayment> {
    let mut buckets: BTreeMap<&'static str, DetectedDebtPayment> = BTreeMap::new();

    for tx in transactions {
        if tx.direction != Direction::Outgoing {
            continue;
        }
        let text = format!(
            "{} {}",
            tx.merchant.as_deref().unwrap_or(""),
            tx.description
        )
        .to_lowercase();

        if let Some((keyword, debt_type)) =
            DEBT_KEYWORDS.iter().find(|(k, _)| text.contains(k)).copied()
        {
            let entry = buckets.entry(keyword).or_insert(DetectedDebtPayment {
                keyword: keyword.to_string(),
                debt_type,
                total_cents: 0,
                occurrences: 0,
            });
            entry.total_cents += tx.abs_amount_cents();
            entry.occurrences += 1;
        }
    }

    buckets.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn tx(
        id: i64,
        date: NaiveDate,
        cents: i64,
        direction: Direction,
        category: Category,
    ) -> Transaction {
        Transaction {
            id,
            external_id: format!("ext-{}", id),
            account_id: 1,
            user_id: 1,
            date,
            description: format!("{} payment", category),
            amount_cents: cents,
            direction,
            currency: "USD".into(),
            merchant: None,
            category: Some(category),
            budget_group: Some(category.budget_group()),
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
        }
    }

    #[test]
    fn seven_months_of_rent_caps_at_six() {
        // Monthly rent Jan..Jul, today mid-July: Jan..Jun closed, Jan
        // falls outside the 6-month cap only if there were 7 closed months
        let mut txs = Vec::new();
        for (i, m) in (1..=7).enumerate() {
            txs.push(tx(
                i as i64 + 1,
                d(2025, m, 1),
                -100_000,
                Direction::Outgoing,
                Category::Rent,
            ));
        }
        let s = compute_summary(Some(1), 1, &txs, d(2025, 7, 15), Utc::now());
        assert_eq!(s.closed_months_analyzed, 6);
        assert_eq!(s.avg_fixed_costs_cents, 100_000);
        // No income at all: floors hold
        assert_eq!(s.safe_to_spend_cents, 0);
        assert_eq!(s.available_for_debt_cents, 0);
    }

    #[test]
    fn eight_closed_months_drops_the_oldest_two() {
        // 8 closed months of rent; only the newest 6 enter the average
        let mut txs = Vec::new();
        for m in 1..=8 {
            txs.push(tx(
                m as i64,
                d(2024, m, 1),
                -100_000,
                Direction::Outgoing,
                Category::Rent,
            ));
        }
        // And one cheap month inside the window to shift the average
        txs.push(tx(
            99,
            d(2024, 8, 2),
            -40_000,
            Direction::Outgoing,
            Category::Groceries,
        ));
        let s = compute_summary(Some(1), 1, &txs, d(2024, 9, 10), Utc::now());
        assert_eq!(s.closed_months_analyzed, 6);
        // 6 months of rent in window / 6
        assert_eq!(s.avg_fixed_costs_cents, 100_000);
        assert_eq!(s.avg_essentials_cents, 40_000 / 6);
    }

    #[test]
    fn divisor_is_months_with_data_not_calendar_distance() {
        // Data in only 3 of the last 6 months: divide by 3
        let txs = vec![
            tx(1, d(2025, 1, 5), -30_000, Direction::Outgoing, Category::Groceries),
            tx(2, d(2025, 3, 5), -30_000, Direction::Outgoing, Category::Groceries),
            tx(3, d(2025, 5, 5), -30_000, Direction::Outgoing, Category::Groceries),
        ];
        let s = compute_summary(Some(1), 1, &txs, d(2025, 6, 20), Utc::now());
        assert_eq!(s.closed_months_analyzed, 3);
        assert_eq!(s.avg_essentials_cents, 30_000);
    }

    #[test]
    fn new_user_falls_back_to_projection() {
        // First month: 10 days in, $200 salary and $50 groceries
        let txs = vec![
            tx(1, d(2025, 6, 3), 20_000, Direction::Incoming, Category::Salary),
            tx(2, d(2025, 6, 8), -5_000, Direction::Outgoing, Category::Groceries),
        ];
        let s = compute_summary(Some(1), 1, &txs, d(2025, 6, 10), Utc::now());
        assert_eq!(s.closed_months_analyzed, 0);
        // Linear projection: 30 days / 10 elapsed = 3x
        assert_eq!(s.avg_salary_cents, 60_000);
        assert_eq!(s.avg_essentials_cents, 15_000);
        assert_eq!(s.safe_to_spend_cents, 45_000);
    }

    #[test]
    fn pacing_reflects_active_month_only() {
        let txs = vec![
            // Closed history
            tx(1, d(2025, 5, 5), 300_000, Direction::Incoming, Category::Salary),
            tx(2, d(2025, 5, 9), -40_000, Direction::Outgoing, Category::Groceries),
            // Active month
            tx(3, d(2025, 6, 2), 300_000, Direction::Incoming, Category::Salary),
            tx(4, d(2025, 6, 10), -60_000, Direction::Outgoing, Category::Dining),
        ];
        let s = compute_summary(Some(1), 1, &txs, d(2025, 6, 15), Utc::now());
        let p = &s.current_month_pacing;
        assert_eq!(p.spend_to_date_cents, 60_000);
        assert_eq!(p.income_to_date_cents, 300_000);
        assert_eq!(p.day_of_month, 15);
        assert_eq!(p.days_in_month, 30);
        assert_eq!(p.projected_spend_cents, 120_000);
        assert_eq!(p.projected_income_cents, 600_000);
    }

    #[test]
    fn excluded_and_transfer_rows_never_contribute() {
        let mut ghost = tx(1, d(2025, 5, 5), -50_000, Direction::Outgoing, Category::Transfer);
        ghost.exclude_from_analysis = true;
        ghost.is_internal_transfer = true;
        ghost.linked_transaction_id = Some(2);
        let mut refund = tx(2, d(2025, 5, 8), 2_000, Direction::Incoming, Category::Other);
        refund.exclude_from_analysis = true;
        let real = tx(3, d(2025, 5, 12), -10_000, Direction::Outgoing, Category::Groceries);

        let s = compute_summary(Some(1), 1, &[ghost, refund, real], d(2025, 6, 1), Utc::now());
        assert_eq!(s.avg_essentials_cents, 10_000);
        assert_eq!(s.avg_monthly_income_cents, 0);
        assert_eq!(s.current_month_pacing.spend_to_date_cents, 0);
    }

    #[test]
    fn all_discretionary_keeps_floors_at_zero() {
        let txs = vec![
            tx(1, d(2025, 5, 2), -90_000, Direction::Outgoing, Category::Dining),
            tx(2, d(2025, 5, 20), -90_000, Direction::Outgoing, Category::Shopping),
        ];
        let s = compute_summary(Some(1), 1, &txs, d(2025, 6, 5), Utc::now());
        assert_eq!(s.safe_to_spend_cents, 0);
        assert_eq!(s.available_for_debt_cents, 0);
    }

    #[test]
    fn debt_keywords_sum_per_keyword_across_all_months() {
        let mut klarna1 = tx(1, d(2025, 4, 5), -4_000, Direction::Outgoing, Category::DebtPayment);
        klarna1.description = "KLARNA*PAYMENT 0091".into();
        let mut klarna2 = tx(2, d(2025, 6, 5), -4_000, Direction::Outgoing, Category::DebtPayment);
        klarna2.description = "Klarna payment".into();
        let mut card = tx(3, d(2025, 6, 9), -25_000, Direction::Outgoing, Category::DebtPayment);
        card.description = "CREDIT CARD AUTOPAY".into();

        let s = compute_summary(Some(1), 1, &[klarna1, klarna2, card], d(2025, 6, 15), Utc::now());
        let klarna = s
            .detected_debt_payments
            .iter()
            .find(|p| p.keyword == "klarna")
            .unwrap();
        assert_eq!(klarna.debt_type, DebtType::Bnpl);
        assert_eq!(klarna.total_cents, 8_000);
        assert_eq!(klarna.occurrences, 2);

        let cc = s
            .detected_debt_payments
            .iter()
            .find(|p| p.keyword == "credit card")
            .unwrap();
        assert_eq!(cc.debt_type, DebtType::CreditCard);
        assert_eq!(cc.total_cents, 25_000);
    }

    #[test]
    fn salary_and_other_income_split() {
        let txs = vec![
            tx(1, d(2025, 5, 1), 300_000, Direction::Incoming, Category::Salary),
            tx(2, d(2025, 5, 15), 5_000, Direction::Incoming, Category::OtherIncome),
        ];
        let s = compute_summary(Some(1), 1, &txs, d(2025, 6, 1), Utc::now());
        assert_eq!(s.avg_salary_cents, 300_000);
        assert_eq!(s.avg_other_income_cents, 5_000);
        assert_eq!(s.avg_monthly_income_cents, 305_000);
    }
}
