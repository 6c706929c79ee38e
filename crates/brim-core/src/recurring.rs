//! Recurring-pattern detection
//!
//! Groups a user's outgoing transactions by merchant and infers
//! periodicity, producing a forecast of the next due date and a
//! confidence score. Powers the upcoming-bill projections.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::models::{
    BillStatus, Category, Direction, Frequency, RecurringPattern, Transaction, UpcomingBill,
};

/// Patterns scoring below this are discarded
pub const CONFIDENCE_FLOOR: f64 = 0.5;

/// Minimum occurrences before a merchant group is considered at all
const MIN_OCCURRENCES: usize = 2;

/// Normalize a merchant name for grouping: case-folded, trimmed,
/// separator noise collapsed.
pub fn normalize_merchant(name: &str) -> String {
    name.replace(['*', '#'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Infer recurring patterns from a user's transactions.
///
/// `today` is injected so projections are deterministic under test.
/// Returns one upsertable pattern per qualifying merchant group; the
/// caller persists them (upsert keyed by user + merchant).
pub fn detect_recurring(
    user_id: i64,
    transactions: &[Transaction],
    today: NaiveDate,
) -> Vec<RecurringPattern> {
    let mut groups: HashMap<String, Vec<&Transaction>> = HashMap::new();
    for tx in transactions {
        if tx.direction != Direction::Outgoing
            || tx.exclude_from_analysis
            || tx.is_internal_transfer
            || tx.category == Some(Category::Transfer)
        {
            continue;
        }
        let name = tx.merchant.as_deref().unwrap_or(&tx.description);
        let key = normalize_merchant(name);
        if key.is_empty() {
            continue;
        }
        groups.entry(key).or_default().push(tx);
    }

    let mut patterns = Vec::new();
    for (merchant, mut txs) in groups {
        if txs.len() < MIN_OCCURRENCES {
            continue;
        }
        txs.sort_by_key(|t| (t.date, t.id));

        if let Some(pattern) = infer_pattern(user_id, &merchant, &txs, today) {
            debug!(
                merchant = %pattern.merchant,
                frequency = %pattern.frequency,
                confidence = pattern.confidence,
                next_due = %pattern.next_due,
                "recurring pattern detected"
            );
            patterns.push(pattern);
        }
    }

    // Stable output order for callers and tests
    patterns.sort_by(|a, b| a.merchant.cmp(&b.merchant));
    patterns
}

fn infer_pattern(
    user_id: i64,
    merchant: &str,
    txs: &[&Transaction],
    today: NaiveDate,
) -> Option<RecurringPattern> {
    let gaps: Vec<i64> = txs
        .windows(2)
        .map(|w| (w[1].date - w[0].date).num_days())
        .collect();
    if gaps.is_empty() {
        return None;
    }

    let med = median(&gaps);
    let frequency = *Frequency::all().iter().find(|f| {
        let (lo, hi) = f.window();
        med >= lo as f64 && med <= hi as f64
    })?;

    let confidence = score_confidence(&gaps, frequency, txs.len());
    if confidence < CONFIDENCE_FLOOR {
        debug!(merchant, confidence, "pattern below confidence floor");
        return None;
    }

    let amounts: Vec<i64> = txs.iter().map(|t| t.abs_amount_cents()).collect();
    let average = amounts.iter().sum::<i64>() / amounts.len() as i64;
    let min = *amounts.iter().min().expect("non-empty");
    let max = *amounts.iter().max().expect("non-empty");

    let anchor_day = anchor_day(txs, frequency);
    let last_seen = txs.last().expect("non-empty").date;
    let next_due = project_next_due(last_seen, frequency, anchor_day, today);

    Some(RecurringPattern {
        user_id,
        merchant: merchant.to_string(),
        frequency,
        average_amount_cents: average,
        min_amount_cents: min,
        max_amount_cents: max,
        anchor_day,
        last_seen,
        next_due,
        occurrences: txs.len(),
        confidence,
        active: true,
    })
}

/// confidence = min(1, match_ratio * 0.7 + max(0, 1 - avg_deviation) * 0.3
///                   + occurrence_bonus)
fn score_confidence(gaps: &[i64], frequency: Frequency, occurrences: usize) -> f64 {
    let (lo, hi) = frequency.window();
    let target = frequency.target_days() as f64;

    let in_window = gaps.iter().filter(|&&g| g >= lo && g <= hi).count();
    let match_ratio = in_window as f64 / gaps.len() as f64;

    let avg_deviation = gaps
        .iter()
        .map(|&g| (g as f64 - target).abs() / target)
        .sum::<f64>()
        / gaps.len() as f64;

    let occurrence_bonus = ((occurrences as f64 - 1.0) * 0.02).min(0.1);

    (match_ratio * 0.7 + (1.0 - avg_deviation).max(0.0) * 0.3 + occurrence_bonus).min(1.0)
}

/// Most frequent day-of-week (weekly) or day-of-month (otherwise), ties
/// resolved by first occurrence in date order.
fn anchor_day(txs: &[&Transaction], frequency: Frequency) -> u32 {
    let day_of = |d: NaiveDate| -> u32 {
        match frequency {
            Frequency::Weekly => d.weekday().number_from_monday(),
            _ => d.day(),
        }
    };

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for tx in txs {
        *counts.entry(day_of(tx.date)).or_insert(0) += 1;
    }

    let mut best: Option<(u32, usize)> = None;
    for tx in txs {
        let day = day_of(tx.date);
        let count = counts[&day];
        // Strictly-greater keeps the first-seen day on ties
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((day, count));
        }
    }
    best.map(|(d, _)| d).unwrap_or(1)
}

/// Add one period at a time, clamped to month lengths, until strictly
/// after `today`.
fn project_next_due(
    last_seen: NaiveDate,
    frequency: Frequency,
    anchor_day: u32,
    today: NaiveDate,
) -> NaiveDate {
    let mut due = frequency.advance(last_seen, anchor_day);
    while due <= today {
        due = frequency.advance(due, anchor_day);
    }
    due
}

fn median(values: &[i64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

/// Classify each active pattern for the current calendar month.
///
/// PAID when a matching-merchant transaction already occurred this month,
/// OVERDUE when the due date passed unpaid, PENDING otherwise.
pub fn classify_bills(
    patterns: &[RecurringPattern],
    transactions: &[Transaction],
    today: NaiveDate,
) -> Vec<UpcomingBill> {
    let month_start = today.with_day(1).expect("day 1 always valid");

    let paid_merchants: std::collections::HashSet<String> = transactions
        .iter()
        .filter(|t| {
            t.direction == Direction::Outgoing && t.date >= month_start && t.date <= today
        })
        .map(|t| normalize_merchant(t.merchant.as_deref().unwrap_or(&t.description)))
        .collect();

    patterns
        .iter()
        .filter(|p| p.active)
        .map(|p| {
            let status = if paid_merchants.contains(&p.merchant) {
                BillStatus::Paid
            } else if p.next_due < today {
                BillStatus::Overdue
            } else {
                BillStatus::Pending
            };
            UpcomingBill {
                merchant: p.merchant.clone(),
                frequency: p.frequency,
                expected_amount_cents: p.average_amount_cents,
                due_date: p.next_due,
                status,
                confidence: p.confidence,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::models::Direction;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn outgoing(id: i64, date: NaiveDate, cents: i64, desc: &str) -> Transaction {
        Transaction {
            id,
            external_id: format!("ext-{}", id),
            account_id: 1,
            user_id: 1,
            date,
            description: desc.to_string(),
            amount_cents: -cents,
            direction: Direction::Outgoing,
            currency: "USD".into(),
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
        }
    }

    #[test]
    fn monthly_cadence_with_jitter() {
        // Charges 30 then 28 then 31 days apart
        let txs = vec![
            outgoing(1, d(2025, 1, 5), 1499, "NETFLIX.COM"),
            outgoing(2, d(2025, 2, 4), 1499, "NETFLIX.COM"),
            outgoing(3, d(2025, 3, 4), 1499, "NETFLIX.COM"),
            outgoing(4, d(2025, 4, 4), 1499, "NETFLIX.COM"),
        ];
        let patterns = detect_recurring(1, &txs, d(2025, 4, 20));
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.frequency, Frequency::Monthly);
        assert!(p.confidence > 0.5);
        assert!(p.confidence <= 1.0);
        assert_eq!(p.occurrences, 4);
        assert!(p.next_due > d(2025, 4, 20));
    }

    #[test]
    fn two_occurrences_thirty_days_apart_is_monthly() {
        let txs = vec![
            outgoing(1, d(2025, 1, 10), 999, "GYM CLUB"),
            outgoing(2, d(2025, 2, 9), 999, "GYM CLUB"),
        ];
        let patterns = detect_recurring(1, &txs, d(2025, 2, 15));
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, Frequency::Monthly);
    }

    #[test]
    fn single_occurrence_is_discarded() {
        let txs = vec![outgoing(1, d(2025, 1, 10), 999, "ONE OFF")];
        assert!(detect_recurring(1, &txs, d(2025, 2, 1)).is_empty());
    }

    #[test]
    fn irregular_gaps_do_not_classify() {
        // Median gap 20 days falls in no window
        let txs = vec![
            outgoing(1, d(2025, 1, 1), 500, "CORNER SHOP"),
            outgoing(2, d(2025, 1, 21), 500, "CORNER SHOP"),
            outgoing(3, d(2025, 2, 10), 500, "CORNER SHOP"),
        ];
        assert!(detect_recurring(1, &txs, d(2025, 3, 1)).is_empty());
    }

    #[test]
    fn weekly_anchor_is_day_of_week() {
        // Every Friday
        let txs = vec![
            outgoing(1, d(2025, 6, 6), 1200, "CLEANER"),
            outgoing(2, d(2025, 6, 13), 1200, "CLEANER"),
            outgoing(3, d(2025, 6, 20), 1200, "CLEANER"),
        ];
        let patterns = detect_recurring(1, &txs, d(2025, 6, 22));
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.frequency, Frequency::Weekly);
        assert_eq!(p.anchor_day, 5); // Friday
        assert_eq!(p.next_due, d(2025, 6, 27));
    }

    #[test]
    fn transfers_and_excluded_are_ignored() {
        let mut a = outgoing(1, d(2025, 1, 5), 1499, "SAVER");
        let mut b = outgoing(2, d(2025, 2, 4), 1499, "SAVER");
        let mut c = outgoing(3, d(2025, 3, 6), 1499, "SAVER");
        a.is_internal_transfer = true;
        b.exclude_from_analysis = true;
        c.category = Some(Category::Transfer);
        assert!(detect_recurring(1, &[a, b, c], d(2025, 3, 10)).is_empty());
    }

    #[test]
    fn merchant_field_preferred_over_description() {
        let mut a = outgoing(1, d(2025, 1, 5), 1499, "CARD 991 PURCHASE");
        let mut b = outgoing(2, d(2025, 2, 4), 1499, "POS 13 PURCHASE");
        a.merchant = Some("Netflix".into());
        b.merchant = Some("netflix ".into());
        let patterns = detect_recurring(1, &[a, b], d(2025, 2, 10));
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].merchant, "netflix");
    }

    #[test]
    fn amount_stats_cover_min_and_max() {
        let txs = vec![
            outgoing(1, d(2025, 1, 5), 1000, "POWER CO"),
            outgoing(2, d(2025, 2, 4), 1400, "POWER CO"),
            outgoing(3, d(2025, 3, 5), 1200, "POWER CO"),
        ];
        let p = &detect_recurring(1, &txs, d(2025, 3, 10))[0];
        assert_eq!(p.min_amount_cents, 1000);
        assert_eq!(p.max_amount_cents, 1400);
        assert_eq!(p.average_amount_cents, 1200);
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        // Many perfectly spaced occurrences would overshoot without the cap
        let txs: Vec<Transaction> = (0..12)
            .map(|i| {
                outgoing(
                    i + 1,
                    d(2025, 1, 1) + chrono::Duration::days(7 * i),
                    800,
                    "PODCAST PLUS",
                )
            })
            .collect();
        let p = &detect_recurring(1, &txs, d(2025, 4, 1))[0];
        assert!(p.confidence <= 1.0);
        assert!(p.confidence >= CONFIDENCE_FLOOR);
    }

    #[test]
    fn bills_classified_for_current_month() {
        let patterns = vec![
            RecurringPattern {
                user_id: 1,
                merchant: "netflix.com".into(),
                frequency: Frequency::Monthly,
                average_amount_cents: 1499,
                min_amount_cents: 1499,
                max_amount_cents: 1499,
                anchor_day: 4,
                last_seen: d(2025, 6, 4),
                next_due: d(2025, 7, 4),
                occurrences: 6,
                confidence: 0.9,
                active: true,
            },
            RecurringPattern {
                user_id: 1,
                merchant: "power co".into(),
                frequency: Frequency::Monthly,
                average_amount_cents: 9000,
                min_amount_cents: 8000,
                max_amount_cents: 10_000,
                anchor_day: 10,
                last_seen: d(2025, 6, 10),
                next_due: d(2025, 7, 10),
                occurrences: 6,
                confidence: 0.8,
                active: true,
            },
            RecurringPattern {
                user_id: 1,
                merchant: "gym club".into(),
                frequency: Frequency::Monthly,
                average_amount_cents: 3000,
                min_amount_cents: 3000,
                max_amount_cents: 3000,
                anchor_day: 25,
                last_seen: d(2025, 6, 25),
                next_due: d(2025, 7, 25),
                occurrences: 6,
                confidence: 0.8,
                active: true,
            },
        ];
        // Netflix paid on the 4th; power bill due the 10th, unpaid, today
        // is the 15th; gym due the 25th
        let txs = vec![outgoing(1, d(2025, 7, 4), 1499, "NETFLIX.COM")];
        let bills = classify_bills(&patterns, &txs, d(2025, 7, 15));
        let by_merchant = |m: &str| bills.iter().find(|b| b.merchant == m).unwrap();
        assert_eq!(by_merchant("netflix.com").status, BillStatus::Paid);
        assert_eq!(by_merchant("power co").status, BillStatus::Overdue);
        assert_eq!(by_merchant("gym club").status, BillStatus::Pending);
    }

    #[test]
    fn inactive_patterns_produce_no_bills() {
        let pattern = RecurringPattern {
            user_id: 1,
            merchant: "dismissed".into(),
            frequency: Frequency::Monthly,
            average_amount_cents: 100,
            min_amount_cents: 100,
            max_amount_cents: 100,
            anchor_day: 1,
            last_seen: d(2025, 6, 1),
            next_due: d(2025, 7, 1),
            occurrences: 3,
            confidence: 0.7,
            active: false,
        };
        assert!(classify_bills(&[pattern], &[], d(2025, 7, 15)).is_empty());
    }
}
