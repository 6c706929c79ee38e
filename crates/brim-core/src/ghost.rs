//! Ghost-pair detection
//!
//! Finds pairs of transactions across different accounts of the same user
//! that are really one internal movement of money (a transfer, a credit
//! card payment). Without this, money moved between a user's own checking
//! and savings accounts double-counts as both an expense and income.
//!
//! The matcher is a deliberate greedy O(n²) heuristic, not a min-cost
//! assignment solver: each outgoing transaction, in ascending date order,
//! consumes the best still-available incoming candidate. Acceptable
//! because n (transactions inside a match window) stays small; if volumes
//! per window grow past a few hundred, index the incoming pool by amount.

use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use crate::models::{Direction, GhostPairMatch, Transaction};

/// Maximum calendar-day gap between the two sides of a pair
pub const MAX_DATE_GAP_DAYS: i64 = 3;

/// Detect ghost pairs across all of a user's transactions.
///
/// The input must span every account of the user; running this
/// per-account defeats the purpose. Transactions already flagged as
/// transfers or already linked are never reconsidered, which makes
/// repeated runs idempotent.
///
/// Returns match records only; the caller applies the symmetric
/// mutations to both transactions.
pub fn detect_ghost_pairs(transactions: &[Transaction]) -> Vec<GhostPairMatch> {
    let mut outgoing: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.direction == Direction::Outgoing && t.pairable())
        .collect();
    let incoming: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.direction == Direction::Incoming && t.pairable())
        .collect();

    // Ascending date order (id tiebreak) keeps results deterministic
    outgoing.sort_by_key(|t| (t.date, t.id));

    let mut matched: HashSet<i64> = HashSet::new();
    let mut pairs = Vec::new();

    for out in outgoing {
        if matched.contains(&out.id) {
            continue;
        }

        let mut best: Option<(&Transaction, i64)> = None;
        for inc in &incoming {
            if matched.contains(&inc.id) || inc.account_id == out.account_id {
                continue;
            }
            if inc.abs_amount_cents() != out.abs_amount_cents() {
                continue;
            }
            let gap = (inc.date - out.date).num_days().abs();
            if gap > MAX_DATE_GAP_DAYS {
                continue;
            }
            // Smallest gap wins; strict < keeps encounter order on ties
            match best {
                Some((_, best_gap)) if gap >= best_gap => {}
                _ => best = Some((inc, gap)),
            }
        }

        if let Some((inc, gap)) = best {
            matched.insert(out.id);
            matched.insert(inc.id);
            let pair_id = Uuid::new_v4().to_string();
            debug!(
                outgoing = out.id,
                incoming = inc.id,
                amount_cents = out.abs_amount_cents(),
                gap_days = gap,
                "ghost pair matched"
            );
            pairs.push(GhostPairMatch {
                outgoing_id: out.id,
                incoming_id: inc.id,
                pair_id,
                amount_cents: out.abs_amount_cents(),
                date_gap_days: gap,
            });
        }
    }

    pairs
}
