//! Category classifier
//!
//! Maps a transaction's text and labels to a category and budget group
//! using a prioritized rule cascade. Evaluation order, first match wins:
//!
//! 1. Transfer check (regex over transfer-like language, or a pre-existing
//!    link to another transaction)
//! 2. Subscription-catalog match (known recurring services)
//! 3. Context hint (externally supplied event annotation)
//! 4. Keyword mapping over labels + merchant + description
//! 5. Direction default
//!
//! The cascade never fails: absence of a match degrades to stage 5. It has
//! no side effects; persistence is the caller's responsibility.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{BudgetGroup, Category, Direction, NewTransaction};

/// Which stage of the cascade produced the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierStage {
    Transfer,
    Catalog,
    Context,
    Keyword,
    DirectionDefault,
}

impl ClassifierStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Catalog => "catalog",
            Self::Context => "context",
            Self::Keyword => "keyword",
            Self::DirectionDefault => "direction_default",
        }
    }
}

/// Externally supplied event annotation (e.g. calendar/email derived)
#[derive(Debug, Clone)]
pub struct ContextHint {
    pub kind: EventKind,
    pub detail: String,
}

/// Event kinds a context provider can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Concert,
    TravelBooking,
    DiningReservation,
    MedicalAppointment,
    BillDue,
}

impl EventKind {
    fn category(&self) -> Category {
        match self {
            Self::Concert => Category::Entertainment,
            Self::TravelBooking => Category::Travel,
            Self::DiningReservation => Category::Dining,
            Self::MedicalAppointment => Category::Healthcare,
            Self::BillDue => Category::Utilities,
        }
    }
}

/// Classifier input, assembled by the caller
#[derive(Debug, Clone, Default)]
pub struct ClassifierInput<'a> {
    pub description: &'a str,
    pub merchant: Option<&'a str>,
    pub labels: &'a [String],
    pub direction: Option<Direction>,
    /// Set when the transaction already carries a link to a partner
    pub has_linked_transaction: bool,
    pub context_hint: Option<&'a ContextHint>,
}

impl<'a> ClassifierInput<'a> {
    pub fn from_new(tx: &'a NewTransaction, context_hint: Option<&'a ContextHint>) -> Self {
        Self {
            description: &tx.description,
            merchant: None,
            labels: &tx.labels,
            direction: Some(tx.direction),
            has_linked_transaction: false,
            context_hint,
        }
    }
}

/// The classifier's decision
#[derive(Debug, Clone)]
pub struct Classification {
    pub category: Category,
    pub group: BudgetGroup,
    pub confidence: f64,
    pub exclude_from_analysis: bool,
    pub stage: ClassifierStage,
    pub reasoning: String,
}

static TRANSFER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(transfer|xfer|tfr|standing order|internal (?:move|movement|payment)|between (?:own )?accounts|to savings|from savings|credit card payment|cc payment)\b",
    )
    .expect("transfer pattern compiles")
});

/// One known recurring-service catalog entry
struct CatalogEntry {
    needle: &'static str,
    service: &'static str,
    category: Category,
}

/// Known recurring services, matched against merchant + description text.
/// Needles are uppercase substrings.
static SUBSCRIPTION_CATALOG: &[CatalogEntry] = &[
    CatalogEntry { needle: "NETFLIX", service: "Netflix", category: Category::Subscriptions },
    CatalogEntry { needle: "SPOTIFY", service: "Spotify", category: Category::Subscriptions },
    CatalogEntry { needle: "HULU", service: "Hulu", category: Category::Subscriptions },
    CatalogEntry { needle: "DISNEY", service: "Disney+", category: Category::Subscriptions },
    CatalogEntry { needle: "HBO MAX", service: "HBO Max", category: Category::Subscriptions },
    CatalogEntry { needle: "YOUTUBE PREMIUM", service: "YouTube Premium", category: Category::Subscriptions },
    CatalogEntry { needle: "APPLE.COM/BILL", service: "Apple Services", category: Category::Subscriptions },
    CatalogEntry { needle: "ICLOUD", service: "iCloud", category: Category::Subscriptions },
    CatalogEntry { needle: "AMAZON PRIME", service: "Amazon Prime", category: Category::Subscriptions },
    CatalogEntry { needle: "AUDIBLE", service: "Audible", category: Category::Subscriptions },
    CatalogEntry { needle: "DROPBOX", service: "Dropbox", category: Category::Subscriptions },
    CatalogEntry { needle: "GOOGLE ONE", service: "Google One", category: Category::Subscriptions },
    CatalogEntry { needle: "PLANET FITNESS", service: "Planet Fitness", category: Category::Personal },
    CatalogEntry { needle: "PELOTON", service: "Peloton", category: Category::Personal },
];

/// One keyword rule: any keyword hit maps the transaction to `category`.
/// Rules are checked top to bottom; the first hit wins.
struct KeywordRule {
    keywords: &'static [&'static str],
    category: Category,
    exclude: bool,
}

static KEYWORD_RULES: &[KeywordRule] = &[
    // Reversals and refunds never contribute to totals
    KeywordRule {
        keywords: &["refund", "reversal", "returned payment", "chargeback", "bounced"],
        category: Category::Other,
        exclude: true,
    },
    KeywordRule {
        keywords: &["payroll", "salary", "direct deposit", "wages", "paycheck"],
        category: Category::Salary,
        exclude: false,
    },
    KeywordRule {
        keywords: &["interest earned", "dividend", "cashback"],
        category: Category::OtherIncome,
        exclude: false,
    },
    KeywordRule {
        keywords: &["rent"],
        category: Category::Rent,
        exclude: false,
    },
    KeywordRule {
        keywords: &["mortgage"],
        category: Category::Mortgage,
        exclude: false,
    },
    KeywordRule {
        keywords: &[
            "electric", "energy", "gas bill", "water bill", "utility", "broadband", "internet",
            "mobile plan", "phone bill",
        ],
        category: Category::Utilities,
        exclude: false,
    },
    KeywordRule {
        keywords: &["insurance", "premium"],
        category: Category::Insurance,
        exclude: false,
    },
    KeywordRule {
        keywords: &["grocery", "groceries", "supermarket", "market", "aldi", "kroger", "tesco"],
        category: Category::Groceries,
        exclude: false,
    },
    KeywordRule {
        keywords: &["uber", "lyft", "fuel", "petrol", "gasoline", "transit", "parking", "shell"],
        category: Category::Transport,
        exclude: false,
    },
    KeywordRule {
        keywords: &["pharmacy", "doctor", "dental", "clinic", "hospital"],
        category: Category::Healthcare,
        exclude: false,
    },
    KeywordRule {
        keywords: &["restaurant", "cafe", "coffee", "pizza", "takeaway", "deliveroo", "doordash"],
        category: Category::Dining,
        exclude: false,
    },
    KeywordRule {
        keywords: &["cinema", "theatre", "steam", "playstation", "xbox", "concert"],
        category: Category::Entertainment,
        exclude: false,
    },
    KeywordRule {
        keywords: &["airline", "airways", "hotel", "airbnb", "hostel", "booking.com"],
        category: Category::Travel,
        exclude: false,
    },
    KeywordRule {
        keywords: &["loan payment", "loan repayment", "klarna", "afterpay", "affirm"],
        category: Category::DebtPayment,
        exclude: false,
    },
    KeywordRule {
        keywords: &["salon", "barber", "gym", "fitness"],
        category: Category::Personal,
        exclude: false,
    },
];

/// Run the cascade. Never fails; the worst case is a direction default.
pub fn classify(input: &ClassifierInput<'_>) -> Classification {
    // Stage 1: transfer language or a pre-existing partner link
    if input.has_linked_transaction || TRANSFER_RE.is_match(input.description) {
        let why = if input.has_linked_transaction {
            "linked to a partner transaction".to_string()
        } else {
            "description matches transfer language".to_string()
        };
        return Classification {
            category: Category::Transfer,
            group: BudgetGroup::Transfer,
            confidence: 0.95,
            exclude_from_analysis: true,
            stage: ClassifierStage::Transfer,
            reasoning: why,
        };
    }

    let haystack = build_haystack(input);

    // Stage 2: subscription catalog
    if let Some(entry) = catalog_match(&haystack) {
        return Classification {
            category: entry.category,
            group: entry.category.budget_group(),
            confidence: 0.9,
            exclude_from_analysis: false,
            stage: ClassifierStage::Catalog,
            reasoning: format!("matched subscription catalog entry {}", entry.service),
        };
    }

    // Stage 3: context hint
    if let Some(hint) = input.context_hint {
        let category = hint.kind.category();
        return Classification {
            category,
            group: category.budget_group(),
            confidence: 0.8,
            exclude_from_analysis: false,
            stage: ClassifierStage::Context,
            reasoning: format!("context hint: {}", hint.detail),
        };
    }

    // Stage 4: keyword table
    for rule in KEYWORD_RULES {
        if let Some(hit) = rule.keywords.iter().find(|k| haystack.contains(*k)) {
            return Classification {
                category: rule.category,
                group: rule.category.budget_group(),
                confidence: 0.7,
                exclude_from_analysis: rule.exclude,
                stage: ClassifierStage::Keyword,
                reasoning: format!("keyword '{}'", hit),
            };
        }
    }

    // Stage 5: direction default
    let category = match input.direction {
        Some(Direction::Incoming) => Category::OtherIncome,
        _ => Category::Other,
    };
    Classification {
        category,
        group: category.budget_group(),
        confidence: 0.3,
        exclude_from_analysis: false,
        stage: ClassifierStage::DirectionDefault,
        reasoning: "no rule matched; defaulted by direction".to_string(),
    }
}

fn build_haystack(input: &ClassifierInput<'_>) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(input.labels.len() + 2);
    for label in input.labels {
        parts.push(label.as_str());
    }
    if let Some(m) = input.merchant {
        parts.push(m);
    }
    parts.push(input.description);
    parts.join(" ").to_lowercase()
}

fn catalog_match(haystack: &str) -> Option<&'static CatalogEntry> {
    let upper = haystack.to_uppercase();
    SUBSCRIPTION_CATALOG
        .iter()
        .find(|e| upper.contains(e.needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(description: &str, direction: Direction) -> ClassifierInput<'_> {
        ClassifierInput {
            description,
            direction: Some(direction),
            ..Default::default()
        }
    }

    #[test]
    fn transfer_language_short_circuits() {
        let c = classify(&input("TRANSFER TO SAVINGS 00123", Direction::Outgoing));
        assert_eq!(c.category, Category::Transfer);
        assert_eq!(c.stage, ClassifierStage::Transfer);
        assert!(c.exclude_from_analysis);
        assert!(c.confidence >= 0.9);
    }

    #[test]
    fn linked_transaction_is_a_transfer() {
        let mut i = input("Completely opaque text", Direction::Outgoing);
        i.has_linked_transaction = true;
        let c = classify(&i);
        assert_eq!(c.category, Category::Transfer);
        assert!(c.exclude_from_analysis);
    }

    #[test]
    fn catalog_beats_keywords() {
        // "NETFLIX.COM" also contains no keyword; catalog should claim it
        let c = classify(&input("NETFLIX.COM 866-579-7172", Direction::Outgoing));
        assert_eq!(c.category, Category::Subscriptions);
        assert_eq!(c.stage, ClassifierStage::Catalog);
    }

    #[test]
    fn context_hint_applies_when_no_catalog_match() {
        let hint = ContextHint {
            kind: EventKind::Concert,
            detail: "booked concert ticket".into(),
        };
        let mut i = input("TKTS*0042 EVENT", Direction::Outgoing);
        i.context_hint = Some(&hint);
        let c = classify(&i);
        assert_eq!(c.category, Category::Entertainment);
        assert_eq!(c.stage, ClassifierStage::Context);
    }

    #[test]
    fn keyword_rules_check_labels_and_merchant() {
        let labels = vec!["Groceries".to_string()];
        let i = ClassifierInput {
            description: "CARD PURCHASE 4421",
            merchant: None,
            labels: &labels,
            direction: Some(Direction::Outgoing),
            has_linked_transaction: false,
            context_hint: None,
        };
        let c = classify(&i);
        assert_eq!(c.category, Category::Groceries);
        assert_eq!(c.stage, ClassifierStage::Keyword);
    }

    #[test]
    fn refunds_are_excluded() {
        let c = classify(&input("REFUND ACME STORE", Direction::Incoming));
        assert!(c.exclude_from_analysis);
        assert_eq!(c.stage, ClassifierStage::Keyword);
    }

    #[test]
    fn direction_defaults() {
        let c = classify(&input("ZZZZZ 81732", Direction::Incoming));
        assert_eq!(c.category, Category::OtherIncome);
        assert_eq!(c.stage, ClassifierStage::DirectionDefault);

        let c = classify(&input("ZZZZZ 81732", Direction::Outgoing));
        assert_eq!(c.category, Category::Other);
        assert_eq!(c.group, BudgetGroup::Other);
    }

    #[test]
    fn never_panics_on_empty_input() {
        let c = classify(&ClassifierInput::default());
        assert_eq!(c.category, Category::Other);
    }
}
