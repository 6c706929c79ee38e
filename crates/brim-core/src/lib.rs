//! Brim Core Library
//!
//! Shared functionality for the Brim bank-feed sync and budget engine:
//! - Domain models and the persistence boundary (store trait + in-memory)
//! - Category classifier (prioritized rule cascade)
//! - Ghost-pair detector (cross-account internal transfers)
//! - Recurring-pattern detector with next-due projection
//! - Budget aggregator (closed-history averages + live pacing)
//! - Banking feed and enrichment service clients
//! - The per-account sync engine with its in-flight registry

pub mod budget;
pub mod classify;
pub mod config;
pub mod enrich;
pub mod error;
pub mod feed;
pub mod ghost;
pub mod models;
pub mod recurring;
pub mod store;
pub mod sync;

pub use budget::compute_summary;
pub use classify::{classify, Classification, ClassifierInput, ClassifierStage, ContextHint};
pub use config::{AccountEntry, Config, EngineConfig, ServerConfig};
pub use enrich::{
    EnrichStream, EnrichedRow, Enricher, EnrichmentOutcome, EnrichmentRequest, EventDecoder,
    HttpEnricher, MockEnricher, StreamEvent,
};
pub use error::{Error, ErrorKind, Result};
pub use feed::{BankingFeed, FetchResult, HttpBankingFeed, MockFeed};
pub use ghost::detect_ghost_pairs;
pub use models::{
    AccountAnalysisSummary, AccountConnection, BillStatus, BudgetGroup, Category,
    ConnectionStatus, Credentials, CurrentMonthPacing, Direction, EnrichmentSource, Frequency,
    GhostPairMatch, NewTransaction, RecurringPattern, Transaction, UpcomingBill,
};
pub use recurring::{classify_bills, detect_recurring};
pub use store::{EnrichmentUpdate, MemoryStore, Store};
pub use sync::{CycleReport, InFlightRegistry, SyncEngine, SyncOutcome, SyncStats};
