//! Error types for Brim
//!
//! The sync engine needs to tell four situations apart without matching
//! error strings: credential problems (refresh or re-auth), upstream
//! unavailability (skip and retry next cycle), bad data (skip the record),
//! and detector faults (contain to the affected user). `Error::kind`
//! exposes that taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Credential expired for account {0}")]
    CredentialExpired(i64),

    #[error("Credential rejected: {0}")]
    CredentialRejected(String),

    #[error("Banking feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Enrichment service unavailable: {0}")]
    EnrichmentUnavailable(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Detector error: {0}")]
    Detector(String),
}

/// Coarse error classification used by the sync engine to pick a
/// recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expired or rejected bank credential; refresh, else wait for the user.
    Credential,
    /// Feed or enrichment service unreachable; retry next cycle or fall back.
    Upstream,
    /// Malformed input record; skip it, keep the account sync going.
    Data,
    /// Fault inside a detector pass; contain to the affected user.
    Detector,
    /// Everything else (config, store, IO).
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CredentialExpired(_) | Error::CredentialRejected(_) => ErrorKind::Credential,
            Error::Http(_) | Error::FeedUnavailable(_) | Error::EnrichmentUnavailable(_) => {
                ErrorKind::Upstream
            }
            Error::Json(_) | Error::InvalidRecord(_) => ErrorKind::Data,
            Error::Detector(_) => ErrorKind::Detector,
            Error::Io(_) | Error::Config(_) | Error::NotFound(_) | Error::Store(_) => {
                ErrorKind::Other
            }
        }
    }

    /// Whether the next scheduled cycle may succeed without user action.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::CredentialRejected(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
