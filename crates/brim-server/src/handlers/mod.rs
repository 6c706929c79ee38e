//! HTTP request handlers organized by domain

pub mod analysis;
pub mod bills;
pub mod sync;
pub mod transactions;

// Re-export all handlers for use in the router
pub use analysis::*;
pub use bills::*;
pub use sync::*;
pub use transactions::*;
