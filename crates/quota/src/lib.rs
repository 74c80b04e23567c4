//! Hourly usage quotas keyed by (category, identity).
//!
//! Two independent axes share the same windowing rules: chat turns and
//! drawing requests. Expiry is checked lazily on every read.

pub mod key;
pub mod ledger;
pub mod tracker;

pub use {
    key::SessionKey,
    ledger::{Limit, QuotaLedger, Usage},
    tracker::{QuotaAxis, QuotaTracker},
};
