//! Market Scanner
//!
//! Runs the per-ticker analysis over a whole ticker universe on a bounded
//! worker pool, ranks the result into a [`MarketSnapshot`] and keeps the
//! latest snapshot in a flat CSV cache.
//!
//! [`MarketSnapshot`]: analysis_core::MarketSnapshot

pub mod aggregator;
pub mod cache;

pub use aggregator::*;
pub use cache::*;
