//! Metric names for tandem.
//!
//! Recording goes through the `metrics` crate facade, so nothing is collected
//! until the embedding application installs a recorder.
//!
//! ```rust,ignore
//! use tandem_metrics::{carbons, counter};
//!
//! counter!(carbons::PROCESSED_TOTAL, "direction" => "received").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge};
