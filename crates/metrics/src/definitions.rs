//! Metric name and label definitions.
//!
//! Centralizing these keeps the names used by the xmpp crate consistent and
//! documents what is available.

/// Message carbons metrics
pub mod carbons {
    /// Carbon copies dispatched, labelled by `direction`
    pub const PROCESSED_TOTAL: &str = "tandem_carbons_processed_total";
    /// Envelopes rejected as protocol violations
    pub const REJECTED_TOTAL: &str = "tandem_carbons_rejected_total";
    /// Malformed carbon elements skipped without aborting the envelope
    pub const SKIPPED_TOTAL: &str = "tandem_carbons_skipped_total";
    /// Envelopes dropped because they did not come from the account itself
    pub const UNTRUSTED_TOTAL: &str = "tandem_carbons_untrusted_total";
}

/// Carbons enable/disable control requests
pub mod control {
    /// Control requests submitted, labelled by `action`
    pub const REQUESTS_TOTAL: &str = "tandem_carbons_control_requests_total";
    /// Control requests that failed, labelled by `action` and `reason`
    pub const FAILURES_TOTAL: &str = "tandem_carbons_control_failures_total";
}

/// IQ request tracking
pub mod iq {
    /// IQ requests currently awaiting a response
    pub const PENDING: &str = "tandem_iq_pending";
    /// IQ requests that timed out
    pub const TIMEOUTS_TOTAL: &str = "tandem_iq_timeouts_total";
}

/// Common label keys
pub mod labels {
    pub const DIRECTION: &str = "direction";
    pub const ACTION: &str = "action";
    pub const REASON: &str = "reason";
}
