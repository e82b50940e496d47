use serde::{Deserialize, Serialize};

/// What to do with a carbon whose forwarded content is missing or unparsable.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Log and skip that carbon element; its siblings are still processed.
    #[default]
    Skip,
    /// Abort the whole envelope and answer it with a bad-request error.
    Reject,
}

/// Message carbons settings for a single XMPP account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CarbonsConfig {
    /// Send `<enable/>` as soon as the session is connected.
    pub enable_on_connect: bool,

    /// How long to wait for the server to answer a control request (seconds).
    pub iq_timeout_secs: u64,

    /// Handling of carbons with a missing forwarded wrapper or message.
    pub on_malformed: MalformedPolicy,

    /// Drop envelopes that were not sent by the account's own bare JID.
    pub verify_sender: bool,

    /// Events buffered per carbon event subscriber.
    pub event_capacity: usize,
}

impl CarbonsConfig {
    pub fn iq_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.iq_timeout_secs)
    }
}

impl Default for CarbonsConfig {
    fn default() -> Self {
        Self {
            enable_on_connect: true,
            iq_timeout_secs: 30,
            on_malformed: MalformedPolicy::default(),
            verify_sender: false,
            event_capacity: 256,
        }
    }
}
