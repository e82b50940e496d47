use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The envelope breaks XEP-0280 in a way the sender must be told about
    /// (answered with `bad-request`).
    #[error("carbon protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// A carbon's forwarded wrapper or encapsulated message is missing or
    /// unparsable.
    #[error("malformed carbon: {reason}")]
    MalformedEnvelope { reason: String },

    /// The envelope claims to be a carbon but was not sent by the account.
    #[error("carbon envelope from untrusted sender {from}")]
    UntrustedSender { from: String },

    #[error("iq {id} timed out after {}s", timeout.as_secs())]
    IqTimeout { id: String, timeout: Duration },

    #[error("iq {id} failed: {condition}")]
    IqFailed { id: String, condition: String },

    #[error("iq {id} was dropped before a response arrived")]
    IqCancelled { id: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Whether the offending stanza should be answered with `bad-request`.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation { .. } | Self::MalformedEnvelope { .. }
        )
    }
}

impl tandem_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

tandem_common::impl_context!();

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_map_to_bad_request() {
        assert!(Error::protocol_violation("unknown carbon <foo/>").is_protocol_violation());
        assert!(Error::malformed("no forwarded").is_protocol_violation());
        assert!(
            !Error::UntrustedSender {
                from: "mallory@evil.example".into()
            }
            .is_protocol_violation()
        );
    }

    #[test]
    fn timeout_message_reports_seconds() {
        let err = Error::IqTimeout {
            id: "abc".into(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "iq abc timed out after 30s");
    }

    #[test]
    fn context_wraps_display_errors() {
        let err = "x".parse::<u32>().context("reading timeout").unwrap_err();
        assert!(matches!(err, Error::Message { .. }));
        assert!(err.to_string().starts_with("reading timeout: "));
    }
}
