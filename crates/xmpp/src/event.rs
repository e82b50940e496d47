use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tandem_common::EventBus,
    tokio_xmpp::{minidom::Element, parsers::message::Message},
    tracing::trace,
};

use crate::{conversation::ConversationHandle, ns};

/// Which way the copied message originally travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A peer sent the message to one of the account's other sessions.
    Received,
    /// One of the account's other sessions sent the message to a peer.
    Sent,
}

impl Direction {
    /// Map a carbon element name to its direction.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "received" => Some(Self::Received),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Sent => "sent",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One processed carbon copy.
#[derive(Debug, Clone)]
pub struct CarbonEvent {
    pub direction: Direction,
    /// The original message as forwarded by the server.
    pub message: Message,
    pub conversation: ConversationHandle,
}

impl CarbonEvent {
    /// Flatten the event for display or JSON output.
    pub fn summary(&self) -> CarbonSummary {
        let stanza = Element::from(self.message.clone());
        CarbonSummary {
            direction: self.direction,
            conversation_id: self.conversation.id.to_string(),
            peer: self.conversation.peer.to_string(),
            id: stanza.attr("id").map(str::to_owned),
            from: stanza.attr("from").map(str::to_owned),
            to: stanza.attr("to").map(str::to_owned),
            body: stanza
                .get_child("body", ns::JABBER_CLIENT)
                .map(Element::text),
        }
    }
}

/// Serializable view of a [`CarbonEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarbonSummary {
    pub direction: Direction,
    pub conversation_id: String,
    pub peer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Receiver of carbon events. The session owner provides the implementation;
/// [`EventBus`] is the in-process one.
#[async_trait]
pub trait CarbonEventSink: Send + Sync {
    async fn emit(&self, event: CarbonEvent);
}

#[async_trait]
impl CarbonEventSink for EventBus<CarbonEvent> {
    async fn emit(&self, event: CarbonEvent) {
        let delivered = self.publish(event);
        trace!(delivered, "carbon event published");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("received", Some(Direction::Received))]
    #[case("sent", Some(Direction::Sent))]
    #[case("private", None)]
    #[case("Received", None)]
    #[case("", None)]
    fn direction_from_tag(#[case] tag: &str, #[case] expected: Option<Direction>) {
        assert_eq!(Direction::from_tag(tag), expected);
    }

    #[test]
    fn direction_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Direction::Sent).unwrap(),
            "\"sent\""
        );
        assert_eq!(Direction::Received.to_string(), "received");
    }
}
