//! XEP-0280 message carbons.
//!
//! An inbound `<message/>` carrying `<received/>` or `<sent/>` children in the
//! carbons namespace is a copy of traffic handled by another session of the
//! same account. Each copy is unwrapped from its `<forwarded/>` envelope,
//! filed under the remote party's conversation and published as a
//! [`CarbonEvent`].

use std::sync::Arc;

use {
    tokio_xmpp::parsers::{
        jid::{BareJid, Jid},
        message::Message,
        minidom::{Element, Node},
    },
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use tandem_metrics::{carbons as carbon_metrics, counter, labels};

use crate::{
    config::{CarbonsConfig, MalformedPolicy},
    conversation::ConversationResolver,
    error::{Error, Result},
    event::{CarbonEvent, CarbonEventSink, Direction},
    ns,
};

/// True when `stanza` is a `<message/>` with at least one child in the
/// carbons namespace. Structure is not validated here.
pub fn is_carbon_envelope(stanza: &Element) -> bool {
    stanza.name() == "message" && stanza.children().any(|child| child.ns() == ns::CARBONS)
}

/// Typed counterpart of [`is_carbon_envelope`].
pub fn carries_carbons(message: &Message) -> bool {
    message
        .payloads
        .iter()
        .any(|payload| payload.ns() == ns::CARBONS)
}

/// The content of one `<received/>` or `<sent/>` element.
#[derive(Debug, Clone)]
pub struct UnwrappedCarbon {
    pub direction: Direction,
    /// Every `<message/>` found in the forwarded wrapper, in document order.
    pub messages: Vec<Message>,
}

/// Unwrap a single carbons-namespaced child of an envelope.
///
/// An element name other than `received` or `sent` is a protocol violation.
/// A missing `<forwarded/>`, an empty one, or an unparsable message inside
/// it is a malformed carbon. A `<message/>` without its own `xmlns` inherits
/// the forward namespace and is read as a `jabber:client` stanza.
pub fn unwrap_carbon(carbon: &Element) -> Result<UnwrappedCarbon> {
    let direction = Direction::from_tag(carbon.name()).ok_or_else(|| {
        Error::protocol_violation(format!("unexpected carbon element <{}/>", carbon.name()))
    })?;

    let forwarded = carbon
        .get_child("forwarded", ns::FORWARD)
        .ok_or_else(|| Error::malformed(format!("<{direction}/> has no forwarded wrapper")))?;

    let messages = forwarded
        .children()
        .filter(|child| child.name() == "message")
        .map(|child| {
            let stanza = if child.ns() == ns::JABBER_CLIENT {
                child.clone()
            } else {
                requalify(child, &child.ns())
            };
            Message::try_from(stanza)
                .map_err(|e| Error::malformed(format!("forwarded message in <{direction}/>: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    if messages.is_empty() {
        return Err(Error::malformed(format!(
            "<{direction}/> forwards no message"
        )));
    }

    Ok(UnwrappedCarbon {
        direction,
        messages,
    })
}

/// Rebuild `element` in the `jabber:client` namespace. Descendants still in
/// `inherited` are rewritten too; children with their own namespace are kept.
fn requalify(element: &Element, inherited: &str) -> Element {
    let mut builder = Element::builder(element.name(), ns::JABBER_CLIENT);
    for ((attr_ns, name), value) in element.attrs() {
        builder = builder.attr_ns(attr_ns.clone(), name.clone(), value);
    }
    for node in element.nodes() {
        builder = match node {
            Node::Element(child) if child.ns() == inherited => {
                builder.append(requalify(child, inherited))
            },
            other => builder.append(other.clone()),
        };
    }
    builder.build()
}

/// The remote party a carbon belongs to: the sender of a received copy, the
/// recipient of a sent one. The outer envelope is never consulted.
pub fn interlocutor(direction: Direction, message: &Message) -> Option<&Jid> {
    match direction {
        Direction::Received => message.from.as_ref(),
        Direction::Sent => message.to.as_ref(),
    }
}

/// Opt an outgoing message out of carbon copying (XEP-0280 §6, plus the
/// XEP-0334 `no-copy` hint). Calling it twice adds nothing.
pub fn mark_private(message: &mut Message) {
    for (name, namespace) in [("private", ns::CARBONS), ("no-copy", ns::HINTS)] {
        if !message
            .payloads
            .iter()
            .any(|payload| payload.is(name, namespace))
        {
            message
                .payloads
                .push(Element::builder(name, namespace).build());
        }
    }
}

/// Processes carbon envelopes for one account.
pub struct CarbonsModule {
    resolver: Arc<dyn ConversationResolver>,
    sink: Arc<dyn CarbonEventSink>,
    config: CarbonsConfig,
    account: Option<BareJid>,
}

impl CarbonsModule {
    pub fn new(resolver: Arc<dyn ConversationResolver>, sink: Arc<dyn CarbonEventSink>) -> Self {
        Self {
            resolver,
            sink,
            config: CarbonsConfig::default(),
            account: None,
        }
    }

    pub fn with_config(mut self, config: CarbonsConfig) -> Self {
        self.config = config;
        self
    }

    /// The account this module serves, used for sender verification.
    pub fn with_account(mut self, account: BareJid) -> Self {
        self.account = Some(account);
        self
    }

    pub fn config(&self) -> &CarbonsConfig {
        &self.config
    }

    /// Whether this module wants `message` at all.
    pub fn matches(&self, message: &Message) -> bool {
        carries_carbons(message)
    }

    /// Unwrap and dispatch every carbon in `envelope`, in document order.
    ///
    /// An unknown carbon element aborts processing with a protocol violation;
    /// events already published for earlier siblings stand.
    pub async fn process(&self, envelope: &Message) -> Result<()> {
        self.verify_sender(envelope)?;

        let mut dispatched = 0usize;
        for carbon in envelope
            .payloads
            .iter()
            .filter(|payload| payload.ns() == ns::CARBONS)
        {
            let (direction, pairs) = match prepare(carbon) {
                Ok(prepared) => prepared,
                Err(e @ Error::MalformedEnvelope { .. })
                    if self.config.on_malformed == MalformedPolicy::Skip =>
                {
                    warn!(error = %e, "skipping malformed carbon");
                    #[cfg(feature = "metrics")]
                    counter!(carbon_metrics::SKIPPED_TOTAL).increment(1);
                    continue;
                },
                Err(e) => {
                    warn!(error = %e, dispatched, "rejecting carbon envelope");
                    #[cfg(feature = "metrics")]
                    counter!(carbon_metrics::REJECTED_TOTAL).increment(1);
                    return Err(e);
                },
            };

            for (message, peer) in pairs {
                self.dispatch(direction, message, &peer).await?;
                dispatched += 1;
            }
        }

        debug!(dispatched, "carbon envelope processed");
        Ok(())
    }

    async fn dispatch(&self, direction: Direction, message: Message, peer: &Jid) -> Result<()> {
        // The copy already reached the user on another session, so resolution
        // must not announce a new conversation.
        let conversation = self.resolver.resolve(&message, peer, false).await?;

        debug!(
            %direction,
            %peer,
            conversation = %conversation.id,
            "carbon dispatched"
        );
        #[cfg(feature = "metrics")]
        counter!(carbon_metrics::PROCESSED_TOTAL, labels::DIRECTION => direction.as_str())
            .increment(1);

        self.sink
            .emit(CarbonEvent {
                direction,
                message,
                conversation,
            })
            .await;
        Ok(())
    }

    fn verify_sender(&self, envelope: &Message) -> Result<()> {
        if !self.config.verify_sender {
            return Ok(());
        }
        let Some(account) = &self.account else {
            debug!("sender verification enabled without a known account");
            return Ok(());
        };

        // A stanza without `from` comes from the account's own server.
        match &envelope.from {
            Some(from) if from.to_bare() != *account => {
                #[cfg(feature = "metrics")]
                counter!(carbon_metrics::UNTRUSTED_TOTAL).increment(1);
                Err(Error::UntrustedSender {
                    from: from.to_string(),
                })
            },
            _ => Ok(()),
        }
    }
}

/// Unwrap `carbon` and resolve the interlocutor of every message in it, so a
/// malformed element publishes nothing.
fn prepare(carbon: &Element) -> Result<(Direction, Vec<(Message, Jid)>)> {
    let UnwrappedCarbon {
        direction,
        messages,
    } = unwrap_carbon(carbon)?;

    let pairs = messages
        .into_iter()
        .map(|message| {
            let peer = interlocutor(direction, &message).cloned().ok_or_else(|| {
                let missing = match direction {
                    Direction::Received => "from",
                    Direction::Sent => "to",
                };
                Error::malformed(format!("<{direction}/> message has no '{missing}' address"))
            })?;
            Ok((message, peer))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((direction, pairs))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn element(xml: &str) -> Element {
        xml.parse().unwrap()
    }

    fn message(xml: &str) -> Message {
        Message::try_from(element(xml)).unwrap()
    }

    const RECEIVED: &str = "<received xmlns='urn:xmpp:carbons:2'>\
        <forwarded xmlns='urn:xmpp:forward:0'>\
        <message xmlns='jabber:client' from='alice@example.com/phone' to='me@example.com/web' type='chat'>\
        <body>hi</body></message></forwarded></received>";

    #[test]
    fn classifier_accepts_message_with_carbon_child() {
        let stanza = element(&format!(
            "<message xmlns='jabber:client' from='me@example.com'>{RECEIVED}</message>"
        ));
        assert!(is_carbon_envelope(&stanza));
        assert!(carries_carbons(&Message::try_from(stanza).unwrap()));
    }

    #[test]
    fn classifier_rejects_message_without_carbon_child() {
        let stanza = element(
            "<message xmlns='jabber:client' from='alice@example.com'><body>hi</body></message>",
        );
        assert!(!is_carbon_envelope(&stanza));
        assert!(!carries_carbons(&Message::try_from(stanza).unwrap()));
    }

    #[test]
    fn classifier_rejects_non_message_stanza() {
        let stanza = element(
            "<iq xmlns='jabber:client' type='set' id='c1'><enable xmlns='urn:xmpp:carbons:2'/></iq>",
        );
        assert!(!is_carbon_envelope(&stanza));
    }

    #[test]
    fn classifier_ignores_carbon_names_in_other_namespaces() {
        let stanza = element(
            "<message xmlns='jabber:client'><received xmlns='urn:xmpp:receipts' id='x'/></message>",
        );
        assert!(!is_carbon_envelope(&stanza));
    }

    #[test]
    fn unwraps_received_carbon() {
        let unwrapped = unwrap_carbon(&element(RECEIVED)).unwrap();
        assert_eq!(unwrapped.direction, Direction::Received);
        assert_eq!(unwrapped.messages.len(), 1);
        assert_eq!(
            unwrapped.messages[0].from.as_ref().unwrap().to_string(),
            "alice@example.com/phone"
        );
    }

    #[test]
    fn unknown_carbon_element_is_protocol_violation() {
        let err = unwrap_carbon(&element("<private xmlns='urn:xmpp:carbons:2'/>")).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
    }

    #[test]
    fn missing_forwarded_is_malformed() {
        let err = unwrap_carbon(&element("<sent xmlns='urn:xmpp:carbons:2'/>")).unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope { .. }));
    }

    #[test]
    fn empty_forwarded_is_malformed() {
        let err = unwrap_carbon(&element(
            "<sent xmlns='urn:xmpp:carbons:2'><forwarded xmlns='urn:xmpp:forward:0'/></sent>",
        ))
        .unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope { .. }));
    }

    #[test]
    fn forwarded_in_wrong_namespace_is_malformed() {
        let err = unwrap_carbon(&element(
            "<sent xmlns='urn:xmpp:carbons:2'><forwarded xmlns='urn:xmpp:forward:1'>\
             <message xmlns='jabber:client' to='bob@example.com'/></forwarded></sent>",
        ))
        .unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope { .. }));
    }

    #[test]
    fn unqualified_forwarded_message_is_read_as_client_stanza() {
        let unwrapped = unwrap_carbon(&element(
            "<received xmlns='urn:xmpp:carbons:2'><forwarded xmlns='urn:xmpp:forward:0'>\
             <message from='alice@example.com' to='me@example.com' id='m7'>\
             <body>hi</body><active xmlns='http://jabber.org/protocol/chatstates'/>\
             </message></forwarded></received>",
        ))
        .unwrap();

        let stanza = Element::from(unwrapped.messages[0].clone());
        assert_eq!(stanza.ns(), ns::JABBER_CLIENT);
        assert_eq!(stanza.attr("id"), Some("m7"));
        assert_eq!(
            stanza.get_child("body", ns::JABBER_CLIENT).map(Element::text),
            Some("hi".to_string())
        );
        assert!(stanza.has_child("active", "http://jabber.org/protocol/chatstates"));
    }

    #[test]
    fn every_forwarded_message_is_kept_in_order() {
        let unwrapped = unwrap_carbon(&element(
            "<sent xmlns='urn:xmpp:carbons:2'><forwarded xmlns='urn:xmpp:forward:0'>\
             <message xmlns='jabber:client' to='bob@example.com' id='m1'/>\
             <message xmlns='jabber:client' to='carol@example.com' id='m2'/>\
             </forwarded></sent>",
        ))
        .unwrap();
        let recipients: Vec<String> = unwrapped
            .messages
            .iter()
            .map(|m| m.to.as_ref().unwrap().to_string())
            .collect();
        assert_eq!(recipients, vec!["bob@example.com", "carol@example.com"]);
    }

    #[rstest]
    #[case(Direction::Received, "alice@example.com/phone")]
    #[case(Direction::Sent, "bob@example.com/desk")]
    fn interlocutor_follows_direction(#[case] direction: Direction, #[case] expected: &str) {
        let msg = message(
            "<message xmlns='jabber:client' from='alice@example.com/phone' to='bob@example.com/desk'/>",
        );
        assert_eq!(interlocutor(direction, &msg).unwrap().to_string(), expected);
    }

    #[test]
    fn interlocutor_missing_address() {
        let msg = message("<message xmlns='jabber:client' from='alice@example.com'/>");
        assert!(interlocutor(Direction::Sent, &msg).is_none());
    }

    #[test]
    fn mark_private_is_idempotent() {
        let mut msg = message("<message xmlns='jabber:client' to='bob@example.com'/>");
        mark_private(&mut msg);
        mark_private(&mut msg);

        assert_eq!(msg.payloads.len(), 2);
        assert!(msg.payloads[0].is("private", ns::CARBONS));
        assert!(msg.payloads[1].is("no-copy", ns::HINTS));
    }
}
