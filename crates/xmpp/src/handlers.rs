//! Inbound XMPP stanza routing.
//!
//! Dispatches incoming messages, presence, and IQ stanzas from the event loop
//! to the carbons processor and the IQ tracker.

use {
    tokio_xmpp::{
        Stanza,
        minidom::Element,
        parsers::{
            message::{Message, MessageType},
            stanza_error::{DefinedCondition, ErrorType, StanzaError},
        },
    },
    tracing::{debug, warn},
};

use crate::{error::Error, session::XmppSession};

/// Route an inbound stanza to the appropriate handler.
pub async fn handle_stanza(session: &XmppSession, stanza: Stanza) {
    match stanza {
        Stanza::Message(msg) => {
            handle_message(session, msg).await;
        },
        Stanza::Presence(pres) => {
            handle_presence(session, pres).await;
        },
        Stanza::Iq(iq) => {
            handle_iq(session, iq).await;
        },
    }
}

/// Handle an inbound `<message>` stanza.
async fn handle_message(session: &XmppSession, msg: Message) {
    let account_id = session.account_id.as_str();

    if !session.carbons.matches(&msg) {
        debug!(account_id, "ignoring message without carbons");
        return;
    }

    match session.carbons.process(&msg).await {
        Ok(()) => {},
        Err(e) if e.is_protocol_violation() && msg.type_ == MessageType::Error => {
            // Error stanzas are never answered with another error.
            warn!(account_id, from = ?msg.from, error = %e, "bad carbon envelope in error stanza");
        },
        Err(e) if e.is_protocol_violation() => {
            warn!(account_id, from = ?msg.from, error = %e, "bad carbon envelope");
            let reply = bad_request_reply(&msg, &e);
            if let Err(e) = session.outbound.send_stanza(reply).await {
                warn!(account_id, "failed to send carbon error reply: {e}");
            }
        },
        Err(Error::UntrustedSender { from }) => {
            warn!(account_id, %from, "dropping carbon envelope from foreign sender");
        },
        Err(e) => {
            warn!(account_id, error = %e, "failed to process carbon envelope");
        },
    }
}

/// Handle an inbound `<presence>` stanza.
async fn handle_presence(session: &XmppSession, pres: tokio_xmpp::parsers::presence::Presence) {
    let from = pres
        .from
        .as_ref()
        .map(|j| j.to_string())
        .unwrap_or_default();
    debug!(account_id = %session.account_id, %from, type_ = ?pres.type_, "presence (unhandled)");
}

/// Handle an inbound `<iq>` stanza.
async fn handle_iq(session: &XmppSession, iq: tokio_xmpp::parsers::iq::Iq) {
    let stanza = Element::from(iq);
    if session.iq.handle_response(&stanza) {
        return;
    }
    debug!(
        account_id = %session.account_id,
        id = stanza.attr("id"),
        from = stanza.attr("from"),
        "iq stanza (unhandled)"
    );
}

/// `<message type='error'>` telling the envelope's sender it was rejected.
fn bad_request_reply(envelope: &Message, error: &Error) -> Element {
    let mut reply = Message::new(envelope.from.clone());
    reply.type_ = MessageType::Error;
    reply.id = envelope.id.clone();
    reply.payloads.push(
        StanzaError::new(
            ErrorType::Modify,
            DefinedCondition::BadRequest,
            "en",
            error.to_string(),
        )
        .into(),
    );
    reply.into()
}
