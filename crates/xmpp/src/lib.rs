//! XMPP message carbons (XEP-0280) for tandem.
//!
//! Classifies inbound carbon envelopes, unwraps the forwarded copies, files
//! each under the remote party's conversation and publishes a
//! [`CarbonEvent`]. Also issues the enable/disable control requests.

pub mod carbons;
pub mod config;
pub mod control;
pub mod conversation;
pub mod error;
pub mod event;
pub mod handlers;
pub mod iq;
pub mod ns;
pub mod outbound;
pub mod session;

pub use {
    carbons::{
        CarbonsModule, UnwrappedCarbon, carries_carbons, interlocutor, is_carbon_envelope,
        mark_private, unwrap_carbon,
    },
    config::{CarbonsConfig, MalformedPolicy},
    control::{CarbonsAction, CarbonsControl, ControlCompletion, control_request},
    conversation::{
        Conversation, ConversationEvent, ConversationHandle, ConversationResolver,
        ConversationStore,
    },
    error::{Error, Result},
    event::{CarbonEvent, CarbonEventSink, CarbonSummary, Direction},
    iq::{IqCompletion, IqTracker},
    outbound::{QueueOutbound, StanzaOutbound},
    session::XmppSession,
};
