//! Conversation resolution.
//!
//! The carbons module never owns conversation state: it hands every
//! unwrapped message to a [`ConversationResolver`] and attaches whatever
//! handle comes back to the published event. [`ConversationStore`] is the
//! in-memory resolver used by the session and the CLI.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    tandem_common::EventBus,
    tokio_xmpp::parsers::{
        jid::{BareJid, Jid},
        message::Message,
    },
    tracing::debug,
    uuid::Uuid,
};

use crate::error::Result;

/// A logical one-to-one conversation, keyed by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub peer: BareJid,
    /// Unix timestamp (seconds) of the first message seen.
    pub created_at: i64,
}

pub type ConversationHandle = Arc<Conversation>;

/// Notifications emitted by [`ConversationStore`].
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// A conversation was opened by a freshly delivered message.
    Opened { conversation: ConversationHandle },
}

/// Finds or creates the conversation a message belongs to.
#[async_trait]
pub trait ConversationResolver: Send + Sync {
    /// Resolve the conversation with `peer`, creating it if absent.
    ///
    /// `fresh_delivery` is false for messages that already reached the user
    /// through another session (carbons); creating a conversation for them
    /// must stay silent.
    async fn resolve(
        &self,
        message: &Message,
        peer: &Jid,
        fresh_delivery: bool,
    ) -> Result<ConversationHandle>;
}

/// In-memory resolver keyed by the peer's bare JID.
pub struct ConversationStore {
    conversations: RwLock<HashMap<BareJid, ConversationHandle>>,
    events: Option<EventBus<ConversationEvent>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus<ConversationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn get(&self, peer: &BareJid) -> Option<ConversationHandle> {
        let conversations = self
            .conversations
            .read()
            .unwrap_or_else(|e| e.into_inner());
        conversations.get(peer).cloned()
    }

    pub fn len(&self) -> usize {
        self.conversations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the existing conversation with `peer` or insert a new one.
    /// The boolean is true when the conversation was created by this call.
    fn get_or_create(&self, peer: BareJid) -> (ConversationHandle, bool) {
        if let Some(existing) = self.get(&peer) {
            return (existing, false);
        }

        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(|e| e.into_inner());
        // Another task may have won the race between the read and write locks.
        if let Some(existing) = conversations.get(&peer) {
            return (Arc::clone(existing), false);
        }

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let conversation = Arc::new(Conversation {
            id: Uuid::new_v4(),
            peer: peer.clone(),
            created_at,
        });
        conversations.insert(peer, Arc::clone(&conversation));
        (conversation, true)
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationResolver for ConversationStore {
    async fn resolve(
        &self,
        _message: &Message,
        peer: &Jid,
        fresh_delivery: bool,
    ) -> Result<ConversationHandle> {
        let (conversation, created) = self.get_or_create(peer.to_bare());

        if created {
            debug!(peer = %conversation.peer, fresh_delivery, "conversation created");
            if fresh_delivery && let Some(events) = &self.events {
                events.publish(ConversationEvent::Opened {
                    conversation: Arc::clone(&conversation),
                });
            }
        }

        Ok(conversation)
    }
}
