use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    tokio_xmpp::minidom::Element,
    tracing::trace,
};

use crate::error::{Error, Result};

/// Writes stanzas to the account's connection.
#[async_trait]
pub trait StanzaOutbound: Send + Sync {
    async fn send_stanza(&self, stanza: Element) -> Result<()>;
}

/// Outbound that queues stanzas for the task owning the XMPP client.
#[derive(Clone)]
pub struct QueueOutbound {
    tx: mpsc::Sender<Element>,
}

impl QueueOutbound {
    /// Create the outbound and the receiver the client task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Element>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StanzaOutbound for QueueOutbound {
    async fn send_stanza(&self, stanza: Element) -> Result<()> {
        trace!(name = stanza.name(), "queueing outbound stanza");
        self.tx
            .send(stanza)
            .await
            .map_err(|_| Error::message("outbound stanza queue closed"))
    }
}
