//! IQ request/response correlation.
//!
//! Every submitted `get`/`set` IQ is remembered by id until the matching
//! `result` or `error` arrives, the caller gives up waiting, or the tracker is
//! dropped. Completion is delivered through a single-shot [`IqCompletion`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
    time::{Duration, Instant},
};

use {
    tokio::sync::oneshot,
    tokio_xmpp::{minidom::Element, parsers::iq::Iq},
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use tandem_metrics::{counter, gauge, iq as iq_metrics};

use crate::{
    error::{Context, Error, Result},
    ns,
    outbound::StanzaOutbound,
};

type PendingMap = Arc<Mutex<HashMap<String, PendingIq>>>;

/// An IQ waiting for the server to answer.
struct PendingIq {
    sender: oneshot::Sender<Result<Element>>,
    created_at: Instant,
}

/// Tracks in-flight IQ requests for one connection.
pub struct IqTracker {
    outbound: Arc<dyn StanzaOutbound>,
    pending: PendingMap,
    timeout: Duration,
}

impl IqTracker {
    pub fn new(outbound: Arc<dyn StanzaOutbound>, timeout: Duration) -> Self {
        Self {
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Write `iq` to the connection and return a handle resolving with the
    /// server's answer.
    pub async fn submit(&self, iq: Iq) -> Result<IqCompletion> {
        let stanza = Element::from(iq);
        let id = stanza
            .attr("id")
            .map(str::to_owned)
            .context("iq request has no id")?;

        let (sender, receiver) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            pending.insert(id.clone(), PendingIq {
                sender,
                created_at: Instant::now(),
            });
            #[cfg(feature = "metrics")]
            gauge!(iq_metrics::PENDING).set(pending.len() as f64);
        }

        if let Err(e) = self.outbound.send_stanza(stanza).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }
        debug!(iq_id = %id, "iq submitted");

        Ok(IqCompletion {
            id,
            receiver: Some(receiver),
            timeout: self.timeout,
            pending: Arc::downgrade(&self.pending),
        })
    }

    /// Offer an inbound stanza to the tracker. Returns true when it answered
    /// a pending request.
    pub fn handle_response(&self, stanza: &Element) -> bool {
        if stanza.name() != "iq" {
            return false;
        }
        let failed = match stanza.attr("type") {
            Some("result") => false,
            Some("error") => true,
            _ => return false,
        };
        let Some(id) = stanza.attr("id") else {
            return false;
        };
        let Some(entry) = lock(&self.pending).remove(id) else {
            debug!(iq_id = %id, "iq response matches no pending request");
            return false;
        };

        debug!(
            iq_id = %id,
            failed,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            "iq response received"
        );
        let outcome = if failed {
            Err(Error::IqFailed {
                id: id.to_string(),
                condition: error_condition(stanza),
            })
        } else {
            Ok(stanza.clone())
        };
        if entry.sender.send(outcome).is_err() {
            debug!(iq_id = %id, "iq completion was dropped by its caller");
        }
        true
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Single-shot completion of a submitted IQ. Dropping it unawaited forgets
/// the pending request.
#[must_use = "an IQ completion does nothing unless awaited"]
pub struct IqCompletion {
    id: String,
    receiver: Option<oneshot::Receiver<Result<Element>>>,
    timeout: Duration,
    pending: Weak<Mutex<HashMap<String, PendingIq>>>,
}

impl IqCompletion {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the response. A `result` IQ resolves to the response stanza;
    /// an `error` IQ, the timeout, or the tracker going away are errors.
    pub async fn wait(mut self) -> Result<Element> {
        let Some(receiver) = self.receiver.take() else {
            return Err(Error::IqCancelled {
                id: self.id.clone(),
            });
        };

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::IqCancelled {
                id: self.id.clone(),
            }),
            Err(_) => {
                self.forget();
                warn!(iq_id = %self.id, timeout_secs = self.timeout.as_secs(), "iq timed out");
                #[cfg(feature = "metrics")]
                counter!(iq_metrics::TIMEOUTS_TOTAL).increment(1);
                Err(Error::IqTimeout {
                    id: self.id.clone(),
                    timeout: self.timeout,
                })
            },
        }
    }

    /// Remove this request from the tracker, if both still exist.
    fn forget(&self) {
        let Some(map) = self.pending.upgrade() else {
            return;
        };
        let mut pending = lock(&map);
        if pending.remove(&self.id).is_some() {
            debug!(iq_id = %self.id, "pending iq forgotten");
            #[cfg(feature = "metrics")]
            gauge!(iq_metrics::PENDING).set(pending.len() as f64);
        }
    }
}

impl Drop for IqCompletion {
    fn drop(&mut self) {
        self.forget();
    }
}

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<String, PendingIq>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Name of the defined condition inside an error IQ.
fn error_condition(stanza: &Element) -> String {
    stanza
        .children()
        .find(|child| child.name() == "error")
        .and_then(|error| {
            error
                .children()
                .find(|c| c.ns() == ns::STANZAS && c.name() != "text")
        })
        .map(|condition| condition.name().to_string())
        .unwrap_or_else(|| "undefined-condition".to_string())
}
