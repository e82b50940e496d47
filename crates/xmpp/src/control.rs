//! Turning server-side carbon delivery on and off.
//!
//! No local state is kept: the server decides whether carbons are active, and
//! each request only reports whether it was acknowledged.

use std::sync::Arc;

use {
    serde::{Deserialize, Serialize},
    tokio_xmpp::parsers::{
        carbons::{Disable, Enable},
        iq::Iq,
    },
    tracing::{info, warn},
    uuid::Uuid,
};

#[cfg(feature = "metrics")]
use tandem_metrics::{control as control_metrics, counter, labels};

use crate::{
    error::Result,
    iq::{IqCompletion, IqTracker},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarbonsAction {
    Enable,
    Disable,
}

impl CarbonsAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

impl std::fmt::Display for CarbonsAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build `<iq type='set'><enable|disable xmlns='urn:xmpp:carbons:2'/></iq>`.
pub fn control_request(action: CarbonsAction, id: impl Into<String>) -> Iq {
    match action {
        CarbonsAction::Enable => Iq::from_set(id, Enable),
        CarbonsAction::Disable => Iq::from_set(id, Disable),
    }
}

/// Issues carbons control requests through the connection's IQ tracker.
#[derive(Clone)]
pub struct CarbonsControl {
    tracker: Arc<IqTracker>,
}

impl CarbonsControl {
    pub fn new(tracker: Arc<IqTracker>) -> Self {
        Self { tracker }
    }

    /// Ask the server to start sending carbons to this session.
    pub async fn enable(&self) -> Result<ControlCompletion> {
        self.submit(CarbonsAction::Enable).await
    }

    /// Ask the server to stop sending carbons to this session.
    pub async fn disable(&self) -> Result<ControlCompletion> {
        self.submit(CarbonsAction::Disable).await
    }

    async fn submit(&self, action: CarbonsAction) -> Result<ControlCompletion> {
        let id = Uuid::new_v4().to_string();
        info!(%action, iq_id = %id, "requesting carbons state change");
        #[cfg(feature = "metrics")]
        counter!(control_metrics::REQUESTS_TOTAL, labels::ACTION => action.as_str()).increment(1);

        let completion = self.tracker.submit(control_request(action, id)).await?;
        Ok(ControlCompletion { action, completion })
    }
}

/// Resolves once the server acknowledged (or refused) a control request.
#[must_use = "a control completion does nothing unless awaited"]
pub struct ControlCompletion {
    action: CarbonsAction,
    completion: IqCompletion,
}

impl ControlCompletion {
    pub fn action(&self) -> CarbonsAction {
        self.action
    }

    pub fn id(&self) -> &str {
        self.completion.id()
    }

    pub async fn wait(self) -> Result<()> {
        let action = self.action;
        match self.completion.wait().await {
            Ok(_) => {
                info!(%action, "carbons state change acknowledged");
                Ok(())
            },
            Err(e) => {
                warn!(%action, error = %e, "carbons state change failed");
                #[cfg(feature = "metrics")]
                counter!(
                    control_metrics::FAILURES_TOTAL,
                    labels::ACTION => action.as_str(),
                    labels::REASON => failure_reason(&e)
                )
                .increment(1);
                Err(e)
            },
        }
    }
}

#[cfg(feature = "metrics")]
fn failure_reason(error: &crate::error::Error) -> &'static str {
    use crate::error::Error;
    match error {
        Error::IqTimeout { .. } => "timeout",
        Error::IqFailed { .. } => "error_response",
        Error::IqCancelled { .. } => "cancelled",
        _ => "other",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{error::Error, ns, outbound::QueueOutbound},
        rstest::rstest,
        std::time::Duration,
        tokio_xmpp::minidom::Element,
    };

    #[rstest]
    #[case(CarbonsAction::Enable, "enable")]
    #[case(CarbonsAction::Disable, "disable")]
    fn request_is_set_with_single_empty_child(#[case] action: CarbonsAction, #[case] tag: &str) {
        let stanza = Element::from(control_request(action, "ctl-1"));

        assert_eq!(stanza.name(), "iq");
        assert_eq!(stanza.attr("type"), Some("set"));
        assert_eq!(stanza.attr("id"), Some("ctl-1"));

        let children: Vec<&Element> = stanza.children().collect();
        assert_eq!(children.len(), 1);
        assert!(children[0].is(tag, ns::CARBONS));
        assert_eq!(children[0].children().count(), 0);
        assert!(children[0].text().is_empty());
    }

    fn control(timeout: Duration) -> (
        CarbonsControl,
        Arc<IqTracker>,
        tokio::sync::mpsc::Receiver<Element>,
    ) {
        let (outbound, rx) = QueueOutbound::new(8);
        let tracker = Arc::new(IqTracker::new(Arc::new(outbound), timeout));
        (CarbonsControl::new(Arc::clone(&tracker)), tracker, rx)
    }

    #[tokio::test]
    async fn enable_completes_on_result() {
        let (control, tracker, mut rx) = control(Duration::from_secs(5));
        let completion = control.enable().await.unwrap();
        assert_eq!(completion.action(), CarbonsAction::Enable);

        let written = rx.recv().await.unwrap();
        assert!(written.has_child("enable", ns::CARBONS));
        let id = written.attr("id").unwrap();
        assert_eq!(id, completion.id());

        let answer: Element = format!("<iq xmlns='jabber:client' type='result' id='{id}'/>")
            .parse()
            .unwrap();
        assert!(tracker.handle_response(&answer));
        completion.wait().await.unwrap();
    }

    #[tokio::test]
    async fn disable_surfaces_error_response() {
        let (control, tracker, mut rx) = control(Duration::from_secs(5));
        let completion = control.disable().await.unwrap();

        let written = rx.recv().await.unwrap();
        assert!(written.has_child("disable", ns::CARBONS));
        let id = written.attr("id").unwrap();

        let answer: Element = format!(
            "<iq xmlns='jabber:client' type='error' id='{id}'><error type='cancel'>\
             <feature-not-implemented xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
             </error></iq>"
        )
        .parse()
        .unwrap();
        assert!(tracker.handle_response(&answer));

        assert!(matches!(
            completion.wait().await,
            Err(Error::IqFailed { condition, .. }) if condition == "feature-not-implemented"
        ));
    }

    #[tokio::test]
    async fn unanswered_enable_times_out() {
        let (control, _tracker, _rx) = control(Duration::from_millis(20));
        let completion = control.enable().await.unwrap();

        assert!(matches!(
            completion.wait().await,
            Err(Error::IqTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn each_request_gets_a_fresh_id() {
        let (control, _tracker, _rx) = control(Duration::from_secs(5));
        let first = control.enable().await.unwrap();
        let second = control.enable().await.unwrap();
        assert_ne!(first.id(), second.id());
    }
}
