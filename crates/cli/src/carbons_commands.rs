use std::{path::Path, sync::Arc};

use {
    anyhow::{Context, bail},
    clap::ValueEnum,
    tandem_common::EventBus,
    tandem_xmpp::{
        CarbonEvent, CarbonSummary, CarbonsAction, ConversationStore, QueueOutbound, XmppSession,
        control_request, handlers::handle_stanza,
    },
    tokio::sync::{broadcast, mpsc},
    tokio_xmpp::{
        Stanza,
        minidom::Element,
        parsers::{jid::BareJid, message::Message},
    },
    tracing::{debug, info},
    uuid::Uuid,
};

use crate::config::TandemConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ActionArg {
    Enable,
    Disable,
}

impl From<ActionArg> for CarbonsAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Enable => Self::Enable,
            ActionArg::Disable => Self::Disable,
        }
    }
}

/// What came out of running one stanza through a session.
pub struct Inspection {
    pub events: Vec<CarbonSummary>,
    pub replies: Vec<Element>,
}

/// Feed a single stanza through an offline session and collect what it
/// published and what it would have written back to the server.
pub async fn inspect_stanza(
    config: &TandemConfig,
    stanza: Element,
    account: Option<BareJid>,
) -> anyhow::Result<Inspection> {
    if stanza.name() != "message" {
        bail!("expected a <message/> stanza, found <{}/>", stanza.name());
    }
    let message =
        Message::try_from(stanza).map_err(|e| anyhow::anyhow!("invalid message stanza: {e}"))?;

    let (outbound, mut written) = QueueOutbound::new(16);
    let bus = EventBus::new(config.carbons.event_capacity);
    let mut events = bus.subscribe();

    let mut session = XmppSession::new(
        "inspect",
        config.carbons.clone(),
        Arc::new(outbound),
        Arc::new(ConversationStore::new()),
        Arc::new(bus),
    );
    if let Some(account) = account {
        session = session.with_account(account);
    }

    handle_stanza(&session, Stanza::Message(message)).await;

    Ok(Inspection {
        events: drain_events(&mut events),
        replies: drain_replies(&mut written),
    })
}

fn drain_events(events: &mut broadcast::Receiver<CarbonEvent>) -> Vec<CarbonSummary> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event.summary());
    }
    out
}

fn drain_replies(written: &mut mpsc::Receiver<Element>) -> Vec<Element> {
    let mut out = Vec::new();
    while let Ok(stanza) = written.try_recv() {
        out.push(stanza);
    }
    out
}

/// `tandem inspect`: print one JSON line per carbon event.
pub async fn handle_inspect(
    config: &TandemConfig,
    file: &Path,
    account: Option<String>,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let stanza: Element = raw
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", file.display()))?;
    let account = account
        .map(|jid| jid.parse::<BareJid>())
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid account JID: {e}"))?;

    let inspection = inspect_stanza(config, stanza, account).await?;
    debug!(
        events = inspection.events.len(),
        replies = inspection.replies.len(),
        "stanza inspected"
    );

    for summary in &inspection.events {
        println!("{}", serde_json::to_string(summary)?);
    }
    for reply in &inspection.replies {
        eprintln!("reply: {}", render(reply)?);
    }
    if !inspection.replies.is_empty() {
        bail!("envelope rejected");
    }
    Ok(())
}

/// `tandem request`: print the control IQ for `action`.
pub fn handle_request(action: ActionArg, id: Option<String>) -> anyhow::Result<()> {
    let action = CarbonsAction::from(action);
    let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(%action, iq_id = %id, "building carbons control request");
    println!("{}", render(&Element::from(control_request(action, id)))?);
    Ok(())
}

fn render(stanza: &Element) -> anyhow::Result<String> {
    let mut out = Vec::new();
    stanza.write_to(&mut out)?;
    Ok(String::from_utf8(out)?)
}
