use std::sync::Arc;

use {tokio_xmpp::parsers::jid::BareJid, tracing::info};

use crate::{
    carbons::CarbonsModule,
    config::CarbonsConfig,
    control::{CarbonsControl, ControlCompletion},
    conversation::ConversationResolver,
    error::Result,
    event::CarbonEventSink,
    iq::IqTracker,
    outbound::StanzaOutbound,
};

/// Per-account carbons runtime: everything the stanza router needs.
pub struct XmppSession {
    pub account_id: String,
    pub config: CarbonsConfig,
    pub carbons: CarbonsModule,
    pub control: CarbonsControl,
    pub iq: Arc<IqTracker>,
    pub outbound: Arc<dyn StanzaOutbound>,
}

impl XmppSession {
    pub fn new(
        account_id: impl Into<String>,
        config: CarbonsConfig,
        outbound: Arc<dyn StanzaOutbound>,
        resolver: Arc<dyn ConversationResolver>,
        sink: Arc<dyn CarbonEventSink>,
    ) -> Self {
        let iq = Arc::new(IqTracker::new(Arc::clone(&outbound), config.iq_timeout()));
        let carbons = CarbonsModule::new(resolver, sink).with_config(config.clone());
        Self {
            account_id: account_id.into(),
            config,
            carbons,
            control: CarbonsControl::new(Arc::clone(&iq)),
            iq,
            outbound,
        }
    }

    /// Bind the session to the account's bare JID (enables sender checks).
    pub fn with_account(mut self, account: BareJid) -> Self {
        self.carbons = self.carbons.with_account(account);
        self
    }

    /// Called once the stream is established. Requests carbons when the
    /// account is configured to, returning the pending acknowledgement.
    pub async fn on_connected(&self) -> Result<Option<ControlCompletion>> {
        if !self.config.enable_on_connect {
            info!(account_id = %self.account_id, "carbons left disabled on connect");
            return Ok(None);
        }
        info!(account_id = %self.account_id, "enabling carbons on connect");
        self.control.enable().await.map(Some)
    }
}
