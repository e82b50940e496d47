//! XML namespaces used by the carbons extension.

/// XEP-0280 Message Carbons.
pub const CARBONS: &str = "urn:xmpp:carbons:2";

/// XEP-0297 Stanza Forwarding.
pub const FORWARD: &str = "urn:xmpp:forward:0";

/// XEP-0334 Message Processing Hints.
pub const HINTS: &str = "urn:xmpp:hints";

/// RFC 6120 client stream namespace.
pub const JABBER_CLIENT: &str = "jabber:client";

/// RFC 6120 stanza error conditions.
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
