// Copyright (c) 2017-2018 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XML namespaces used on the wire.

/// RFC 6120: XMPP Core, the stream envelope.
pub const STREAM: &str = "http://etherx.jabber.org/streams";

/// RFC 6120: default namespace of client-to-server streams.
pub const JABBER_CLIENT: &str = "jabber:client";

/// XEP-0114: default namespace of external component streams.
pub const COMPONENT_ACCEPT: &str = "jabber:component:accept";

/// RFC 6120: STARTTLS negotiation.
pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

/// RFC 6120: SASL negotiation.
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// RFC 6120: resource binding.
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// RFC 6120: stream error conditions.
pub const XMPP_STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

/// RFC 6120: stanza error conditions.
pub const XMPP_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// XEP-0198: Stream Management.
pub const SM: &str = "urn:xmpp:sm:3";

/// XEP-0124: BOSH body wrapper.
pub const BOSH: &str = "http://jabber.org/protocol/httpbind";

/// XEP-0206: XMPP over BOSH.
pub const XBOSH: &str = "urn:xmpp:xbosh";
