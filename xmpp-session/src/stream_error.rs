// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream-level errors (`<stream:error/>`).

use core::fmt;

use minidom::Element;

use crate::error::ProtocolError;
use crate::ns;

/// Enumeration of the stream error conditions of RFC 6120, section 4.9.3.
///
/// Conditions not known to this crate are kept verbatim in
/// [`DefinedCondition::Other`] so that they survive a round trip.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum DefinedCondition {
    /// The entity has sent XML that cannot be processed.
    BadFormat,
    /// The entity has sent a namespace prefix that is unsupported.
    BadNamespacePrefix,
    /// A new stream has been initiated that conflicts with the existing one.
    Conflict,
    /// The peer has not responded to data sent over the stream.
    ConnectionTimeout,
    /// The 'to' domain is no longer serviced by the receiving entity.
    HostGone,
    /// The 'to' domain is not serviced by the receiving entity.
    HostUnknown,
    /// A stanza sent between two servers lacks proper addressing.
    ImproperAddressing,
    /// The server has experienced an internal error.
    InternalServerError,
    /// The 'from' address does not match an authorized JID.
    InvalidFrom,
    /// The stream or content namespace is not supported.
    InvalidNamespace,
    /// The entity has sent invalid XML.
    InvalidXml,
    /// The entity has attempted to send data before the stream was
    /// authenticated.
    NotAuthorized,
    /// The initiating entity has sent XML that violates well-formedness.
    NotWellFormed,
    /// The entity has violated some local service policy.
    PolicyViolation,
    /// The server is unable to properly connect to a remote entity.
    RemoteConnectionFailed,
    /// The server is closing the stream because it has new features to offer.
    Reset,
    /// The server lacks the system resources necessary to service the stream.
    ResourceConstraint,
    /// The entity has attempted to send restricted XML features.
    RestrictedXml,
    /// The server will not provide service but redirects to another host,
    /// given as `host[:port]`.
    SeeOtherHost(String),
    /// The connection manager redirects the client to another URI.
    SeeOtherUri(String),
    /// The server is being shut down.
    SystemShutdown,
    /// The error condition is not one of those defined here.
    UndefinedCondition,
    /// The stream uses an unsupported encoding.
    UnsupportedEncoding,
    /// A mandatory-to-negotiate feature is not supported by the peer.
    UnsupportedFeature,
    /// The entity has sent a first-level child of an unsupported type.
    UnsupportedStanzaType,
    /// The 'version' of the stream is not supported.
    UnsupportedVersion,
    /// A condition which this crate does not know about.
    Other(String),
}

impl DefinedCondition {
    /// The element name of this condition.
    pub fn name(&self) -> &str {
        match self {
            DefinedCondition::BadFormat => "bad-format",
            DefinedCondition::BadNamespacePrefix => "bad-namespace-prefix",
            DefinedCondition::Conflict => "conflict",
            DefinedCondition::ConnectionTimeout => "connection-timeout",
            DefinedCondition::HostGone => "host-gone",
            DefinedCondition::HostUnknown => "host-unknown",
            DefinedCondition::ImproperAddressing => "improper-addressing",
            DefinedCondition::InternalServerError => "internal-server-error",
            DefinedCondition::InvalidFrom => "invalid-from",
            DefinedCondition::InvalidNamespace => "invalid-namespace",
            DefinedCondition::InvalidXml => "invalid-xml",
            DefinedCondition::NotAuthorized => "not-authorized",
            DefinedCondition::NotWellFormed => "not-well-formed",
            DefinedCondition::PolicyViolation => "policy-violation",
            DefinedCondition::RemoteConnectionFailed => "remote-connection-failed",
            DefinedCondition::Reset => "reset",
            DefinedCondition::ResourceConstraint => "resource-constraint",
            DefinedCondition::RestrictedXml => "restricted-xml",
            DefinedCondition::SeeOtherHost(_) => "see-other-host",
            DefinedCondition::SeeOtherUri(_) => "see-other-uri",
            DefinedCondition::SystemShutdown => "system-shutdown",
            DefinedCondition::UndefinedCondition => "undefined-condition",
            DefinedCondition::UnsupportedEncoding => "unsupported-encoding",
            DefinedCondition::UnsupportedFeature => "unsupported-feature",
            DefinedCondition::UnsupportedStanzaType => "unsupported-stanza-type",
            DefinedCondition::UnsupportedVersion => "unsupported-version",
            DefinedCondition::Other(name) => name,
        }
    }

    fn parse(element: &Element) -> Self {
        match element.name() {
            "bad-format" => DefinedCondition::BadFormat,
            "bad-namespace-prefix" => DefinedCondition::BadNamespacePrefix,
            "conflict" => DefinedCondition::Conflict,
            "connection-timeout" => DefinedCondition::ConnectionTimeout,
            "host-gone" => DefinedCondition::HostGone,
            "host-unknown" => DefinedCondition::HostUnknown,
            "improper-addressing" => DefinedCondition::ImproperAddressing,
            "internal-server-error" => DefinedCondition::InternalServerError,
            "invalid-from" => DefinedCondition::InvalidFrom,
            "invalid-namespace" => DefinedCondition::InvalidNamespace,
            "invalid-xml" => DefinedCondition::InvalidXml,
            "not-authorized" => DefinedCondition::NotAuthorized,
            "not-well-formed" => DefinedCondition::NotWellFormed,
            "policy-violation" => DefinedCondition::PolicyViolation,
            "remote-connection-failed" => DefinedCondition::RemoteConnectionFailed,
            "reset" => DefinedCondition::Reset,
            "resource-constraint" => DefinedCondition::ResourceConstraint,
            "restricted-xml" => DefinedCondition::RestrictedXml,
            "see-other-host" => DefinedCondition::SeeOtherHost(element.text()),
            "see-other-uri" => DefinedCondition::SeeOtherUri(element.text()),
            "system-shutdown" => DefinedCondition::SystemShutdown,
            "undefined-condition" => DefinedCondition::UndefinedCondition,
            "unsupported-encoding" => DefinedCondition::UnsupportedEncoding,
            "unsupported-feature" => DefinedCondition::UnsupportedFeature,
            "unsupported-stanza-type" => DefinedCondition::UnsupportedStanzaType,
            "unsupported-version" => DefinedCondition::UnsupportedVersion,
            other => DefinedCondition::Other(other.to_owned()),
        }
    }

    fn to_element(&self) -> Element {
        let builder = Element::builder(self.name(), ns::XMPP_STREAMS);
        match self {
            DefinedCondition::SeeOtherHost(target) | DefinedCondition::SeeOtherUri(target) => {
                builder.append(target.clone()).build()
            }
            _ => builder.build(),
        }
    }
}

/// A stream error sent or received on an XMPP stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamError {
    /// The enumerated error condition which triggered this stream error.
    pub condition: DefinedCondition,

    /// Optional error text. The first part is the optional `xml:lang`
    /// language tag, the second part is the actual text content.
    pub text: Option<(Option<String>, String)>,

    /// Optional application-defined element which refines the specified
    /// [`Self::condition`].
    pub application_specific: Vec<Element>,
}

impl StreamError {
    /// Create a stream error with only a condition.
    pub fn new(condition: DefinedCondition) -> Self {
        StreamError {
            condition,
            text: None,
            application_specific: Vec::new(),
        }
    }

    /// Attach a human-readable text to this error.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some((None, text.into()));
        self
    }

    /// The host or URI the peer redirects us to, if any.
    pub fn redirect(&self) -> Option<&str> {
        match &self.condition {
            DefinedCondition::SeeOtherHost(target) | DefinedCondition::SeeOtherUri(target) => {
                Some(target)
            }
            _ => None,
        }
    }

    /// Whether the session must be given up rather than re-established at
    /// another location.
    pub fn is_terminal(&self) -> bool {
        self.redirect().is_none()
    }

    /// Whether the server announced its own shutdown.
    pub fn is_system_shutdown(&self) -> bool {
        self.condition == DefinedCondition::SystemShutdown
    }

    /// Parse a `<stream:error/>` element.
    pub fn parse(element: &Element) -> Result<Self, ProtocolError> {
        if !element.is("error", ns::STREAM) {
            return Err(ProtocolError::unexpected(element));
        }
        let mut condition = None;
        let mut text = None;
        let mut application_specific = Vec::new();
        for child in element.children() {
            if child.has_ns(ns::XMPP_STREAMS) {
                if child.name() == "text" {
                    // xml:lang is dropped by the stream reader.
                    text = Some((None, child.text()));
                } else if condition.is_none() {
                    condition = Some(DefinedCondition::parse(child));
                }
            } else {
                application_specific.push(child.clone());
            }
        }
        Ok(StreamError {
            condition: condition.unwrap_or(DefinedCondition::UndefinedCondition),
            text,
            application_specific,
        })
    }

    /// Serialise this error as a `<stream:error/>` element.
    pub fn to_element(&self) -> Element {
        let mut element = Element::builder("error", ns::STREAM)
            .append(self.condition.to_element())
            .build();
        if let Some((lang, text)) = &self.text {
            element.append_child(
                Element::builder("text", ns::XMPP_STREAMS)
                    .attr("xml:lang", lang.clone())
                    .append(text.clone())
                    .build(),
            );
        }
        for child in &self.application_specific {
            element.append_child(child.clone());
        }
        element
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.condition.name())?;
        match &self.condition {
            DefinedCondition::SeeOtherHost(target) | DefinedCondition::SeeOtherUri(target) => {
                write!(f, " ({})", target)?
            }
            _ => (),
        }
        if let Some((_, text)) = &self.text {
            write!(f, ": {:?}", text)?;
        }
        for child in &self.application_specific {
            write!(f, " [{}]", child.name())?;
        }
        Ok(())
    }
}

impl std::error::Error for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> StreamError {
        let element: Element = xml.parse().unwrap();
        StreamError::parse(&element).unwrap()
    }

    #[test]
    fn see_other_host_is_not_terminal() {
        let error = parse("<stream:error xmlns:stream='http://etherx.jabber.org/streams'><see-other-host xmlns='urn:ietf:params:xml:ns:xmpp-streams'>[2001:db8::1]:9222</see-other-host></stream:error>");
        assert_eq!(
            error.condition,
            DefinedCondition::SeeOtherHost(String::from("[2001:db8::1]:9222"))
        );
        assert_eq!(error.redirect(), Some("[2001:db8::1]:9222"));
        assert!(!error.is_terminal());
    }

    #[test]
    fn other_conditions_are_terminal() {
        let error = parse("<error xmlns='http://etherx.jabber.org/streams'><system-shutdown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/><text xmlns='urn:ietf:params:xml:ns:xmpp-streams'>bye</text></error>");
        assert!(error.is_terminal());
        assert!(error.is_system_shutdown());
        assert_eq!(error.to_string(), "system-shutdown: \"bye\"");
    }

    #[test]
    fn condition_names_round_trip() {
        let conditions = [
            DefinedCondition::HostGone,
            DefinedCondition::HostUnknown,
            DefinedCondition::InternalServerError,
            DefinedCondition::PolicyViolation,
            DefinedCondition::RemoteConnectionFailed,
            DefinedCondition::SeeOtherUri(String::from("https://bosh.example.org/")),
            DefinedCondition::SystemShutdown,
            DefinedCondition::UndefinedCondition,
            DefinedCondition::Other(String::from("x-custom")),
        ];
        for condition in conditions {
            let error = StreamError::new(condition.clone());
            let reparsed = StreamError::parse(&error.to_element()).unwrap();
            assert_eq!(reparsed.condition, condition);
        }
    }

    #[test]
    fn application_specific_is_kept() {
        let error = parse("<error xmlns='http://etherx.jabber.org/streams'><undefined-condition xmlns='urn:ietf:params:xml:ns:xmpp-streams'/><handled-count-too-high xmlns='urn:xmpp:sm:3' h='10' send-count='8'/></error>");
        assert_eq!(error.application_specific.len(), 1);
        assert_eq!(
            error.to_string(),
            "undefined-condition [handled-count-too-high]"
        );
    }
}
