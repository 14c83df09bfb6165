// Copyright (c) 2017 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza-level errors as defined in RFC 6120, section 8.3.

use core::fmt;
use core::str::FromStr;

use jid::Jid;
use minidom::Element;

use crate::error::ProtocolError;
use crate::ns;

/// The type of the error, which tells the sender what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Retry after providing credentials.
    Auth,
    /// Do not retry (the error cannot be remedied).
    Cancel,
    /// Proceed (the condition was only a warning).
    Continue,
    /// Retry after changing the data sent.
    Modify,
    /// Retry after waiting (the error is temporary).
    Wait,
}

impl ErrorType {
    /// Wire representation of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Auth => "auth",
            ErrorType::Cancel => "cancel",
            ErrorType::Continue => "continue",
            ErrorType::Modify => "modify",
            ErrorType::Wait => "wait",
        }
    }
}

impl FromStr for ErrorType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "auth" => ErrorType::Auth,
            "cancel" => ErrorType::Cancel,
            "continue" => ErrorType::Continue,
            "modify" => ErrorType::Modify,
            "wait" => ErrorType::Wait,
            other => {
                return Err(ProtocolError::InvalidStanza(format!(
                    "unknown error type {:?}",
                    other
                )))
            }
        })
    }
}

/// The defined conditions of RFC 6120, section 8.3.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinedCondition {
    /// The sender has sent a stanza containing XML that does not conform to
    /// the appropriate schema or that cannot be processed.
    BadRequest,
    /// Access cannot be granted because an existing resource exists with the
    /// same name or address.
    Conflict,
    /// The feature represented in the XML stanza is not implemented.
    FeatureNotImplemented,
    /// The requesting entity does not possess the necessary permissions.
    Forbidden,
    /// The recipient or server can no longer be contacted at this address,
    /// optionally carrying the new address.
    Gone(Option<String>),
    /// The server has experienced a misconfiguration or other internal error.
    InternalServerError,
    /// The addressed JID or item requested cannot be found.
    ItemNotFound,
    /// The sending entity has provided an invalid XMPP address.
    JidMalformed,
    /// The recipient or server understands the request but cannot process it.
    NotAcceptable,
    /// The recipient or server does not allow any entity to perform the action.
    NotAllowed,
    /// The sender needs to provide credentials before being allowed to act.
    NotAuthorized,
    /// The entity has violated some local service policy.
    PolicyViolation,
    /// The intended recipient is temporarily unavailable.
    RecipientUnavailable,
    /// The recipient or server is redirecting requests, optionally carrying
    /// the new address.
    Redirect(Option<String>),
    /// The requesting entity is not authorized because registration is
    /// required.
    RegistrationRequired,
    /// A remote server or service specified as part or all of the JID of the
    /// intended recipient does not exist or cannot be resolved.
    RemoteServerNotFound,
    /// A remote server could not be contacted within a reasonable time.
    RemoteServerTimeout,
    /// The server or recipient is busy or lacks the system resources.
    ResourceConstraint,
    /// The server or recipient does not currently provide the requested
    /// service.
    ServiceUnavailable,
    /// The requesting entity is not authorized because a subscription is
    /// required.
    SubscriptionRequired,
    /// The error condition is not one of those defined here.
    UndefinedCondition,
    /// The recipient or server understood the request but was not expecting
    /// it at this time.
    UnexpectedRequest,
}

impl DefinedCondition {
    /// The element name of this condition.
    pub fn name(&self) -> &'static str {
        match self {
            DefinedCondition::BadRequest => "bad-request",
            DefinedCondition::Conflict => "conflict",
            DefinedCondition::FeatureNotImplemented => "feature-not-implemented",
            DefinedCondition::Forbidden => "forbidden",
            DefinedCondition::Gone(_) => "gone",
            DefinedCondition::InternalServerError => "internal-server-error",
            DefinedCondition::ItemNotFound => "item-not-found",
            DefinedCondition::JidMalformed => "jid-malformed",
            DefinedCondition::NotAcceptable => "not-acceptable",
            DefinedCondition::NotAllowed => "not-allowed",
            DefinedCondition::NotAuthorized => "not-authorized",
            DefinedCondition::PolicyViolation => "policy-violation",
            DefinedCondition::RecipientUnavailable => "recipient-unavailable",
            DefinedCondition::Redirect(_) => "redirect",
            DefinedCondition::RegistrationRequired => "registration-required",
            DefinedCondition::RemoteServerNotFound => "remote-server-not-found",
            DefinedCondition::RemoteServerTimeout => "remote-server-timeout",
            DefinedCondition::ResourceConstraint => "resource-constraint",
            DefinedCondition::ServiceUnavailable => "service-unavailable",
            DefinedCondition::SubscriptionRequired => "subscription-required",
            DefinedCondition::UndefinedCondition => "undefined-condition",
            DefinedCondition::UnexpectedRequest => "unexpected-request",
        }
    }

    fn parse(element: &Element) -> Option<Self> {
        let text = || Some(element.text()).filter(|text| !text.is_empty());
        Some(match element.name() {
            "bad-request" => DefinedCondition::BadRequest,
            "conflict" => DefinedCondition::Conflict,
            "feature-not-implemented" => DefinedCondition::FeatureNotImplemented,
            "forbidden" => DefinedCondition::Forbidden,
            "gone" => DefinedCondition::Gone(text()),
            "internal-server-error" => DefinedCondition::InternalServerError,
            "item-not-found" => DefinedCondition::ItemNotFound,
            "jid-malformed" => DefinedCondition::JidMalformed,
            "not-acceptable" => DefinedCondition::NotAcceptable,
            "not-allowed" => DefinedCondition::NotAllowed,
            "not-authorized" => DefinedCondition::NotAuthorized,
            "policy-violation" => DefinedCondition::PolicyViolation,
            "recipient-unavailable" => DefinedCondition::RecipientUnavailable,
            "redirect" => DefinedCondition::Redirect(text()),
            "registration-required" => DefinedCondition::RegistrationRequired,
            "remote-server-not-found" => DefinedCondition::RemoteServerNotFound,
            "remote-server-timeout" => DefinedCondition::RemoteServerTimeout,
            "resource-constraint" => DefinedCondition::ResourceConstraint,
            "service-unavailable" => DefinedCondition::ServiceUnavailable,
            "subscription-required" => DefinedCondition::SubscriptionRequired,
            "undefined-condition" => DefinedCondition::UndefinedCondition,
            "unexpected-request" => DefinedCondition::UnexpectedRequest,
            _ => return None,
        })
    }

    fn to_element(&self) -> Element {
        let builder = Element::builder(self.name(), ns::XMPP_STANZAS);
        match self {
            DefinedCondition::Gone(Some(uri)) | DefinedCondition::Redirect(Some(uri)) => {
                builder.append(uri.clone()).build()
            }
            _ => builder.build(),
        }
    }
}

/// The representation of a stanza error.
#[derive(Debug, Clone, PartialEq)]
pub struct StanzaError {
    /// The type of this error.
    pub type_: ErrorType,
    /// The JID of the entity who set this error.
    pub by: Option<Jid>,
    /// One of the defined conditions for this error to happen.
    pub defined_condition: DefinedCondition,
    /// Human-readable description of this error.
    pub text: Option<String>,
    /// A protocol-specific extension for this error.
    pub other: Option<Element>,
}

impl StanzaError {
    /// Create a new `<error/>` with the according content.
    pub fn new(type_: ErrorType, defined_condition: DefinedCondition, text: Option<&str>) -> Self {
        StanzaError {
            type_,
            by: None,
            defined_condition,
            text: text.map(str::to_owned),
            other: None,
        }
    }

    /// Parse an `<error/>` child of a stanza.
    pub fn parse(element: &Element) -> Result<Self, ProtocolError> {
        if element.name() != "error" {
            return Err(ProtocolError::unexpected(element));
        }
        let type_ = element
            .attr("type")
            .ok_or_else(|| ProtocolError::InvalidStanza("error without type".to_owned()))?
            .parse()?;
        let by = match element.attr("by") {
            Some(by) => Some(
                by.parse()
                    .map_err(|e| ProtocolError::InvalidStanza(format!("invalid by: {}", e)))?,
            ),
            None => None,
        };
        let mut defined_condition = None;
        let mut text = None;
        let mut other = None;
        for child in element.children() {
            if child.has_ns(ns::XMPP_STANZAS) {
                if child.name() == "text" {
                    text = Some(child.text());
                } else if defined_condition.is_none() {
                    defined_condition = DefinedCondition::parse(child);
                }
            } else if other.is_none() {
                other = Some(child.clone());
            }
        }
        Ok(StanzaError {
            type_,
            by,
            defined_condition: defined_condition.unwrap_or(DefinedCondition::UndefinedCondition),
            text,
            other,
        })
    }

    /// Serialise this error as a child of a stanza in the `stanza_ns`
    /// namespace.
    pub fn to_element(&self, stanza_ns: &str) -> Element {
        let mut error = Element::builder("error", stanza_ns)
            .attr("type", self.type_.as_str())
            .attr("by", self.by.as_ref().map(|by| by.to_string()))
            .append(self.defined_condition.to_element())
            .build();
        if let Some(text) = &self.text {
            error.append_child(
                Element::builder("text", ns::XMPP_STANZAS)
                    .append(text.clone())
                    .build(),
            );
        }
        if let Some(other) = &self.other {
            error.append_child(other.clone());
        }
        error
    }
}

impl fmt::Display for StanzaError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{} ({})",
            self.defined_condition.name(),
            self.type_.as_str()
        )?;
        if let Some(text) = &self.text {
            write!(fmt, ": {}", text)?;
        }
        Ok(())
    }
}

impl std::error::Error for StanzaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_text() {
        let elem: Element = "<error xmlns='jabber:client' type='cancel'><item-not-found xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/><text xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'>nope</text></error>"
            .parse()
            .unwrap();
        let error = StanzaError::parse(&elem).unwrap();
        assert_eq!(error.type_, ErrorType::Cancel);
        assert_eq!(error.defined_condition, DefinedCondition::ItemNotFound);
        assert_eq!(error.text.as_deref(), Some("nope"));
        assert_eq!(error.to_string(), "item-not-found (cancel): nope");
    }

    #[test]
    fn missing_type_is_invalid() {
        let elem: Element = "<error xmlns='jabber:client'><conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>"
            .parse()
            .unwrap();
        assert!(StanzaError::parse(&elem).is_err());
    }

    #[test]
    fn serialise_redirect() {
        let error = StanzaError::new(
            ErrorType::Modify,
            DefinedCondition::Redirect(Some(String::from("xmpp:other@example.org"))),
            None,
        );
        let elem = error.to_element(ns::JABBER_CLIENT);
        assert_eq!(elem.attr("type"), Some("modify"));
        let redirect = elem.get_child("redirect", ns::XMPP_STANZAS).unwrap();
        assert_eq!(redirect.text(), "xmpp:other@example.org");
        assert_eq!(StanzaError::parse(&elem).unwrap(), error);
    }
}
