// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::fmt;
use core::str::FromStr;

use minidom::Element;

use super::BoshError;
use crate::error::Error;
use crate::ns;
use crate::xmlstream::escape;

/// Reason of a `type='terminate'` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The format of an HTTP header or binding element is unacceptable.
    BadRequest,
    /// The target domain is no longer serviced.
    HostGone,
    /// The target domain is unknown.
    HostUnknown,
    /// The `to` or `route` attribute is wrong.
    ImproperAddressing,
    /// The connection manager failed.
    InternalServerError,
    /// An unknown `sid` or a `rid` out of the window.
    ItemNotFound,
    /// Another request was in conflict with this one.
    OtherRequest,
    /// The client broke a policy of the connection manager.
    PolicyViolation,
    /// The XMPP server could not be reached.
    RemoteConnectionFailed,
    /// The XMPP server sent a stream error.
    RemoteStreamError,
    /// Reconnect to the URI in the `<uri/>` child.
    SeeOtherUri,
    /// The connection manager is shutting down.
    SystemShutdown,
    /// Not covered by any other condition.
    UndefinedCondition,
    /// An unknown condition, kept verbatim.
    Other(String),
}

impl Condition {
    /// The attribute value of this condition.
    pub fn as_str(&self) -> &str {
        match self {
            Condition::BadRequest => "bad-request",
            Condition::HostGone => "host-gone",
            Condition::HostUnknown => "host-unknown",
            Condition::ImproperAddressing => "improper-addressing",
            Condition::InternalServerError => "internal-server-error",
            Condition::ItemNotFound => "item-not-found",
            Condition::OtherRequest => "other-request",
            Condition::PolicyViolation => "policy-violation",
            Condition::RemoteConnectionFailed => "remote-connection-failed",
            Condition::RemoteStreamError => "remote-stream-error",
            Condition::SeeOtherUri => "see-other-uri",
            Condition::SystemShutdown => "system-shutdown",
            Condition::UndefinedCondition => "undefined-condition",
            Condition::Other(other) => other,
        }
    }
}

impl FromStr for Condition {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Condition, Self::Err> {
        Ok(match s {
            "bad-request" => Condition::BadRequest,
            "host-gone" => Condition::HostGone,
            "host-unknown" => Condition::HostUnknown,
            "improper-addressing" => Condition::ImproperAddressing,
            "internal-server-error" => Condition::InternalServerError,
            "item-not-found" => Condition::ItemNotFound,
            "other-request" => Condition::OtherRequest,
            "policy-violation" => Condition::PolicyViolation,
            "remote-connection-failed" => Condition::RemoteConnectionFailed,
            "remote-stream-error" => Condition::RemoteStreamError,
            "see-other-uri" => Condition::SeeOtherUri,
            "system-shutdown" => Condition::SystemShutdown,
            "undefined-condition" => Condition::UndefinedCondition,
            other => Condition::Other(other.to_owned()),
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `<body/>` wrapper element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    /// Request id
    pub rid: Option<u64>,
    /// Session id
    pub sid: Option<String>,
    /// Target domain, on session creation
    pub to: Option<String>,
    /// Highest request id received in order
    pub ack: Option<u64>,
    /// Longest time the connection manager may hold a request, in seconds
    pub wait: Option<u32>,
    /// Number of requests the connection manager may hold
    pub hold: Option<u32>,
    /// BOSH protocol version
    pub ver: Option<String>,
    /// `xmpp:version`, on session creation
    pub xmpp_version: Option<String>,
    /// `xmpp:restart='true'`
    pub restart: bool,
    /// `type='terminate'`
    pub terminate: bool,
    /// Reason for a termination
    pub condition: Option<Condition>,
    /// Contents of the `<uri/>` child of `see-other-uri`
    pub uri: Option<String>,
    /// Wrapped stanzas
    pub payloads: Vec<Element>,
}

fn parse_attr<T: FromStr>(element: &Element, name: &str) -> Result<Option<T>, BoshError> {
    element
        .attr(name)
        .map(|value| {
            value
                .parse()
                .map_err(|_| BoshError::UnexpectedBody(format!("invalid {} attribute", name)))
        })
        .transpose()
}

impl Body {
    /// Parse a response received from the connection manager.
    pub fn parse(xml: &str) -> Result<Body, Error> {
        let element: Element = xml.parse()?;
        if !element.is("body", ns::BOSH) {
            return Err(BoshError::UnexpectedBody(format!(
                "{{{}}}{}",
                element.ns(),
                element.name()
            ))
            .into());
        }
        let condition = element
            .attr("condition")
            .map(|c| Condition::from_str(c).unwrap_or(Condition::UndefinedCondition));
        let mut uri = None;
        let mut payloads = Vec::new();
        for child in element.children() {
            if child.is("uri", ns::BOSH) {
                uri = Some(child.text());
            } else {
                payloads.push(child.clone());
            }
        }
        Ok(Body {
            rid: parse_attr(&element, "rid")?,
            sid: element.attr("sid").map(str::to_owned),
            to: element.attr("to").map(str::to_owned),
            ack: parse_attr(&element, "ack")?,
            wait: parse_attr(&element, "wait")?,
            hold: parse_attr(&element, "hold")?,
            ver: element.attr("ver").map(str::to_owned),
            xmpp_version: None,
            restart: false,
            terminate: element.attr("type") == Some("terminate"),
            condition,
            uri,
            payloads,
        })
    }

    /// Serialise for an HTTP request.
    pub fn to_xml(&self) -> Result<String, Error> {
        let mut out = format!("<body xmlns='{}'", ns::BOSH);
        let mut attr = |name: &str, value: &str| {
            out.push_str(&format!(" {}='{}'", name, escape(value)));
        };
        if let Some(rid) = self.rid {
            attr("rid", &rid.to_string());
        }
        if let Some(sid) = &self.sid {
            attr("sid", sid);
        }
        if let Some(to) = &self.to {
            attr("to", to);
        }
        if let Some(ack) = self.ack {
            attr("ack", &ack.to_string());
        }
        if let Some(wait) = self.wait {
            attr("wait", &wait.to_string());
        }
        if let Some(hold) = self.hold {
            attr("hold", &hold.to_string());
        }
        if let Some(ver) = &self.ver {
            attr("ver", ver);
        }
        if self.terminate {
            attr("type", "terminate");
        }
        if let Some(condition) = &self.condition {
            attr("condition", condition.as_str());
        }
        if self.xmpp_version.is_some() || self.restart {
            attr("xmlns:xmpp", ns::XBOSH);
        }
        if let Some(version) = &self.xmpp_version {
            attr("xmpp:version", version);
        }
        if self.restart {
            attr("xmpp:restart", "true");
        }
        if self.uri.is_none() && self.payloads.is_empty() {
            out.push_str("/>");
            return Ok(out);
        }
        out.push('>');
        if let Some(uri) = &self.uri {
            out.push_str(&format!("<uri>{}</uri>", escape(uri)));
        }
        let mut payloads = Vec::new();
        for payload in &self.payloads {
            payload.write_to(&mut payloads)?;
        }
        out.push_str(&String::from_utf8_lossy(&payloads));
        out.push_str("</body>");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_with_uri() {
        let body = Body::parse("<body xmlns='http://jabber.org/protocol/httpbind' type='terminate' condition='see-other-uri'><uri>https://other.example/bosh</uri></body>").unwrap();
        assert!(body.terminate);
        assert_eq!(body.condition, Some(Condition::SeeOtherUri));
        assert_eq!(body.uri.as_deref(), Some("https://other.example/bosh"));
        assert!(body.payloads.is_empty());
    }

    #[test]
    fn conditions_are_kept_verbatim() {
        for name in [
            "host-gone",
            "bad-request",
            "see-other-uri",
            "remote-stream-error",
            "x-vendor-specific",
        ] {
            let condition = Condition::from_str(name).unwrap();
            assert_eq!(condition.as_str(), name);

            let xml = Body {
                terminate: true,
                condition: Some(condition.clone()),
                ..Default::default()
            }
            .to_xml()
            .unwrap();
            let parsed = Body::parse(&xml).unwrap();
            assert_eq!(parsed.condition, Some(condition));
        }
    }

    #[test]
    fn payloads_are_wrapped() {
        let message: Element = "<message xmlns='jabber:client' to='romeo@montague.lit'><body>hi</body></message>"
            .parse()
            .unwrap();
        let body = Body {
            rid: Some(1249243562),
            sid: Some("SomeSID".to_owned()),
            payloads: vec![message.clone()],
            ..Default::default()
        };
        let xml = body.to_xml().unwrap();
        assert!(xml.starts_with("<body xmlns='http://jabber.org/protocol/httpbind' rid='1249243562' sid='SomeSID'>"));
        let parsed = Body::parse(&xml).unwrap();
        assert_eq!(parsed.rid, Some(1249243562));
        assert_eq!(parsed.payloads, vec![message]);
    }

    #[test]
    fn restart_request() {
        let xml = Body {
            rid: Some(7),
            sid: Some("s".to_owned()),
            restart: true,
            ..Default::default()
        }
        .to_xml()
        .unwrap();
        assert!(xml.contains("xmlns:xmpp='urn:xmpp:xbosh'"));
        assert!(xml.contains("xmpp:restart='true'"));
    }

    #[test]
    fn not_a_body() {
        assert!(matches!(
            Body::parse("<stream xmlns='urn:x'/>"),
            Err(Error::Bosh(BoshError::UnexpectedBody(_)))
        ));
    }
}
