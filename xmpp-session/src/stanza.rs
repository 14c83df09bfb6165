// Copyright (c) 2017 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The three kinds of stanzas exchanged over a session.
//!
//! Payloads are kept as plain [`minidom::Element`]s; typed access to
//! extension payloads goes through the
//! [`ExtensionRegistry`](crate::extensions::ExtensionRegistry).

use core::fmt;
use core::str::FromStr;

use jid::Jid;
use minidom::Element;
use rand::{thread_rng, Rng};

use crate::error::ProtocolError;
use crate::ns;
use crate::stanza_error::StanzaError;

/// Generate a random stanza id.
pub fn make_id() -> String {
    let id: u64 = thread_rng().gen();
    format!("{}", id)
}

fn parse_jid(element: &Element, attr: &str) -> Result<Option<Jid>, ProtocolError> {
    match element.attr(attr) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e| ProtocolError::InvalidStanza(format!("invalid {}: {}", attr, e))),
        None => Ok(None),
    }
}

fn is_stanza_ns(element: &Element) -> bool {
    element.has_ns(ns::JABBER_CLIENT) || element.has_ns(ns::COMPONENT_ACCEPT)
}

/// The payload of an `<iq/>`, which also decides its type.
#[derive(Debug, Clone, PartialEq)]
pub enum IqType {
    /// A request to retrieve information.
    Get(Element),
    /// A request to change state.
    Set(Element),
    /// A successful answer, with an optional payload.
    Result(Option<Element>),
    /// A failed answer.
    Error(StanzaError),
}

impl IqType {
    fn as_str(&self) -> &'static str {
        match self {
            IqType::Get(_) => "get",
            IqType::Set(_) => "set",
            IqType::Result(_) => "result",
            IqType::Error(_) => "error",
        }
    }

    /// Whether this iq expects an answer.
    pub fn is_request(&self) -> bool {
        matches!(self, IqType::Get(_) | IqType::Set(_))
    }
}

/// An `<iq/>` stanza.
#[derive(Debug, Clone, PartialEq)]
pub struct Iq {
    /// The sender of this iq.
    pub from: Option<Jid>,
    /// The recipient of this iq.
    pub to: Option<Jid>,
    /// The identifier which correlates requests and answers.
    pub id: String,
    /// The type and payload.
    pub payload: IqType,
}

impl Iq {
    /// Creates an `<iq type='get'/>`.
    pub fn from_get(id: impl Into<String>, payload: Element) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            payload: IqType::Get(payload),
        }
    }

    /// Creates an `<iq type='set'/>`.
    pub fn from_set(id: impl Into<String>, payload: Element) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            payload: IqType::Set(payload),
        }
    }

    /// Creates an `<iq type='result'/>`.
    pub fn from_result(id: impl Into<String>, payload: Option<Element>) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            payload: IqType::Result(payload),
        }
    }

    /// Creates an `<iq type='error'/>`.
    pub fn from_error(id: impl Into<String>, error: StanzaError) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            payload: IqType::Error(error),
        }
    }

    /// Sets the recipient.
    pub fn with_to(mut self, to: Option<Jid>) -> Iq {
        self.to = to;
        self
    }

    /// Sets the sender.
    pub fn with_from(mut self, from: Option<Jid>) -> Iq {
        self.from = from;
        self
    }

    fn parse(element: &Element) -> Result<Iq, ProtocolError> {
        let id = element
            .attr("id")
            .ok_or_else(|| ProtocolError::InvalidStanza("iq without id".to_owned()))?
            .to_owned();
        let first_child = element.children().next();
        let payload = match element.attr("type") {
            Some("get") | Some("set") => {
                let child = first_child
                    .ok_or_else(|| ProtocolError::InvalidStanza("request without payload".to_owned()))?
                    .clone();
                if element.attr("type") == Some("get") {
                    IqType::Get(child)
                } else {
                    IqType::Set(child)
                }
            }
            Some("result") => IqType::Result(first_child.cloned()),
            Some("error") => {
                let error = element
                    .children()
                    .find(|child| child.name() == "error")
                    .ok_or_else(|| ProtocolError::InvalidStanza("error iq without <error/>".to_owned()))?;
                IqType::Error(StanzaError::parse(error)?)
            }
            other => {
                return Err(ProtocolError::InvalidStanza(format!(
                    "invalid iq type {:?}",
                    other
                )))
            }
        };
        Ok(Iq {
            from: parse_jid(element, "from")?,
            to: parse_jid(element, "to")?,
            id,
            payload,
        })
    }

    pub(crate) fn to_element(&self, stanza_ns: &str) -> Element {
        let mut element = Element::builder("iq", stanza_ns)
            .attr("from", self.from.as_ref().map(Jid::to_string))
            .attr("to", self.to.as_ref().map(Jid::to_string))
            .attr("id", self.id.as_str())
            .attr("type", self.payload.as_str())
            .build();
        match &self.payload {
            IqType::Get(payload) | IqType::Set(payload) | IqType::Result(Some(payload)) => {
                element.append_child(payload.clone());
            }
            IqType::Result(None) => (),
            IqType::Error(error) => {
                element.append_child(error.to_element(stanza_ns));
            }
        }
        element
    }
}

/// The type of a `<message/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    /// One-to-one conversation.
    Chat,
    /// A bounced message.
    Error,
    /// Multi-user chat.
    Groupchat,
    /// Alert or notification which expects no reply.
    Headline,
    /// Standalone message.
    #[default]
    Normal,
}

impl MessageType {
    fn as_str(self) -> Option<&'static str> {
        match self {
            MessageType::Chat => Some("chat"),
            MessageType::Error => Some("error"),
            MessageType::Groupchat => Some("groupchat"),
            MessageType::Headline => Some("headline"),
            MessageType::Normal => None,
        }
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "chat" => MessageType::Chat,
            "error" => MessageType::Error,
            "groupchat" => MessageType::Groupchat,
            "headline" => MessageType::Headline,
            "normal" => MessageType::Normal,
            other => {
                return Err(ProtocolError::InvalidStanza(format!(
                    "invalid message type {:?}",
                    other
                )))
            }
        })
    }
}

/// A `<message/>` stanza.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    /// The sender of this message.
    pub from: Option<Jid>,
    /// The recipient of this message.
    pub to: Option<Jid>,
    /// The identifier of this message.
    pub id: Option<String>,
    /// The type of this message.
    pub type_: MessageType,
    /// The text body, if any.
    pub body: Option<String>,
    /// The subject, if any.
    pub subject: Option<String>,
    /// The conversation thread identifier, if any.
    pub thread: Option<String>,
    /// Every other child element.
    pub payloads: Vec<Element>,
}

impl Message {
    /// Creates a normal message to `to`.
    pub fn new(to: Option<Jid>) -> Message {
        Message {
            to,
            ..Default::default()
        }
    }

    /// Creates a chat message to `to`.
    pub fn chat(to: Jid) -> Message {
        Message {
            to: Some(to),
            type_: MessageType::Chat,
            ..Default::default()
        }
    }

    /// Sets the text body.
    pub fn with_body(mut self, body: impl Into<String>) -> Message {
        self.body = Some(body.into());
        self
    }

    /// Appends an extension payload.
    pub fn with_payload(mut self, payload: Element) -> Message {
        self.payloads.push(payload);
        self
    }

    fn parse(element: &Element) -> Result<Message, ProtocolError> {
        let mut message = Message {
            from: parse_jid(element, "from")?,
            to: parse_jid(element, "to")?,
            id: element.attr("id").map(str::to_owned),
            type_: match element.attr("type") {
                Some(type_) => type_.parse()?,
                None => MessageType::Normal,
            },
            ..Default::default()
        };
        for child in element.children() {
            match child.name() {
                "body" if is_stanza_ns(child) && message.body.is_none() => {
                    message.body = Some(child.text())
                }
                "subject" if is_stanza_ns(child) && message.subject.is_none() => {
                    message.subject = Some(child.text())
                }
                "thread" if is_stanza_ns(child) => message.thread = Some(child.text()),
                _ => message.payloads.push(child.clone()),
            }
        }
        Ok(message)
    }

    fn to_element(&self, stanza_ns: &str) -> Element {
        let mut element = Element::builder("message", stanza_ns)
            .attr("from", self.from.as_ref().map(Jid::to_string))
            .attr("to", self.to.as_ref().map(Jid::to_string))
            .attr("id", self.id.clone())
            .attr("type", self.type_.as_str())
            .build();
        for (name, text) in [
            ("subject", &self.subject),
            ("body", &self.body),
            ("thread", &self.thread),
        ] {
            if let Some(text) = text {
                element.append_child(
                    Element::builder(name, stanza_ns)
                        .append(text.clone())
                        .build(),
                );
            }
        }
        for payload in &self.payloads {
            element.append_child(payload.clone());
        }
        element
    }
}

/// The availability sub-state of an available `<presence/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Show {
    /// Temporarily away.
    Away,
    /// Actively interested in chatting.
    Chat,
    /// Do not disturb.
    Dnd,
    /// Extended away.
    Xa,
}

impl Show {
    fn as_str(self) -> &'static str {
        match self {
            Show::Away => "away",
            Show::Chat => "chat",
            Show::Dnd => "dnd",
            Show::Xa => "xa",
        }
    }
}

impl FromStr for Show {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "away" => Show::Away,
            "chat" => Show::Chat,
            "dnd" => Show::Dnd,
            "xa" => Show::Xa,
            other => {
                return Err(ProtocolError::InvalidStanza(format!(
                    "invalid show {:?}",
                    other
                )))
            }
        })
    }
}

/// The type of a `<presence/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresenceType {
    /// Available, the type attribute is absent on the wire.
    #[default]
    None,
    /// A bounced presence.
    Error,
    /// A request for the current presence of an entity.
    Probe,
    /// A request to subscribe to an entity's presence.
    Subscribe,
    /// Approval of a subscription request.
    Subscribed,
    /// The sender is no longer available.
    Unavailable,
    /// A request to unsubscribe.
    Unsubscribe,
    /// Denial or cancellation of a subscription.
    Unsubscribed,
}

impl PresenceType {
    fn as_str(self) -> Option<&'static str> {
        match self {
            PresenceType::None => None,
            PresenceType::Error => Some("error"),
            PresenceType::Probe => Some("probe"),
            PresenceType::Subscribe => Some("subscribe"),
            PresenceType::Subscribed => Some("subscribed"),
            PresenceType::Unavailable => Some("unavailable"),
            PresenceType::Unsubscribe => Some("unsubscribe"),
            PresenceType::Unsubscribed => Some("unsubscribed"),
        }
    }
}

impl FromStr for PresenceType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "error" => PresenceType::Error,
            "probe" => PresenceType::Probe,
            "subscribe" => PresenceType::Subscribe,
            "subscribed" => PresenceType::Subscribed,
            "unavailable" => PresenceType::Unavailable,
            "unsubscribe" => PresenceType::Unsubscribe,
            "unsubscribed" => PresenceType::Unsubscribed,
            other => {
                return Err(ProtocolError::InvalidStanza(format!(
                    "invalid presence type {:?}",
                    other
                )))
            }
        })
    }
}

/// A `<presence/>` stanza.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Presence {
    /// The sender of this presence.
    pub from: Option<Jid>,
    /// The recipient of this presence, `None` for a broadcast.
    pub to: Option<Jid>,
    /// The identifier of this presence.
    pub id: Option<String>,
    /// The type of this presence.
    pub type_: PresenceType,
    /// The availability sub-state.
    pub show: Option<Show>,
    /// A free-form status text.
    pub status: Option<String>,
    /// The priority of this resource, from -128 to 127.
    pub priority: i8,
    /// Every other child element.
    pub payloads: Vec<Element>,
}

impl Presence {
    /// Creates a presence of the given type.
    pub fn new(type_: PresenceType) -> Presence {
        Presence {
            type_,
            ..Default::default()
        }
    }

    /// Creates an available presence.
    pub fn available() -> Presence {
        Presence::new(PresenceType::None)
    }

    /// Creates an unavailable presence.
    pub fn unavailable() -> Presence {
        Presence::new(PresenceType::Unavailable)
    }

    /// Sets the sender.
    pub fn with_from(mut self, from: Jid) -> Presence {
        self.from = Some(from);
        self
    }

    /// Sets the recipient.
    pub fn with_to(mut self, to: Jid) -> Presence {
        self.to = Some(to);
        self
    }

    /// Sets the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Presence {
        self.id = Some(id.into());
        self
    }

    /// Sets the availability sub-state.
    pub fn with_show(mut self, show: Show) -> Presence {
        self.show = Some(show);
        self
    }

    /// Sets the status text.
    pub fn with_status(mut self, status: impl Into<String>) -> Presence {
        self.status = Some(status.into());
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i8) -> Presence {
        self.priority = priority;
        self
    }

    fn parse(element: &Element) -> Result<Presence, ProtocolError> {
        let mut presence = Presence {
            from: parse_jid(element, "from")?,
            to: parse_jid(element, "to")?,
            id: element.attr("id").map(str::to_owned),
            type_: match element.attr("type") {
                Some(type_) => type_.parse()?,
                None => PresenceType::None,
            },
            ..Default::default()
        };
        for child in element.children() {
            match child.name() {
                "show" if is_stanza_ns(child) => presence.show = Some(child.text().parse()?),
                "status" if is_stanza_ns(child) && presence.status.is_none() => {
                    presence.status = Some(child.text())
                }
                "priority" if is_stanza_ns(child) => {
                    presence.priority = child.text().trim().parse().map_err(|_| {
                        ProtocolError::InvalidStanza(format!("invalid priority {:?}", child.text()))
                    })?
                }
                _ => presence.payloads.push(child.clone()),
            }
        }
        Ok(presence)
    }

    fn to_element(&self, stanza_ns: &str) -> Element {
        let mut element = Element::builder("presence", stanza_ns)
            .attr("from", self.from.as_ref().map(Jid::to_string))
            .attr("to", self.to.as_ref().map(Jid::to_string))
            .attr("id", self.id.clone())
            .attr("type", self.type_.as_str())
            .build();
        if let Some(show) = self.show {
            element.append_child(
                Element::builder("show", stanza_ns)
                    .append(show.as_str().to_owned())
                    .build(),
            );
        }
        if let Some(status) = &self.status {
            element.append_child(
                Element::builder("status", stanza_ns)
                    .append(status.clone())
                    .build(),
            );
        }
        if self.priority != 0 {
            element.append_child(
                Element::builder("priority", stanza_ns)
                    .append(self.priority.to_string())
                    .build(),
            );
        }
        for payload in &self.payloads {
            element.append_child(payload.clone());
        }
        element
    }
}

/// Any of the three stanza kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    /// An `<iq/>`.
    Iq(Iq),
    /// A `<message/>`.
    Message(Message),
    /// A `<presence/>`.
    Presence(Presence),
}

impl Stanza {
    /// Whether `element` is a stanza as opposed to a nonza.
    pub fn is_stanza(element: &Element) -> bool {
        matches!(element.name(), "iq" | "message" | "presence") && is_stanza_ns(element)
    }

    /// The id of this stanza, if it has one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Iq(iq) => Some(&iq.id),
            Stanza::Message(message) => message.id.as_deref(),
            Stanza::Presence(presence) => presence.id.as_deref(),
        }
    }

    /// The sender of this stanza.
    pub fn from(&self) -> Option<&Jid> {
        match self {
            Stanza::Iq(iq) => iq.from.as_ref(),
            Stanza::Message(message) => message.from.as_ref(),
            Stanza::Presence(presence) => presence.from.as_ref(),
        }
    }

    /// The recipient of this stanza.
    pub fn to(&self) -> Option<&Jid> {
        match self {
            Stanza::Iq(iq) => iq.to.as_ref(),
            Stanza::Message(message) => message.to.as_ref(),
            Stanza::Presence(presence) => presence.to.as_ref(),
        }
    }

    /// Assign a random id if the stanza has none yet, and return the id.
    pub fn ensure_id(&mut self) -> &str {
        match self {
            Stanza::Iq(iq) => {
                if iq.id.is_empty() {
                    iq.id = make_id();
                }
                &iq.id
            }
            Stanza::Message(message) => message.id.get_or_insert_with(make_id),
            Stanza::Presence(presence) => presence.id.get_or_insert_with(make_id),
        }
    }

    /// Extension payloads carried by this stanza.
    pub fn payloads(&self) -> Box<dyn Iterator<Item = &Element> + '_> {
        match self {
            Stanza::Iq(iq) => match &iq.payload {
                IqType::Get(payload) | IqType::Set(payload) | IqType::Result(Some(payload)) => {
                    Box::new(core::iter::once(payload))
                }
                IqType::Result(None) | IqType::Error(_) => Box::new(core::iter::empty()),
            },
            Stanza::Message(message) => Box::new(message.payloads.iter()),
            Stanza::Presence(presence) => Box::new(presence.payloads.iter()),
        }
    }

    /// Serialise this stanza in the given stream namespace.
    pub fn to_element(&self, stanza_ns: &str) -> Element {
        match self {
            Stanza::Iq(iq) => iq.to_element(stanza_ns),
            Stanza::Message(message) => message.to_element(stanza_ns),
            Stanza::Presence(presence) => presence.to_element(stanza_ns),
        }
    }
}

impl TryFrom<Element> for Stanza {
    type Error = ProtocolError;

    fn try_from(element: Element) -> Result<Self, Self::Error> {
        Stanza::try_from(&element)
    }
}

impl TryFrom<&Element> for Stanza {
    type Error = ProtocolError;

    fn try_from(element: &Element) -> Result<Self, Self::Error> {
        if !is_stanza_ns(element) {
            return Err(ProtocolError::unexpected(element));
        }
        match element.name() {
            "iq" => Iq::parse(element).map(Stanza::Iq),
            "message" => Message::parse(element).map(Stanza::Message),
            "presence" => Presence::parse(element).map(Stanza::Presence),
            _ => Err(ProtocolError::unexpected(element)),
        }
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Stanza {
        Stanza::Iq(iq)
    }
}

impl From<Message> for Stanza {
    fn from(message: Message) -> Stanza {
        Stanza::Message(message)
    }
}

impl From<Presence> for Stanza {
    fn from(presence: Presence) -> Stanza {
        Stanza::Presence(presence)
    }
}

impl fmt::Display for Stanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Stanza::Iq(_) => "iq",
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
        };
        write!(f, "<{}", kind)?;
        if let Some(id) = self.id() {
            write!(f, " id={:?}", id)?;
        }
        if let Some(from) = self.from() {
            write!(f, " from={:?}", from.to_string())?;
        }
        if let Some(to) = self.to() {
            write!(f, " to={:?}", to.to_string())?;
        }
        f.write_str("/>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza_error::{DefinedCondition, ErrorType};

    fn parse(xml: &str) -> Stanza {
        let element: Element = xml.parse().unwrap();
        Stanza::try_from(element).unwrap()
    }

    #[test]
    fn iq_get() {
        let stanza = parse("<iq xmlns='jabber:client' type='get' id='q1' to='example.org'><ping xmlns='urn:xmpp:ping'/></iq>");
        let Stanza::Iq(iq) = stanza else {
            panic!("not an iq")
        };
        assert_eq!(iq.id, "q1");
        assert_eq!(iq.to, Some(Jid::new("example.org").unwrap()));
        match iq.payload {
            IqType::Get(payload) => assert!(payload.is("ping", "urn:xmpp:ping")),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn iq_error() {
        let stanza = parse("<iq xmlns='jabber:component:accept' type='error' id='q2'><error type='cancel'><service-unavailable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>");
        let Stanza::Iq(Iq {
            payload: IqType::Error(error),
            ..
        }) = stanza
        else {
            panic!("not an error iq")
        };
        assert_eq!(error.type_, ErrorType::Cancel);
        assert_eq!(error.defined_condition, DefinedCondition::ServiceUnavailable);
    }

    #[test]
    fn iq_without_id_is_rejected() {
        let element: Element = "<iq xmlns='jabber:client' type='result'/>".parse().unwrap();
        assert!(Stanza::try_from(element).is_err());
    }

    #[test]
    fn message_body_and_payloads() {
        let stanza = parse("<message xmlns='jabber:client' type='chat' from='juliet@capulet.example/balcony'><body>Art thou not Romeo?</body><active xmlns='http://jabber.org/protocol/chatstates'/></message>");
        let Stanza::Message(message) = stanza else {
            panic!("not a message")
        };
        assert_eq!(message.type_, MessageType::Chat);
        assert_eq!(message.body.as_deref(), Some("Art thou not Romeo?"));
        assert_eq!(message.payloads.len(), 1);
        assert!(message.payloads[0].is("active", "http://jabber.org/protocol/chatstates"));
    }

    #[test]
    fn presence_fields() {
        let stanza = parse("<presence xmlns='jabber:client' from='romeo@montague.example/orchard'><show>dnd</show><status>busy</status><priority>-5</priority></presence>");
        let Stanza::Presence(presence) = stanza else {
            panic!("not a presence")
        };
        assert_eq!(presence.type_, PresenceType::None);
        assert_eq!(presence.show, Some(Show::Dnd));
        assert_eq!(presence.status.as_deref(), Some("busy"));
        assert_eq!(presence.priority, -5);
    }

    #[test]
    fn serialise_in_component_namespace() {
        let stanza = <Stanza as From<_>>::from(
            Presence::new(PresenceType::Subscribe)
                .with_to(Jid::new("juliet@capulet.example").unwrap())
                .with_id("s1"),
        );
        let element = stanza.to_element(ns::COMPONENT_ACCEPT);
        assert!(element.is("presence", ns::COMPONENT_ACCEPT));
        assert_eq!(element.attr("type"), Some("subscribe"));
        assert_eq!(Stanza::try_from(element).unwrap(), stanza);
    }

    #[test]
    fn ensure_id_keeps_existing() {
        let mut stanza = <Stanza as From<_>>::from(Message::new(None));
        let generated = stanza.ensure_id().to_owned();
        assert!(!generated.is_empty());
        assert_eq!(stanza.ensure_id(), generated);
    }
}
