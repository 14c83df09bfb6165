// Copyright (c) 2017 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! [XEP-0085: Chat State Notifications](https://xmpp.org/extensions/xep-0085.html)
//!
//! Support is discovered implicitly: the first content message to a
//! contact carries `<active/>`, and the contact's replies tell whether it
//! understands chat states. Standalone notifications such as
//! `<composing/>` are only sent once support is confirmed.

use core::fmt;
use core::str::FromStr;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use xmpp_session::connect::ServerConnector;
use xmpp_session::extensions::ExtensionRegistryBuilder;
use xmpp_session::jid::Jid;
use xmpp_session::minidom::Element;
use xmpp_session::session::ListenerId;
use xmpp_session::stanza::{Message, MessageType, Stanza};
use xmpp_session::{Direction, Session};

use crate::Error;

/// `http://jabber.org/protocol/chatstates`
pub const NS: &str = "http://jabber.org/protocol/chatstates";

/// Enum representing chatstate elements part of the
/// `http://jabber.org/protocol/chatstates` namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatState {
    /// `<active xmlns='http://jabber.org/protocol/chatstates'/>`
    Active,

    /// `<composing xmlns='http://jabber.org/protocol/chatstates'/>`
    Composing,

    /// `<gone xmlns='http://jabber.org/protocol/chatstates'/>`
    Gone,

    /// `<inactive xmlns='http://jabber.org/protocol/chatstates'/>`
    Inactive,

    /// `<paused xmlns='http://jabber.org/protocol/chatstates'/>`
    Paused,
}

const ALL: [ChatState; 5] = [
    ChatState::Active,
    ChatState::Composing,
    ChatState::Gone,
    ChatState::Inactive,
    ChatState::Paused,
];

impl ChatState {
    /// Element name of this state.
    pub fn as_str(self) -> &'static str {
        match self {
            ChatState::Active => "active",
            ChatState::Composing => "composing",
            ChatState::Gone => "gone",
            ChatState::Inactive => "inactive",
            ChatState::Paused => "paused",
        }
    }

    /// Parse a chat state element, or return `None` for anything else.
    pub fn from_element(element: &Element) -> Option<ChatState> {
        if !element.has_ns(NS) {
            return None;
        }
        element.name().parse().ok()
    }

    /// The first chat state among `payloads`.
    pub fn find<'a>(payloads: impl IntoIterator<Item = &'a Element>) -> Option<ChatState> {
        payloads.into_iter().find_map(ChatState::from_element)
    }

    /// Serialise this state.
    pub fn to_element(self) -> Element {
        Element::builder(self.as_str(), NS).build()
    }

    /// Teach `builder` to decode chat states, so listeners can use
    /// [`StanzaEvent::decode`](xmpp_session::StanzaEvent::decode).
    pub fn register(builder: ExtensionRegistryBuilder) -> ExtensionRegistryBuilder {
        ALL.iter().fold(builder, |builder, state| {
            let state = *state;
            builder.register(state.as_str(), NS, move |_| Ok(state))
        })
    }
}

impl FromStr for ChatState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        ALL.into_iter().find(|state| state.as_str() == s).ok_or(())
    }
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ChatState> for Element {
    fn from(state: ChatState) -> Element {
        state.to_element()
    }
}

/// Remembers which contacts understand chat states.
#[derive(Debug, Default)]
pub struct ChatStateManager {
    /// bare JID → whether chat states are supported; absent if unknown
    support: Mutex<HashMap<Jid, bool>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn carries_content(message: &Message) -> bool {
    message.body.is_some()
}

impl ChatStateManager {
    /// A manager which knows nothing about any contact.
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow inbound messages of `session` to learn about support.
    pub fn attach<C: ServerConnector>(self: &Arc<Self>, session: &Session<C>) -> ListenerId {
        let manager = Arc::clone(self);
        session.add_inbound_listener(move |event| {
            if event.direction() != Direction::Inbound || event.is_synthetic() {
                return;
            }
            if let Stanza::Message(message) = event.stanza() {
                manager.record_inbound(message);
            }
        })
    }

    /// Whether `contact` is known to support chat states, `None` if it is
    /// not known yet.
    pub fn supports(&self, contact: &Jid) -> Option<bool> {
        lock(&self.support).get(&contact.to_bare()).copied()
    }

    /// Learn from a received message.
    ///
    /// A message with a chat state proves support; a content message
    /// without one means the contact does not send them.
    pub fn record_inbound(&self, message: &Message) {
        let Some(from) = &message.from else {
            return;
        };
        if message.type_ == MessageType::Error || message.type_ == MessageType::Groupchat {
            return;
        }
        let supported = match ChatState::find(&message.payloads) {
            Some(_) => true,
            None if carries_content(message) => false,
            None => return,
        };
        let previous = lock(&self.support).insert(from.to_bare(), supported);
        if previous != Some(supported) {
            debug!("Chat state support of {}: {}", from.to_bare(), supported);
        }
    }

    /// Add `<active/>` to an outgoing content message unless the recipient
    /// is known not to support chat states or the message already has a
    /// state.
    pub fn prepare(&self, message: &mut Message) {
        if !carries_content(message) || ChatState::find(&message.payloads).is_some() {
            return;
        }
        let Some(to) = &message.to else {
            return;
        };
        if self.supports(to) != Some(false) {
            message.payloads.push(ChatState::Active.to_element());
        }
    }

    /// A standalone notification for `contact`, if it is known to want
    /// one.
    pub fn notification(&self, contact: &Jid, state: ChatState) -> Option<Message> {
        if self.supports(contact) != Some(true) {
            return None;
        }
        Some(Message::chat(contact.clone()).with_payload(state.to_element()))
    }

    /// [`Self::prepare`] `message` and send it.
    pub async fn send<C: ServerConnector>(
        &self,
        session: &Session<C>,
        mut message: Message,
    ) -> Result<String, Error> {
        self.prepare(&mut message);
        session.send(message).await
    }

    /// Send a standalone notification if `contact` wants one. Returns
    /// whether anything was sent.
    pub async fn notify<C: ServerConnector>(
        &self,
        session: &Session<C>,
        contact: &Jid,
        state: ChatState,
    ) -> Result<bool, Error> {
        match self.notification(contact, state) {
            Some(message) => {
                session.send(message).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
