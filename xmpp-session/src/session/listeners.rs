// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::extensions::ExtensionRegistry;
use crate::stanza::Stanza;

use super::status::StatusEvent;

/// Whether a stanza came from the peer or was sent by us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the peer, or synthesised locally.
    Inbound,
    /// Written to the stream.
    Outbound,
}

/// A stanza handed to listeners.
#[derive(Debug)]
pub struct StanzaEvent {
    stanza: Stanza,
    direction: Direction,
    synthetic: bool,
    consumed: AtomicBool,
    extensions: ExtensionRegistry,
}

impl StanzaEvent {
    pub(crate) fn new(
        stanza: Stanza,
        direction: Direction,
        synthetic: bool,
        extensions: ExtensionRegistry,
    ) -> Self {
        StanzaEvent {
            stanza,
            direction,
            synthetic,
            consumed: AtomicBool::new(false),
            extensions,
        }
    }

    /// The stanza.
    pub fn stanza(&self) -> &Stanza {
        &self.stanza
    }

    /// Which way the stanza went.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether the stanza never went over the wire, such as the
    /// `unavailable` presences generated when a connection breaks.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Suppress default handling, like the `service-unavailable` reply to
    /// unhandled IQ requests.
    ///
    /// Listeners registered after this one still see the event.
    pub fn consume(&self) {
        self.consumed.store(true, Ordering::Release);
    }

    /// Whether a listener called [`Self::consume`].
    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    /// The first payload which the session's extension registry decodes
    /// into a `T`.
    pub fn decode<T: Any>(&self) -> Option<T> {
        self.stanza
            .payloads()
            .find_map(|payload| self.extensions.decode(payload))
    }
}

/// Identifies a registered listener, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Callback for stanza events.
pub type StanzaListener = dyn Fn(&StanzaEvent) + Send + Sync;

/// Callback for status transitions.
pub type StatusListener = dyn Fn(&StatusEvent<'_>) + Send + Sync;

type Entries<L> = Arc<Vec<(ListenerId, Arc<L>)>>;

/// Copy-on-write list, so callbacks run without any lock held and may
/// register or remove listeners themselves.
struct Registry<L: ?Sized> {
    entries: Mutex<Entries<L>>,
}

impl<L: ?Sized> Default for Registry<L> {
    fn default() -> Self {
        Registry {
            entries: Mutex::new(Arc::new(Vec::new())),
        }
    }
}

impl<L: ?Sized> Registry<L> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Entries<L>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add(&self, id: ListenerId, listener: Arc<L>) {
        let mut entries = self.lock();
        let mut updated = Vec::clone(&entries);
        updated.push((id, listener));
        *entries = Arc::new(updated);
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        if !entries.iter().any(|(other, _)| *other == id) {
            return false;
        }
        let updated = entries
            .iter()
            .filter(|(other, _)| *other != id)
            .cloned()
            .collect();
        *entries = Arc::new(updated);
        true
    }

    fn snapshot(&self) -> Entries<L> {
        Arc::clone(&self.lock())
    }
}

/// All listeners of a session.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    inbound: Registry<StanzaListener>,
    outbound: Registry<StanzaListener>,
    status: Registry<StatusListener>,
}

impl Listeners {
    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_stanza_listener(&self, direction: Direction, listener: Arc<StanzaListener>) -> ListenerId {
        let id = self.next_id();
        match direction {
            Direction::Inbound => self.inbound.add(id, listener),
            Direction::Outbound => self.outbound.add(id, listener),
        }
        id
    }

    pub fn add_status_listener(&self, listener: Arc<StatusListener>) -> ListenerId {
        let id = self.next_id();
        self.status.add(id, listener);
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.inbound.remove(id) || self.outbound.remove(id) || self.status.remove(id)
    }

    /// Call the listeners of the event's direction, in registration order.
    pub fn dispatch(&self, event: &StanzaEvent) {
        let listeners = match event.direction() {
            Direction::Inbound => self.inbound.snapshot(),
            Direction::Outbound => self.outbound.snapshot(),
        };
        for (_, listener) in listeners.iter() {
            listener(event);
        }
    }

    pub fn dispatch_status(&self, event: &StatusEvent<'_>) {
        for (_, listener) in self.status.snapshot().iter() {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza::Message;

    fn event() -> StanzaEvent {
        StanzaEvent::new(
            Message::new(None).into(),
            Direction::Inbound,
            false,
            ExtensionRegistry::empty(),
        )
    }

    #[test]
    fn registration_order_and_consume() {
        let listeners = Listeners::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            listeners.add_stanza_listener(
                Direction::Inbound,
                Arc::new(move |event: &StanzaEvent| {
                    seen.lock().unwrap().push(name);
                    if name == "first" {
                        event.consume();
                    }
                }),
            );
        }
        let event = event();
        listeners.dispatch(&event);
        assert_eq!(*seen.lock().unwrap(), ["first", "second", "third"]);
        assert!(event.is_consumed());
    }

    #[test]
    fn removal() {
        let listeners = Listeners::default();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let id = listeners.add_stanza_listener(
            Direction::Inbound,
            Arc::new(move |_: &StanzaEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        listeners.dispatch(&event());
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.dispatch(&event());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_may_register_listeners() {
        let listeners = Arc::new(Listeners::default());
        let inner = listeners.clone();
        listeners.add_stanza_listener(
            Direction::Inbound,
            Arc::new(move |_: &StanzaEvent| {
                inner.add_stanza_listener(Direction::Outbound, Arc::new(|_: &StanzaEvent| ()));
            }),
        );
        listeners.dispatch(&event());
        assert_eq!(listeners.outbound.snapshot().len(), 1);
    }
}
