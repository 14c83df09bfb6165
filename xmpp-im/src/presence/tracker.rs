// Copyright (c) 2023 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use xmpp_session::jid::Jid;
use xmpp_session::stanza::{Presence, PresenceType, Show};

/// Last known presence of every resource of every contact, plus the
/// presences we sent ourselves.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// bare JID → resource ("" if none) → presence
    contacts: Mutex<BTreeMap<Jid, BTreeMap<String, Presence>>>,
    /// `None` for the broadcast presence, else the recipient
    sent: Mutex<BTreeMap<Option<Jid>, Presence>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn is_availability(presence: &Presence) -> bool {
    matches!(
        presence.type_,
        PresenceType::None | PresenceType::Unavailable | PresenceType::Error
    )
}

/// Lower is more available.
fn availability_rank(presence: &Presence) -> u8 {
    match (presence.type_, presence.show) {
        (PresenceType::None, None | Some(Show::Chat)) => 0,
        (PresenceType::None, Some(Show::Away)) => 1,
        (PresenceType::None, Some(Show::Xa)) => 2,
        (PresenceType::None, Some(Show::Dnd)) => 3,
        _ => 4,
    }
}

/// Orders presences so that the best one is the greatest.
fn compare(a: &Presence, b: &Presence) -> Ordering {
    availability_rank(b)
        .cmp(&availability_rank(a))
        .then(a.priority.cmp(&b.priority))
}

impl PresenceTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a presence received from a contact.
    ///
    /// Subscription management presences are not availability information
    /// and are ignored, as are presences without a sender.
    pub fn record_inbound(&self, presence: &Presence) {
        let Some(from) = &presence.from else {
            return;
        };
        if !is_availability(presence) {
            return;
        }
        let resource = from.resource().unwrap_or_default().to_owned();
        trace!("Presence of {} is now {:?}", from, presence.type_);
        lock(&self.contacts)
            .entry(from.to_bare())
            .or_default()
            .insert(resource, presence.clone());
    }

    /// Remember an availability presence we sent, so that it can be sent
    /// again on a new session.
    pub fn record_outbound(&self, presence: &Presence) {
        if !is_availability(presence) || presence.type_ == PresenceType::Error {
            return;
        }
        lock(&self.sent).insert(presence.to.clone(), presence.clone());
    }

    /// The presence of `jid`.
    ///
    /// For a bare JID this is the most available resource, preferring
    /// higher priorities among equally available ones. Unknown contacts
    /// and resources are unavailable.
    pub fn presence(&self, jid: &Jid) -> Presence {
        let contacts = lock(&self.contacts);
        let resources = contacts.get(&jid.to_bare());
        let known = match jid.resource() {
            Some(resource) => resources.and_then(|resources| resources.get(resource)),
            None => resources.and_then(|resources| {
                resources.values().reduce(|best, candidate| {
                    // Ties keep the first resource in key order.
                    if compare(candidate, best) == Ordering::Greater {
                        candidate
                    } else {
                        best
                    }
                })
            }),
        };
        match known {
            Some(presence) => presence.clone(),
            None => Presence::unavailable().with_from(jid.clone()),
        }
    }

    /// Every contact with at least one tracked resource.
    pub fn contacts(&self) -> Vec<Jid> {
        lock(&self.contacts).keys().cloned().collect()
    }

    /// Forget every contact and return an `unavailable` presence for each
    /// one which had an available resource.
    pub fn purge(&self) -> Vec<Presence> {
        let contacts = core::mem::take(&mut *lock(&self.contacts));
        contacts
            .into_iter()
            .filter(|(_, resources)| {
                resources
                    .values()
                    .any(|presence| presence.type_ == PresenceType::None)
            })
            .map(|(bare, _)| Presence::unavailable().with_from(bare))
            .collect()
    }

    /// Presences to send again after a reconnect which lost the server's
    /// state: the broadcast one first, then the directed ones.
    ///
    /// `unavailable` ones are left out since a fresh session starts
    /// unavailable anyway.
    pub fn to_resend(&self) -> Vec<Presence> {
        lock(&self.sent)
            .values()
            .filter(|presence| presence.type_ == PresenceType::None)
            .cloned()
            .collect()
    }
}
