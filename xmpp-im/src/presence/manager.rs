// Copyright (c) 2023 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use xmpp_session::connect::ServerConnector;
use xmpp_session::jid::Jid;
use xmpp_session::session::ListenerId;
use xmpp_session::stanza::{make_id, Presence, PresenceType, Stanza};
use xmpp_session::{Session, SessionStatus, WeakSession};

use super::PresenceTracker;
use crate::Error;

/// Tracks presences on a session and sends subscription management
/// presences.
///
/// Once created, contacts go unavailable locally whenever the connection
/// is lost, and our own presences are sent again after a reconnect which
/// could not resume the previous stream.
pub struct PresenceManager<C: ServerConnector> {
    session: WeakSession<C>,
    tracker: Arc<PresenceTracker>,
    id_prefix: String,
    next_id: AtomicU64,
    listeners: Vec<ListenerId>,
}

impl<C: ServerConnector> PresenceManager<C> {
    /// Start tracking presences on `session`.
    pub fn new(session: &Session<C>) -> Arc<Self> {
        let tracker = Arc::new(PresenceTracker::new());
        let mut listeners = Vec::with_capacity(3);

        let inbound = Arc::clone(&tracker);
        listeners.push(session.add_inbound_listener(move |event| {
            if let Stanza::Presence(presence) = event.stanza() {
                inbound.record_inbound(presence);
            }
        }));

        let outbound = Arc::clone(&tracker);
        listeners.push(session.add_outbound_listener(move |event| {
            if let Stanza::Presence(presence) = event.stanza() {
                outbound.record_outbound(presence);
            }
        }));

        let status_tracker = Arc::clone(&tracker);
        let weak = session.downgrade();
        listeners.push(session.add_status_listener(move |event| {
            let Some(session) = weak.upgrade() else {
                return;
            };
            match event.current {
                SessionStatus::Disconnected | SessionStatus::Closed => {
                    for presence in status_tracker.purge() {
                        debug!("{:?} is unavailable now that we are offline", presence.from);
                        session.dispatch_local(presence);
                    }
                }
                SessionStatus::Connected if !event.resumed => {
                    let presences = status_tracker.to_resend();
                    if presences.is_empty() {
                        return;
                    }
                    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                        warn!("No runtime to resend {} presences on", presences.len());
                        return;
                    };
                    runtime.spawn(async move {
                        if let Err(e) = resend(&session, presences).await {
                            warn!("Failed to resend presence: {}", e);
                        }
                    });
                }
                _ => (),
            }
        }));

        Arc::new(PresenceManager {
            session: session.downgrade(),
            tracker,
            id_prefix: format!("{}-", make_id()),
            next_id: AtomicU64::new(0),
            listeners,
        })
    }

    /// What is known about presences.
    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    /// The presence of `jid`, see [`PresenceTracker::presence`].
    pub fn presence(&self, jid: &Jid) -> Presence {
        self.tracker.presence(jid)
    }

    /// An id no other stanza of this manager used.
    fn fresh_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.id_prefix, n)
    }

    async fn send_subscription(&self, type_: PresenceType, to: Jid) -> Result<String, Error> {
        let session = self.session.upgrade().ok_or(Error::Disconnected)?;
        let presence = Presence::new(type_)
            .with_to(to.into_bare())
            .with_id(self.fresh_id());
        session.send(presence).await
    }

    /// Ask `jid` for a subscription to its presence. Returns the stanza id.
    pub async fn request_subscription(&self, jid: Jid) -> Result<String, Error> {
        self.send_subscription(PresenceType::Subscribe, jid).await
    }

    /// Allow `jid` to see our presence.
    pub async fn approve_subscription(&self, jid: Jid) -> Result<String, Error> {
        self.send_subscription(PresenceType::Subscribed, jid).await
    }

    /// Refuse a subscription request of `jid`.
    pub async fn deny_subscription(&self, jid: Jid) -> Result<String, Error> {
        self.send_subscription(PresenceType::Unsubscribed, jid).await
    }

    /// Stop receiving the presence of `jid`.
    pub async fn cancel_subscription(&self, jid: Jid) -> Result<String, Error> {
        self.send_subscription(PresenceType::Unsubscribe, jid).await
    }

    /// Send our last broadcast and directed presences again.
    pub async fn resend(&self) -> Result<(), Error> {
        let session = self.session.upgrade().ok_or(Error::Disconnected)?;
        resend(&session, self.tracker.to_resend()).await
    }
}

impl<C: ServerConnector> Drop for PresenceManager<C> {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            for id in self.listeners.drain(..) {
                session.remove_listener(id);
            }
        }
    }
}

async fn resend<C: ServerConnector>(
    session: &Session<C>,
    presences: Vec<Presence>,
) -> Result<(), Error> {
    for mut presence in presences {
        presence.id = None;
        session.send(presence).await?;
    }
    Ok(())
}
