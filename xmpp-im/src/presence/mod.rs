// Copyright (c) 2023 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Presence tracking and subscription management

mod manager;
mod tracker;

pub use manager::PresenceManager;
pub use tracker::PresenceTracker;

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use tokio::sync::mpsc;
    use xmpp_session::jid::Jid;
    use xmpp_session::ns;
    use xmpp_session::stanza::{PresenceType, Stanza};
    use xmpp_session::{ExtensionRegistry, SessionStatus};

    use super::*;
    use crate::test_server::{login, parse, session, statuses, wait_for};

    #[tokio::test]
    async fn subscription_round_trip_uses_fresh_ids() {
        let (session, mut servers) = session(ExtensionRegistry::empty());
        let manager = PresenceManager::new(&session);
        let (subscribed, mut received) = mpsc::unbounded_channel();
        session.add_inbound_listener(move |event| {
            if let Stanza::Presence(presence) = event.stanza() {
                if presence.type_ == PresenceType::Subscribed {
                    subscribed.send(presence.from.clone()).unwrap();
                }
            }
        });

        let server = tokio::spawn(async move {
            let mut stream = login(servers.recv().await.unwrap()).await;
            let request = stream.recv().await.unwrap();
            assert!(request.is("presence", ns::JABBER_CLIENT));
            assert_eq!(request.attr("type"), Some("subscribe"));
            assert_eq!(request.attr("to"), Some("contact@ex.net"));
            stream
                .send(&parse(
                    "<presence xmlns='jabber:client' type='subscribed' from='contact@ex.net'/>",
                ))
                .await
                .unwrap();
            let mut ids = vec![request.attr("id").unwrap().to_owned()];
            for expected in ["subscribed", "subscribe", "unsubscribed", "unsubscribe"] {
                let presence = stream.recv().await.unwrap();
                assert_eq!(presence.attr("type"), Some(expected));
                ids.push(presence.attr("id").unwrap().to_owned());
            }
            (stream, ids)
        });

        session.connect().await.unwrap();
        let contact = Jid::new("contact@ex.net").unwrap();
        let mut sent = vec![manager.request_subscription(contact.clone()).await.unwrap()];
        assert_eq!(received.recv().await.unwrap(), Some(contact.clone()));
        sent.push(manager.approve_subscription(contact.clone()).await.unwrap());
        sent.push(manager.request_subscription(contact.clone()).await.unwrap());
        sent.push(manager.deny_subscription(contact.clone()).await.unwrap());
        sent.push(manager.cancel_subscription(contact).await.unwrap());

        let (_stream, ids) = server.await.unwrap();
        assert_eq!(ids, sent);
        let distinct: HashSet<_> = ids.iter().collect();
        assert_eq!(distinct.len(), ids.len());
        assert!(ids.iter().all(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn contacts_go_unavailable_on_connection_loss() {
        let (session, mut servers) = session(ExtensionRegistry::empty());
        let manager = PresenceManager::new(&session);
        let mut transitions = statuses(&session);
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let recorded = std::sync::Arc::clone(&seen);
        session.add_inbound_listener(move |event| {
            if let Stanza::Presence(presence) = event.stanza() {
                recorded
                    .lock()
                    .unwrap()
                    .push((presence.type_, event.is_synthetic()));
            }
        });

        let server = tokio::spawn(async move {
            let mut stream = login(servers.recv().await.unwrap()).await;
            stream
                .send(&parse(
                    "<presence xmlns='jabber:client' from='romeo@example.net/orchard'><priority>1</priority></presence>",
                ))
                .await
                .unwrap();
            // Our own presence, which we expect to be sent again later.
            let ours = stream.recv().await.unwrap();
            assert!(ours.is("presence", ns::JABBER_CLIENT));
            drop(stream);
            let mut stream = login(servers.recv().await.unwrap()).await;
            let again = stream.recv().await.unwrap();
            assert!(again.is("presence", ns::JABBER_CLIENT));
            assert_eq!(again.attr("type"), None);
            assert_ne!(again.attr("id"), ours.attr("id"));
            stream
        });

        session.connect().await.unwrap();
        let romeo = Jid::new("romeo@example.net").unwrap();
        session
            .send(xmpp_session::Presence::available().with_status("on the balcony"))
            .await
            .unwrap();
        wait_for(&mut transitions, SessionStatus::Disconnected).await;
        assert_eq!(manager.presence(&romeo).type_, PresenceType::Unavailable);

        let _stream = server.await.unwrap();
        wait_for(&mut transitions, SessionStatus::Connected).await;
        assert_eq!(
            *seen.lock().unwrap(),
            [
                (PresenceType::None, false),
                (PresenceType::Unavailable, true)
            ]
        );
    }
}
