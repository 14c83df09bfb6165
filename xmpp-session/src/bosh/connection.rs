// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::future::Future;
use std::sync::Mutex;

use minidom::Element;
use rand::Rng;

use super::{Body, BoshError, UnacknowledgedRequests};
use crate::error::Error;

/// One HTTP POST to the connection manager.
pub trait HttpBinding: Send + Sync {
    /// Send `body` and return the response body.
    fn request(&self, body: String) -> impl Future<Output = Result<String, Error>> + Send;
}

const BOSH_VERSION: &str = "1.6";
const WAIT: u32 = 60;
const HOLD: u32 = 1;

#[derive(Debug)]
struct State {
    next_rid: u64,
    sid: Option<String>,
}

/// A BOSH session over an [`HttpBinding`].
///
/// Requests are posted one at a time in rid order. Requests which never
/// got an answer are posted again before any newer one.
pub struct BoshConnection<H> {
    binding: H,
    domain: String,
    state: Mutex<State>,
    unacked: UnacknowledgedRequests,
    posting: tokio::sync::Mutex<()>,
}

impl<H: HttpBinding> BoshConnection<H> {
    /// A connection to the XMPP service of `domain`, not opened yet.
    pub fn new(binding: H, domain: impl Into<String>) -> Self {
        // Leave room for a lot of requests below 2^53.
        let first_rid = rand::thread_rng().gen_range(1..(1u64 << 32));
        Self::with_first_rid(binding, domain, first_rid)
    }

    /// Like [`Self::new`], with a given first request id.
    pub fn with_first_rid(binding: H, domain: impl Into<String>, first_rid: u64) -> Self {
        BoshConnection {
            binding,
            domain: domain.into(),
            state: Mutex::new(State {
                next_rid: first_rid,
                sid: None,
            }),
            unacked: UnacknowledgedRequests::new(),
            posting: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The session id, once opened.
    pub fn sid(&self) -> Option<String> {
        self.state().sid.clone()
    }

    /// Requests not acknowledged by the connection manager yet.
    pub fn unacknowledged(&self) -> &UnacknowledgedRequests {
        &self.unacked
    }

    /// Give `body` the next rid, and the sid unless the session is being
    /// created.
    fn number(&self, body: &mut Body, creating: bool) -> Result<u64, Error> {
        let mut state = self.state();
        if !creating {
            body.sid = Some(state.sid.clone().ok_or(Error::Disconnected)?);
        }
        let rid = state.next_rid;
        state.next_rid += 1;
        body.rid = Some(rid);
        Ok(rid)
    }

    /// Post `body` after whatever is still unacknowledged, and return the
    /// response with the payloads of the replayed requests in front.
    async fn exchange(&self, mut body: Body, creating: bool) -> Result<Body, Error> {
        let _posting = self.posting.lock().await;
        let rid = self.number(&mut body, creating)?;
        let xml = body.to_xml()?;
        let stale = self.unacked.replay();
        self.unacked.put(rid, xml.clone());
        let mut received = Vec::new();
        for (old, request) in stale {
            log::debug!("BOSH: resending request {} before {}", old, rid);
            received.extend(self.post(old, request).await?.payloads);
        }
        let mut response = self.post(rid, xml).await?;
        if !received.is_empty() {
            received.append(&mut response.payloads);
            response.payloads = received;
        }
        Ok(response)
    }

    async fn post(&self, rid: u64, xml: String) -> Result<Body, Error> {
        log::trace!("BOSH SEND {}", xml);
        let response = self.binding.request(xml).await?;
        log::trace!("BOSH RECV {}", response);
        let response = Body::parse(&response)?;
        if response.terminate {
            self.state().sid = None;
            self.unacked.clear();
            let condition = response
                .condition
                .clone()
                .unwrap_or(super::Condition::UndefinedCondition);
            log::warn!("BOSH session terminated: {}", condition);
            return Err(BoshError::Terminated {
                condition,
                uri: response.uri,
            }
            .into());
        }
        let acked = self.unacked.remove_up_to(response.ack.unwrap_or(rid));
        log::trace!("BOSH: {} requests acknowledged", acked);
        Ok(response)
    }

    /// Create the session and return the payloads of the response,
    /// usually `<stream:features/>`.
    pub async fn open(&self) -> Result<Vec<Element>, Error> {
        let body = Body {
            to: Some(self.domain.clone()),
            wait: Some(WAIT),
            hold: Some(HOLD),
            ver: Some(BOSH_VERSION.to_owned()),
            xmpp_version: Some("1.0".to_owned()),
            ..Default::default()
        };
        let response = self.exchange(body, true).await?;
        let sid = response.sid.ok_or(BoshError::MissingSid)?;
        log::debug!("BOSH session {} created", sid);
        self.state().sid = Some(sid);
        Ok(response.payloads)
    }

    /// Send stanzas, returning whatever the connection manager sent back.
    ///
    /// Earlier requests which failed are sent again first.
    pub async fn send(&self, payloads: Vec<Element>) -> Result<Vec<Element>, Error> {
        let body = Body {
            payloads,
            ..Default::default()
        };
        Ok(self.exchange(body, false).await?.payloads)
    }

    /// Restart the XMPP stream after SASL success.
    pub async fn restart(&self) -> Result<Vec<Element>, Error> {
        let body = Body {
            to: Some(self.domain.clone()),
            restart: true,
            ..Default::default()
        };
        Ok(self.exchange(body, false).await?.payloads)
    }

    /// Send every unacknowledged request again, in original order, without
    /// waiting for new traffic.
    pub async fn resend_unacknowledged(&self) -> Result<Vec<Element>, Error> {
        let _posting = self.posting.lock().await;
        let mut received = Vec::new();
        for (rid, xml) in self.unacked.replay() {
            log::debug!("BOSH: resending request {}", rid);
            received.extend(self.post(rid, xml).await?.payloads);
        }
        Ok(received)
    }

    /// End the session, optionally with final stanzas.
    pub async fn terminate(&self, payloads: Vec<Element>) -> Result<(), Error> {
        let _posting = self.posting.lock().await;
        let mut body = Body {
            terminate: true,
            payloads,
            ..Default::default()
        };
        self.number(&mut body, false)?;
        let xml = body.to_xml()?;
        self.state().sid = None;
        self.unacked.clear();
        self.binding.request(xml).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bosh::Condition;

    #[derive(Clone, Default)]
    struct MockBinding {
        sent: Arc<Mutex<Vec<String>>>,
        responses: Arc<Mutex<Vec<Result<String, ()>>>>,
    }

    impl MockBinding {
        fn respond(&self, response: Result<&str, ()>) {
            self.responses
                .lock()
                .unwrap()
                .push(response.map(str::to_owned));
        }

        fn sent(&self) -> Vec<Body> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|xml| Body::parse(xml).unwrap())
                .collect()
        }
    }

    impl HttpBinding for MockBinding {
        async fn request(&self, body: String) -> Result<String, Error> {
            self.sent.lock().unwrap().push(body);
            let mut responses = self.responses.lock().unwrap();
            match responses.remove(0) {
                Ok(response) => Ok(response),
                Err(()) => Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                ))),
            }
        }
    }

    const EMPTY: &str = "<body xmlns='http://jabber.org/protocol/httpbind'/>";

    async fn opened(mock: &MockBinding) -> BoshConnection<MockBinding> {
        mock.respond(Ok("<body xmlns='http://jabber.org/protocol/httpbind' sid='SomeSID' wait='60' hold='1'><stream:features xmlns:stream='http://etherx.jabber.org/streams'/></body>"));
        let connection = BoshConnection::with_first_rid(mock.clone(), "example.com", 100);
        let features = connection.open().await.unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(connection.sid().as_deref(), Some("SomeSID"));
        connection
    }

    #[tokio::test]
    async fn session_creation() {
        let mock = MockBinding::default();
        let connection = opened(&mock).await;
        let sent = mock.sent();
        assert_eq!(sent[0].rid, Some(100));
        assert_eq!(sent[0].to.as_deref(), Some("example.com"));
        assert_eq!(sent[0].sid, None);
        assert!(connection.unacknowledged().is_empty());
    }

    fn rids(sent: &[Body]) -> Vec<u64> {
        sent.iter().map(|body| body.rid.unwrap()).collect()
    }

    #[tokio::test]
    async fn failed_request_goes_out_again_before_new_traffic() {
        let mock = MockBinding::default();
        let connection = opened(&mock).await;
        let message: Element = "<message xmlns='jabber:client' to='a@b'/>".parse().unwrap();

        mock.respond(Err(()));
        connection.send(vec![message]).await.unwrap_err();
        assert_eq!(connection.unacknowledged().len(), 1);

        // The binding recovers; 101 is answered before 102 is posted.
        mock.respond(Ok("<body xmlns='http://jabber.org/protocol/httpbind'><message xmlns='jabber:client' from='a@b' id='late'/></body>"));
        mock.respond(Ok(EMPTY));
        let received = connection.send(vec![]).await.unwrap();
        let sent = mock.sent();
        assert_eq!(rids(&sent), [100, 101, 101, 102]);
        assert_eq!(sent[2].payloads[0].attr("to"), Some("a@b"));
        assert!(sent[3].payloads.is_empty());
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].attr("id"), Some("late"));
        assert!(connection.unacknowledged().is_empty());
    }

    #[tokio::test]
    async fn unacknowledged_requests_are_replayed_in_order() {
        let mock = MockBinding::default();
        let connection = opened(&mock).await;
        let message: Element = "<message xmlns='jabber:client' to='a@b'/>".parse().unwrap();

        // The connection manager only acks up to 100.
        mock.respond(Ok("<body xmlns='http://jabber.org/protocol/httpbind' ack='100'/>"));
        connection.send(vec![message.clone()]).await.unwrap();
        // Replaying 101 fails, so 102 is never posted.
        mock.respond(Err(()));
        connection.send(vec![message.clone()]).await.unwrap_err();
        assert_eq!(rids(&mock.sent()), [100, 101, 101]);
        assert_eq!(
            connection
                .unacknowledged()
                .replay()
                .iter()
                .map(|(rid, _)| *rid)
                .collect::<Vec<_>>(),
            [101, 102]
        );

        mock.respond(Ok(EMPTY));
        mock.respond(Ok(EMPTY));
        connection.resend_unacknowledged().await.unwrap();
        assert_eq!(rids(&mock.sent()[3..]), [101, 102]);
        assert!(connection.unacknowledged().is_empty());
    }

    #[tokio::test]
    async fn termination_is_reported() {
        let mock = MockBinding::default();
        let connection = opened(&mock).await;
        mock.respond(Ok("<body xmlns='http://jabber.org/protocol/httpbind' type='terminate' condition='host-gone'/>"));
        match connection.send(vec![]).await {
            Err(Error::Bosh(BoshError::Terminated { condition, uri })) => {
                assert_eq!(condition, Condition::HostGone);
                assert_eq!(uri, None);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(connection.sid(), None);
        assert!(matches!(
            connection.send(vec![]).await,
            Err(Error::Disconnected)
        ));
    }

    #[tokio::test]
    async fn restart_and_terminate() {
        let mock = MockBinding::default();
        let connection = opened(&mock).await;
        mock.respond(Ok(EMPTY));
        connection.restart().await.unwrap();
        mock.respond(Ok(EMPTY));
        connection.terminate(vec![]).await.unwrap();
        let sent = mock.sent();
        assert_eq!(sent[1].rid, Some(101));
        assert!(sent[2].terminate);
        assert_eq!(connection.sid(), None);
    }
}
