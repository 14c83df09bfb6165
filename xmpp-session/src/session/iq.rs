// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::future::Future;
use core::ops::ControlFlow;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use jid::Jid;
use minidom::Element;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::stanza::{Iq, IqType};
use crate::stanza_error::StanzaError;

/// Payload of an IQ response.
#[derive(Debug)]
pub enum IqResponse {
    /// Payload for a `type="result"` response.
    Result(Option<Element>),

    /// Payload for a `type="error"` response.
    Error(StanzaError),
}

type IqKey = (Option<Jid>, String);
type IqMap = BTreeMap<IqKey, oneshot::Sender<Result<IqResponse, Error>>>;

fn lock(map: &Mutex<IqMap>) -> MutexGuard<'_, IqMap> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

struct IqMapEntryHandle {
    key: IqKey,
    map: Weak<Mutex<IqMap>>,
}

impl Drop for IqMapEntryHandle {
    fn drop(&mut self) {
        let Some(map) = self.map.upgrade() else {
            return;
        };
        lock(&map).remove(&self.key);
    }
}

pin_project_lite::pin_project! {
    /// Handle for awaiting an IQ response.
    ///
    /// There is no timeout built in; combine it with
    /// [`tokio::time::timeout`]. Dropping the token removes the tracking
    /// entry, so a late response is handled like any unsolicited IQ.
    pub(crate) struct IqResponseToken {
        entry: Option<IqMapEntryHandle>,
        #[pin]
        inner: oneshot::Receiver<Result<IqResponse, Error>>,
    }
}

impl Future for IqResponseToken {
    type Output = Result<IqResponse, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(v)) => {
                this.entry.take();
                Poll::Ready(v)
            }
            Poll::Ready(Err(_)) => {
                log::warn!("IqResponseToken oneshot::Receiver returned receive error!");
                this.entry.take();
                Poll::Ready(Err(Error::Disconnected))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Routes IQ responses to the queries waiting for them.
pub(crate) struct IqTracker {
    map: Arc<Mutex<IqMap>>,
}

impl IqTracker {
    pub fn new() -> Self {
        Self {
            map: Arc::new(Mutex::new(IqMap::new())),
        }
    }

    /// Start waiting for the response to request `id` sent to `to`.
    pub fn register(&self, to: Option<Jid>, id: String) -> IqResponseToken {
        let key = (to, id);
        let (tx, rx) = oneshot::channel();
        if lock(&self.map).insert(key.clone(), tx).is_some() {
            log::warn!("IQ id {:?} was already being tracked", key.1);
        }
        IqResponseToken {
            entry: Some(IqMapEntryHandle {
                key,
                map: Arc::downgrade(&self.map),
            }),
            inner: rx,
        }
    }

    /// Attempt to handle an IQ stanza as IQ response.
    ///
    /// `from` is the sender as the query was keyed, see
    /// [`Inner::peer_key`](super::Inner). Returns the IQ stanza unharmed if
    /// it is not a response to any request which is still being tracked.
    pub fn handle_iq(&self, from: Option<Jid>, iq: Iq) -> ControlFlow<(), Iq> {
        if iq.payload.is_request() {
            return ControlFlow::Continue(iq);
        }
        let key = (from, iq.id);
        let sink = lock(&self.map).remove(&key);
        let Some(sink) = sink else {
            log::trace!(
                "not handling IQ response from {:?} with id {:?}: no active tracker for this tuple",
                key.0,
                key.1
            );
            return ControlFlow::Continue(Iq { id: key.1, ..iq });
        };
        let response = match iq.payload {
            IqType::Result(payload) => IqResponse::Result(payload),
            IqType::Error(error) => IqResponse::Error(error),
            IqType::Get(_) | IqType::Set(_) => return ControlFlow::Break(()),
        };
        // The query may have timed out just now.
        let _: Result<_, _> = sink.send(Ok(response));
        ControlFlow::Break(())
    }

    /// Fail every pending query, because the connection is gone.
    pub fn fail_all(&self) {
        let pending = core::mem::take(&mut *lock(&self.map));
        if !pending.is_empty() {
            log::debug!("Failing {} pending queries", pending.len());
        }
        for (_, sink) in pending {
            let _: Result<_, _> = sink.send(Err(Error::Disconnected));
        }
    }

    /// Number of queries still waiting.
    pub fn len(&self) -> usize {
        lock(&self.map).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(from: Option<&str>, id: &str) -> Iq {
        Iq::from_result(id, None).with_from(from.map(|f| Jid::new(f).unwrap()))
    }

    #[tokio::test]
    async fn response_completes_token() {
        let tracker = IqTracker::new();
        let peer = Jid::new("romeo@montague.lit/orchard").unwrap();
        let token = tracker.register(Some(peer.clone()), "q1".to_owned());
        // Same id from someone else is not ours.
        assert!(tracker
            .handle_iq(None, result(None, "q1"))
            .is_continue());
        assert!(tracker
            .handle_iq(Some(peer.clone()), result(Some("romeo@montague.lit/orchard"), "q1"))
            .is_break());
        assert!(matches!(token.await, Ok(IqResponse::Result(None))));
        assert_eq!(tracker.len(), 0);
    }

    #[tokio::test]
    async fn dropped_token_cleans_up() {
        let tracker = IqTracker::new();
        let token = tracker.register(None, "q2".to_owned());
        assert_eq!(tracker.len(), 1);
        drop(token);
        assert_eq!(tracker.len(), 0);
        assert!(tracker.handle_iq(None, result(None, "q2")).is_continue());
    }

    #[tokio::test]
    async fn fail_all_disconnects() {
        let tracker = IqTracker::new();
        let a = tracker.register(None, "a".to_owned());
        let b = tracker.register(None, "b".to_owned());
        tracker.fail_all();
        assert!(matches!(a.await, Err(Error::Disconnected)));
        assert!(matches!(b.await, Err(Error::Disconnected)));
        assert_eq!(tracker.len(), 0);
    }
}
