// Copyright (c) 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Resilient XMPP session
//!
//! A [`Session`] owns at most one connection at a time. It negotiates the
//! stream, runs a read loop task, and when the connection breaks a
//! supervisor task reconnects according to the configured
//! [`ReconnectionStrategy`](crate::reconnect::ReconnectionStrategy),
//! resuming the previous stream with
//! [XEP-0198 (Stream Management)](https://xmpp.org/extensions/xep-0198.html)
//! if the server supports it.
//!
//! Stanzas are observed through listeners, which run in registration
//! order either on the read loop itself or on a dedicated worker task,
//! depending on [`DispatchMode`].

use core::fmt;
use core::ops::ControlFlow;
use core::time::Duration;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::FutureExt;
use jid::Jid;
use minidom::Element;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::config::{DispatchMode, SessionConfig};
use crate::connect::ServerConnector;
use crate::error::Error;
use crate::extensions::ExtensionRegistry;
use crate::negotiation::{negotiate, Negotiated, Resumption};
use crate::reconnect::ReconnectionStrategy;
use crate::ns;
use crate::stanza::{make_id, Iq, IqType, Stanza};
use crate::stanza_error::{DefinedCondition, ErrorType, StanzaError};
use crate::stream_error::StreamError;
use crate::stream_management::{self as sm, SmError, SmState};
use crate::xmlstream::{ReadError, StreamReader, StreamWriter};

mod iq;
mod listeners;
mod status;
mod worker;

use self::iq::{IqResponse, IqTracker};
use self::listeners::Listeners;
pub use self::listeners::{Direction, ListenerId, StanzaEvent, StanzaListener, StatusListener};
pub use self::status::{SessionStatus, StatusEvent};
use self::worker::{DispatchWorker, Job};

/// How long to wait for the peer to close its side after we sent our
/// stream footer.
const LOCAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Who the session logs in as.
#[derive(Clone)]
pub enum SessionRole {
    /// A client account. A full `jid` requests that resource; a JID
    /// without a node logs in anonymously.
    Client {
        /// Account JID
        jid: Jid,
        /// Account password
        password: String,
    },
    /// An XEP-0114 external component.
    Component {
        /// Domain of the component
        jid: Jid,
        /// Shared secret with the server
        secret: String,
    },
}

impl SessionRole {
    /// The JID we log in as.
    pub fn jid(&self) -> &Jid {
        match self {
            SessionRole::Client { jid, .. } | SessionRole::Component { jid, .. } => jid,
        }
    }

    /// Default namespace of stanzas on this kind of stream.
    pub fn stanza_ns(&self) -> &'static str {
        match self {
            SessionRole::Client { .. } => ns::JABBER_CLIENT,
            SessionRole::Component { .. } => ns::COMPONENT_ACCEPT,
        }
    }
}

impl fmt::Debug for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionRole::Client { jid, .. } => f
                .debug_struct("Client")
                .field("jid", jid)
                .field("password", &"<redacted>")
                .finish(),
            SessionRole::Component { jid, .. } => f
                .debug_struct("Component")
                .field("jid", jid)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Tasks of the current connection.
#[derive(Default)]
struct Lifecycle {
    /// Bumped whenever a connection is installed or torn down, so failure
    /// reports of an old read loop can be told apart.
    generation: u64,
    reader: Option<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

struct Failure {
    generation: u64,
    error: Error,
}

pub(crate) struct Inner<C: ServerConnector> {
    connector: C,
    role: SessionRole,
    config: SessionConfig,
    extensions: ExtensionRegistry,
    status: watch::Sender<SessionStatus>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    writer: tokio::sync::Mutex<Option<StreamWriter<C::Stream>>>,
    tracker: IqTracker,
    listeners: Listeners,
    sm: Mutex<Option<SmState>>,
    bound_jid: Mutex<Option<Jid>>,
    redirect: Mutex<Option<String>>,
    /// Set by [`Session::disconnect`] to stop pending reconnects.
    cancel: watch::Sender<bool>,
    failures: mpsc::UnboundedSender<Failure>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<Failure>>>,
    worker: DispatchWorker,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to an XMPP session.
///
/// Clones share the same session. The connection is closed once the last
/// handle is dropped.
pub struct Session<C: ServerConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: ServerConnector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Session {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ServerConnector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.inner.role)
            .field("status", &self.status())
            .finish()
    }
}

/// A handle which does not keep the session alive, for use inside
/// listeners.
pub struct WeakSession<C: ServerConnector> {
    inner: Weak<Inner<C>>,
}

impl<C: ServerConnector> Clone for WeakSession<C> {
    fn clone(&self) -> Self {
        WeakSession {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<C: ServerConnector> WeakSession<C> {
    /// The session, if any strong handle is left.
    pub fn upgrade(&self) -> Option<Session<C>> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

impl<C: ServerConnector> Session<C> {
    /// Create a session. Nothing happens on the network until
    /// [`Self::connect`].
    pub fn new(
        connector: C,
        role: SessionRole,
        config: SessionConfig,
        extensions: ExtensionRegistry,
    ) -> Self {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        Session {
            inner: Arc::new(Inner {
                connector,
                role,
                config,
                extensions,
                status: watch::Sender::new(SessionStatus::Initial),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
                writer: tokio::sync::Mutex::new(None),
                tracker: IqTracker::new(),
                listeners: Listeners::default(),
                sm: Mutex::new(None),
                bound_jid: Mutex::new(None),
                redirect: Mutex::new(None),
                cancel: watch::Sender::new(false),
                failures,
                failures_rx: Mutex::new(Some(failures_rx)),
                worker: DispatchWorker::default(),
            }),
        }
    }

    /// A handle which does not keep the session alive.
    pub fn downgrade(&self) -> WeakSession<C> {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Who this session logs in as.
    pub fn role(&self) -> &SessionRole {
        &self.inner.role
    }

    /// The current status.
    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// All future status values, starting with the current one.
    ///
    /// Intermediate values may be skipped by a slow consumer; use
    /// [`Self::add_status_listener`] to see every transition.
    pub fn status_stream(&self) -> WatchStream<SessionStatus> {
        WatchStream::new(self.inner.status.subscribe())
    }

    /// The JID assigned by the server on the current connection.
    pub fn bound_jid(&self) -> Option<Jid> {
        lock(&self.inner.bound_jid).clone()
    }

    /// The payload registry this session was built with.
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.inner.extensions
    }

    /// Connect and log in, unless already connected.
    ///
    /// Concurrent callers share one attempt: the second waits for the
    /// first and returns right away if it succeeded. A failure of this
    /// initial attempt is returned and does not start reconnecting.
    pub async fn connect(&self) -> Result<(), Error> {
        if self.status().is_connected() {
            return Ok(());
        }
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.status().is_connected() {
            return Ok(());
        }
        self.inner.cancel.send_replace(false);
        self.inner.ensure_supervisor(&mut lifecycle);
        self.inner.establish(&mut lifecycle).await
    }

    /// Send a stanza, assigning an id if it has none.
    ///
    /// Stanzas are written in call order. Returns the id.
    pub async fn send(&self, stanza: impl Into<Stanza>) -> Result<String, Error> {
        self.inner.send_stanza(stanza.into()).await
    }

    /// Send an IQ request and wait for its response.
    ///
    /// `to` of `None` addresses our own account. Without a `timeout`, the
    /// configured query timeout applies. Errors are [`Error::Timeout`],
    /// [`Error::Stanza`] for an error response, and [`Error::Disconnected`]
    /// if the connection went away first.
    pub async fn query(
        &self,
        to: Option<Jid>,
        request: IqType,
        timeout: Option<Duration>,
    ) -> Result<Option<Element>, Error> {
        if !request.is_request() {
            return Err(Error::InvalidState);
        }
        let id = make_id();
        let token = self
            .inner
            .tracker
            .register(self.inner.peer_key(to.as_ref()), id.clone());
        let iq = Iq {
            from: None,
            to,
            id,
            payload: request,
        };
        self.send(iq).await?;
        let timeout = timeout.unwrap_or(self.inner.config.query_timeout);
        match tokio::time::timeout(timeout, token).await {
            Err(_) => Err(Error::Timeout),
            Ok(Err(e)) => Err(e),
            Ok(Ok(IqResponse::Result(payload))) => Ok(payload),
            Ok(Ok(IqResponse::Error(error))) => Err(error.into()),
        }
    }

    /// Close the stream and stop reconnecting.
    ///
    /// Pending queries fail with [`Error::Disconnected`].
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.inner.cancel.send_replace(true);
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if matches!(self.status(), SessionStatus::Initial | SessionStatus::Closed) {
            return Ok(());
        }
        self.inner.set_status(SessionStatus::Closing, None, false);
        lifecycle.generation += 1;

        let writer = self.inner.writer.lock().await.take();
        let mut result = Ok(());
        if let Some(mut writer) = writer {
            match tokio::time::timeout(LOCAL_SHUTDOWN_TIMEOUT, writer.close()).await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => result = Err(e.into()),
                Err(_) => log::debug!("Timed out closing the stream"),
            }
        }
        if let Some(mut reader) = lifecycle.reader.take() {
            // The read loop ends when the peer answers with its footer.
            if tokio::time::timeout(LOCAL_SHUTDOWN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                log::debug!("Peer did not close its side in time");
                reader.abort();
            }
        }
        self.inner.tracker.fail_all();
        *lock(&self.inner.sm) = None;
        *lock(&self.inner.bound_jid) = None;
        self.inner.set_status(SessionStatus::Closed, None, false);
        result
    }

    /// Call `listener` for each received stanza, after the listeners
    /// registered before it.
    pub fn add_inbound_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StanzaEvent) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .add_stanza_listener(Direction::Inbound, Arc::new(listener))
    }

    /// Call `listener` for each stanza written to the stream, in the order
    /// they were written.
    pub fn add_outbound_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StanzaEvent) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .add_stanza_listener(Direction::Outbound, Arc::new(listener))
    }

    /// Call `listener` on every status transition.
    ///
    /// Status listeners run synchronously in the task causing the
    /// transition.
    pub fn add_status_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StatusEvent<'_>) + Send + Sync + 'static,
    {
        self.inner.listeners.add_status_listener(Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Hand a locally generated stanza to the inbound listeners, as if it
    /// had been received.
    ///
    /// The event is marked synthetic and never triggers automatic replies.
    pub fn dispatch_local(&self, stanza: impl Into<Stanza>) {
        let event = StanzaEvent::new(
            stanza.into(),
            Direction::Inbound,
            true,
            self.inner.extensions.clone(),
        );
        match self.inner.config.dispatch {
            DispatchMode::Inline => self.inner.listeners.dispatch(&event),
            DispatchMode::Worker => {
                let inner = Arc::clone(&self.inner);
                let job = async move { inner.listeners.dispatch(&event) }.boxed();
                if let Err(job) = self.inner.worker.submit(job) {
                    futures::executor::block_on(job);
                }
            }
        }
    }
}

impl<C: ServerConnector> Inner<C> {
    fn set_status(&self, current: SessionStatus, cause: Option<&Error>, resumed: bool) {
        let previous = self.status.send_replace(current);
        if previous == current {
            return;
        }
        match cause {
            Some(cause) => log::info!("Session status {} -> {}: {}", previous, current, cause),
            None => log::debug!("Session status {} -> {}", previous, current),
        }
        self.listeners.dispatch_status(&StatusEvent {
            previous,
            current,
            cause,
            resumed,
        });
    }

    /// Key under which IQ responses from `peer` are tracked.
    ///
    /// Responses on behalf of our own account may come without `from` or
    /// from our bare JID.
    fn peer_key(&self, peer: Option<&Jid>) -> Option<Jid> {
        let peer = peer?;
        match &*lock(&self.bound_jid) {
            Some(own) if peer.is_bare() && peer.bare_eq(own) => None,
            _ => Some(peer.clone()),
        }
    }

    fn ensure_supervisor(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if lifecycle.supervisor.is_some() {
            return;
        }
        let Some(rx) = lock(&self.failures_rx).take() else {
            return;
        };
        lifecycle.supervisor = Some(tokio::spawn(supervise(Arc::downgrade(self), rx)));
    }

    /// Negotiate a new connection and start reading from it.
    ///
    /// Must be called with the lifecycle lock held.
    async fn establish(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> Result<(), Error> {
        self.set_status(SessionStatus::Connecting, None, false);
        let redirect = lock(&self.redirect).take();
        // The state stays in place until a new stream replaces it, so a
        // failed attempt can still be followed by a resumption.
        let previous = {
            let bound_jid = lock(&self.bound_jid).clone();
            let mut sm = lock(&self.sm);
            let resumable = sm.as_ref().is_some_and(|sm| sm.resume_info().is_some());
            match bound_jid {
                Some(bound_jid) if resumable => {
                    (*sm).clone().map(|sm| Resumption { sm, bound_jid })
                }
                _ => {
                    *sm = None;
                    None
                }
            }
        };
        let resumable = previous.is_some();
        let on_status = |status: SessionStatus| self.set_status(status, None, false);
        let negotiated = negotiate(
            &self.connector,
            &self.role,
            &self.config,
            redirect.as_deref(),
            previous,
            &on_status,
        )
        .await;
        let Negotiated {
            stream,
            bound_jid,
            sm,
            resumed,
            retransmit,
        } = match negotiated {
            Ok(negotiated) => negotiated,
            Err(e) => {
                log::warn!("Connection attempt failed: {}", e);
                if !resumable {
                    *lock(&self.bound_jid) = None;
                }
                self.set_status(SessionStatus::Disconnected, Some(&e), false);
                return Err(e);
            }
        };
        log::info!(
            "Connected as {}{}",
            bound_jid,
            if resumed { " (resumed)" } else { "" }
        );

        let (reader, writer) = stream.split();
        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        *lock(&self.bound_jid) = Some(bound_jid);
        *lock(&self.sm) = sm;
        let mut slot = self.writer.lock().await;
        let writer = slot.insert(writer);
        let mut retransmitted = Ok(());
        for stanza in retransmit {
            let sent = match self.enqueue_sm(&stanza) {
                Ok(_) => writer.send(&stanza).await.map_err(Error::from),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = sent {
                retransmitted = Err(e);
                break;
            }
        }
        if let Err(e) = retransmitted {
            *slot = None;
            drop(slot);
            self.set_status(SessionStatus::Disconnected, Some(&e), false);
            return Err(e);
        }
        drop(slot);
        if let Some(old) = lifecycle.reader.take() {
            old.abort();
        }
        lifecycle.reader = Some(tokio::spawn(read_loop(
            Arc::downgrade(self),
            reader,
            generation,
            self.config.timeouts,
        )));
        self.set_status(SessionStatus::Connected, None, resumed);
        Ok(())
    }

    fn report_failure(&self, generation: u64, error: Error) {
        if self.failures.send(Failure { generation, error }).is_err() {
            log::debug!("Supervisor is gone, dropping failure report");
        }
    }

    /// Remember `stanza` for XEP-0198; returns whether to ask for an ack.
    ///
    /// A full queue makes the stream unresumable, so the state is dropped.
    fn enqueue_sm(&self, stanza: &Element) -> Result<bool, SmError> {
        let mut sm = lock(&self.sm);
        let Some(state) = sm.as_mut() else {
            return Ok(false);
        };
        match state.enqueue(stanza.clone()) {
            Ok(()) => Ok(state.should_request_ack()),
            Err(e) => {
                *sm = None;
                Err(e)
            }
        }
    }

    fn stamp_sender(&self, stanza: &mut Stanza) {
        // Components have to address stanzas explicitly.
        if let SessionRole::Component { jid, .. } = &self.role {
            let from = match stanza {
                Stanza::Iq(iq) => &mut iq.from,
                Stanza::Message(message) => &mut message.from,
                Stanza::Presence(presence) => &mut presence.from,
            };
            if from.is_none() {
                *from = Some(jid.clone());
            }
        }
    }

    async fn send_stanza(self: &Arc<Self>, mut stanza: Stanza) -> Result<String, Error> {
        let id = stanza.ensure_id().to_owned();
        self.stamp_sender(&mut stanza);
        let element = stanza.to_element(self.role.stanza_ns());
        let mut slot = self.writer.lock().await;
        let writer = slot.as_mut().ok_or(Error::Disconnected)?;
        let request_ack = match self.enqueue_sm(&element) {
            Ok(request_ack) => request_ack,
            Err(e) => {
                log::error!("Closing the stream: {}", e);
                let _: Result<_, _> = writer.send(&e.to_stream_error().to_element()).await;
                // The reader notices once the server closes its side.
                if let Some(mut writer) = slot.take() {
                    let _: Result<_, _> =
                        tokio::time::timeout(Duration::from_secs(1), writer.close()).await;
                }
                return Err(e.into());
            }
        };
        writer.send(&element).await?;
        if request_ack {
            writer.send(&sm::request()).await?;
        }
        let event = StanzaEvent::new(
            stanza,
            Direction::Outbound,
            false,
            self.extensions.clone(),
        );
        let inner = Arc::clone(self);
        // Still holding the writer so listeners see stanzas in wire order.
        self.dispatch(async move { inner.listeners.dispatch(&event) }.boxed())
            .await;
        drop(slot);
        Ok(id)
    }

    async fn send_nonza(&self, element: &Element) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::Disconnected)?;
        writer.send(element).await?;
        Ok(())
    }

    async fn dispatch(&self, job: Job) {
        match self.config.dispatch {
            DispatchMode::Inline => job.await,
            DispatchMode::Worker => {
                if let Err(job) = self.worker.submit(job) {
                    job.await;
                }
            }
        }
    }

    async fn handle_element(self: &Arc<Self>, element: Element) -> Result<(), Error> {
        if element.is("error", ns::STREAM) {
            let error = StreamError::parse(&element)?;
            if let Some(target) = error.redirect() {
                log::info!("Server redirects us to {}", target);
                *lock(&self.redirect) = Some(target.to_owned());
            }
            return Err(error.into());
        }

        if element.has_ns(ns::SM) {
            return self.handle_sm(&element).await;
        }

        if !Stanza::is_stanza(&element) {
            log::warn!(
                "Ignoring unexpected {{{}}}{} on established stream",
                element.ns(),
                element.name()
            );
            return Ok(());
        }
        if let Some(sm) = lock(&self.sm).as_mut() {
            sm.count_inbound();
        }

        let stanza = match Stanza::try_from(&element) {
            Ok(stanza) => stanza,
            Err(e) => {
                log::warn!("Dropping invalid stanza: {}", e);
                return Ok(());
            }
        };
        let stanza = match stanza {
            Stanza::Iq(iq) => {
                let from = self.peer_key(iq.from.as_ref());
                match self.tracker.handle_iq(from, iq) {
                    ControlFlow::Break(()) => return Ok(()),
                    ControlFlow::Continue(iq) => Stanza::Iq(iq),
                }
            }
            other => other,
        };

        let event = StanzaEvent::new(stanza, Direction::Inbound, false, self.extensions.clone());
        let inner = Arc::clone(self);
        let job = async move {
            inner.listeners.dispatch(&event);
            if event.is_consumed() {
                return;
            }
            if let Stanza::Iq(iq) = event.stanza() {
                if iq.payload.is_request() {
                    log::debug!("No listener handled IQ {}, replying with an error", iq.id);
                    let reply = Iq::from_error(
                        iq.id.clone(),
                        StanzaError::new(
                            ErrorType::Cancel,
                            DefinedCondition::ServiceUnavailable,
                            None,
                        ),
                    )
                    .with_to(iq.from.clone());
                    if let Err(e) = inner.send_stanza(reply.into()).await {
                        log::warn!("Failed to reply to IQ: {}", e);
                    }
                }
            }
        }
        .boxed();
        self.dispatch(job).await;
        Ok(())
    }

    async fn handle_sm(&self, element: &Element) -> Result<(), Error> {
        match element.name() {
            "r" => {
                let h = lock(&self.sm).as_ref().map(SmState::inbound_ctr);
                match h {
                    Some(h) => self.send_nonza(&sm::answer(h)).await,
                    None => {
                        log::warn!("Ignoring <r/> without stream management");
                        Ok(())
                    }
                }
            }
            "a" => {
                let Some(h) = sm::handled(element) else {
                    log::warn!("Ignoring <a/> without a valid h");
                    return Ok(());
                };
                let result = match lock(&self.sm).as_mut() {
                    Some(sm) => sm.remote_acked(h),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    log::error!("{}", e);
                    // The stream cannot be resumed after this.
                    *lock(&self.sm) = None;
                    let _: Result<_, _> = self.send_nonza(&e.to_stream_error().to_element()).await;
                    return Err(e.into());
                }
                Ok(())
            }
            other => {
                log::warn!("Ignoring unexpected stream management element {}", other);
                Ok(())
            }
        }
    }

    /// Send something the peer has to answer, because nothing arrived for
    /// a while.
    async fn probe(&self) -> Result<bool, Error> {
        let stream_management = lock(&self.sm).is_some();
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::Disconnected)?;
        if stream_management {
            writer.send(&sm::request()).await?;
        } else {
            writer.send_keepalive().await?;
        }
        Ok(stream_management)
    }

    /// Tear the broken connection down. Returns the cause if the failure
    /// belonged to the current connection.
    async fn handle_failure(&self, failure: Failure) -> Option<Error> {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if failure.generation != lifecycle.generation {
                log::debug!("Ignoring failure of an old connection: {}", failure.error);
                return None;
            }
            lifecycle.generation += 1;
            if let Some(reader) = lifecycle.reader.take() {
                reader.abort();
            }
            let writer = self.writer.lock().await.take();
            if let Some(mut writer) = writer {
                let _: Result<_, _> =
                    tokio::time::timeout(Duration::from_secs(1), writer.close()).await;
            }
            self.tracker.fail_all();
            let resumable = lock(&self.sm)
                .as_ref()
                .is_some_and(|sm| sm.resume_info().is_some());
            if !resumable {
                *lock(&self.sm) = None;
            }
            self.set_status(SessionStatus::Disconnected, Some(&failure.error), false);
        }
        Some(failure.error)
    }
}

async fn supervise<C: ServerConnector>(
    inner: Weak<Inner<C>>,
    mut failures: mpsc::UnboundedReceiver<Failure>,
) {
    while let Some(failure) = failures.recv().await {
        let Some(session) = inner.upgrade() else {
            return;
        };
        let Some(cause) = session.handle_failure(failure).await else {
            continue;
        };
        let Some(strategy) = session.config.reconnect.clone() else {
            log::info!("Not reconnecting, no reconnection strategy configured");
            continue;
        };
        if cause.is_auth_failure() {
            continue;
        }
        let cancel = session.cancel.subscribe();
        drop(session);
        reconnect(&inner, strategy, cancel, cause).await;
    }
}

/// Retry until a connection is established, the session is dropped or
/// [`Session::disconnect`] is called.
async fn reconnect<C: ServerConnector>(
    inner: &Weak<Inner<C>>,
    strategy: Arc<dyn ReconnectionStrategy>,
    mut cancel: watch::Receiver<bool>,
    mut cause: Error,
) {
    let mut attempt = 0u32;
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        let Some(session) = inner.upgrade() else {
            return;
        };
        let redirected = lock(&session.redirect).is_some();
        drop(session);
        let delay = if redirected {
            Duration::ZERO
        } else {
            strategy.next_delay(attempt, Some(&cause))
        };
        log::info!("Reconnecting in {:?} (attempt {})", delay, attempt + 1);
        tokio::select! {
            _ = tokio::time::sleep(delay) => (),
            _ = cancel.wait_for(|cancelled| *cancelled) => {
                log::debug!("Reconnect cancelled");
                return;
            }
        }

        let Some(session) = inner.upgrade() else {
            return;
        };
        let mut lifecycle = session.lifecycle.lock().await;
        if *session.cancel.borrow() || session.status.borrow().is_connected() {
            return;
        }
        match session.establish(&mut lifecycle).await {
            Ok(()) => return,
            Err(e) if e.is_auth_failure() => {
                log::error!("Giving up reconnecting: {}", e);
                return;
            }
            Err(e) => {
                cause = e;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

async fn read_loop<C: ServerConnector>(
    inner: Weak<Inner<C>>,
    mut reader: StreamReader<C::Stream>,
    generation: u64,
    timeouts: crate::config::Timeouts,
) {
    let mut probing = false;
    loop {
        let timeout = if probing {
            timeouts.response_timeout
        } else {
            timeouts.read_timeout
        };
        let result = reader.next_element_timeout(timeout).await;
        let Some(session) = inner.upgrade() else {
            return;
        };
        let error = match result {
            Ok(element) => {
                probing = false;
                match session.handle_element(element).await {
                    Ok(()) => continue,
                    Err(e) => e,
                }
            }
            Err(ReadError::SoftTimeout) if probing => Error::Timeout,
            Err(ReadError::SoftTimeout) => match session.probe().await {
                Ok(expects_answer) => {
                    probing = expects_answer;
                    continue;
                }
                Err(e) => e,
            },
            Err(ReadError::HardError(e)) => e.into(),
            Err(ReadError::StreamFooterReceived) => Error::Disconnected,
        };
        session.report_failure(generation, error);
        return;
    }
}
