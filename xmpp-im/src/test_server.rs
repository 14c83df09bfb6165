// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! In-memory server for session level tests.

use core::time::Duration;

use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use xmpp_session::connect::ServerConnector;
use xmpp_session::jid::Jid;
use xmpp_session::minidom::Element;
use xmpp_session::ns;
use xmpp_session::reconnect::FixedDelay;
use xmpp_session::xmlstream::{accept_stream, StreamHeader, XmlStream};
use xmpp_session::{
    DispatchMode, Error, ExtensionRegistry, Session, SessionConfig, SessionRole, SessionStatus,
    Timeouts,
};

#[derive(Debug, Clone)]
pub(crate) struct DuplexConnector {
    servers: mpsc::UnboundedSender<DuplexStream>,
}

impl ServerConnector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&self, _domain: &str, _redirect: Option<&str>) -> Result<DuplexStream, Error> {
        let (client, server) = tokio::io::duplex(65536);
        self.servers.send(server).map_err(|_| Error::Disconnected)?;
        Ok(client)
    }
}

pub(crate) type Server = XmlStream<DuplexStream>;

pub(crate) fn parse(xml: &str) -> Element {
    xml.parse().unwrap()
}

pub(crate) fn session(
    extensions: ExtensionRegistry,
) -> (Session<DuplexConnector>, mpsc::UnboundedReceiver<DuplexStream>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (servers, rx) = mpsc::unbounded_channel();
    let config = SessionConfig::default()
        .with_plain_without_tls(true)
        .with_stream_management(false)
        .with_dispatch(DispatchMode::Inline)
        .with_timeouts(Timeouts::tight())
        .with_reconnect(FixedDelay(Duration::from_millis(10)));
    let session = Session::new(
        DuplexConnector { servers },
        SessionRole::Client {
            jid: Jid::new("juliet@example.org/balcony").unwrap(),
            password: "pencil".to_owned(),
        },
        config,
        extensions,
    );
    (session, rx)
}

/// Accept a PLAIN login of juliet@example.org/balcony.
pub(crate) async fn login(io: DuplexStream) -> Server {
    let mut stream = accept_stream(io, ns::JABBER_CLIENT, Timeouts::tight())
        .await
        .unwrap();
    stream.send_header(&StreamHeader::default()).await.unwrap();
    stream
        .send(&parse(
            "<features xmlns='http://etherx.jabber.org/streams'>\
             <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>\
             </features>",
        ))
        .await
        .unwrap();
    let auth = stream.recv().await.unwrap();
    assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
    stream
        .send(&parse("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>"))
        .await
        .unwrap();
    stream.accept_restart().await.unwrap();
    stream.send_header(&StreamHeader::default()).await.unwrap();
    stream
        .send(&parse(
            "<features xmlns='http://etherx.jabber.org/streams'>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></features>",
        ))
        .await
        .unwrap();
    let bind = stream.recv().await.unwrap();
    let id = bind.attr("id").unwrap();
    stream
        .send(&parse(&format!(
            "<iq xmlns='jabber:client' type='result' id='{id}'>\
             <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>juliet@example.org/balcony</jid></bind>\
             </iq>"
        )))
        .await
        .unwrap();
    stream
}

/// Every status transition of `session`, in order.
pub(crate) fn statuses<C: ServerConnector>(
    session: &Session<C>,
) -> mpsc::UnboundedReceiver<SessionStatus> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.add_status_listener(move |event| {
        let _ = tx.send(event.current);
    });
    rx
}

/// Skip transitions until `wanted`.
pub(crate) async fn wait_for(statuses: &mut mpsc::UnboundedReceiver<SessionStatus>, wanted: SessionStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(status) = statuses.recv().await {
            if status == wanted {
                return;
            }
        }
        panic!("session dropped before reaching {}", wanted);
    })
    .await
    .expect("status not reached in time");
}
