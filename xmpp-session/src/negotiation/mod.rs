// Copyright (c) 2017 Astro <astro@spaceboyz.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream negotiation: from a fresh transport to a stream stanzas can be
//! exchanged on.

use jid::Jid;
use minidom::Element;
use sasl::common::ChannelBinding;

use crate::config::SessionConfig;
use crate::connect::ServerConnector;
use crate::error::{Error, ProtocolError};
use crate::features::StreamFeatures;
use crate::ns;
use crate::session::{SessionRole, SessionStatus};
use crate::stream_management::{self as sm, SmState};
use crate::xmlstream::{initiate_stream, StreamHeader, XmlStream};

mod auth;
mod bind;
mod component;

pub use self::auth::SaslCondition;
pub use self::component::handshake_digest;

/// A stream which went through all negotiation steps.
pub(crate) struct Negotiated<S> {
    pub stream: XmlStream<S>,
    pub bound_jid: Jid,
    pub sm: Option<SmState>,
    /// Whether a previous XEP-0198 session was resumed.
    pub resumed: bool,
    /// Stanzas the server never acked before the previous connection broke.
    pub retransmit: Vec<Element>,
}

/// Previous stream management state to resume from.
pub(crate) struct Resumption {
    pub sm: SmState,
    pub bound_jid: Jid,
}

async fn starttls<C: ServerConnector>(
    connector: &C,
    mut stream: XmlStream<C::Stream>,
    domain: &str,
    config: &SessionConfig,
) -> Result<(XmlStream<C::Stream>, ChannelBinding), Error> {
    stream
        .send(&Element::builder("starttls", ns::TLS).build())
        .await?;
    let reply = stream.recv().await?;
    if !reply.is("proceed", ns::TLS) {
        log::warn!("STARTTLS refused by {}", domain);
        return Err(ProtocolError::NoTls.into());
    }
    let io = connector.secure_connection(stream.into_inner(), domain).await?;
    let channel_binding = connector.channel_binding(&io)?;
    let stream = initiate_stream(
        io,
        ns::JABBER_CLIENT,
        &StreamHeader::addressed_to(domain),
        config.timeouts,
    )
    .await?;
    Ok((stream, channel_binding))
}

async fn try_resume<S>(
    stream: &mut XmlStream<S>,
    mut previous: Resumption,
) -> Result<Option<(Resumption, Vec<Element>)>, Error>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let Some((id, h)) = previous
        .sm
        .resume_info()
        .map(|(id, h)| (id.to_owned(), h))
    else {
        return Ok(None);
    };
    stream.send(&sm::resume_request(&id, h)).await?;
    let reply = stream.recv().await?;
    if reply.is("resumed", ns::SM) {
        let acked = sm::handled(&reply).ok_or(ProtocolError::InvalidStanza(
            "<resumed/> without h".to_owned(),
        ))?;
        let retransmit = previous.sm.resume(acked)?;
        log::info!(
            "Resumed stream {}, retransmitting {} stanzas",
            id,
            retransmit.len()
        );
        Ok(Some((previous, retransmit)))
    } else if reply.is("failed", ns::SM) {
        log::info!("Stream resumption failed, starting a new session");
        Ok(None)
    } else {
        Err(ProtocolError::unexpected(&reply).into())
    }
}

async fn enable_sm<S>(stream: &mut XmlStream<S>) -> Result<Option<SmState>, Error>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream.send(&sm::enable()).await?;
    let reply = stream.recv().await?;
    if reply.is("enabled", ns::SM) {
        Ok(Some(SmState::from_enabled(&reply)))
    } else if reply.is("failed", ns::SM) {
        log::warn!("Server refused to enable stream management");
        Ok(None)
    } else {
        Err(ProtocolError::unexpected(&reply).into())
    }
}

/// Connect and negotiate a stream for `role`.
///
/// `on_status` is told when authentication starts and when it succeeded.
pub(crate) async fn negotiate<C: ServerConnector>(
    connector: &C,
    role: &SessionRole,
    config: &SessionConfig,
    redirect: Option<&str>,
    previous: Option<Resumption>,
    on_status: &(dyn Fn(SessionStatus) + Send + Sync),
) -> Result<Negotiated<C::Stream>, Error> {
    let domain = role.jid().domain().to_owned();
    let io = connector.connect(&domain, redirect).await?;

    let (jid, password) = match role {
        SessionRole::Component { jid, secret } => {
            let mut stream = initiate_stream(
                io,
                ns::COMPONENT_ACCEPT,
                &StreamHeader::addressed_to(&domain),
                config.timeouts,
            )
            .await?;
            on_status(SessionStatus::Authenticating);
            component::handshake(&mut stream, secret).await?;
            on_status(SessionStatus::Authenticated);
            return Ok(Negotiated {
                stream,
                bound_jid: jid.clone(),
                sm: None,
                resumed: false,
                retransmit: Vec::new(),
            });
        }
        SessionRole::Client { jid, password } => (jid, password),
    };

    let mut stream = initiate_stream(
        io,
        ns::JABBER_CLIENT,
        &StreamHeader::addressed_to(&domain),
        config.timeouts,
    )
    .await?;
    let mut features = stream.recv_features().await?;

    let mut secure = false;
    let mut channel_binding = ChannelBinding::None;
    if features.can_starttls() && connector.can_secure() {
        let (secured, cb) = starttls(connector, stream, &domain, config).await?;
        stream = secured;
        channel_binding = cb;
        secure = true;
        features = stream.recv_features().await?;
    } else if features.requires_starttls() {
        return Err(ProtocolError::NoTls.into());
    }

    on_status(SessionStatus::Authenticating);
    auth::authenticate(
        &mut stream,
        &features,
        jid.node(),
        password,
        &channel_binding,
        secure || config.allow_plain_without_tls,
    )
    .await?;
    on_status(SessionStatus::Authenticated);

    stream.restart(&StreamHeader::addressed_to(&domain)).await?;
    let features: StreamFeatures = stream.recv_features().await?;
    let use_sm = config.stream_management && features.stream_management;

    if let Some(previous) = previous.filter(|_| use_sm) {
        if let Some((resumed, retransmit)) = try_resume(&mut stream, previous).await? {
            return Ok(Negotiated {
                stream,
                bound_jid: resumed.bound_jid,
                sm: Some(resumed.sm),
                resumed: true,
                retransmit,
            });
        }
    }

    let bound_jid = bind::bind(&mut stream, &features, jid).await?;
    let sm = if use_sm {
        enable_sm(&mut stream).await?
    } else {
        None
    };
    Ok(Negotiated {
        stream,
        bound_jid,
        sm,
        resumed: false,
        retransmit: Vec::new(),
    })
}
