// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `ServerConnector` provides byte streams for XMPP sessions
//!
//! A connector only deals with transport concerns: opening a connection to
//! the server of a domain and, if it can, upgrading that connection to TLS
//! in place once the peer agreed to STARTTLS. Stream negotiation itself is
//! driven by the session.

use core::future::Future;

use sasl::common::ChannelBinding;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ProtocolError;
use crate::Error;

#[cfg(feature = "tls-rust")]
pub mod starttls;
#[cfg(feature = "tls-rust")]
pub use starttls::StartTlsServerConnector;

pub mod tcp;
pub use tcp::TcpServerConnector;

mod dns;
pub use dns::DnsConfig;

/// trait for the byte streams produced by a ServerConnector
pub trait AsyncReadAndWrite: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> AsyncReadAndWrite for T {}

/// Trait that must be extended by the implementation of ServerConnector
pub trait ServerConnectorError: core::error::Error + Sync + Send {}

/// Trait called to connect to an XMPP server, perhaps called multiple times
pub trait ServerConnector: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// The type of Stream this ServerConnector produces
    type Stream: AsyncReadAndWrite;

    /// Open a connection to the server responsible for `domain`.
    ///
    /// `redirect` carries the `host[:port]` of a `<see-other-host/>` stream
    /// error received on the previous connection, which takes precedence
    /// over the configured address.
    fn connect(
        &self,
        domain: &str,
        redirect: Option<&str>,
    ) -> impl Future<Output = Result<Self::Stream, Error>> + Send;

    /// Whether [`Self::secure_connection`] can do anything.
    fn can_secure(&self) -> bool {
        false
    }

    /// Upgrade `stream` to TLS after the peer sent `<proceed/>`.
    fn secure_connection(
        &self,
        stream: Self::Stream,
        domain: &str,
    ) -> impl Future<Output = Result<Self::Stream, Error>> + Send {
        let _ = (stream, domain);
        async { Err(ProtocolError::NoTls.into()) }
    }

    /// Channel binding data of a secured stream, for SCRAM-*-PLUS.
    fn channel_binding(&self, _stream: &Self::Stream) -> Result<ChannelBinding, Error> {
        Ok(ChannelBinding::None)
    }
}
