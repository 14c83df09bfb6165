// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `StartTlsServerConnector` provides a `ServerConnector` for starttls connections

use core::pin::Pin;
use core::task::{Context, Poll};
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use sasl::common::ChannelBinding;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{
    client::TlsStream,
    rustls::pki_types::{InvalidDnsNameError, ServerName},
    rustls::Error as TlsError,
    rustls::{ClientConfig, RootCertStore},
    TlsConnector,
};

use crate::{
    connect::{dns::DEFAULT_CLIENT_PORT, DnsConfig, ServerConnector, ServerConnectorError},
    error::Error,
};

pin_project_lite::pin_project! {
    /// A TCP connection which may have been upgraded to TLS.
    #[project = MaybeTlsStreamProj]
    pub enum MaybeTlsStream {
        /// Before STARTTLS.
        Plain {
            #[pin]
            stream: TcpStream,
        },
        /// After STARTTLS.
        Tls {
            #[pin]
            stream: TlsStream<TcpStream>,
        },
    }
}

impl MaybeTlsStream {
    /// Whether the connection is encrypted.
    pub fn is_secure(&self) -> bool {
        matches!(self, MaybeTlsStream::Tls { .. })
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            MaybeTlsStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            MaybeTlsStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            MaybeTlsStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsStreamProj::Plain { stream } => stream.poll_flush(cx),
            MaybeTlsStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            MaybeTlsStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}

/// Connect via TCP+StartTLS to an XMPP server
#[derive(Debug, Clone)]
pub struct StartTlsServerConnector(pub DnsConfig);

impl From<DnsConfig> for StartTlsServerConnector {
    fn from(dns_config: DnsConfig) -> StartTlsServerConnector {
        Self(dns_config)
    }
}

async fn get_tls_stream(stream: TcpStream, domain: &str) -> Result<TlsStream<TcpStream>, Error> {
    let domain = ServerName::try_from(domain.to_owned()).map_err(StartTlsError::DnsNameError)?;
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls_stream = TlsConnector::from(Arc::new(config))
        .connect(domain, stream)
        .await?;
    Ok(tls_stream)
}

impl ServerConnector for StartTlsServerConnector {
    type Stream = MaybeTlsStream;

    async fn connect(&self, domain: &str, redirect: Option<&str>) -> Result<Self::Stream, Error> {
        let stream = match redirect {
            Some(target) => {
                log::info!("{domain}: following redirect to {target}");
                DnsConfig::from_redirect(target, DEFAULT_CLIENT_PORT)
                    .resolve()
                    .await?
            }
            None => self.0.resolve().await?,
        };
        Ok(MaybeTlsStream::Plain { stream })
    }

    fn can_secure(&self) -> bool {
        true
    }

    async fn secure_connection(
        &self,
        stream: Self::Stream,
        domain: &str,
    ) -> Result<Self::Stream, Error> {
        match stream {
            MaybeTlsStream::Plain { stream } => Ok(MaybeTlsStream::Tls {
                stream: get_tls_stream(stream, domain).await?,
            }),
            MaybeTlsStream::Tls { .. } => Err(Error::InvalidState),
        }
    }

    fn channel_binding(&self, stream: &Self::Stream) -> Result<ChannelBinding, Error> {
        let MaybeTlsStream::Tls { stream } = stream else {
            return Ok(ChannelBinding::None);
        };
        let (_, connection) = stream.get_ref();
        Ok(match connection.protocol_version() {
            // TODO: Add support for TLS 1.2 and earlier.
            Some(tokio_rustls::rustls::ProtocolVersion::TLSv1_3) => {
                let data = vec![0u8; 32];
                let data = connection
                    .export_keying_material(data, b"EXPORTER-Channel-Binding", None)
                    .map_err(StartTlsError::Tls)?;
                ChannelBinding::TlsExporter(data)
            }
            _ => ChannelBinding::None,
        })
    }
}

/// StartTLS ServerConnector Error
#[derive(Debug)]
pub enum StartTlsError {
    /// TLS error
    Tls(TlsError),
    /// DNS name parsing error
    DnsNameError(InvalidDnsNameError),
}

impl ServerConnectorError for StartTlsError {}

impl fmt::Display for StartTlsError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tls(e) => write!(fmt, "TLS error: {}", e),
            Self::DnsNameError(e) => write!(fmt, "DNS name error: {}", e),
        }
    }
}

impl StdError for StartTlsError {}

impl From<TlsError> for StartTlsError {
    fn from(e: TlsError) -> Self {
        Self::Tls(e)
    }
}

impl From<InvalidDnsNameError> for StartTlsError {
    fn from(e: InvalidDnsNameError) -> Self {
        Self::DnsNameError(e)
    }
}
