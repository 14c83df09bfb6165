// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use futures::{future::select_ok, FutureExt};
use log::debug;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;

use crate::Error;

/// Default port of client-to-server connections.
pub const DEFAULT_CLIENT_PORT: u16 = 5222;

/// XMPP server connection configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DnsConfig {
    /// Resolve a host name through the system resolver
    NoSrv {
        /// Server host name
        host: String,
        /// Server port
        port: u16,
    },

    /// Manually define IP: port
    Addr {
        /// IP:port
        addr: String,
    },
}

impl std::fmt::Display for DnsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSrv { host, port } => write!(f, "{}:{}", host, port),
            Self::Addr { addr } => write!(f, "{}", addr),
        }
    }
}

impl DnsConfig {
    /// Constructor for DnsConfig::NoSrv variant
    pub fn no_srv(host: &str, port: u16) -> Self {
        Self::NoSrv {
            host: host.to_string(),
            port,
        }
    }

    /// Constructor for DnsConfig::Addr variant
    pub fn addr(addr: &str) -> Self {
        Self::Addr {
            addr: addr.to_string(),
        }
    }

    /// Parse the `host[:port]` text of a `<see-other-host/>` stream error.
    ///
    /// IPv6 literals are enclosed in brackets, with or without a port.
    pub fn from_redirect(target: &str, default_port: u16) -> Self {
        let target = target.trim();
        if let Ok(addr) = target.parse::<SocketAddr>() {
            return Self::Addr {
                addr: addr.to_string(),
            };
        }
        if let Some(inner) = target.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            return Self::NoSrv {
                host: inner.to_owned(),
                port: default_port,
            };
        }
        match target.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse() {
                Ok(port) => Self::NoSrv {
                    host: host.to_owned(),
                    port,
                },
                Err(_) => Self::no_srv(target, default_port),
            },
            _ => Self::no_srv(target, default_port),
        }
    }

    /// Try resolve the DnsConfig to a TcpStream
    pub async fn resolve(&self) -> Result<TcpStream, Error> {
        match self {
            Self::NoSrv { host, port } => Self::resolve_no_srv(host, *port).await,
            Self::Addr { addr } => {
                let addr: SocketAddr = addr.parse()?;
                debug!("Attempting connection to {addr}");
                Ok(TcpStream::connect(addr).await?)
            }
        }
    }

    async fn resolve_no_srv(host: &str, port: u16) -> Result<TcpStream, Error> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for {host}"),
            )
            .into());
        }
        debug!("Attempting connection to {host}:{port} ({} addresses)", addrs.len());

        // Happy Eyeballs: connect to all records in parallel, return the
        // first to succeed
        select_ok(
            addrs
                .into_iter()
                .map(|addr| TcpStream::connect(addr).boxed()),
        )
        .await
        .map(|(result, _)| result)
        .map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_targets() {
        assert_eq!(
            DnsConfig::from_redirect("other.example.org", 5222),
            DnsConfig::no_srv("other.example.org", 5222)
        );
        assert_eq!(
            DnsConfig::from_redirect("other.example.org:9222", 5222),
            DnsConfig::no_srv("other.example.org", 9222)
        );
        assert_eq!(
            DnsConfig::from_redirect("[2001:db8::1]:9222", 5222),
            DnsConfig::addr("[2001:db8::1]:9222")
        );
        assert_eq!(
            DnsConfig::from_redirect("[2001:db8::1]", 5222),
            DnsConfig::no_srv("2001:db8::1", 5222)
        );
        assert_eq!(
            DnsConfig::from_redirect("192.0.2.1:5223", 5222),
            DnsConfig::addr("192.0.2.1:5223")
        );
    }

    #[tokio::test]
    async fn connects_to_literal_address() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        let stream = DnsConfig::addr(&addr.to_string()).resolve().await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        accept.await.unwrap().unwrap();
    }
}
