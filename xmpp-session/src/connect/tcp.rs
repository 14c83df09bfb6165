// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `TcpServerConnector` provides a `ServerConnector` for plaintext connections

use tokio::net::TcpStream;

use crate::{
    connect::{dns::DEFAULT_CLIENT_PORT, DnsConfig, ServerConnector},
    Error,
};

/// Connect via insecure plaintext TCP to an XMPP server
/// This should only be used over localhost or otherwise when you know what you are doing
/// Probably mostly useful for Components
#[derive(Debug, Clone)]
pub struct TcpServerConnector(pub DnsConfig);

impl From<DnsConfig> for TcpServerConnector {
    fn from(dns_config: DnsConfig) -> TcpServerConnector {
        Self(dns_config)
    }
}

impl ServerConnector for TcpServerConnector {
    type Stream = TcpStream;

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
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
