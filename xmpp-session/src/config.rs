// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Session configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::reconnect::{default_strategy, ReconnectionStrategy};

/// Configuration for timeouts on an XML stream.
///
/// The defaults are tuned toward common desktop/laptop use and may not hold
/// up to extreme conditions (arctic sattelite link, mobile internet on a
/// train in Brandenburg, Germany, and similar) and may be inefficient in
/// other conditions (stable server link, localhost communication).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum silence time before a whitespace keepalive (or a
    /// `<r/>` when stream management is on) is sent.
    pub read_timeout: Duration,

    /// Maximum time to wait for any data after the keepalive, and for any
    /// reply while negotiating the stream.
    ///
    /// If this timeout elapses, the stream is considered dead.
    pub response_timeout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read_timeout: Duration::new(300, 0),
            response_timeout: Duration::new(300, 0),
        }
    }
}

impl Timeouts {
    /// Tight timeouts suitable for communicating on a fast LAN or localhost.
    pub fn tight() -> Self {
        Self {
            read_timeout: Duration::new(60, 0),
            response_timeout: Duration::new(15, 0),
        }
    }
}

/// Where stanza listeners run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// On the read-loop task, before the next element is read.
    Inline,
    /// On a dedicated task fed in arrival order, so a slow listener does
    /// not stall the read loop.
    #[default]
    Worker,
}

/// Everything a [`Session`](crate::Session) needs to know besides its role
/// and connector.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stream timeouts.
    pub timeouts: Timeouts,
    /// Default timeout of [`Session::query`](crate::Session::query).
    pub query_timeout: Duration,
    /// Where listeners run.
    pub dispatch: DispatchMode,
    /// How long to wait between reconnection attempts. `None` disables
    /// automatic reconnection.
    pub reconnect: Option<Arc<dyn ReconnectionStrategy>>,
    /// Negotiate XEP-0198 when the server offers it.
    pub stream_management: bool,
    /// Allow PLAIN authentication over an unencrypted transport.
    pub allow_plain_without_tls: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timeouts: Timeouts::default(),
            query_timeout: Duration::from_secs(30),
            dispatch: DispatchMode::default(),
            reconnect: Some(Arc::new(default_strategy())),
            stream_management: true,
            allow_plain_without_tls: false,
        }
    }
}

impl SessionConfig {
    /// Sets the stream timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the default query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Sets where listeners run.
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the reconnection strategy.
    pub fn with_reconnect<S: ReconnectionStrategy + 'static>(mut self, strategy: S) -> Self {
        self.reconnect = Some(Arc::new(strategy));
        self
    }

    /// Disables automatic reconnection.
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect = None;
        self
    }

    /// Enables or disables XEP-0198.
    pub fn with_stream_management(mut self, enabled: bool) -> Self {
        self.stream_management = enabled;
        self
    }

    /// Allows PLAIN without TLS. Only sensible on loopback connections.
    pub fn with_plain_without_tls(mut self, allowed: bool) -> Self {
        self.allow_plain_without_tls = allowed;
        self
    }
}
