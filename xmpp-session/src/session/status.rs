// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::fmt;

use crate::error::Error;

/// Where a [`Session`](super::Session) is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Never connected.
    Initial,
    /// Opening the transport and the XML stream.
    Connecting,
    /// Stanzas can be exchanged.
    Connected,
    /// SASL or the component handshake is in progress.
    Authenticating,
    /// Authentication succeeded, binding is in progress.
    Authenticated,
    /// [`Session::disconnect`](super::Session::disconnect) was called.
    Closing,
    /// Closed on request; no reconnect will happen.
    Closed,
    /// The connection broke; a reconnect may be pending.
    Disconnected,
}

impl SessionStatus {
    /// Whether stanzas can be sent.
    pub fn is_connected(self) -> bool {
        self == SessionStatus::Connected
    }

    /// Whether a connection attempt is in progress.
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            SessionStatus::Connecting | SessionStatus::Authenticating | SessionStatus::Authenticated
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Initial => "initial",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Authenticating => "authenticating",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Closing => "closing",
            SessionStatus::Closed => "closed",
            SessionStatus::Disconnected => "disconnected",
        })
    }
}

/// A status transition, as seen by status listeners.
#[derive(Debug, Clone, Copy)]
pub struct StatusEvent<'a> {
    /// Status before the transition
    pub previous: SessionStatus,
    /// Status after the transition
    pub current: SessionStatus,
    /// What broke the connection, for [`SessionStatus::Disconnected`]
    pub cause: Option<&'a Error>,
    /// For [`SessionStatus::Connected`]: whether the previous stream was
    /// resumed without loss of state.
    pub resumed: bool,
}
