// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XEP-0124/XEP-0206 BOSH session bookkeeping
//!
//! Every HTTP request carries a `<body/>` with a request id (`rid`). The
//! connection manager acknowledges requests cumulatively, and everything
//! not acknowledged yet is kept in [`UnacknowledgedRequests`] so it can be
//! replayed, in order, on a new HTTP connection.
//!
//! The HTTP client itself is behind the [`HttpBinding`] trait.

use core::fmt;

mod body;
mod connection;
mod queue;

pub use self::body::{Body, Condition};
pub use self::connection::{BoshConnection, HttpBinding};
pub use self::queue::UnacknowledgedRequests;

/// BOSH session error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoshError {
    /// The connection manager terminated the session.
    Terminated {
        /// Reason given in the `condition` attribute
        condition: Condition,
        /// Where to reconnect for `see-other-uri`
        uri: Option<String>,
    },
    /// The session creation response had no `sid`.
    MissingSid,
    /// A response was not a BOSH `<body/>`.
    UnexpectedBody(String),
}

impl fmt::Display for BoshError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BoshError::Terminated {
                condition,
                uri: Some(uri),
            } => write!(fmt, "session terminated: {} ({})", condition, uri),
            BoshError::Terminated { condition, uri: None } => {
                write!(fmt, "session terminated: {}", condition)
            }
            BoshError::MissingSid => write!(fmt, "no sid in session creation response"),
            BoshError::UnexpectedBody(e) => write!(fmt, "unexpected response: {}", e),
        }
    }
}

impl std::error::Error for BoshError {}
