// Copyright (c) 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Instant messaging helpers built on [`xmpp_session::Session`].
//!
//! - [`presence`]: who is online, with which resources, and resending our
//!   own presence after a reconnect.
//! - [`chatstates`]: XEP-0085 chat state notifications with implicit
//!   support discovery.
//! - [`rsm`]: XEP-0059 result set management over pluggable item
//!   providers.

#![deny(bare_trait_objects)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use xmpp_session;
pub use xmpp_session::jid;
pub use xmpp_session::minidom;

#[macro_use]
extern crate log;

pub mod chatstates;
pub mod presence;
pub mod rsm;

#[cfg(test)]
mod test_server;

pub use chatstates::{ChatState, ChatStateManager};
pub use presence::{PresenceManager, PresenceTracker};
pub use rsm::{CombinedProvider, InMemoryProvider, ResultSetItem, ResultSetProvider};

pub type Error = xmpp_session::Error;
