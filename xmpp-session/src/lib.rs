//! Resilient [XMPP](https://xmpp.org/) sessions with asynchronous I/O using [tokio](https://tokio.rs/).
//!
//! For presence tracking, chat states and result set management on top of a
//! session, see the `xmpp-im` crate.
//!
//! # Getting started
//!
//! Build a [`Session`] from a [`connect::ServerConnector`], a
//! [`SessionRole`] and a [`SessionConfig`], register listeners, then call
//! [`Session::connect`]. The session reconnects on its own after a
//! connection loss, resuming the stream with XEP-0198 when the server
//! allows it, until [`Session::disconnect`] is called.
//!
//! # Features
//!
//! Supported roles:
//! - [x] Clients (SCRAM-SHA-256/SHA-1 with channel binding, PLAIN, ANONYMOUS)
//! - [x] Components (XEP-0114)
//! - [ ] Servers
//!
//! Supported transports:
//! - [x] Plaintext TCP (IPv4/IPv6)
//! - [x] StartTLS TCP, with the `tls-rust` feature
//! - [x] Custom connectors via the [`connect::ServerConnector`] trait
//! - [x] BOSH framing over any [`bosh::HttpBinding`]
//! - [ ] Websockets

#![deny(unsafe_code, bare_trait_objects)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod bosh;
pub mod config;
pub mod connect;
pub mod extensions;
pub mod features;
mod negotiation;
pub mod ns;
pub mod reconnect;
pub mod session;
pub mod stanza;
pub mod stanza_error;
pub mod stream_error;
pub mod stream_management;
pub mod xmlstream;

/// Detailed error types
pub mod error;

#[doc(inline)]
/// Generic xmpp_session Error
pub use crate::error::Error;

pub use crate::config::{DispatchMode, SessionConfig, Timeouts};
pub use crate::extensions::ExtensionRegistry;
pub use crate::negotiation::{handshake_digest, SaslCondition};
pub use crate::session::{
    Direction, ListenerId, Session, SessionRole, SessionStatus, StanzaEvent, StatusEvent,
    WeakSession,
};
pub use crate::stanza::{Iq, IqType, Message, Presence, Stanza};

// Re-exports
pub use jid;
pub use minidom;
