// Copyright (c) 2017 Astro <astro@spaceboyz.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use sasl::client::MechanismError as SaslMechanismError;
use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::net::AddrParseError;

use crate::{
    bosh::BoshError, connect::ServerConnectorError, negotiation::SaslCondition,
    stanza_error::StanzaError, stream_error::StreamError, stream_management::SmError,
};

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(IoError),
    /// Error parsing Jabber-Id
    JidParse(jid::Error),
    /// Protocol-level error
    Protocol(ProtocolError),
    /// Authentication error
    Auth(AuthError),
    /// The peer closed the stream with a `<stream:error/>`
    Stream(StreamError),
    /// The peer answered a query with an error stanza
    Stanza(StanzaError),
    /// No answer arrived in time
    Timeout,
    /// Connection closed
    Disconnected,
    /// Should never happen
    InvalidState,
    /// Error specific to ServerConnector impl
    Connection(Box<dyn ServerConnectorError>),
    /// BOSH transport error
    Bosh(BoshError),
    /// Invalid IP/Port address
    Addr(AddrParseError),
}

impl Error {
    /// Returns true if retrying with the same credentials cannot succeed.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(fmt, "IO error: {}", e),
            Error::Connection(e) => write!(fmt, "connection error: {}", e),
            Error::JidParse(e) => write!(fmt, "jid parse error: {}", e),
            Error::Protocol(e) => write!(fmt, "protocol error: {}", e),
            Error::Auth(e) => write!(fmt, "authentication error: {}", e),
            Error::Stream(e) => write!(fmt, "stream error: {}", e),
            Error::Stanza(e) => write!(fmt, "stanza error: {}", e),
            Error::Timeout => write!(fmt, "timed out"),
            Error::Disconnected => write!(fmt, "disconnected"),
            Error::InvalidState => write!(fmt, "invalid state"),
            Error::Bosh(e) => write!(fmt, "BOSH error: {}", e),
            Error::Addr(e) => write!(fmt, "Wrong network address: {e}"),
        }
    }
}

impl StdError for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl<T: ServerConnectorError + 'static> From<T> for Error {
    fn from(e: T) -> Self {
        Error::Connection(Box::new(e))
    }
}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::JidParse(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        Error::Stream(e)
    }
}

impl From<StanzaError> for Error {
    fn from(e: StanzaError) -> Self {
        Error::Stanza(e)
    }
}

impl From<BoshError> for Error {
    fn from(e: BoshError) -> Self {
        Error::Bosh(e)
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Error {
        Error::Addr(e)
    }
}

impl From<minidom::Error> for Error {
    fn from(e: minidom::Error) -> Self {
        ProtocolError::Parser(e).into()
    }
}

impl From<SmError> for Error {
    fn from(e: SmError) -> Self {
        ProtocolError::StreamManagement(e).into()
    }
}

/// XMPP protocol-level error
#[derive(Debug)]
pub enum ProtocolError {
    /// XML parser error
    Parser(minidom::Error),
    /// No TLS available
    NoTls,
    /// Invalid response to resource binding
    InvalidBindResponse,
    /// No id attribute in <stream:stream>
    NoStreamId,
    /// A stanza did not have the expected shape
    InvalidStanza(String),
    /// Received an element which is not valid at this point of the stream
    UnexpectedElement {
        /// Local name of the element
        name: String,
        /// Namespace of the element
        ns: String,
    },
    /// The peer violated XEP-0198 acknowledgement rules
    StreamManagement(SmError),
}

impl ProtocolError {
    pub(crate) fn unexpected(element: &minidom::Element) -> Self {
        ProtocolError::UnexpectedElement {
            name: element.name().to_owned(),
            ns: element.ns(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::Parser(e) => write!(fmt, "XML parser error: {}", e),
            ProtocolError::NoTls => write!(fmt, "no TLS available"),
            ProtocolError::InvalidBindResponse => {
                write!(fmt, "invalid response to resource binding")
            }
            ProtocolError::NoStreamId => write!(fmt, "no id attribute in <stream:stream>"),
            ProtocolError::InvalidStanza(e) => write!(fmt, "invalid stanza: {}", e),
            ProtocolError::UnexpectedElement { name, ns } => {
                write!(fmt, "unexpected element {{{}}}{}", ns, name)
            }
            ProtocolError::StreamManagement(e) => write!(fmt, "stream management: {}", e),
        }
    }
}

impl StdError for ProtocolError {}

impl From<minidom::Error> for ProtocolError {
    fn from(e: minidom::Error) -> Self {
        ProtocolError::Parser(e)
    }
}

/// Authentication error
#[derive(Debug)]
pub enum AuthError {
    /// No matching SASL mechanism available
    NoMechanism,
    /// Local SASL implementation error
    Sasl(SaslMechanismError),
    /// Failure from server
    Fail(SaslCondition),
    /// Component authentication failure
    ComponentFail,
}

impl StdError for AuthError {}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(fmt, "no matching SASL mechanism available"),
            AuthError::Sasl(s) => write!(fmt, "local SASL implementation error: {}", s),
            AuthError::Fail(c) => write!(fmt, "failure from the server: {}", c),
            AuthError::ComponentFail => write!(fmt, "component authentication failure"),
        }
    }
}

impl From<SaslMechanismError> for AuthError {
    fn from(e: SaslMechanismError) -> Self {
        AuthError::Sasl(e)
    }
}
