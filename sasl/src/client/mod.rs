// Copyright (c) 2017 lumi <lumi@pew.im>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Client-side SASL mechanisms.

use core::fmt;

use crate::common::Credentials;

#[cfg(feature = "scram")]
use crate::common::scram::DeriveError;

pub mod mechanisms;

/// An error emitted by a client-side mechanism.
#[derive(Debug, PartialEq, Eq)]
pub enum MechanismError {
    /// Only the ANONYMOUS mechanism works without credentials.
    AnonymousRequiresNoCredentials,

    /// PLAIN needs both a username and a password.
    PlainRequiresUsernameAndPassword,

    /// The random number generator failed to produce a nonce.
    CannotGenerateNonce,

    /// SCRAM needs both a username and a password.
    ScramRequiresUsernameAndPassword,

    /// The server-first-message was not valid UTF-8.
    CannotDecodeChallenge,

    /// The server-first-message had no `r=` attribute.
    NoServerNonce,

    /// The server nonce does not start with the client nonce.
    InvalidServerNonce,

    /// The server-first-message had no `s=` attribute.
    NoServerSalt,

    /// The `s=` attribute was not valid base64.
    CannotDecodeSalt,

    /// The server-first-message had no `i=` attribute.
    NoServerIterations,

    /// The `i=` attribute was not a positive number.
    CannotParseIterations,

    /// Key derivation failed.
    DeriveKeys(DeriveKeysError),

    /// The server-final-message was not valid UTF-8.
    CannotDecodeSuccessResponse,

    /// The server-final-message had no `v=` attribute.
    NoSignatureInSuccessResponse,

    /// The `v=` attribute did not match our computed server signature.
    InvalidSignatureInSuccessResponse,

    /// The server reported an `e=` error.
    ServerError(String),

    /// The server claimed success before proving its identity.
    UnverifiedSuccess,

    /// A message arrived which the mechanism did not expect in its current
    /// state.
    InvalidState,
}

/// Key derivation failure, wrapped to keep `MechanismError` independent
/// of the `scram` feature.
#[derive(Debug, PartialEq, Eq)]
pub struct DeriveKeysError(pub String);

#[cfg(feature = "scram")]
impl From<DeriveError> for MechanismError {
    fn from(err: DeriveError) -> MechanismError {
        MechanismError::DeriveKeys(DeriveKeysError(err.to_string()))
    }
}

impl fmt::Display for MechanismError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MechanismError::AnonymousRequiresNoCredentials => {
                write!(fmt, "ANONYMOUS mechanism requires no credentials")
            }
            MechanismError::PlainRequiresUsernameAndPassword => {
                write!(fmt, "PLAIN requires a username and a password")
            }
            MechanismError::CannotGenerateNonce => write!(fmt, "can't generate nonce"),
            MechanismError::ScramRequiresUsernameAndPassword => {
                write!(fmt, "SCRAM requires a username and a password")
            }
            MechanismError::CannotDecodeChallenge => write!(fmt, "can't decode challenge"),
            MechanismError::NoServerNonce => write!(fmt, "no server nonce"),
            MechanismError::InvalidServerNonce => {
                write!(fmt, "server nonce doesn't extend the client nonce")
            }
            MechanismError::NoServerSalt => write!(fmt, "no server salt"),
            MechanismError::CannotDecodeSalt => write!(fmt, "can't decode server salt"),
            MechanismError::NoServerIterations => write!(fmt, "no server iterations"),
            MechanismError::CannotParseIterations => write!(fmt, "can't parse iteration count"),
            MechanismError::DeriveKeys(e) => write!(fmt, "key derivation failed: {}", e.0),
            MechanismError::CannotDecodeSuccessResponse => {
                write!(fmt, "can't decode success response")
            }
            MechanismError::NoSignatureInSuccessResponse => {
                write!(fmt, "no signature in success response")
            }
            MechanismError::InvalidSignatureInSuccessResponse => {
                write!(fmt, "invalid signature in success response")
            }
            MechanismError::ServerError(e) => write!(fmt, "server error: {}", e),
            MechanismError::UnverifiedSuccess => {
                write!(fmt, "server reported success without a valid signature")
            }
            MechanismError::InvalidState => write!(fmt, "mechanism is in an invalid state"),
        }
    }
}

impl std::error::Error for MechanismError {}

/// A trait which defines SASL mechanisms.
pub trait Mechanism {
    /// The name of the mechanism.
    fn name(&self) -> &str;

    /// Creates this mechanism from `Credentials`.
    fn from_credentials(credentials: Credentials) -> Result<Self, MechanismError>
    where
        Self: Sized;

    /// Provides initial payload of the SASL mechanism.
    fn initial(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Creates a response to the SASL challenge.
    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Ok(Vec::new())
    }

    /// Verifies the server success response, if there is one.
    fn success(&mut self, _data: &[u8]) -> Result<(), MechanismError> {
        Ok(())
    }
}
