// Copyright (c) 2017 Astro <astro@spaceboyz.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL authentication (RFC 6120 §6)

use core::fmt;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use minidom::Element;
use sasl::client::mechanisms::{Anonymous, Plain, Scram};
use sasl::client::{Mechanism, MechanismError};
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::{ChannelBinding, Credentials};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{AuthError, Error, ProtocolError};
use crate::features::StreamFeatures;
use crate::ns;
use crate::xmlstream::XmlStream;

/// Defined conditions of a SASL `<failure/>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslCondition {
    /// The exchange was aborted on our request.
    Aborted,
    /// The account is disabled.
    AccountDisabled,
    /// The credentials have expired.
    CredentialsExpired,
    /// The mechanism requires TLS first.
    EncryptionRequired,
    /// Base64 data was malformed.
    IncorrectEncoding,
    /// The authzid was malformed.
    InvalidAuthzid,
    /// The mechanism was not offered.
    InvalidMechanism,
    /// The request was malformed.
    MalformedRequest,
    /// The mechanism is weaker than the server allows.
    MechanismTooWeak,
    /// Wrong credentials.
    NotAuthorized,
    /// A temporary server-side problem.
    TemporaryAuthFailure,
    /// Anything else.
    Other(String),
}

impl SaslCondition {
    fn from_name(name: &str) -> SaslCondition {
        match name {
            "aborted" => SaslCondition::Aborted,
            "account-disabled" => SaslCondition::AccountDisabled,
            "credentials-expired" => SaslCondition::CredentialsExpired,
            "encryption-required" => SaslCondition::EncryptionRequired,
            "incorrect-encoding" => SaslCondition::IncorrectEncoding,
            "invalid-authzid" => SaslCondition::InvalidAuthzid,
            "invalid-mechanism" => SaslCondition::InvalidMechanism,
            "malformed-request" => SaslCondition::MalformedRequest,
            "mechanism-too-weak" => SaslCondition::MechanismTooWeak,
            "not-authorized" => SaslCondition::NotAuthorized,
            "temporary-auth-failure" => SaslCondition::TemporaryAuthFailure,
            other => SaslCondition::Other(other.to_owned()),
        }
    }

    /// Parse the first child of a `<failure/>`.
    pub fn parse(failure: &Element) -> SaslCondition {
        failure
            .children()
            .find(|child| child.name() != "text")
            .map(|child| SaslCondition::from_name(child.name()))
            .unwrap_or_else(|| SaslCondition::Other(String::new()))
    }
}

impl fmt::Display for SaslCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SaslCondition::Aborted => "aborted",
            SaslCondition::AccountDisabled => "account-disabled",
            SaslCondition::CredentialsExpired => "credentials-expired",
            SaslCondition::EncryptionRequired => "encryption-required",
            SaslCondition::IncorrectEncoding => "incorrect-encoding",
            SaslCondition::InvalidAuthzid => "invalid-authzid",
            SaslCondition::InvalidMechanism => "invalid-mechanism",
            SaslCondition::MalformedRequest => "malformed-request",
            SaslCondition::MechanismTooWeak => "mechanism-too-weak",
            SaslCondition::NotAuthorized => "not-authorized",
            SaslCondition::TemporaryAuthFailure => "temporary-auth-failure",
            SaslCondition::Other(name) => name,
        })
    }
}

type MechanismFactory<'a> = Box<dyn Fn() -> Result<Box<dyn Mechanism + Send>, Error> + Send + 'a>;

fn boxed<M: Mechanism + Send + 'static>(
    mechanism: Result<M, MechanismError>,
) -> Result<Box<dyn Mechanism + Send>, Error> {
    Ok(Box::new(mechanism.map_err(AuthError::Sasl)?))
}

/// Mechanisms we are willing to use, most preferred first.
fn local_mechanisms<'a>(
    username: Option<&'a str>,
    password: &'a str,
    channel_binding: &'a ChannelBinding,
    allow_plain: bool,
) -> Vec<MechanismFactory<'a>> {
    let Some(username) = username else {
        return vec![Box::new(|| boxed(Ok(Anonymous::new())))];
    };
    let creds = move |cb: ChannelBinding| {
        Credentials::default()
            .with_username(username)
            .with_password(password)
            .with_channel_binding(cb)
    };
    let mut mechs: Vec<MechanismFactory<'a>> = Vec::new();
    if matches!(channel_binding, ChannelBinding::TlsExporter(_)) {
        mechs.push(Box::new(move || {
            boxed(Scram::<Sha256>::from_credentials(creds(channel_binding.clone())))
        }));
        mechs.push(Box::new(move || {
            boxed(Scram::<Sha1>::from_credentials(creds(channel_binding.clone())))
        }));
    }
    // With a binding of our own, a non-PLUS choice means the server lacks
    // support for it.
    let fallback = match channel_binding {
        ChannelBinding::None => ChannelBinding::None,
        _ => ChannelBinding::Unsupported,
    };
    let cb = fallback.clone();
    mechs.push(Box::new(move || {
        boxed(Scram::<Sha256>::from_credentials(creds(cb.clone())))
    }));
    let cb = fallback;
    mechs.push(Box::new(move || {
        boxed(Scram::<Sha1>::from_credentials(creds(cb.clone())))
    }));
    if allow_plain {
        mechs.push(Box::new(move || {
            boxed(Plain::from_credentials(creds(ChannelBinding::None)))
        }));
    }
    mechs
}

fn encode(data: &[u8]) -> String {
    if data.is_empty() {
        "=".to_owned()
    } else {
        Base64.encode(data)
    }
}

fn decode(element: &Element) -> Result<Vec<u8>, Error> {
    let text = element.text();
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Ok(Vec::new());
    }
    Base64
        .decode(text)
        .map_err(|e| ProtocolError::InvalidStanza(format!("bad base64 in SASL payload: {}", e)).into())
}

/// Run a SASL exchange with the best mechanism both sides support.
///
/// Returns once the server sent `<success/>` and we verified it. The
/// caller has to restart the stream afterwards.
pub async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut XmlStream<S>,
    features: &StreamFeatures,
    username: Option<&str>,
    password: &str,
    channel_binding: &ChannelBinding,
    allow_plain: bool,
) -> Result<(), Error> {
    let candidates = local_mechanisms(username, password, channel_binding, allow_plain);
    for factory in candidates {
        let mut mechanism = factory()?;
        if !features
            .sasl_mechanisms
            .iter()
            .any(|name| name == mechanism.name())
        {
            continue;
        }
        log::debug!("Authenticating with {}", mechanism.name());
        let initial = mechanism.initial();
        let auth = Element::builder("auth", ns::SASL)
            .attr("mechanism", mechanism.name())
            .append(encode(&initial))
            .build();
        stream.send(&auth).await?;

        loop {
            let element = stream.recv().await?;
            if !element.has_ns(ns::SASL) {
                return Err(ProtocolError::unexpected(&element).into());
            }
            match element.name() {
                "challenge" => {
                    let challenge = decode(&element)?;
                    let response = mechanism.response(&challenge).map_err(AuthError::Sasl)?;
                    let response = Element::builder("response", ns::SASL)
                        .append(encode(&response))
                        .build();
                    stream.send(&response).await?;
                }
                "success" => {
                    let data = decode(&element)?;
                    mechanism.success(&data).map_err(AuthError::Sasl)?;
                    return Ok(());
                }
                "failure" => {
                    let condition = SaslCondition::parse(&element);
                    log::warn!("SASL failure: {}", condition);
                    return Err(AuthError::Fail(condition).into());
                }
                _ => return Err(ProtocolError::unexpected(&element).into()),
            }
        }
    }
    Err(AuthError::NoMechanism.into())
}
