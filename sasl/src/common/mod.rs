// Copyright (c) 2017 lumi <lumi@pew.im>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provides a few common types for SASL mechanisms.

use std::collections::HashMap;

#[cfg(feature = "scram")]
pub mod scram;

/// A struct containing SASL credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// The requested identity.
    pub identity: Identity,
    /// The secret used to authenticate.
    pub secret: Secret,
    /// Channel binding data, for *-PLUS mechanisms.
    pub channel_binding: ChannelBinding,
}

impl Default for Credentials {
    fn default() -> Credentials {
        Credentials {
            identity: Identity::None,
            secret: Secret::None,
            channel_binding: ChannelBinding::Unsupported,
        }
    }
}

impl Credentials {
    /// Creates a new Credentials with the specified username.
    pub fn with_username<N: Into<String>>(mut self, username: N) -> Credentials {
        self.identity = Identity::Username(username.into());
        self
    }

    /// Creates a new Credentials with the specified plaintext password.
    pub fn with_password<P: Into<String>>(mut self, password: P) -> Credentials {
        self.secret = Secret::password_plain(password);
        self
    }

    /// Creates a new Credentials with the specified channel binding.
    pub fn with_channel_binding(mut self, channel_binding: ChannelBinding) -> Credentials {
        self.channel_binding = channel_binding;
        self
    }
}

/// Represents a SASL secret, like a password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Secret {
    /// No extra data needed.
    None,
    /// Password required.
    Password(Password),
}

impl Secret {
    /// Wraps a plaintext password.
    pub fn password_plain<S: Into<String>>(password: S) -> Secret {
        Secret::Password(Password::Plain(password.into()))
    }
}

/// Represents a password.
#[derive(Clone, PartialEq, Eq)]
pub enum Password {
    /// A plaintext password.
    Plain(String),
}

impl core::fmt::Debug for Password {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Password::Plain(_) => f.write_str("Password::Plain(<redacted>)"),
        }
    }
}

/// Channel binding configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelBinding {
    /// No channel binding data.
    None,
    /// Advertise that the client does not think the server supports channel binding.
    Unsupported,
    /// p=tls-unique channel binding data.
    TlsUnique(Vec<u8>),
    /// p=tls-exporter channel binding data.
    TlsExporter(Vec<u8>),
}

impl ChannelBinding {
    /// Return the gs2 header for this channel binding mechanism.
    pub fn header(&self) -> &[u8] {
        match *self {
            ChannelBinding::None => b"n,,",
            ChannelBinding::Unsupported => b"y,,",
            ChannelBinding::TlsUnique(_) => b"p=tls-unique,,",
            ChannelBinding::TlsExporter(_) => b"p=tls-exporter,,",
        }
    }

    /// Return the channel binding data for this channel binding mechanism.
    pub fn data(&self) -> &[u8] {
        match *self {
            ChannelBinding::None => &[],
            ChannelBinding::Unsupported => &[],
            ChannelBinding::TlsUnique(ref data) => data,
            ChannelBinding::TlsExporter(ref data) => data,
        }
    }

    /// Checks whether this channel binding mechanism is supported.
    pub fn supports(&self, mechanism: &str) -> bool {
        match *self {
            ChannelBinding::None => false,
            ChannelBinding::Unsupported => false,
            ChannelBinding::TlsUnique(_) => mechanism == "tls-unique",
            ChannelBinding::TlsExporter(_) => mechanism == "tls-exporter",
        }
    }
}

/// Represents a SASL identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identity {
    /// No identity is provided.
    None,
    /// A username is provided.
    Username(String),
}

impl From<String> for Identity {
    fn from(s: String) -> Identity {
        Identity::Username(s)
    }
}

impl<'a> From<&'a str> for Identity {
    fn from(s: &'a str) -> Identity {
        Identity::Username(s.to_owned())
    }
}

/// Parses a comma-separated SCRAM attribute string into a map from the
/// single-character attribute name to its value.
///
/// At most 8 fields are split off, so that commas inside the last field
/// survive. Fields shorter than two bytes (such as the bare `n` of a gs2
/// header) are skipped.
pub fn parse_frame(frame: &[u8]) -> Result<HashMap<char, String>, core::str::Utf8Error> {
    let inner = core::str::from_utf8(frame)?;
    let mut ret = HashMap::new();
    for s in inner.splitn(8, ',') {
        if s.len() < 2 {
            continue;
        }
        let mut chars = s.chars();
        if let Some(key) = chars.next() {
            // The first character is followed by `=`, the value starts after.
            if let Some(value) = s.get(key.len_utf8() + 1..) {
                ret.insert(key, value.to_owned());
            }
        }
    }
    Ok(ret)
}

/// Does a bytewise XOR of both slices, truncating to the shorter one.
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(a, b)| a ^ b).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_skips_gs2_header() {
        let frame = parse_frame(b"n,,n==2C=3D=2C=3D=3D,r=fyko+d2lbbFgONRv9qkxdawL").unwrap();
        let mut expected = HashMap::new();
        expected.insert('n', "=2C=3D=2C=3D=3D".to_owned());
        expected.insert('r', "fyko+d2lbbFgONRv9qkxdawL".to_owned());
        assert_eq!(frame, expected);
    }

    #[test]
    fn parse_frame_server_final() {
        let frame = parse_frame(b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ=").unwrap();
        let mut expected = HashMap::new();
        expected.insert('v', "rmF9pqV8S7suAoZWja4dJRkFsKQ=".to_owned());
        assert_eq!(frame, expected);
    }

    #[test]
    fn parse_frame_keeps_commas_in_last_field() {
        let frame = parse_frame(b"a=1,b=2,c=3,d=4,e=5,f=6,g=7,h=8,9,10").unwrap();
        assert_eq!(frame.len(), 8);
        assert_eq!(frame[&'h'], "8,9,10");
    }

    #[test]
    fn xor_works() {
        assert_eq!(
            xor(&[135, 94, 53, 134, 73, 233, 140, 221, 150, 12, 96, 111, 54, 66, 11, 76],
                &[163, 9, 122, 180, 107, 44, 22, 252, 248, 134, 112, 82, 84, 122, 56, 209]),
            &[36, 87, 79, 50, 34, 197, 154, 33, 110, 138, 16, 61, 98, 56, 51, 157]
        );
    }
}
