// Copyright (c) 2017 lumi <lumi@pew.im>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provides the SASL "SCRAM-*" mechanisms and a way to implement more.

use core::marker::PhantomData;
use core::mem;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};

use crate::client::{Mechanism, MechanismError};
use crate::common::scram::{generate_nonce, ScramProvider};
use crate::common::{parse_frame, xor, ChannelBinding, Credentials, Identity, Password, Secret};

enum ScramState {
    Init,
    SentInitialMessage {
        client_first_message_bare: Vec<u8>,
        gs2_header: Vec<u8>,
    },
    GotServerData {
        server_signature: String,
    },
    Complete,
    Failed,
}

/// A struct for the SASL SCRAM-* and SCRAM-*-PLUS mechanisms.
///
/// One value covers exactly one authentication attempt. Once it has
/// failed it refuses any further input, a retry needs a fresh value (and
/// thereby a fresh nonce).
pub struct Scram<S: ScramProvider> {
    name: String,
    username: String,
    password: String,
    client_nonce: String,
    state: ScramState,
    channel_binding: ChannelBinding,
    _marker: PhantomData<S>,
}

impl<S: ScramProvider> Scram<S> {
    /// Constructs a new struct for authenticating using the SASL SCRAM-* and SCRAM-*-PLUS
    /// mechanisms, depending on the passed channel binding.
    ///
    /// It is recommended that instead you use a `Credentials` struct and turn it into the
    /// requested mechanism using `from_credentials`.
    pub fn new<N: Into<String>, P: Into<String>>(
        username: N,
        password: P,
        channel_binding: ChannelBinding,
    ) -> Result<Scram<S>, MechanismError> {
        let nonce = generate_nonce().map_err(|_| MechanismError::CannotGenerateNonce)?;
        Ok(Scram::new_with_nonce(
            username,
            password,
            nonce,
            channel_binding,
        ))
    }

    // Used for testing.
    #[doc(hidden)]
    pub fn new_with_nonce<N: Into<String>, P: Into<String>>(
        username: N,
        password: P,
        nonce: String,
        channel_binding: ChannelBinding,
    ) -> Scram<S> {
        let name = match channel_binding {
            ChannelBinding::TlsUnique(_) | ChannelBinding::TlsExporter(_) => {
                format!("SCRAM-{}-PLUS", S::name())
            }
            ChannelBinding::None | ChannelBinding::Unsupported => format!("SCRAM-{}", S::name()),
        };
        Scram {
            name,
            username: username.into(),
            password: password.into(),
            client_nonce: nonce,
            state: ScramState::Init,
            channel_binding,
            _marker: PhantomData,
        }
    }

    /// Whether the server signature has been verified.
    pub fn is_complete(&self) -> bool {
        matches!(self.state, ScramState::Complete)
    }

    fn verify_server_final(data: &[u8], server_signature: &str) -> Result<(), MechanismError> {
        let frame = parse_frame(data).map_err(|_| MechanismError::CannotDecodeSuccessResponse)?;
        if let Some(e) = frame.get(&'e') {
            return Err(MechanismError::ServerError(e.clone()));
        }
        match frame.get(&'v') {
            Some(v) if v == server_signature => Ok(()),
            Some(_) => Err(MechanismError::InvalidSignatureInSuccessResponse),
            None => Err(MechanismError::NoSignatureInSuccessResponse),
        }
    }

    fn handle_server_first(
        &self,
        challenge: &[u8],
        client_first_message_bare: &[u8],
        gs2_header: &[u8],
    ) -> Result<(Vec<u8>, String), MechanismError> {
        let frame = parse_frame(challenge).map_err(|_| MechanismError::CannotDecodeChallenge)?;
        if let Some(e) = frame.get(&'e') {
            return Err(MechanismError::ServerError(e.clone()));
        }
        let server_nonce = frame.get(&'r').ok_or(MechanismError::NoServerNonce)?;
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(MechanismError::InvalidServerNonce);
        }
        let salt = frame
            .get(&'s')
            .ok_or(MechanismError::NoServerSalt)
            .and_then(|s| {
                Base64
                    .decode(s)
                    .map_err(|_| MechanismError::CannotDecodeSalt)
            })?;
        let iterations: u32 = frame
            .get(&'i')
            .ok_or(MechanismError::NoServerIterations)?
            .parse()
            .map_err(|_| MechanismError::CannotParseIterations)?;
        if iterations == 0 {
            return Err(MechanismError::CannotParseIterations);
        }

        let mut cb_data = gs2_header.to_vec();
        cb_data.extend(self.channel_binding.data());
        let mut client_final_message_bare = Vec::new();
        client_final_message_bare.extend(b"c=");
        client_final_message_bare.extend(Base64.encode(&cb_data).bytes());
        client_final_message_bare.extend(b",r=");
        client_final_message_bare.extend(server_nonce.bytes());

        let salted_password = S::derive(&self.password, &salt, iterations)?;
        let client_key = S::hmac(b"Client Key", &salted_password)?;
        let server_key = S::hmac(b"Server Key", &salted_password)?;
        let stored_key = S::hash(&client_key);

        let mut auth_message = Vec::new();
        auth_message.extend(client_first_message_bare);
        auth_message.push(b',');
        auth_message.extend(challenge);
        auth_message.push(b',');
        auth_message.extend(&client_final_message_bare);

        let client_signature = S::hmac(&auth_message, &stored_key)?;
        let client_proof = xor(&client_key, &client_signature);
        let server_signature = S::hmac(&auth_message, &server_key)?;

        let mut client_final_message = client_final_message_bare;
        client_final_message.extend(b",p=");
        client_final_message.extend(Base64.encode(client_proof).bytes());
        Ok((client_final_message, Base64.encode(server_signature)))
    }
}

fn escape_username(username: &str) -> String {
    let mut escaped = String::with_capacity(username.len());
    for c in username.chars() {
        match c {
            ',' => escaped.push_str("=2C"),
            '=' => escaped.push_str("=3D"),
            c => escaped.push(c),
        }
    }
    escaped
}

impl<S: ScramProvider> Mechanism for Scram<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn from_credentials(credentials: Credentials) -> Result<Scram<S>, MechanismError> {
        if let Secret::Password(Password::Plain(password)) = credentials.secret {
            if let Identity::Username(username) = credentials.identity {
                Scram::new(username, password, credentials.channel_binding)
            } else {
                Err(MechanismError::ScramRequiresUsernameAndPassword)
            }
        } else {
            Err(MechanismError::ScramRequiresUsernameAndPassword)
        }
    }

    fn initial(&mut self) -> Vec<u8> {
        if !matches!(self.state, ScramState::Init) {
            return Vec::new();
        }
        let gs2_header = self.channel_binding.header().to_vec();
        let mut client_first_message_bare = Vec::new();
        client_first_message_bare.extend(b"n=");
        client_first_message_bare.extend(escape_username(&self.username).bytes());
        client_first_message_bare.extend(b",r=");
        client_first_message_bare.extend(self.client_nonce.bytes());
        let mut data = gs2_header.clone();
        data.extend(&client_first_message_bare);
        self.state = ScramState::SentInitialMessage {
            client_first_message_bare,
            gs2_header,
        };
        data
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        match mem::replace(&mut self.state, ScramState::Failed) {
            ScramState::SentInitialMessage {
                client_first_message_bare,
                gs2_header,
            } => {
                let (client_final_message, server_signature) =
                    self.handle_server_first(challenge, &client_first_message_bare, &gs2_header)?;
                self.state = ScramState::GotServerData { server_signature };
                Ok(client_final_message)
            }
            // Some servers deliver the server-final-message as a challenge
            // and follow up with an empty <success/>.
            ScramState::GotServerData { server_signature } => {
                Self::verify_server_final(challenge, &server_signature)?;
                self.state = ScramState::Complete;
                Ok(Vec::new())
            }
            _ => Err(MechanismError::InvalidState),
        }
    }

    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        match mem::replace(&mut self.state, ScramState::Failed) {
            ScramState::GotServerData { server_signature } => {
                if data.is_empty() {
                    return Err(MechanismError::UnverifiedSuccess);
                }
                Self::verify_server_final(data, &server_signature)?;
                self.state = ScramState::Complete;
                Ok(())
            }
            ScramState::Complete => {
                self.state = ScramState::Complete;
                Ok(())
            }
            _ => Err(MechanismError::InvalidState),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::client::mechanisms::Scram;
    use crate::client::{Mechanism, MechanismError};
    use crate::common::scram::{Sha1, Sha256};
    use crate::common::ChannelBinding;

    // RFC 5802, section 5.
    const SHA1_CLIENT_NONCE: &str = "fyko+d2lbbFgONRv9qkxdawL";
    const SHA1_SERVER_FIRST: &[u8] =
        b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";
    const SHA1_CLIENT_FINAL: &[u8] =
        b"c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts=";
    const SHA1_SERVER_FINAL: &[u8] = b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ=";

    fn sha1_mechanism() -> Scram<Sha1> {
        Scram::<Sha1>::new_with_nonce(
            "user",
            "pencil",
            SHA1_CLIENT_NONCE.to_owned(),
            ChannelBinding::None,
        )
    }

    #[test]
    fn scram_sha1_works() {
        let mut mechanism = sha1_mechanism();
        assert_eq!(mechanism.name(), "SCRAM-SHA-1");
        let init = mechanism.initial();
        assert_eq!(
            String::from_utf8(init).unwrap(),
            "n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL"
        );
        let resp = mechanism.response(SHA1_SERVER_FIRST).unwrap();
        assert_eq!(resp, SHA1_CLIENT_FINAL);
        assert!(!mechanism.is_complete());
        mechanism.success(SHA1_SERVER_FINAL).unwrap();
        assert!(mechanism.is_complete());
    }

    #[test]
    fn scram_sha256_works() {
        // RFC 7677, section 3.
        let mut mechanism = Scram::<Sha256>::new_with_nonce(
            "user",
            "pencil",
            "rOprNGfwEbeRWgbNEkqO".to_owned(),
            ChannelBinding::None,
        );
        assert_eq!(mechanism.name(), "SCRAM-SHA-256");
        let init = mechanism.initial();
        assert_eq!(init, b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
        let resp = mechanism
            .response(b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap();
        assert_eq!(
            String::from_utf8(resp).unwrap(),
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );
        mechanism
            .success(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
        assert!(mechanism.is_complete());
    }

    #[test]
    fn server_final_as_challenge() {
        let mut mechanism = sha1_mechanism();
        mechanism.initial();
        mechanism.response(SHA1_SERVER_FIRST).unwrap();
        assert_eq!(mechanism.response(SHA1_SERVER_FINAL).unwrap(), b"");
        mechanism.success(b"").unwrap();
        assert!(mechanism.is_complete());
    }

    #[test]
    fn rejects_forged_server_signature() {
        let mut mechanism = sha1_mechanism();
        mechanism.initial();
        mechanism.response(SHA1_SERVER_FIRST).unwrap();
        assert_eq!(
            mechanism.success(b"v=AAAApqV8S7suAoZWja4dJRkFsKQ="),
            Err(MechanismError::InvalidSignatureInSuccessResponse)
        );
        // A failed attempt is spent for good.
        assert_eq!(mechanism.success(SHA1_SERVER_FINAL), Err(MechanismError::InvalidState));
        assert!(mechanism.initial().is_empty());
    }

    #[test]
    fn rejects_empty_success() {
        let mut mechanism = sha1_mechanism();
        mechanism.initial();
        mechanism.response(SHA1_SERVER_FIRST).unwrap();
        assert_eq!(mechanism.success(b""), Err(MechanismError::UnverifiedSuccess));
    }

    #[test]
    fn rejects_foreign_nonce() {
        let mut mechanism = sha1_mechanism();
        mechanism.initial();
        assert_eq!(
            mechanism.response(b"r=somethingelse,s=QSXCR+Q6sek8bf92,i=4096"),
            Err(MechanismError::InvalidServerNonce)
        );
    }

    #[test]
    fn reports_missing_attributes() {
        let mut mechanism = sha1_mechanism();
        mechanism.initial();
        assert_eq!(
            mechanism.response(b"r=fyko+d2lbbFgONRv9qkxdawL3rfc,i=4096"),
            Err(MechanismError::NoServerSalt)
        );

        let mut mechanism = sha1_mechanism();
        mechanism.initial();
        assert_eq!(
            mechanism.response(b"r=fyko+d2lbbFgONRv9qkxdawL3rfc,s=QSXCR+Q6sek8bf92"),
            Err(MechanismError::NoServerIterations)
        );

        let mut mechanism = sha1_mechanism();
        mechanism.initial();
        assert_eq!(
            mechanism.response(b"e=invalid-proof"),
            Err(MechanismError::ServerError("invalid-proof".to_owned()))
        );
    }

    #[test]
    fn escapes_username() {
        let mut mechanism = Scram::<Sha1>::new_with_nonce(
            "a,b=c",
            "pencil",
            "abc".to_owned(),
            ChannelBinding::None,
        );
        assert_eq!(mechanism.initial(), b"n,,n=a=2Cb=3Dc,r=abc");
    }

    #[test]
    fn plus_variant_with_channel_binding() {
        let mut mechanism = Scram::<Sha256>::new_with_nonce(
            "user",
            "pencil",
            "abc".to_owned(),
            ChannelBinding::TlsExporter(vec![1, 2, 3]),
        );
        assert_eq!(mechanism.name(), "SCRAM-SHA-256-PLUS");
        assert_eq!(mechanism.initial(), b"p=tls-exporter,,n=user,r=abc");
    }
}
