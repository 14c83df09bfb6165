// Copyright (c) 2017 lumi <lumi@pew.im>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hash-parameterised building blocks shared by the SCRAM mechanisms.

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use getrandom::{getrandom, Error as RngError};
use hmac::{digest::InvalidLength, Hmac, Mac};
use pbkdf2::pbkdf2;
use sha1::{Digest, Sha1 as Sha1_hash};
use sha2::Sha256 as Sha256_hash;

/// Generate a nonce for SCRAM authentication.
pub fn generate_nonce() -> Result<String, RngError> {
    let mut data = [0u8; 32];
    getrandom(&mut data)?;
    Ok(Base64.encode(data))
}

/// Error which may occur while deriving keys.
#[derive(Debug, PartialEq, Eq)]
pub enum DeriveError {
    /// The HMAC or PBKDF2 implementation rejected the key or output length.
    InvalidLength,
    /// The password was rejected by SASLprep.
    SaslPrep,
}

impl core::fmt::Display for DeriveError {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            DeriveError::InvalidLength => write!(fmt, "invalid key or output length"),
            DeriveError::SaslPrep => write!(fmt, "password rejected by SASLprep"),
        }
    }
}

impl std::error::Error for DeriveError {}

impl From<InvalidLength> for DeriveError {
    fn from(_: InvalidLength) -> DeriveError {
        DeriveError::InvalidLength
    }
}

/// A trait which defines the needed methods for SCRAM.
pub trait ScramProvider {
    /// The name of the hash function.
    fn name() -> &'static str;

    /// A function which hashes the data using the hash function.
    fn hash(data: &[u8]) -> Vec<u8>;

    /// A function which performs an HMAC using the hash function.
    fn hmac(data: &[u8], key: &[u8]) -> Result<Vec<u8>, DeriveError>;

    /// The `Hi` function of RFC 5802: PBKDF2 with the hash's HMAC and an
    /// output as long as one hash.
    ///
    /// That is `U1 = HMAC(str, salt || INT(1))`, `Ui = HMAC(str, Ui-1)` and
    /// the result is `U1 XOR U2 XOR ... XOR Ui`, the key staying `str`.
    fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Vec<u8>, DeriveError>;
}

fn prepare_password(password: &str) -> Result<String, DeriveError> {
    stringprep::saslprep(password)
        .map(|prepped| prepped.into_owned())
        .map_err(|_| DeriveError::SaslPrep)
}

/// A `ScramProvider` which provides SCRAM-SHA-1 and SCRAM-SHA-1-PLUS
pub struct Sha1;

impl ScramProvider for Sha1 {
    fn name() -> &'static str {
        "SHA-1"
    }

    fn hash(data: &[u8]) -> Vec<u8> {
        Sha1_hash::digest(data).to_vec()
    }

    fn hmac(data: &[u8], key: &[u8]) -> Result<Vec<u8>, DeriveError> {
        let mut mac = Hmac::<Sha1_hash>::new_from_slice(key)?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Vec<u8>, DeriveError> {
        let password = prepare_password(password)?;
        let mut result = vec![0; 20];
        pbkdf2::<Hmac<Sha1_hash>>(password.as_bytes(), salt, iterations, &mut result)?;
        Ok(result)
    }
}

/// A `ScramProvider` which provides SCRAM-SHA-256 and SCRAM-SHA-256-PLUS
pub struct Sha256;

impl ScramProvider for Sha256 {
    fn name() -> &'static str {
        "SHA-256"
    }

    fn hash(data: &[u8]) -> Vec<u8> {
        Sha256_hash::digest(data).to_vec()
    }

    fn hmac(data: &[u8], key: &[u8]) -> Result<Vec<u8>, DeriveError> {
        let mut mac = Hmac::<Sha256_hash>::new_from_slice(key)?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Vec<u8>, DeriveError> {
        let password = prepare_password(password)?;
        let mut result = vec![0; 32];
        pbkdf2::<Hmac<Sha256_hash>>(password.as_bytes(), salt, iterations, &mut result)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::xor;

    // Hi() spelled out the long way, to check the PBKDF2 shortcut against.
    fn naive_hi<S: ScramProvider>(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut input = salt.to_vec();
        input.extend_from_slice(&[0, 0, 0, 1]);
        let mut u = S::hmac(&input, password.as_bytes()).unwrap();
        let mut result = u.clone();
        for _ in 1..iterations {
            u = S::hmac(&u, password.as_bytes()).unwrap();
            result = xor(&result, &u);
        }
        result
    }

    #[test]
    fn derive_matches_iterated_hmac() {
        let salt = Base64.decode("QSXCR+Q6sek8bf92").unwrap();
        assert_eq!(
            Sha1::derive("pencil", &salt, 4096).unwrap(),
            naive_hi::<Sha1>("pencil", &salt, 4096)
        );
        assert_eq!(
            Sha256::derive("pencil", &salt, 17).unwrap(),
            naive_hi::<Sha256>("pencil", &salt, 17)
        );
    }

    #[test]
    fn nonces_differ() {
        let a = generate_nonce().unwrap();
        let b = generate_nonce().unwrap();
        assert_ne!(a, b);
        assert_eq!(Base64.decode(a).unwrap().len(), 32);
    }
}
