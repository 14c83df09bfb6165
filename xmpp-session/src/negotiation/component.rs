// Copyright (c) 2017 Astro <astro@spaceboyz.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XEP-0114 component handshake

use minidom::Element;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{AuthError, Error, ProtocolError};
use crate::ns;
use crate::stream_error::DefinedCondition;
use crate::xmlstream::XmlStream;

/// Lowercase hex of SHA-1(stream id ‖ secret).
pub fn handshake_digest(stream_id: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(secret.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// Authenticate a component stream with its shared secret.
pub async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut XmlStream<S>,
    secret: &str,
) -> Result<(), Error> {
    let stream_id = stream
        .header()
        .id
        .clone()
        .ok_or(ProtocolError::NoStreamId)?;
    let nonza = Element::builder("handshake", ns::COMPONENT_ACCEPT)
        .append(handshake_digest(&stream_id, secret))
        .build();
    stream.send(&nonza).await?;

    match stream.recv().await {
        Ok(reply) if reply.is("handshake", ns::COMPONENT_ACCEPT) => Ok(()),
        Ok(_) => Err(AuthError::ComponentFail.into()),
        Err(Error::Stream(e)) if e.condition == DefinedCondition::NotAuthorized => {
            Err(AuthError::ComponentFail.into())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest() {
        assert_eq!(
            handshake_digest("3BF96D32", "s3cr3t"),
            "ba33290100f616a33656a931798d6c9011cfa840"
        );
    }
}
