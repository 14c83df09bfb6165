// Copyright (c) 2017 Astro <astro@spaceboyz.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use jid::Jid;
use minidom::Element;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, ProtocolError};
use crate::features::StreamFeatures;
use crate::ns;
use crate::stanza::{Iq, IqType, Stanza};
use crate::xmlstream::XmlStream;

const BIND_REQ_ID: &str = "resource-bind";

fn bind_request(jid: &Jid) -> Element {
    let mut bind = Element::builder("bind", ns::BIND);
    if let Some(resource) = jid.resource() {
        bind = bind.append(
            Element::builder("resource", ns::BIND)
                .append(resource.to_owned())
                .build(),
        );
    }
    Iq::from_set(BIND_REQ_ID, bind.build()).to_element(ns::JABBER_CLIENT)
}

fn parse_bind_response(payload: &Element) -> Result<Jid, Error> {
    if !payload.is("bind", ns::BIND) {
        return Err(ProtocolError::InvalidBindResponse.into());
    }
    let jid = payload
        .get_child("jid", ns::BIND)
        .ok_or(ProtocolError::InvalidBindResponse)?;
    let jid = Jid::new(jid.text().trim())?;
    if !jid.is_full() {
        return Err(ProtocolError::InvalidBindResponse.into());
    }
    Ok(jid)
}

/// Bind a resource, using the one of `jid` as a hint.
///
/// Returns the full JID assigned by the server, or `jid` itself if the
/// server does not offer binding.
pub async fn bind<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut XmlStream<S>,
    features: &StreamFeatures,
    jid: &Jid,
) -> Result<Jid, Error> {
    if !features.can_bind {
        // No resource binding available, do nothing.
        return Ok(jid.clone());
    }
    stream.send(&bind_request(jid)).await?;
    loop {
        let element = stream.recv().await?;
        match Stanza::try_from(&element) {
            Ok(Stanza::Iq(iq)) if iq.id == BIND_REQ_ID => {
                return match iq.payload {
                    IqType::Result(Some(payload)) => parse_bind_response(&payload),
                    IqType::Error(e) => Err(e.into()),
                    _ => Err(ProtocolError::InvalidBindResponse.into()),
                };
            }
            _ => log::warn!("Ignoring {} while binding a resource", element.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_resource() {
        let request = bind_request(&Jid::new("juliet@capulet.lit/balcony").unwrap());
        assert_eq!(request.attr("type"), Some("set"));
        assert_eq!(request.attr("id"), Some(BIND_REQ_ID));
        let bind = request.get_child("bind", ns::BIND).unwrap();
        assert_eq!(bind.get_child("resource", ns::BIND).unwrap().text(), "balcony");

        let request = bind_request(&Jid::new("juliet@capulet.lit").unwrap());
        let bind = request.get_child("bind", ns::BIND).unwrap();
        assert!(bind.get_child("resource", ns::BIND).is_none());
    }

    #[test]
    fn response_must_be_full() {
        let ok: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>juliet@capulet.lit/4db06f06</jid></bind>"
            .parse()
            .unwrap();
        assert_eq!(
            parse_bind_response(&ok).unwrap(),
            Jid::new("juliet@capulet.lit/4db06f06").unwrap()
        );
        let bare: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>juliet@capulet.lit</jid></bind>"
            .parse()
            .unwrap();
        assert!(matches!(
            parse_bind_response(&bare),
            Err(Error::Protocol(ProtocolError::InvalidBindResponse))
        ));
    }
}
