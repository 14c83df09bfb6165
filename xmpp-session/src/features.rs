// Copyright (c) 2017 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use minidom::Element;

use crate::error::ProtocolError;
use crate::ns;

/// The `<stream:features/>` advertised by the server after each stream
/// (re)start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFeatures {
    /// `Some(required)` if STARTTLS is offered.
    pub starttls: Option<bool>,
    /// SASL mechanism names, in the order the server listed them.
    pub sasl_mechanisms: Vec<String>,
    /// Whether resource binding is offered.
    pub can_bind: bool,
    /// Whether XEP-0198 Stream Management is offered.
    pub stream_management: bool,
    /// Every feature this crate does not interpret.
    pub others: Vec<Element>,
}

impl StreamFeatures {
    /// Parse a `<stream:features/>` element.
    pub fn parse(element: &Element) -> Result<Self, ProtocolError> {
        if !element.is("features", ns::STREAM) {
            return Err(ProtocolError::unexpected(element));
        }
        let mut features = StreamFeatures::default();
        for child in element.children() {
            if child.is("starttls", ns::TLS) {
                features.starttls = Some(child.get_child("required", ns::TLS).is_some());
            } else if child.is("mechanisms", ns::SASL) {
                features.sasl_mechanisms = child
                    .children()
                    .filter(|mechanism| mechanism.is("mechanism", ns::SASL))
                    .map(|mechanism| mechanism.text().trim().to_owned())
                    .collect();
            } else if child.is("bind", ns::BIND) {
                features.can_bind = true;
            } else if child.is("sm", ns::SM) {
                features.stream_management = true;
            } else {
                features.others.push(child.clone());
            }
        }
        Ok(features)
    }

    /// Can initiate TLS session with this server?
    pub fn can_starttls(&self) -> bool {
        self.starttls.is_some()
    }

    /// Does the server refuse to continue without TLS?
    pub fn requires_starttls(&self) -> bool {
        self.starttls == Some(true)
    }

    /// Does the server offer SASL authentication?
    pub fn can_authenticate(&self) -> bool {
        !self.sasl_mechanisms.is_empty()
    }
}
