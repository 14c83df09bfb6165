// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed payload decoding
//!
//! The session core only deals with generic [`Element`]s. Applications
//! register a parser per `(name, namespace)` and get typed values back
//! through [`ExtensionRegistry::decode`] or
//! [`StanzaEvent::decode`](crate::session::StanzaEvent::decode).
//!
//! ```
//! use xmpp_session::extensions::ExtensionRegistry;
//! use xmpp_session::minidom::Element;
//!
//! #[derive(Debug, PartialEq)]
//! struct Ping;
//!
//! let registry = ExtensionRegistry::builder()
//!     .register("ping", "urn:xmpp:ping", |_| Ok(Ping))
//!     .build();
//! let element = Element::builder("ping", "urn:xmpp:ping").build();
//! assert_eq!(registry.decode::<Ping>(&element), Some(Ping));
//! ```

use core::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use minidom::Element;

use crate::error::Error;

type Parser = Arc<dyn Fn(&Element) -> Result<Box<dyn Any + Send + Sync>, Error> + Send + Sync>;

/// Collects payload parsers before a session is built.
#[derive(Default)]
pub struct ExtensionRegistryBuilder {
    parsers: HashMap<(String, String), Parser>,
}

impl ExtensionRegistryBuilder {
    /// Register the parser of `{ns}name` elements.
    ///
    /// A later registration for the same element replaces an earlier one.
    pub fn register<T, F>(mut self, name: &str, ns: &str, parser: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Element) -> Result<T, Error> + Send + Sync + 'static,
    {
        let parser: Parser = Arc::new(move |element: &Element| {
            parser(element).map(|value| Box::new(value) as Box<dyn Any + Send + Sync>)
        });
        if self
            .parsers
            .insert((name.to_owned(), ns.to_owned()), parser)
            .is_some()
        {
            log::debug!("Replacing payload parser for {{{}}}{}", ns, name);
        }
        self
    }

    /// Freeze the table.
    pub fn build(self) -> ExtensionRegistry {
        ExtensionRegistry {
            parsers: Arc::new(self.parsers),
        }
    }
}

/// Immutable `(name, namespace) → parser` table, shared by a session and
/// its listeners.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    parsers: Arc<HashMap<(String, String), Parser>>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.parsers.keys()).finish()
    }
}

impl ExtensionRegistry {
    /// Start registering parsers.
    pub fn builder() -> ExtensionRegistryBuilder {
        ExtensionRegistryBuilder::default()
    }

    /// A registry which knows nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether a parser is registered for `{ns}name`.
    pub fn is_registered(&self, name: &str, ns: &str) -> bool {
        self.parsers
            .contains_key(&(name.to_owned(), ns.to_owned()))
    }

    /// Parse `element` with its registered parser.
    ///
    /// Returns `None` if no parser is registered, the parser failed, or it
    /// produces something other than `T`.
    pub fn decode<T: Any>(&self, element: &Element) -> Option<T> {
        let parser = self
            .parsers
            .get(&(element.name().to_owned(), element.ns()))?;
        match parser(element) {
            Ok(value) => value.downcast::<T>().ok().map(|v| *v),
            Err(e) => {
                log::debug!(
                    "Payload {{{}}}{} failed to parse: {}",
                    element.ns(),
                    element.name(),
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[derive(Debug, PartialEq)]
    struct Composing;

    #[derive(Debug, PartialEq)]
    struct Delay(String);

    fn registry() -> ExtensionRegistry {
        ExtensionRegistry::builder()
            .register("composing", "http://jabber.org/protocol/chatstates", |_| {
                Ok(Composing)
            })
            .register("delay", "urn:xmpp:delay", |element| {
                element
                    .attr("stamp")
                    .map(|stamp| Delay(stamp.to_owned()))
                    .ok_or_else(|| ProtocolError::InvalidStanza("no stamp".to_owned()).into())
            })
            .build()
    }

    #[test]
    fn decodes_registered_payloads() {
        let registry = registry();
        let composing = Element::builder("composing", "http://jabber.org/protocol/chatstates").build();
        assert_eq!(registry.decode::<Composing>(&composing), Some(Composing));
        // Wrong type requested.
        assert_eq!(registry.decode::<Delay>(&composing), None);

        let delay: Element = "<delay xmlns='urn:xmpp:delay' stamp='2002-09-10T23:08:25Z'/>"
            .parse()
            .unwrap();
        assert_eq!(
            registry.decode::<Delay>(&delay),
            Some(Delay("2002-09-10T23:08:25Z".to_owned()))
        );
    }

    #[test]
    fn unknown_or_invalid_payloads() {
        let registry = registry();
        let bad = Element::builder("delay", "urn:xmpp:delay").build();
        assert_eq!(registry.decode::<Delay>(&bad), None);
        let unknown = Element::builder("paused", "http://jabber.org/protocol/chatstates").build();
        assert!(!registry.is_registered("paused", "http://jabber.org/protocol/chatstates"));
        assert_eq!(registry.decode::<Composing>(&unknown), None);
        assert!(ExtensionRegistry::empty().decode::<Composing>(&unknown).is_none());
    }
}
