// Copyright (c) 2017, 2018 lumi <lumi@pew.im>
// Copyright (c) 2017, 2018, 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![deny(missing_docs)]

//! Represents XMPP addresses, also known as Jabber IDs (JIDs) for the
//! [XMPP](https://xmpp.org/) protocol. A [`Jid`] can have between one and
//! three parts in the form `node@domain/resource`:
//! - the (optional) node part designates a specific account/service on a
//!   server, for example `username@server.com`
//! - the domain part designates a server, for example `irc.jabberfr.org`
//! - the (optional) resource part designates a more specific client, such as
//!   a participant in a groupchat (`jabberfr@chat.jabberfr.org/user`) or a
//!   specific client device associated with an account
//!   (`user@example.com/dino`)
//!
//! Every part is normalised on construction (nodeprep, nameprep and
//! resourceprep from RFC 3920), so comparing and hashing two [`Jid`]s is
//! done on their canonical forms: `Juliet@Example.COM` equals
//! `juliet@example.com`.

use core::fmt;
use core::str::FromStr;
use std::borrow::Cow;
use std::net::Ipv6Addr;

use memchr::memchr;
use stringprep::{nameprep, nodeprep, resourceprep};

mod error;
pub use crate::error::Error;

const MAX_PART_LEN: usize = 1023;

/// A struct representing a Jabber ID (JID).
///
/// The bare form of a JID has no resource; the full form has one. Both are
/// represented by this same type, use [`Jid::is_bare`] to tell them apart.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

fn check_len(part: &str, err: Error) -> Result<(), Error> {
    if part.len() > MAX_PART_LEN {
        Err(err)
    } else {
        Ok(())
    }
}

fn prep_node(node: &str) -> Result<String, Error> {
    if node.is_empty() {
        return Err(Error::NodeEmpty);
    }
    let node = nodeprep(node).map_err(|_| Error::NodePrep)?;
    check_len(&node, Error::NodeTooLong)?;
    Ok(node.into_owned())
}

fn prep_domain(domain: &str) -> Result<String, Error> {
    // A single trailing dot is the fully-qualified form of the same name.
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() {
        return Err(Error::DomainEmpty);
    }
    let domain = if let Some(inner) = domain
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        inner
            .parse::<Ipv6Addr>()
            .map_err(|_| Error::DomainInvalidIp)?;
        Cow::Borrowed(domain)
    } else {
        nameprep(domain).map_err(|_| Error::NamePrep)?
    };
    check_len(&domain, Error::DomainTooLong)?;
    Ok(domain.into_owned())
}

fn prep_resource(resource: &str) -> Result<String, Error> {
    if resource.is_empty() {
        return Err(Error::ResourceEmpty);
    }
    let resource = resourceprep(resource).map_err(|_| Error::ResourcePrep)?;
    check_len(&resource, Error::ResourceTooLong)?;
    Ok(resource.into_owned())
}

impl Jid {
    /// Constructs a Jabber ID from a string.
    ///
    /// ```
    /// use jid::Jid;
    /// let jid = Jid::new("Romeo@Montague.lit/orchard")?;
    /// assert_eq!(jid.node(), Some("romeo"));
    /// assert_eq!(jid.domain(), "montague.lit");
    /// assert_eq!(jid.resource(), Some("orchard"));
    /// # Ok::<(), jid::Error>(())
    /// ```
    pub fn new(unnormalized: &str) -> Result<Jid, Error> {
        let bytes = unnormalized.as_bytes();
        let (rest, resource) = match memchr(b'/', bytes) {
            Some(slash) => (&unnormalized[..slash], Some(&unnormalized[slash + 1..])),
            None => (unnormalized, None),
        };
        let (node, domain) = match memchr(b'@', rest.as_bytes()) {
            Some(at) => (Some(&rest[..at]), &rest[at + 1..]),
            None => (None, rest),
        };
        Jid::from_parts(node, domain, resource)
    }

    /// Builds a JID from its individual, not yet normalised, parts.
    pub fn from_parts(
        node: Option<&str>,
        domain: &str,
        resource: Option<&str>,
    ) -> Result<Jid, Error> {
        Ok(Jid {
            node: node.map(prep_node).transpose()?,
            domain: prep_domain(domain)?,
            resource: resource.map(prep_resource).transpose()?,
        })
    }

    /// The optional node part of the JID.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// The domain part of the JID.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The optional resource part of the JID.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Returns true if this JID carries no resource.
    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// Returns true if this JID carries a resource.
    pub fn is_full(&self) -> bool {
        self.resource.is_some()
    }

    /// Returns the bare form of this JID, cloning its node and domain.
    pub fn to_bare(&self) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Strips the resource, consuming the JID.
    pub fn into_bare(self) -> Jid {
        Jid {
            resource: None,
            ..self
        }
    }

    /// The JID of the domain alone, e.g. the server hosting an account.
    pub fn domain_jid(&self) -> Jid {
        Jid {
            node: None,
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Returns a full JID with this JID's node and domain and the given
    /// resource.
    pub fn with_resource(&self, resource: &str) -> Result<Jid, Error> {
        Ok(Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: Some(prep_resource(resource)?),
        })
    }

    /// Returns true if both JIDs share the same node and domain.
    pub fn bare_eq(&self, other: &Jid) -> bool {
        self.node == other.node && self.domain == other.domain
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Jid, Error> {
        Jid::new(s)
    }
}

impl TryFrom<&str> for Jid {
    type Error = Error;

    fn try_from(s: &str) -> Result<Jid, Error> {
        Jid::new(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(s: String) -> Result<Jid, Error> {
        Jid::new(&s)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> String {
        jid.to_string()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(fmt, "{}@", node)?;
        }
        fmt.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(fmt, "/{}", resource)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Jid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Jid({})", self)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Jid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Jid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Jid, D::Error> {
        let s = String::deserialize(deserializer)?;
        Jid::new(&s).map_err(serde::de::Error::custom)
    }
}
