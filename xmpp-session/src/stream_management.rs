// Copyright (c) 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XEP-0198 stream management bookkeeping.
//!
//! Counters are unsigned 32 bit integers which wrap around, compared with
//! RFC 1982 serial number arithmetic.

use core::fmt;
use std::collections::VecDeque;

use minidom::Element;

use crate::ns;
use crate::stream_error::{DefinedCondition, StreamError};

/// Request an ack from the server after this many unacked stanzas.
pub const ACK_REQUEST_INTERVAL: usize = 5;

const MAX_QUEUE_SIZE: usize = (u32::MAX / 2 - 1) as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SmResumeInfo {
    NotResumable,
    Resumable {
        /// XEP-0198 stream ID
        id: String,

        /// Preferred `host:port` for resumption as indicated by the peer.
        location: Option<String>,
    },
}

/// State for stream management
#[derive(Clone)]
pub struct SmState {
    /// Last value seen from the remote stanza counter.
    outbound_base: u32,

    /// Counter for received stanzas
    inbound_ctr: u32,

    resumption: SmResumeInfo,

    /// Unacked stanzas in the order they were sent
    unacked_stanzas: VecDeque<Element>,

    queue_limit: usize,
}

impl fmt::Debug for SmState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SmState")
            .field("outbound_base", &self.outbound_base)
            .field("inbound_ctr", &self.inbound_ctr)
            .field("resumption", &self.resumption)
            .field("len(unacked_stanzas)", &self.unacked_stanzas.len())
            .finish()
    }
}

/// The peer sent an `<a/>` which does not fit our outbound counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmError {
    /// More stanzas were acked than we ever sent.
    RemoteAckedMoreStanzas {
        /// Counter value at the head of our queue
        local_base: u32,
        /// Number of stanzas in the queue
        queue_len: u32,
        /// Counter received from the peer
        remote_ctr: u32,
    },
    /// The peer counter decreased.
    RemoteAckWentBackwards {
        /// Counter value at the head of our queue
        local_base: u32,
        /// Number of stanzas in the queue
        queue_len: u32,
        /// Counter received from the peer
        remote_ctr: u32,
    },
    /// Too many stanzas are waiting for an ack to keep another one.
    QueueFull {
        /// Number of stanzas in the queue
        queue_len: usize,
    },
}

impl SmError {
    /// The `<stream:error/>` to close the stream with.
    pub fn to_stream_error(&self) -> StreamError {
        let (local_base, queue_len, remote_ctr) = match *self {
            Self::RemoteAckedMoreStanzas {
                local_base,
                queue_len,
                remote_ctr,
            }
            | Self::RemoteAckWentBackwards {
                local_base,
                queue_len,
                remote_ctr,
            } => (local_base, queue_len, remote_ctr),
            Self::QueueFull { .. } => {
                return StreamError::new(DefinedCondition::ResourceConstraint)
            }
        };
        let mut error = StreamError::new(DefinedCondition::UndefinedCondition);
        error.application_specific.push(
            Element::builder("handled-count-too-high", ns::SM)
                .attr("h", remote_ctr.to_string())
                .attr("send-count", local_base.wrapping_add(queue_len).to_string())
                .build(),
        );
        error
    }
}

impl fmt::Display for SmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::RemoteAckedMoreStanzas {
                local_base,
                queue_len,
                remote_ctr,
            } => {
                let local_tip = local_base.wrapping_add(*queue_len);
                write!(f, "remote acked more stanzas than we sent: remote counter = {}. queue covers range {}..<{}", remote_ctr, local_base, local_tip)
            }
            Self::RemoteAckWentBackwards {
                local_base,
                remote_ctr,
                ..
            } => {
                write!(f, "remote acked less stanzas than before: remote counter = {}, local queue starts at {}", remote_ctr, local_base)
            }
            Self::QueueFull { queue_len } => {
                write!(f, "{} stanzas are still waiting for an ack", queue_len)
            }
        }
    }
}

impl std::error::Error for SmError {}

fn parse_counter(element: &Element) -> Option<u32> {
    element.attr("h").and_then(|h| h.parse().ok())
}

/// `<enable resume='true'/>`
pub fn enable() -> Element {
    Element::builder("enable", ns::SM)
        .attr("resume", "true")
        .build()
}

/// `<r/>`
pub fn request() -> Element {
    Element::builder("r", ns::SM).build()
}

/// `<a h='…'/>`
pub fn answer(h: u32) -> Element {
    Element::builder("a", ns::SM)
        .attr("h", h.to_string())
        .build()
}

/// `<resume previd='…' h='…'/>`
pub fn resume_request(previd: &str, h: u32) -> Element {
    Element::builder("resume", ns::SM)
        .attr("previd", previd)
        .attr("h", h.to_string())
        .build()
}

/// Read the `h` of an `<a/>` or `<resumed/>`.
pub fn handled(element: &Element) -> Option<u32> {
    parse_counter(element)
}

impl SmState {
    /// Initialize from the `<enabled/>` reply of the peer.
    pub fn from_enabled(enabled: &Element) -> Self {
        let resume = matches!(enabled.attr("resume"), Some("true") | Some("1"));
        let resumption = if resume {
            match enabled.attr("id") {
                Some(id) => SmResumeInfo::Resumable {
                    id: id.to_owned(),
                    location: enabled.attr("location").map(str::to_owned),
                },
                None => {
                    log::warn!("peer replied with <enable resume='true'/>, but without an ID! cannot make this stream resumable.");
                    SmResumeInfo::NotResumable
                }
            }
        } else {
            SmResumeInfo::NotResumable
        };
        Self {
            outbound_base: 0,
            inbound_ctr: 0,
            resumption,
            unacked_stanzas: VecDeque::new(),
            queue_limit: MAX_QUEUE_SIZE,
        }
    }

    /// Keep at most `limit` unacked stanzas.
    #[cfg(test)]
    pub(crate) fn limit_queue(&mut self, limit: usize) {
        self.queue_limit = limit;
    }

    /// Mark a stanza as sent and keep it until the peer acks it.
    ///
    /// Fails if the queue is full, in which case the stanza is not stored
    /// and the stream has to be closed: it must not be sent.
    pub fn enqueue(&mut self, stanza: Element) -> Result<(), SmError> {
        if self.unacked_stanzas.len() >= self.queue_limit {
            log::error!("Too many pending stanzas.");
            return Err(SmError::QueueFull {
                queue_len: self.unacked_stanzas.len(),
            });
        }
        self.unacked_stanzas.push_back(stanza);
        log::trace!(
            "Stored stanza in SmState. We are now at {} unacked stanzas.",
            self.unacked_stanzas.len()
        );
        Ok(())
    }

    /// Whether enough stanzas are pending to ask for an ack.
    pub fn should_request_ack(&self) -> bool {
        !self.unacked_stanzas.is_empty() && self.unacked_stanzas.len() % ACK_REQUEST_INTERVAL == 0
    }

    /// Number of stanzas not acked yet.
    pub fn unacked(&self) -> usize {
        self.unacked_stanzas.len()
    }

    /// Process remote `<a/>`
    pub fn remote_acked(&mut self, h: u32) -> Result<(), SmError> {
        log::debug!("remote_acked: {self:?}::remote_acked({h})");
        let to_drop = h.wrapping_sub(self.outbound_base) as usize;
        if to_drop == 0 {
            log::trace!("remote_acked: no stanzas to drop");
            return Ok(());
        }
        if to_drop > self.unacked_stanzas.len() {
            let queue_len = self.unacked_stanzas.len() as u32;
            // A wrapped difference above half the number space is negative.
            return Err(if to_drop as u32 > u32::MAX / 2 {
                SmError::RemoteAckWentBackwards {
                    local_base: self.outbound_base,
                    queue_len,
                    remote_ctr: h,
                }
            } else {
                SmError::RemoteAckedMoreStanzas {
                    local_base: self.outbound_base,
                    queue_len,
                    remote_ctr: h,
                }
            });
        }
        self.unacked_stanzas.drain(..to_drop);
        self.outbound_base = h;
        log::debug!("remote_acked: remote acked {to_drop} stanzas");
        Ok(())
    }

    /// Process `<resumed h='…'/>`.
    ///
    /// Returns the stanzas the peer never saw, which must be retransmitted
    /// in order.
    pub fn resume(&mut self, h: u32) -> Result<Vec<Element>, SmError> {
        self.remote_acked(h)?;
        // Retransmitted stanzas are counted again.
        self.outbound_base = h;
        Ok(self.unacked_stanzas.drain(..).collect())
    }

    /// Count one inbound stanza.
    pub fn count_inbound(&mut self) {
        self.inbound_ctr = self.inbound_ctr.wrapping_add(1);
    }

    /// Get the current inbound counter.
    #[inline(always)]
    pub fn inbound_ctr(&self) -> u32 {
        self.inbound_ctr
    }

    /// Get the info necessary for resumption.
    ///
    /// Returns the stream ID and the current inbound counter if resumption is
    /// available and None otherwise.
    pub fn resume_info(&self) -> Option<(&str, u32)> {
        match self.resumption {
            SmResumeInfo::Resumable { ref id, .. } => Some((id, self.inbound_ctr)),
            SmResumeInfo::NotResumable => None,
        }
    }

    /// Where the peer would like us to reconnect for resumption.
    pub fn location(&self) -> Option<&str> {
        match self.resumption {
            SmResumeInfo::Resumable { ref location, .. } => location.as_deref(),
            SmResumeInfo::NotResumable => None,
        }
    }
}
