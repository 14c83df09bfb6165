// Copyright (c) 2024 xmpp-rs contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Requests sent but not acknowledged yet, ordered by request id.
///
/// Iteration order is id order no matter which thread inserted an entry,
/// so a replay always reproduces the original sequence.
#[derive(Debug, Default)]
pub struct UnacknowledgedRequests {
    inner: Mutex<BTreeMap<u64, String>>,
}

impl UnacknowledgedRequests {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, String>> {
        // No operation leaves the map half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remember `request`, sent with id `rid`.
    pub fn put(&self, rid: u64, request: String) {
        if self.lock().insert(rid, request).is_some() {
            log::warn!("request id {} was queued twice", rid);
        }
    }

    /// Acknowledge exactly one request.
    pub fn remove(&self, rid: u64) -> Option<String> {
        self.lock().remove(&rid)
    }

    /// Acknowledge every request with an id up to and including `rid`.
    ///
    /// Returns the number of requests dropped.
    pub fn remove_up_to(&self, rid: u64) -> usize {
        let mut map = self.lock();
        let before = map.len();
        *map = match rid.checked_add(1) {
            Some(next) => map.split_off(&next),
            None => BTreeMap::new(),
        };
        before - map.len()
    }

    /// Snapshot of the outstanding requests, oldest first.
    pub fn replay(&self) -> Vec<(u64, String)> {
        self.lock()
            .iter()
            .map(|(rid, request)| (*rid, request.clone()))
            .collect()
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether every request was acknowledged.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget everything, when the session ends.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
