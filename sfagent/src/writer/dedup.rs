/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

const EVICTED_TRACK_CAPACITY: usize = 1024;

/// Bounded history of recently sent dimension update fingerprints.
///
/// Membership checks never promote, so eviction order stays FIFO over
/// successful sends. A fingerprint that gets evicted and reinserted inside
/// the flap window marks churn on the corresponding dimension key.
pub(crate) struct DedupHistory {
    resident: LruCache<u64, ()>,
    evicted: LruCache<u64, Instant>,
    flap_window: Duration,
}

impl DedupHistory {
    pub(crate) fn new(capacity: NonZeroUsize, flap_window: Duration) -> Self {
        let evicted_capacity = capacity.min(NonZeroUsize::new(EVICTED_TRACK_CAPACITY).unwrap());
        DedupHistory {
            resident: LruCache::new(capacity),
            evicted: LruCache::new(evicted_capacity),
            flap_window,
        }
    }

    pub(crate) fn seen(&self, fingerprint: u64) -> bool {
        self.resident.contains(&fingerprint)
    }

    /// Insert a fingerprint, evicting the oldest when full.
    /// Returns true if the insert is a flappy reinsert.
    pub(crate) fn insert(&mut self, fingerprint: u64) -> bool {
        let flappy = self
            .evicted
            .pop(&fingerprint)
            .map(|at| at.elapsed() < self.flap_window)
            .unwrap_or(false);

        if let Some((old, ())) = self.resident.push(fingerprint, ()) {
            if old != fingerprint {
                self.evicted.push(old, Instant::now());
            }
        }
        flappy
    }

    pub(crate) fn len(&self) -> usize {
        self.resident.len()
    }
}
