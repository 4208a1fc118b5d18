// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Lock-free system counters and per-peer statistics.
//!
//! System counters are atomics behind an `Arc` so a monitoring task can read
//! them while the engine runs; all use relaxed ordering. Per-peer statistics
//! live inside each association and are read through
//! [`Peer::counters`](crate::Peer::counters).

use std::sync::atomic::{AtomicU64, Ordering};

/// System-wide packet counters, updated on every received datagram.
#[derive(Debug, Default)]
pub struct SystemCounters {
    /// Datagrams received.
    pub received: AtomicU64,
    /// Packets handed to packet processing.
    pub processed: AtomicU64,
    /// Packets at the current protocol version.
    pub newversion: AtomicU64,
    /// Packets at an older but accepted version.
    pub oldversion: AtomicU64,
    /// Packets dropped by access restrictions.
    pub restricted: AtomicU64,
    /// Packets with bad length, version, mode, or trailer format.
    pub badlength: AtomicU64,
    /// Packets that failed authentication.
    pub badauth: AtomicU64,
    /// Packets declined by association matching or stratum policy.
    pub declined: AtomicU64,
    /// Packets rejected by rate limiting.
    pub limitrejected: AtomicU64,
    /// Kiss-o'-death replies sent.
    pub kodsent: AtomicU64,
}

impl SystemCounters {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time copy of every counter.
    pub fn snapshot(&self) -> SystemStats {
        SystemStats {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            newversion: self.newversion.load(Ordering::Relaxed),
            oldversion: self.oldversion.load(Ordering::Relaxed),
            restricted: self.restricted.load(Ordering::Relaxed),
            badlength: self.badlength.load(Ordering::Relaxed),
            badauth: self.badauth.load(Ordering::Relaxed),
            declined: self.declined.load(Ordering::Relaxed),
            limitrejected: self.limitrejected.load(Ordering::Relaxed),
            kodsent: self.kodsent.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for c in [
            &self.received,
            &self.processed,
            &self.newversion,
            &self.oldversion,
            &self.restricted,
            &self.badlength,
            &self.badauth,
            &self.declined,
            &self.limitrejected,
            &self.kodsent,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of [`SystemCounters`] (non-atomic, copyable).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SystemStats {
    /// Datagrams received.
    pub received: u64,
    /// Packets handed to packet processing.
    pub processed: u64,
    /// Packets at the current protocol version.
    pub newversion: u64,
    /// Packets at an older but accepted version.
    pub oldversion: u64,
    /// Packets dropped by access restrictions.
    pub restricted: u64,
    /// Packets with bad length, version, mode, or trailer format.
    pub badlength: u64,
    /// Packets that failed authentication.
    pub badauth: u64,
    /// Packets declined by association matching or stratum policy.
    pub declined: u64,
    /// Packets rejected by rate limiting.
    pub limitrejected: u64,
    /// Kiss-o'-death replies sent.
    pub kodsent: u64,
}

/// Per-association statistics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PeerCounters {
    /// Packets received from the peer.
    pub received: u64,
    /// Packets sent to the peer.
    pub sent: u64,
    /// Packets that reached packet processing.
    pub processed: u64,
    /// Duplicate (replayed) packets.
    pub oldpkt: u64,
    /// Packets whose origin timestamp did not match.
    pub bogusorg: u64,
    /// Authentication failures.
    pub badauth: u64,
    /// Packets failing the header sanity tests.
    pub seldisptoolarge: u64,
    /// Rate kiss-o'-death packets received.
    pub selbroken: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_default_is_zero() {
        let c = SystemCounters::new();
        assert_eq!(c.snapshot(), SystemStats::default());
    }

    #[test]
    fn test_counters_increment_and_snapshot() {
        let c = SystemCounters::new();
        SystemCounters::inc(&c.received);
        SystemCounters::inc(&c.received);
        SystemCounters::inc(&c.badauth);
        let s = c.snapshot();
        assert_eq!(s.received, 2);
        assert_eq!(s.badauth, 1);
        assert_eq!(s.processed, 0);
    }

    #[test]
    fn test_counters_reset() {
        let c = SystemCounters::new();
        SystemCounters::inc(&c.kodsent);
        SystemCounters::inc(&c.declined);
        c.reset();
        assert_eq!(c.snapshot(), SystemStats::default());
    }

    #[test]
    fn test_snapshot_is_copy() {
        let c = SystemCounters::new();
        SystemCounters::inc(&c.processed);
        let a = c.snapshot();
        let b = a;
        SystemCounters::inc(&c.processed);
        assert_eq!(a, b);
        assert_eq!(c.snapshot().processed, 2);
    }

    #[test]
    fn test_shared_across_threads() {
        use std::sync::Arc;
        let c = Arc::new(SystemCounters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        SystemCounters::inc(&c.received);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.snapshot().received, 400);
    }
}
