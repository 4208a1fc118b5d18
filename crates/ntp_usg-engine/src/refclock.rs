// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Reference clock samples.
//!
//! A reference clock is an association with [`PeerFlags::REFCLOCK`] set. It
//! never exchanges packets; its driver measures the local clock against the
//! reference and feeds the result to [`Engine::refclock_sample`]. The sample
//! then goes through the same clock filter and selection as a network peer.

use ntp_proto::protocol::LeapIndicator;
use tracing::trace;

use crate::engine::Engine;
use crate::error::{ConfigError, EngineError};
use crate::filter::FilterOutcome;
use crate::peer::PeerFlags;
use crate::status::PeerEvent;
use crate::table::PeerHandle;

/// One measurement from a reference clock driver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RefclockSample {
    /// Reference time minus local time (s).
    pub offset: f64,
    /// Round-trip delay to the reference, usually zero (s).
    pub delay: f64,
    /// Error bound of the measurement (s).
    pub dispersion: f64,
}

impl RefclockSample {
    /// A sample with no delay.
    pub fn new(offset: f64, dispersion: f64) -> Self {
        RefclockSample {
            offset,
            delay: 0.0,
            dispersion,
        }
    }
}

impl Engine {
    /// Feed a reference clock measurement to the association `handle`.
    ///
    /// Returns what the clock filter did with the sample.
    ///
    /// # Errors
    ///
    /// [`EngineError::StaleHandle`] if the association is gone,
    /// [`EngineError::Config`] if it is not a reference clock, and
    /// [`EngineError::ClockPanic`] if the resulting clock update was refused.
    pub fn refclock_sample(
        &mut self,
        handle: PeerHandle,
        sample: RefclockSample,
    ) -> Result<FilterOutcome, EngineError> {
        self.refresh_config();
        let now = self.current_time;
        let ctx = self.filter_context();
        let precision = self.sys.precision;
        let reftime = self.clock.now();
        let Some(peer) = self.table.get_mut(handle) else {
            return Err(EngineError::StaleHandle);
        };
        if !peer.flags.contains(PeerFlags::REFCLOCK) {
            return Err(EngineError::Config(ConfigError::InvalidValue {
                field: "handle",
                detail: format!("association {} is not a reference clock", peer.associd),
            }));
        }

        peer.counters.received += 1;
        peer.counters.processed += 1;
        peer.leap = LeapIndicator::NoWarning;
        peer.stratum = 0;
        peer.precision = precision;
        peer.rootdelay = 0.0;
        peer.rootdisp = 0.0;
        peer.reftime = reftime;
        peer.dst = reftime;
        peer.timereceived = now;
        if peer.reach == 0 {
            peer.report(PeerEvent::Reachable, "");
            peer.timereachable = now;
        }
        peer.reach |= 1;
        trace!(
            peer = %peer.addr,
            offset = sample.offset,
            disp = sample.dispersion,
            "refclock sample"
        );

        let offset = sample.offset + peer.bias;
        let outcome = peer.clock_filter(offset, sample.delay, sample.dispersion, ctx);
        if outcome.reselect()
            && (peer.burst == 0 || self.sys.leap == LeapIndicator::Unknown)
        {
            self.clock_select()?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::config::{EngineConfig, PeerConfig};
    use ntp_proto::NtpTimestamp;
    use ntp_proto::protocol::ReferenceId;

    fn engine() -> (Engine, SimulatedClock) {
        let clock = SimulatedClock::new(NtpTimestamp::from_parts(3_900_000_000, 0));
        let engine = Engine::new(EngineConfig::default().rng_seed(5), clock.clone()).unwrap();
        (engine, clock)
    }

    fn gps() -> PeerConfig {
        PeerConfig::refclock("127.127.20.0:123".parse().unwrap(), ReferenceId(*b"GPS\0"))
    }

    #[test]
    fn test_sample_marks_reachable() {
        let (mut e, _) = engine();
        let h = e.add_peer(gps()).unwrap();
        e.timer().unwrap();
        let out = e.refclock_sample(h, RefclockSample::new(0.001, 1e-6)).unwrap();
        assert_eq!(out, FilterOutcome::Accepted);
        let peer = e.peer(h).unwrap();
        assert_eq!(peer.reach() & 1, 1);
        assert_eq!(peer.stratum(), 0);
        assert_eq!(peer.refid(), ReferenceId(*b"GPS\0"));
    }

    #[test]
    fn test_refclock_becomes_system_peer() {
        let (mut e, clock) = engine();
        let h = e.add_peer(gps()).unwrap();
        for _ in 0..4 {
            e.timer().unwrap();
            e.refclock_sample(h, RefclockSample::new(0.0005, 1e-6)).unwrap();
        }
        assert_eq!(e.system().system_peer(), Some(h));
        assert_eq!(e.system().stratum(), 1);
        assert_eq!(e.system().refid(), ReferenceId(*b"GPS\0"));
        assert!(!clock.adjustments().is_empty());
        // never put on the wire
        assert!(e.take_transmissions().is_empty());
    }

    #[test]
    fn test_network_peer_rejected() {
        let (mut e, _) = engine();
        let h = e
            .add_peer(PeerConfig::server("192.0.2.1:123".parse().unwrap()))
            .unwrap();
        let err = e.refclock_sample(h, RefclockSample::new(0.0, 0.0)).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_stale_handle() {
        let (mut e, _) = engine();
        let h = e.add_peer(gps()).unwrap();
        e.remove_peer(h).unwrap();
        let err = e.refclock_sample(h, RefclockSample::new(0.0, 0.0)).unwrap_err();
        assert!(matches!(err, EngineError::StaleHandle));
    }
}
