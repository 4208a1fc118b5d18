// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! System variables and the clock update.
//!
//! [`SystemState`] is what this host advertises in every packet it sends:
//! leap, stratum, reference id, root delay and dispersion, plus the
//! combined offset and jitter handed to the local clock. It is only changed
//! by selection ([`Engine::clock_update`]) and by the once-a-second orphan
//! check.

use ntp_proto::NtpTimestamp;
use ntp_proto::protocol::{self, LeapIndicator, ReferenceId};
use tracing::{debug, info, warn};

use crate::clock::ClockStatus;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::filter::PHI;
use crate::peer::{CastKind, log2d};
use crate::status::{self, EventCounter, SystemEvent};
use crate::table::PeerHandle;

/// Poll-adjust hysteresis limit.
const CLOCK_LIMIT: i32 = 30;
/// Offset-to-jitter ratio below which the poll interval may grow.
const CLOCK_PGATE: f64 = 4.0;

/// The singleton system variables.
#[derive(Clone, Debug)]
pub struct SystemState {
    pub(crate) leap: LeapIndicator,
    pub(crate) stratum: u8,
    pub(crate) precision: i8,
    pub(crate) rootdelay: f64,
    pub(crate) rootdisp: f64,
    pub(crate) refid: ReferenceId,
    pub(crate) reftime: NtpTimestamp,
    pub(crate) offset: f64,
    pub(crate) jitter: f64,
    pub(crate) peer: Option<PeerHandle>,
    pub(crate) poll: i8,
    pub(crate) poll_tc: i32,
    pub(crate) epoch: u64,
    pub(crate) clockhop: f64,
    pub(crate) survivors: usize,
    pub(crate) leap_armed: bool,
    pub(crate) orphan_deadline: u64,
    pub(crate) events: EventCounter,
}

impl SystemState {
    pub(crate) fn new(precision: i8, orphan_wait: u64) -> Self {
        SystemState {
            leap: LeapIndicator::Unknown,
            stratum: protocol::MAXSTRAT,
            precision,
            rootdelay: 0.0,
            rootdisp: 0.0,
            refid: ReferenceId::INIT,
            reftime: NtpTimestamp::ZERO,
            offset: 0.0,
            jitter: log2d(precision),
            peer: None,
            poll: protocol::MINPOLL,
            poll_tc: 0,
            epoch: 0,
            clockhop: 0.0,
            survivors: 0,
            leap_armed: false,
            orphan_deadline: orphan_wait,
            events: EventCounter::default(),
        }
    }

    /// Record a system event and emit it through `tracing`.
    pub(crate) fn report(&mut self, event: SystemEvent, detail: &str) {
        self.events.record(event as u8);
        match event {
            SystemEvent::PanicStop | SystemEvent::NoSystemPeer => {
                warn!(event = ?event, detail, "system event")
            }
            _ => info!(event = ?event, detail, "system event"),
        }
    }

    /// Whether a system peer is selected.
    pub fn is_synchronized(&self) -> bool {
        self.peer.is_some()
    }

    /// Leap indicator.
    pub fn leap(&self) -> LeapIndicator {
        self.leap
    }

    /// Stratum (16 when unsynchronized).
    pub fn stratum(&self) -> u8 {
        self.stratum
    }

    /// Clock precision exponent.
    pub fn precision(&self) -> i8 {
        self.precision
    }

    /// Root delay (s).
    pub fn root_delay(&self) -> f64 {
        self.rootdelay
    }

    /// Root dispersion (s).
    pub fn root_dispersion(&self) -> f64 {
        self.rootdisp
    }

    /// Reference id.
    pub fn refid(&self) -> ReferenceId {
        self.refid
    }

    /// Time of the last clock update.
    pub fn reftime(&self) -> NtpTimestamp {
        self.reftime
    }

    /// Combined offset (s).
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Combined jitter (s).
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// The system peer.
    pub fn system_peer(&self) -> Option<PeerHandle> {
        self.peer
    }

    /// System poll exponent.
    pub fn poll(&self) -> i8 {
        self.poll
    }

    /// Survivors of the last selection.
    pub fn survivors(&self) -> usize {
        self.survivors
    }

    /// Whether a leap second is armed.
    pub fn leap_armed(&self) -> bool {
        self.leap_armed
    }

    /// Event history.
    pub fn events(&self) -> EventCounter {
        self.events
    }

    /// The 16-bit system status word.
    pub fn status_word(&self) -> u16 {
        status::system_status_word(self.leap, self.peer.is_some(), &self.events)
    }
}

impl Engine {
    /// Adopt `handle` as the system peer and hand the combined offset to
    /// the local clock.
    pub(crate) fn clock_update(
        &mut self,
        handle: PeerHandle,
        leap_vote: usize,
    ) -> Result<(), EngineError> {
        let now = self.current_time;
        let Some(peer) = self.table.get_mut(handle) else {
            return Ok(());
        };

        self.sys.peer = Some(handle);
        self.sys.epoch = peer.epoch;
        self.sys.poll = self.sys.poll.clamp(peer.minpoll, peer.maxpoll);
        peer.poll_update(self.sys.poll, now, &mut self.rng);

        self.sys.stratum = (peer.stratum + 1).min(protocol::MAXSTRAT);
        self.sys.refid = if peer.stratum == 0 || peer.stratum == protocol::MAXSTRAT {
            peer.refid
        } else {
            ReferenceId::from_addr(peer.addr.ip())
        };
        let age = now.saturating_sub(peer.update) as f64;
        self.sys.rootdisp = self.sys.jitter
            + self.sys.offset.abs()
            + peer.disp
            + (peer.delay + peer.rootdelay) / 2.0
            + PHI * age
            + peer.rootdisp;
        self.sys.rootdelay = peer.delay + peer.rootdelay;
        self.sys.reftime = peer.dst;

        let offset = self.sys.offset;
        match self.clock.adjust(offset) {
            ClockStatus::Panic => {
                self.sys.report(SystemEvent::PanicStop, &format!("{offset:+.6} s"));
                return Err(EngineError::ClockPanic { offset });
            }
            ClockStatus::Step => {
                self.sys.report(SystemEvent::ClockStep, &format!("{offset:+.6} s"));
                self.clear_all();
                let precision = self.sys.precision;
                let sys = &mut self.sys;
                sys.leap = LeapIndicator::Unknown;
                sys.stratum = protocol::MAXSTRAT;
                sys.refid = ReferenceId::STEP;
                sys.rootdelay = 0.0;
                sys.rootdisp = 0.0;
                sys.reftime = NtpTimestamp::ZERO;
                sys.jitter = log2d(precision);
                sys.peer = None;
                sys.leap_armed = false;
            }
            ClockStatus::Slew => {
                if self.sys.leap == LeapIndicator::Unknown {
                    self.sys.leap = LeapIndicator::NoWarning;
                    self.sys.report(SystemEvent::ClockSync, "");
                }
                if leap_vote > self.sys.survivors / 2 {
                    if !self.sys.leap_armed {
                        self.sys.leap_armed = true;
                        self.sys.leap = LeapIndicator::AddOne;
                        self.sys.report(SystemEvent::LeapArmed, "");
                    }
                } else if self.sys.leap_armed {
                    self.sys.leap_armed = false;
                    self.sys.leap = LeapIndicator::NoWarning;
                    self.sys.report(SystemEvent::LeapDisarmed, "");
                }
                self.adjust_poll();
            }
            ClockStatus::Ignore => {}
        }
        debug!(
            offset = self.sys.offset,
            jitter = self.sys.jitter,
            stratum = self.sys.stratum,
            rootdelay = self.sys.rootdelay,
            rootdisp = self.sys.rootdisp,
            poll = self.sys.poll,
            "clock update"
        );
        Ok(())
    }

    /// Grow the system poll while the offset stays well inside the jitter,
    /// shrink it when it does not.
    fn adjust_poll(&mut self) {
        let sys = &mut self.sys;
        if sys.offset.abs() < CLOCK_PGATE * sys.jitter {
            sys.poll_tc += i32::from(sys.poll);
            if sys.poll_tc > CLOCK_LIMIT {
                sys.poll_tc = 0;
                if sys.poll < protocol::MAXPOLL {
                    sys.poll += 1;
                }
            }
        } else {
            sys.poll_tc -= 2 * i32::from(sys.poll);
            if sys.poll_tc < -CLOCK_LIMIT {
                sys.poll_tc = 0;
                if sys.poll > protocol::MINPOLL {
                    sys.poll -= 1;
                }
            }
        }
    }

    /// Flush every association that expects replies after a clock step.
    pub(crate) fn clear_all(&mut self) {
        let now = self.current_time;
        let precision = self.sys.precision;
        let mut spread = 0;
        for (_, peer) in self.table.iter_mut() {
            if matches!(peer.cast, CastKind::Broadcast | CastKind::ManycastClient) {
                continue;
            }
            spread += 1;
            peer.clear(ReferenceId::STEP, now, precision, spread);
        }
    }

    /// Claim the orphan stratum after going too long without a system peer.
    pub(crate) fn orphan_check(&mut self) {
        let Some(orphan) = self.cfg.orphan else {
            return;
        };
        if self.sys.peer.is_some() || self.current_time <= self.sys.orphan_deadline {
            return;
        }
        let now = self.clock.now();
        let sys = &mut self.sys;
        if sys.leap == LeapIndicator::Unknown {
            sys.leap = LeapIndicator::NoWarning;
        }
        if sys.stratum != orphan {
            info!(stratum = orphan, "orphan mode");
        }
        sys.stratum = orphan;
        sys.refid = if orphan > 1 {
            ReferenceId::LOOPBACK
        } else {
            ReferenceId::LOOP
        };
        sys.offset = 0.0;
        sys.rootdelay = self.cfg.orphan_delay;
        sys.rootdisp = 0.0;
        // downstream peers check reference time against transmit time
        sys.reftime = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let s = SystemState::new(-20, 300);
        assert_eq!(s.leap(), LeapIndicator::Unknown);
        assert_eq!(s.stratum(), 16);
        assert_eq!(s.refid(), ReferenceId::INIT);
        assert!(!s.is_synchronized());
        assert_eq!(s.status_word(), 0xc000);
    }

    #[test]
    fn test_report_updates_word() {
        let mut s = SystemState::new(-20, 300);
        s.report(SystemEvent::ClockStep, "");
        assert_eq!(s.status_word() & 0xff, 0x1c);
    }
}
