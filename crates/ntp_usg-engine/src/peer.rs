// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The association record.
//!
//! A [`Peer`] holds everything the engine knows about one remote time source:
//! addressing and mode, poll state, the header fields copied from its last
//! valid packet, the on-wire timestamps used for replay and origin checks,
//! the clock filter register and the mitigated estimate, plus selection
//! status and counters. Peers are owned by the
//! [`PeerTable`](crate::table::PeerTable); everything else refers to them by
//! [`PeerHandle`](crate::PeerHandle).

use std::fmt;
use std::net::SocketAddr;
use std::ops::{BitOr, BitOrAssign};

use ntp_proto::NtpTimestamp;
use ntp_proto::protocol::{self, LeapIndicator, Mode, ReferenceId};
use tracing::{debug, info, warn};

use crate::config::PeerConfig;
use crate::filter::{ClockFilter, PHI};
use crate::metrics::PeerCounters;
use crate::status::{self, EventCounter, PeerEvent, SelectStatus, peer_bits};

/// `2^exp` seconds.
pub(crate) fn log2d(exp: i8) -> f64 {
    f64::from(exp).exp2()
}

/// Association flags.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct PeerFlags(u16);

impl PeerFlags {
    /// No flags.
    pub const NONE: Self = PeerFlags(0);
    /// Statically configured; never demobilized on timeout.
    pub const CONFIG: Self = PeerFlags(0x0001);
    /// May be demobilized when it times out or loses a preemption vote.
    pub const PREEMPT: Self = PeerFlags(0x0002);
    /// Preferred source.
    pub const PREFER: Self = PeerFlags(0x0004);
    /// Always a truechimer.
    pub const TRUE: Self = PeerFlags(0x0008);
    /// Never selected.
    pub const NOSELECT: Self = PeerFlags(0x0010);
    /// Burst while unreachable.
    pub const IBURST: Self = PeerFlags(0x0020);
    /// Burst at every poll while reachable.
    pub const BURST: Self = PeerFlags(0x0040);
    /// Last packet authenticated.
    pub const AUTHENTIC: Self = PeerFlags(0x0080);
    /// Authentication enabled for this association.
    pub const AUTHENABLE: Self = PeerFlags(0x0100);
    /// Pulse-per-second source.
    pub const PPS: Self = PeerFlags(0x0200);
    /// Broadcast client calibration volley in progress.
    pub const BC_VOL: Self = PeerFlags(0x0400);
    /// Reference clock fed through the refclock entry point.
    pub const REFCLOCK: Self = PeerFlags(0x0800);

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: PeerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any flag in `other` is set.
    pub fn intersects(self, other: PeerFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Set the flags in `other`.
    pub fn insert(&mut self, other: PeerFlags) {
        self.0 |= other.0;
    }

    /// Clear the flags in `other`.
    pub fn remove(&mut self, other: PeerFlags) {
        self.0 &= !other.0;
    }

    /// Set or clear `other`.
    pub fn set(&mut self, other: PeerFlags, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    /// The raw flag bits.
    pub fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for PeerFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        PeerFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for PeerFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Test bits recorded against a peer.
///
/// Bits 0-8 are set by packet checks and cleared on each new packet; bits
/// 9-12 are the fitness tests recomputed by [`Peer::unfit`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Flash(u16);

impl Flash {
    /// Duplicate packet.
    pub const TEST1: Self = Flash(0x0001);
    /// Origin timestamp does not match.
    pub const TEST2: Self = Flash(0x0002);
    /// Transmit timestamp is zero.
    pub const TEST3: Self = Flash(0x0004);
    /// Access denied.
    pub const TEST4: Self = Flash(0x0008);
    /// Authentication failure.
    pub const TEST5: Self = Flash(0x0010);
    /// Server unsynchronized or stratum out of range.
    pub const TEST6: Self = Flash(0x0020);
    /// Root delay or dispersion excessive, or reference time in the future.
    pub const TEST7: Self = Flash(0x0040);
    /// Leap unsynchronized or stratum out of range.
    pub const TEST10: Self = Flash(0x0200);
    /// Root distance exceeds the threshold.
    pub const TEST11: Self = Flash(0x0400);
    /// Synchronization loop.
    pub const TEST12: Self = Flash(0x0800);
    /// Unreachable or not selectable.
    pub const TEST13: Self = Flash(0x1000);

    /// Bits owned by the packet checks.
    pub const PACKET_MASK: Self = Flash(0x01ff);
    /// Bits owned by the fitness tests.
    pub const PEER_MASK: Self = Flash(0x1e00);

    /// No bits set.
    pub fn empty() -> Self {
        Flash(0)
    }

    /// Whether any bit in `other` is set.
    pub fn intersects(self, other: Flash) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether no bits are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set the bits in `other`.
    pub fn insert(&mut self, other: Flash) {
        self.0 |= other.0;
    }

    /// Clear the bits in `other`.
    pub fn remove(&mut self, other: Flash) {
        self.0 &= !other.0;
    }

    /// The raw bits.
    pub fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for Flash {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Flash(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flash {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Association mode on this side.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HostMode {
    /// Symmetric active.
    Active,
    /// Symmetric passive (ephemeral).
    Passive,
    /// Client of a server.
    Client,
    /// Broadcast server.
    Broadcast,
    /// Broadcast client; never transmits.
    BroadcastClient,
}

impl HostMode {
    /// Every mode, in index-probing order.
    pub const ALL: [HostMode; 5] = [
        HostMode::Active,
        HostMode::Passive,
        HostMode::Client,
        HostMode::Broadcast,
        HostMode::BroadcastClient,
    ];

    /// The mode written into transmitted packets, if this mode transmits.
    pub fn wire_mode(self) -> Option<Mode> {
        match self {
            HostMode::Active => Some(Mode::SymmetricActive),
            HostMode::Passive => Some(Mode::SymmetricPassive),
            HostMode::Client => Some(Mode::Client),
            HostMode::Broadcast => Some(Mode::Broadcast),
            HostMode::BroadcastClient => None,
        }
    }
}

impl fmt::Display for HostMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostMode::Active => "active",
            HostMode::Passive => "passive",
            HostMode::Client => "client",
            HostMode::Broadcast => "broadcast",
            HostMode::BroadcastClient => "bclient",
        };
        f.write_str(name)
    }
}

/// How an association addresses its packets.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CastKind {
    /// One remote host.
    #[default]
    Unicast,
    /// Broadcast or multicast server.
    Broadcast,
    /// Manycast client soliciting a group.
    ManycastClient,
    /// Client mobilized by a manycast response.
    ManycastEphemeral,
    /// Client mobilized by a broadcast server.
    BroadcastEphemeral,
}

impl CastKind {
    /// Transmit-only associations never expect a reply.
    pub fn is_transmit_only(self) -> bool {
        matches!(self, CastKind::Broadcast | CastKind::ManycastClient)
    }
}

/// Thresholds used by the fitness tests and root distance.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Fitness {
    pub now: u64,
    pub floor: u8,
    pub ceiling: u8,
    pub maxdist: f64,
    pub mindisp: f64,
    /// System reference id, the loop check when the interface is unknown.
    pub refid: ReferenceId,
}

/// One association.
#[derive(Clone, Debug)]
pub struct Peer {
    pub(crate) addr: SocketAddr,
    pub(crate) local: Option<SocketAddr>,
    pub(crate) hmode: HostMode,
    pub(crate) cast: CastKind,
    pub(crate) version: u8,
    pub(crate) flags: PeerFlags,
    pub(crate) key_id: Option<u32>,
    pub(crate) associd: u16,
    pub(crate) ttl: u8,
    pub(crate) bias: f64,

    // poll state
    pub(crate) minpoll: i8,
    pub(crate) maxpoll: i8,
    pub(crate) hpoll: i8,
    pub(crate) ppoll: i8,
    pub(crate) reach: u8,
    pub(crate) unreach: u32,
    pub(crate) burst: u8,
    pub(crate) retry: u8,
    pub(crate) throttle: i64,
    pub(crate) nextdate: u64,
    pub(crate) outdate: u64,
    pub(crate) update: u64,
    pub(crate) epoch: u64,
    pub(crate) timereceived: u64,
    pub(crate) timereachable: u64,

    // header values from the last valid packet
    pub(crate) leap: LeapIndicator,
    pub(crate) stratum: u8,
    pub(crate) pmode: Mode,
    pub(crate) precision: i8,
    pub(crate) rootdelay: f64,
    pub(crate) rootdisp: f64,
    pub(crate) refid: ReferenceId,
    pub(crate) reftime: NtpTimestamp,

    // on-wire timestamps
    pub(crate) aorg: NtpTimestamp,
    pub(crate) rec: NtpTimestamp,
    pub(crate) dst: NtpTimestamp,
    pub(crate) xmt: NtpTimestamp,

    // mitigated estimate
    pub(crate) offset: f64,
    pub(crate) delay: f64,
    pub(crate) disp: f64,
    pub(crate) jitter: f64,
    pub(crate) filter: ClockFilter,

    pub(crate) status: SelectStatus,
    pub(crate) flash: Flash,
    pub(crate) events: EventCounter,
    pub(crate) counters: PeerCounters,
}

impl Peer {
    /// A fresh association from static or ephemeral configuration. The caller
    /// must [`clear`](Peer::clear) it before use.
    pub(crate) fn new(config: &PeerConfig, associd: u16) -> Self {
        let mut flags = config.flags;
        if config.key_id.is_some() {
            flags.insert(PeerFlags::AUTHENABLE);
        }
        Peer {
            addr: config.addr,
            local: config.local,
            hmode: config.mode,
            cast: config.cast,
            version: config.version,
            flags,
            key_id: config.key_id,
            associd,
            ttl: config.ttl,
            bias: config.bias,
            minpoll: config.minpoll,
            maxpoll: config.maxpoll,
            hpoll: config.minpoll,
            ppoll: config.maxpoll,
            reach: 0,
            unreach: 0,
            burst: 0,
            retry: 0,
            throttle: 0,
            nextdate: 0,
            outdate: 0,
            update: 0,
            epoch: 0,
            timereceived: 0,
            timereachable: 0,
            leap: LeapIndicator::Unknown,
            stratum: protocol::MAXSTRAT,
            pmode: Mode::Reserved,
            precision: 0,
            rootdelay: 0.0,
            rootdisp: 0.0,
            refid: config.refid.unwrap_or(ReferenceId::INIT),
            reftime: NtpTimestamp::ZERO,
            aorg: NtpTimestamp::ZERO,
            rec: NtpTimestamp::ZERO,
            dst: NtpTimestamp::ZERO,
            xmt: NtpTimestamp::ZERO,
            offset: 0.0,
            delay: 0.0,
            disp: protocol::MAXDISP,
            jitter: 0.0,
            filter: ClockFilter::new(),
            status: SelectStatus::Reject,
            flash: Flash::empty(),
            events: EventCounter::default(),
            counters: PeerCounters::default(),
        }
    }

    /// Reset the association to its initial state.
    ///
    /// Flags, addressing, configuration and counters survive. A non-refclock
    /// peer drops back to leap unknown, stratum 16 and a reference id of
    /// `kiss`. The first transmission is scheduled `spread` seconds out.
    pub(crate) fn clear(&mut self, kiss: ReferenceId, now: u64, precision: i8, spread: u64) {
        self.reach = 0;
        self.unreach = 0;
        self.burst = 0;
        self.retry = 0;
        self.throttle = 0;
        self.epoch = 0;
        self.timereceived = 0;
        self.timereachable = 0;
        self.aorg = NtpTimestamp::ZERO;
        self.rec = NtpTimestamp::ZERO;
        self.dst = NtpTimestamp::ZERO;
        self.xmt = NtpTimestamp::ZERO;
        self.reftime = NtpTimestamp::ZERO;
        self.offset = 0.0;
        self.delay = 0.0;
        self.rootdelay = 0.0;
        self.rootdisp = 0.0;
        self.pmode = Mode::Reserved;
        self.precision = 0;
        self.status = SelectStatus::Reject;
        self.flash = Flash::empty();

        self.ppoll = self.maxpoll;
        self.hpoll = self.minpoll;
        self.disp = protocol::MAXDISP;
        self.jitter = log2d(precision);
        self.filter.clear();
        if !self.flags.contains(PeerFlags::REFCLOCK) {
            self.leap = LeapIndicator::Unknown;
            self.stratum = protocol::MAXSTRAT;
            self.refid = kiss;
        }

        self.update = now;
        self.outdate = now;
        self.nextdate = now + spread;
        debug!(
            peer = %self.addr,
            associd = self.associd,
            refid = %kiss,
            next = self.nextdate,
            "peer cleared"
        );
    }

    /// Synchronization distance to the primary reference, at least `mindisp`.
    pub(crate) fn root_distance(&self, now: u64, mindisp: f64) -> f64 {
        let age = now.saturating_sub(self.update) as f64;
        let distance = (self.delay + self.rootdelay) / 2.0
            + self.disp
            + self.rootdisp
            + PHI * age
            + self.jitter;
        distance.max(mindisp)
    }

    /// Recompute the fitness bits and return them; empty means fit.
    pub(crate) fn unfit(&mut self, fit: &Fitness) -> Flash {
        let mut rval = Flash::empty();

        if self.leap == LeapIndicator::Unknown
            || self.stratum < fit.floor
            || self.stratum >= fit.ceiling
        {
            rval |= Flash::TEST10;
        }

        if !self.flags.contains(PeerFlags::REFCLOCK)
            && self.root_distance(fit.now, fit.mindisp)
                >= fit.maxdist + PHI * log2d(self.hpoll)
        {
            rval |= Flash::TEST11;
        }

        // orphans all carry the loopback refid and are never loops
        let ours = match self.local {
            Some(local) => Some(ReferenceId::from_addr(local.ip())),
            None => (fit.refid != ReferenceId::LOOPBACK).then_some(fit.refid),
        };
        if self.stratum > 1 && ours == Some(self.refid) {
            rval |= Flash::TEST12;
        }

        if self.reach == 0 || self.flags.contains(PeerFlags::NOSELECT) {
            rval |= Flash::TEST13;
        }

        self.flash.remove(Flash::PEER_MASK);
        self.flash.insert(rval);
        rval
    }

    /// Record an event and emit it through `tracing`.
    pub(crate) fn report(&mut self, event: PeerEvent, detail: &str) {
        self.events.record(event as u8);
        match event {
            PeerEvent::Unreachable | PeerEvent::Auth | PeerEvent::Deny | PeerEvent::Rate => warn!(
                peer = %self.addr,
                associd = self.associd,
                event = ?event,
                detail,
                "peer event"
            ),
            PeerEvent::Popcorn | PeerEvent::Reply => debug!(
                peer = %self.addr,
                associd = self.associd,
                event = ?event,
                detail,
                "peer event"
            ),
            _ => info!(
                peer = %self.addr,
                associd = self.associd,
                event = ?event,
                detail,
                "peer event"
            ),
        }
    }

    /// Status bits for the peer status word.
    fn status_bits(&self) -> u8 {
        let mut bits = 0;
        if self.flags.contains(PeerFlags::CONFIG) {
            bits |= peer_bits::CONFIG;
        }
        if self.key_id.is_some() {
            bits |= peer_bits::AUTHENABLE;
        }
        if self.flags.contains(PeerFlags::AUTHENTIC) {
            bits |= peer_bits::AUTHENTIC;
        }
        if self.reach != 0 {
            bits |= peer_bits::REACH;
        }
        if self.cast.is_transmit_only() {
            bits |= peer_bits::BCAST;
        }
        bits
    }

    /// The 16-bit peer status word.
    pub fn status_word(&self) -> u16 {
        status::peer_status_word(self.status_bits(), self.status, &self.events)
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Local address, once known.
    pub fn local(&self) -> Option<SocketAddr> {
        self.local
    }

    /// Association mode on this side.
    pub fn host_mode(&self) -> HostMode {
        self.hmode
    }

    /// Addressing kind.
    pub fn cast(&self) -> CastKind {
        self.cast
    }

    /// Association flags.
    pub fn flags(&self) -> PeerFlags {
        self.flags
    }

    /// Association id.
    pub fn associd(&self) -> u16 {
        self.associd
    }

    /// Reachability register.
    pub fn reach(&self) -> u8 {
        self.reach
    }

    /// Current host poll exponent.
    pub fn hpoll(&self) -> i8 {
        self.hpoll
    }

    /// Peer's advertised poll exponent.
    pub fn ppoll(&self) -> i8 {
        self.ppoll
    }

    /// Poll exponent bounds.
    pub fn poll_range(&self) -> (i8, i8) {
        (self.minpoll, self.maxpoll)
    }

    /// Engine time (seconds) of the next transmission.
    pub fn next_poll(&self) -> u64 {
        self.nextdate
    }

    /// Remaining burst packets.
    pub fn burst(&self) -> u8 {
        self.burst
    }

    /// Leap indicator from the last valid packet.
    pub fn leap(&self) -> LeapIndicator {
        self.leap
    }

    /// Stratum (16 when unsynchronized).
    pub fn stratum(&self) -> u8 {
        self.stratum
    }

    /// Reference id or kiss code.
    pub fn refid(&self) -> ReferenceId {
        self.refid
    }

    /// Root delay advertised by the peer (s).
    pub fn root_delay(&self) -> f64 {
        self.rootdelay
    }

    /// Root dispersion advertised by the peer (s).
    pub fn root_dispersion(&self) -> f64 {
        self.rootdisp
    }

    /// Filtered offset (s).
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Filtered round-trip delay (s).
    pub fn delay(&self) -> f64 {
        self.delay
    }

    /// Filter dispersion (s).
    pub fn dispersion(&self) -> f64 {
        self.disp
    }

    /// Filter jitter (s).
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Engine time of the sample behind the current estimate.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The clock filter register.
    pub fn filter(&self) -> &ClockFilter {
        &self.filter
    }

    /// Selection status from the last selection pass.
    pub fn select_status(&self) -> SelectStatus {
        self.status
    }

    /// Test bits.
    pub fn flash(&self) -> Flash {
        self.flash
    }

    /// Per-peer statistics.
    pub fn counters(&self) -> PeerCounters {
        self.counters
    }

    /// Event history.
    pub fn events(&self) -> EventCounter {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;

    fn peer() -> Peer {
        let mut p = Peer::new(&PeerConfig::server("192.0.2.1:123".parse().unwrap()), 1);
        p.clear(ReferenceId::INIT, 100, -20, 0);
        p
    }

    fn fitness(now: u64) -> Fitness {
        Fitness {
            now,
            floor: 0,
            ceiling: 16,
            maxdist: 1.5,
            mindisp: 0.001,
            refid: ReferenceId::INIT,
        }
    }

    fn make_fit(p: &mut Peer) {
        p.leap = LeapIndicator::NoWarning;
        p.stratum = 2;
        p.reach = 0x01;
        p.disp = 0.01;
        p.jitter = 0.001;
        p.delay = 0.02;
    }

    #[test]
    fn test_clear_resets_state() {
        let mut p = peer();
        p.reach = 0xff;
        p.offset = 0.5;
        p.counters.received = 7;
        p.clear(ReferenceId::STEP, 200, -20, 3);
        assert_eq!(p.reach, 0);
        assert_eq!(p.offset, 0.0);
        assert_eq!(p.disp, protocol::MAXDISP);
        assert_eq!(p.refid, ReferenceId::STEP);
        assert_eq!(p.stratum, 16);
        assert_eq!(p.leap, LeapIndicator::Unknown);
        assert_eq!(p.hpoll, p.minpoll);
        assert_eq!(p.ppoll, p.maxpoll);
        assert_eq!(p.nextdate, 203);
        assert_eq!(p.counters.received, 7);
        assert!((p.jitter - 2f64.powi(-20)).abs() < 1e-12);
    }

    #[test]
    fn test_clear_keeps_refclock_identity() {
        let cfg = PeerConfig::refclock("127.127.20.0:123".parse().unwrap(), ReferenceId(*b"GPS\0"));
        let mut p = Peer::new(&cfg, 2);
        p.stratum = 0;
        p.clear(ReferenceId::INIT, 0, -20, 0);
        assert_eq!(p.refid, ReferenceId(*b"GPS\0"));
        assert_eq!(p.stratum, 0);
    }

    #[test]
    fn test_root_distance_floor() {
        let mut p = peer();
        p.disp = 0.0;
        p.jitter = 0.0;
        assert_eq!(p.root_distance(100, 0.001), 0.001);
    }

    #[test]
    fn test_root_distance_ages() {
        let mut p = peer();
        p.disp = 0.1;
        p.jitter = 0.0;
        p.delay = 0.2;
        p.rootdelay = 0.2;
        p.rootdisp = 0.05;
        let d = p.root_distance(100 + 1000, 0.001);
        let expected = 0.2 + 0.1 + 0.05 + PHI * 1000.0;
        assert!((d - expected).abs() < 1e-12);
    }

    #[test]
    fn test_fresh_peer_unfit() {
        let mut p = peer();
        let bits = p.unfit(&fitness(100));
        assert!(bits.intersects(Flash::TEST10));
        assert!(bits.intersects(Flash::TEST11));
        assert!(bits.intersects(Flash::TEST13));
    }

    #[test]
    fn test_fit_peer() {
        let mut p = peer();
        make_fit(&mut p);
        assert!(p.unfit(&fitness(100)).is_empty());
    }

    #[test]
    fn test_stratum_band() {
        let mut p = peer();
        make_fit(&mut p);
        let mut fit = fitness(100);
        fit.ceiling = 2;
        assert!(p.unfit(&fit).intersects(Flash::TEST10));
    }

    #[test]
    fn test_loop_detected() {
        let mut p = peer();
        make_fit(&mut p);
        p.local = Some("10.0.0.5:123".parse().unwrap());
        p.refid = ReferenceId([10, 0, 0, 5]);
        assert!(p.unfit(&fitness(100)).intersects(Flash::TEST12));
        p.stratum = 1;
        assert!(!p.unfit(&fitness(100)).intersects(Flash::TEST12));
    }

    #[test]
    fn test_loop_falls_back_to_system_refid() {
        let mut p = peer();
        make_fit(&mut p);
        p.local = None;
        p.refid = ReferenceId([192, 0, 2, 77]);
        let mut fit = fitness(100);
        assert!(!p.unfit(&fit).intersects(Flash::TEST12));
        fit.refid = ReferenceId([192, 0, 2, 77]);
        assert!(p.unfit(&fit).intersects(Flash::TEST12));

        // orphans share the loopback refid
        p.refid = ReferenceId::LOOPBACK;
        fit.refid = ReferenceId::LOOPBACK;
        assert!(!p.unfit(&fit).intersects(Flash::TEST12));
    }

    #[test]
    fn test_noselect_unfit() {
        let mut p = peer();
        make_fit(&mut p);
        p.flags.insert(PeerFlags::NOSELECT);
        assert_eq!(p.unfit(&fitness(100)), Flash::TEST13);
    }

    #[test]
    fn test_unfit_preserves_packet_bits() {
        let mut p = peer();
        make_fit(&mut p);
        p.flash.insert(Flash::TEST2);
        p.unfit(&fitness(100));
        assert!(p.flash.intersects(Flash::TEST2));
    }

    #[test]
    fn test_status_word_bits() {
        let mut p = peer();
        p.reach = 1;
        p.status = SelectStatus::Candidate;
        let word = p.status_word();
        assert_eq!(word >> 8, u16::from(peer_bits::CONFIG | peer_bits::REACH) | 4);
    }

    #[test]
    fn test_report_counts_events() {
        let mut p = peer();
        p.report(PeerEvent::Reachable, "");
        p.report(PeerEvent::Reachable, "");
        assert_eq!(p.events.last(), PeerEvent::Reachable as u8);
        assert_eq!(p.events.count(), 2);
    }

    #[test]
    fn test_flags_ops() {
        let mut f = PeerFlags::CONFIG | PeerFlags::PREFER;
        assert!(f.contains(PeerFlags::PREFER));
        assert!(f.intersects(PeerFlags::PREFER | PeerFlags::TRUE));
        f.set(PeerFlags::PREFER, false);
        assert!(!f.contains(PeerFlags::PREFER));
    }
}
