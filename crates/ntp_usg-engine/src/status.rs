// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Status words and event codes.
//!
//! These are the values a management front end reports for each association
//! and for the system as a whole. The layouts follow the NTPv4 control
//! protocol so existing tooling can decode them, but no wire format for the
//! management channel is defined here.

use std::fmt;

use ntp_proto::protocol::LeapIndicator;

/// Maximum value of the 4-bit event counter.
pub const MAX_EVENT_COUNT: u8 = 15;

/// Synchronization source reported in the system status word when a system
/// peer is selected.
pub const SYNC_SOURCE_NTP: u8 = 6;

/// Association-level events.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PeerEvent {
    /// Association mobilized.
    Mobilize = 1,
    /// Association demobilized.
    Demobilize = 2,
    /// Peer became unreachable.
    Unreachable = 3,
    /// Peer became reachable.
    Reachable = 4,
    /// Association restarted.
    Restart = 5,
    /// No reply to the last transmission.
    Reply = 6,
    /// RATE kiss-o'-death received.
    Rate = 7,
    /// DENY or RSTR kiss-o'-death received.
    Deny = 8,
    /// Leap second armed by this peer's vote.
    LeapArmed = 9,
    /// New system peer selected.
    NewPeer = 10,
    /// Reference clock event.
    Clock = 11,
    /// Authentication failure.
    Auth = 12,
    /// Popcorn spike suppressed.
    Popcorn = 13,
    /// Interleaved mode requested (not supported).
    Interleave = 14,
    /// Interleaved mode error.
    InterleaveError = 15,
}

/// System-level events.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SystemEvent {
    /// Unspecified.
    Unspecified = 0,
    /// Frequency not set.
    FreqNotSet = 1,
    /// Frequency set.
    FreqSet = 2,
    /// Spike detected.
    Spike = 3,
    /// Frequency mode change.
    FreqMode = 4,
    /// Clock synchronized.
    ClockSync = 5,
    /// Engine restarted.
    Restart = 6,
    /// Fatal condition (panic threshold).
    PanicStop = 7,
    /// No system peer.
    NoSystemPeer = 8,
    /// Leap second armed.
    LeapArmed = 9,
    /// Leap second disarmed.
    LeapDisarmed = 10,
    /// Leap second occurred.
    LeapEvent = 11,
    /// Clock stepped.
    ClockStep = 12,
}

/// Per-association selection state, as the low three bits of the peer
/// status word.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum SelectStatus {
    /// Failed the fitness tests.
    #[default]
    Reject = 0,
    /// Outside the intersection interval.
    Falseticker = 1,
    /// Discarded while the candidate list exceeded `maxclock`.
    Excess = 2,
    /// Discarded by the cluster algorithm.
    Outlier = 3,
    /// Survived clustering.
    Candidate = 4,
    /// The system peer.
    SystemPeer = 6,
    /// The PPS peer.
    PpsPeer = 7,
}

impl SelectStatus {
    /// Single-character tally code used by billboard displays.
    pub fn tally(self) -> char {
        match self {
            SelectStatus::Reject => ' ',
            SelectStatus::Falseticker => 'x',
            SelectStatus::Excess => '.',
            SelectStatus::Outlier => '-',
            SelectStatus::Candidate => '+',
            SelectStatus::SystemPeer => '*',
            SelectStatus::PpsPeer => 'o',
        }
    }
}

impl fmt::Display for SelectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectStatus::Reject => "reject",
            SelectStatus::Falseticker => "falseticker",
            SelectStatus::Excess => "excess",
            SelectStatus::Outlier => "outlier",
            SelectStatus::Candidate => "candidate",
            SelectStatus::SystemPeer => "sys.peer",
            SelectStatus::PpsPeer => "pps.peer",
        };
        f.write_str(name)
    }
}

/// Saturating counter of the most recent event code.
///
/// The count restarts whenever a different event is reported and stops at
/// [`MAX_EVENT_COUNT`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EventCounter {
    last: u8,
    count: u8,
}

impl EventCounter {
    /// Record an occurrence of `code`.
    pub fn record(&mut self, code: u8) {
        if self.last != code {
            self.last = code;
            self.count = 0;
        }
        if self.count < MAX_EVENT_COUNT {
            self.count += 1;
        }
    }

    /// The last reported event code.
    pub fn last(&self) -> u8 {
        self.last
    }

    /// How many times in a row it was reported.
    pub fn count(&self) -> u8 {
        self.count
    }

    /// Forget all events.
    pub fn reset(&mut self) {
        *self = EventCounter::default();
    }
}

/// Peer status bits (high byte of the peer status word).
pub mod peer_bits {
    /// Statically configured.
    pub const CONFIG: u8 = 0x80;
    /// Authentication enabled.
    pub const AUTHENABLE: u8 = 0x40;
    /// Last packet was authentic.
    pub const AUTHENTIC: u8 = 0x20;
    /// Reachable.
    pub const REACH: u8 = 0x10;
    /// Broadcast association.
    pub const BCAST: u8 = 0x08;
}

/// Assemble a peer status word.
pub fn peer_status_word(bits: u8, select: SelectStatus, events: &EventCounter) -> u16 {
    let status = (bits & 0xf8) | select as u8;
    (status as u16) << 8 | ((events.count() & 0xf) as u16) << 4 | (events.last() & 0xf) as u16
}

/// Assemble a system status word.
pub fn system_status_word(leap: LeapIndicator, synchronized: bool, events: &EventCounter) -> u16 {
    let source = if synchronized { SYNC_SOURCE_NTP } else { 0 };
    (leap as u16) << 14
        | ((source & 0x3f) as u16) << 8
        | ((events.count() & 0xf) as u16) << 4
        | (events.last() & 0xf) as u16
}
