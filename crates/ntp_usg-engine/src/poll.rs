// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Poll scheduling and transmission.
//!
//! Each association carries its own next-transmit time in engine seconds.
//! [`Engine::timer`](crate::Engine::timer) calls [`Engine::transmit`] for
//! every peer that is due; transmit shifts the reachability register, backs
//! off unreachable peers, runs bursts, and queues the outgoing packet as a
//! [`Transmission`]. [`Peer::poll_update`] then picks the next time from the
//! poll exponent, a small random spread, and the headway throttle.

use std::net::SocketAddr;

use ntp_proto::protocol::{
    self, ConstPackedSizeBytes, Frame, LeapIndicator, Packet, ShortFormat, Stratum, Trailer,
    Version,
};
use rand::Rng;
use tracing::{debug, trace};

use crate::config::MAX_TTL;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::filter::NTP_SHIFT;
use crate::peer::{CastKind, Flash, HostMode, Peer, PeerFlags};
use crate::status::{PeerEvent, SelectStatus};
use crate::table::PeerHandle;

/// Packets sent per burst retry.
pub const NTP_RETRY: u8 = 3;
/// Silent polls before backing off.
pub const NTP_UNREACH: u32 = 10;
/// Packets in an initial burst.
pub const NTP_IBURST: u8 = 6;
/// Minimum spacing between packets to one peer (s).
pub const NTP_MINPKT: u64 = 2;
/// Spacing of reference clock burst samples (s).
const RESP_DELAY: u64 = 1;

/// An outbound datagram.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transmission {
    /// Encoded packet, trailer included.
    pub data: Vec<u8>,
    /// Destination address.
    pub dest: SocketAddr,
    /// Local address to send from, when bound to one.
    pub local: Option<SocketAddr>,
    /// IP hop limit for broadcast and manycast packets.
    pub ttl: Option<u8>,
}

/// Hop limit for manycast/broadcast TTL index `index`.
pub fn hop_limit(index: u8) -> u8 {
    let index = u16::from(index.min(MAX_TTL - 1));
    ((index + 1) * 256 / u16::from(MAX_TTL)).min(255) as u8
}

/// Encode a frame into an owned buffer.
pub(crate) fn encode_frame(frame: &Frame) -> Result<Vec<u8>, EngineError> {
    let mut buf = [0u8; Packet::PACKED_SIZE_BYTES + protocol::MAX_MAC_LEN];
    let len = frame.encode(&mut buf)?;
    Ok(buf[..len].to_vec())
}

impl Peer {
    /// Schedule the next transmission.
    ///
    /// `mpoll` becomes the host poll exponent, clamped to the peer's bounds.
    /// A burst in progress only reschedules a transmission that is already
    /// due.
    pub(crate) fn poll_update<R: Rng + ?Sized>(&mut self, mpoll: i8, now: u64, rng: &mut R) {
        let hpoll = if self.cast == CastKind::BroadcastEphemeral {
            self.minpoll
        } else {
            mpoll.clamp(self.minpoll, self.maxpoll)
        };
        self.hpoll = hpoll;

        let headway = (self.throttle - (NTP_SHIFT as i64 - 1) * (1i64 << self.minpoll))
            .max(NTP_MINPKT as i64);
        let earliest = now + headway as u64;
        let refclock = self.flags.contains(PeerFlags::REFCLOCK);

        if self.burst > 0 {
            if self.nextdate > now {
                return;
            }
            self.nextdate = if refclock { now + RESP_DELAY } else { earliest };
        } else {
            let exp = if self.retry > 0 {
                self.minpoll
            } else if self.reach == 0 {
                hpoll
            } else {
                self.ppoll.min(hpoll)
            };
            let interval = if refclock {
                1u64 << exp
            } else {
                // 2^exp plus up to 255/4096 of it
                ((0x1000 | u64::from(rng.random::<u8>())) << exp) >> 12
            };
            self.nextdate = (self.outdate + interval).max(earliest);
            if self.throttle > 1i64 << self.minpoll {
                self.nextdate += NTP_MINPKT;
            }
        }
        trace!(
            peer = %self.addr,
            hpoll = self.hpoll,
            next = self.nextdate,
            throttle = self.throttle,
            "poll update"
        );
    }

    /// Preemption score: higher is more useful to keep.
    pub(crate) fn score(&self) -> u32 {
        let mut score = 0;
        for test in [Flash::TEST10, Flash::TEST13, Flash::TEST12, Flash::TEST11] {
            if !self.flash.intersects(test) {
                score += 1;
            }
        }
        if matches!(
            self.status,
            SelectStatus::Outlier
                | SelectStatus::Candidate
                | SelectStatus::SystemPeer
                | SelectStatus::PpsPeer
        ) {
            score += 1;
        }
        if self.status != SelectStatus::Excess {
            score += 1;
        }
        score
    }
}

impl Engine {
    pub(crate) fn poll_update(&mut self, handle: PeerHandle, mpoll: i8) {
        let now = self.current_time;
        if let Some(peer) = self.table.get_mut(handle) {
            peer.poll_update(mpoll, now, &mut self.rng);
        }
    }

    /// Whether `handle` has the lowest nonzero score among the preemptible
    /// associations.
    pub(crate) fn score_all(&self, handle: PeerHandle) -> bool {
        let Some(peer) = self.table.get(handle) else {
            return false;
        };
        let mine = peer.score();
        let lowest = self
            .table
            .iter()
            .filter(|(_, p)| p.flags.contains(PeerFlags::PREEMPT))
            .map(|(_, p)| p.score())
            .min()
            .unwrap_or(mine);
        mine == lowest && lowest != 0
    }

    /// Poll timer expiry for one association.
    pub(crate) fn transmit(&mut self, handle: PeerHandle) -> Result<(), EngineError> {
        let now = self.current_time;
        let associations = self.table.len();
        let fit = self.fitness();
        let ctx = self.filter_context();
        let Some(peer) = self.table.get_mut(handle) else {
            return Ok(());
        };
        let mut hpoll = peer.hpoll;

        match peer.cast {
            CastKind::Broadcast => {
                peer.outdate = now;
                if self.sys.leap != LeapIndicator::Unknown {
                    self.peer_xmit(handle)?;
                }
                self.poll_update(handle, hpoll);
                return Ok(());
            }
            CastKind::ManycastClient => {
                peer.outdate = now;
                let mut send = false;
                if peer.unreach > self.cfg.beacon {
                    peer.unreach = 0;
                    peer.ttl = 0;
                    send = true;
                } else if self.sys.survivors < self.cfg.minclock
                    || associations < self.cfg.maxclock
                {
                    if peer.ttl < self.cfg.ttl_max {
                        peer.ttl += 1;
                    }
                    send = true;
                }
                peer.unreach += 1;
                if send {
                    self.peer_xmit(handle)?;
                }
                self.poll_update(handle, hpoll);
                return Ok(());
            }
            _ => {}
        }

        if peer.burst == 0 {
            let oreach = peer.reach;
            peer.outdate = now;
            peer.unreach += 1;
            peer.reach <<= 1;
            if peer.reach & 0x0f == 0
                && peer.clock_filter(0.0, 0.0, protocol::MAXDISP, ctx).reselect()
            {
                self.clock_select()?;
            }
            let Some(peer) = self.table.get_mut(handle) else {
                return Ok(());
            };

            if peer.reach == 0 {
                if oreach != 0 {
                    peer.report(PeerEvent::Unreachable, "");
                }
                if peer.flags.contains(PeerFlags::IBURST) && peer.retry == 0 {
                    peer.retry = NTP_RETRY;
                }
            } else {
                hpoll = self.sys.poll;
                if !(peer.flags.contains(PeerFlags::PREEMPT) && peer.hmode == HostMode::Client) {
                    peer.unreach = 0;
                }
                if peer.flags.contains(PeerFlags::BURST)
                    && peer.retry == 0
                    && peer.unfit(&fit).is_empty()
                {
                    peer.retry = NTP_RETRY;
                }
            }

            if peer.unreach >= NTP_UNREACH {
                hpoll += 1;
                if peer.flags.contains(PeerFlags::PREEMPT) {
                    peer.report(PeerEvent::Restart, "timeout");
                    let client = peer.hmode == HostMode::Client;
                    if !client
                        || (associations > self.cfg.maxclock && self.score_all(handle))
                    {
                        self.unpeer(handle);
                        return Ok(());
                    }
                }
            }
        } else {
            peer.burst -= 1;
        }

        let Some(peer) = self.table.get_mut(handle) else {
            return Ok(());
        };
        if peer.retry > 0 {
            peer.retry -= 1;
        }
        // reference clocks are read, not polled over the wire
        if peer.hmode != HostMode::BroadcastClient && !peer.flags.contains(PeerFlags::REFCLOCK) {
            self.peer_xmit(handle)?;
        }
        self.poll_update(handle, hpoll);
        Ok(())
    }

    /// Build, sign and queue a packet for `handle`.
    pub(crate) fn peer_xmit(&mut self, handle: PeerHandle) -> Result<(), EngineError> {
        let xmt = self.clock.now();
        let sys = &self.sys;
        let Some(peer) = self.table.get_mut(handle) else {
            return Ok(());
        };
        let Some(mode) = peer.hmode.wire_mode() else {
            return Ok(());
        };

        let header = Packet {
            leap_indicator: sys.leap,
            version: Version::new(peer.version).unwrap_or_default(),
            mode,
            stratum: Stratum::from_peer(sys.stratum),
            poll: peer.hpoll,
            precision: sys.precision,
            root_delay: ShortFormat::from_seconds_f64(sys.rootdelay),
            root_dispersion: ShortFormat::from_seconds_f64(sys.rootdisp),
            reference_id: sys.refid,
            reference_timestamp: sys.reftime,
            origin_timestamp: peer.rec,
            receive_timestamp: peer.dst,
            transmit_timestamp: xmt,
        };
        let mut frame = Frame::new(header);
        if let Some(key_id) = peer.key_id {
            let unsigned = encode_frame(&frame)?;
            match self.auth.sign(key_id, &unsigned) {
                Some(mac) => frame.trailer = Trailer::Mac(mac),
                None => {
                    peer.report(PeerEvent::Auth, "no key");
                    peer.flash.insert(Flash::TEST5);
                    peer.counters.badauth += 1;
                    return Ok(());
                }
            }
        }
        let data = encode_frame(&frame)?;

        peer.aorg = xmt;
        peer.counters.sent += 1;
        peer.throttle += (1i64 << peer.minpoll) - 2;
        let ttl = peer.cast.is_transmit_only().then(|| hop_limit(peer.ttl));
        debug!(
            peer = %peer.addr,
            mode = ?mode,
            poll = peer.hpoll,
            len = data.len(),
            ttl = ?ttl,
            "transmit"
        );
        self.outbox.push(Transmission {
            data,
            dest: peer.addr,
            local: peer.local,
            ttl,
        });
        Ok(())
    }
}
