// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Inbound datagram pipeline.
//!
//! [`Engine::receive`] screens a datagram cheapest test first: source port
//! and length, access restrictions, version, trailer format, rate limiting,
//! association matching and authentication. What survives either gets a
//! stateless reply, mobilizes a new association, or is checked against the
//! association it belongs to and handed to packet processing.
//!
//! Every decision is returned as a [`ReceiveOutcome`]; only a clock panic
//! raised by the resulting clock update is an error.

use std::net::{IpAddr, SocketAddr};

use ntp_proto::NtpTimestamp;
use ntp_proto::protocol::{
    self, ConstPackedSizeBytes, Frame, KissOfDeath, LeapIndicator, Mode, Packet, ReferenceId,
    ShortFormat, Stratum, Trailer, Version,
};
use rand::Rng;
use tracing::{debug, trace};

use crate::auth::{AuthStatus, AuthVerdict};
use crate::config::{NTP_MAXDPOLL, PeerConfig};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::filter::NTP_SHIFT;
use crate::metrics::SystemCounters;
use crate::peer::{CastKind, Flash, HostMode, PeerFlags};
use crate::poll::{Transmission, encode_frame};
use crate::restrict::Restrictions;
use crate::status::PeerEvent;
use crate::table::{MatchCode, PeerHandle};

/// A datagram as delivered by the socket layer.
#[derive(Clone, Copy, Debug)]
pub struct Datagram<'a> {
    /// Raw payload.
    pub data: &'a [u8],
    /// Sender address.
    pub source: SocketAddr,
    /// Local address the datagram arrived on. A multicast address marks a
    /// manycast solicitation.
    pub local: SocketAddr,
    /// Local time of arrival.
    pub recv_time: NtpTimestamp,
    /// Set by the caller's rate limiter when the source exceeded its
    /// allowance.
    pub limited: bool,
}

impl<'a> Datagram<'a> {
    /// A datagram that is within its rate allowance.
    pub fn new(
        data: &'a [u8],
        source: SocketAddr,
        local: SocketAddr,
        recv_time: NtpTimestamp,
    ) -> Self {
        Datagram {
            data,
            source,
            local,
            recv_time,
            limited: false,
        }
    }

    /// Mark the datagram as over its rate allowance.
    pub fn limited(mut self, limited: bool) -> Self {
        self.limited = limited;
        self
    }

    /// The unicast address the datagram arrived on. `None` for a wildcard
    /// bind, a multicast group or the limited broadcast address.
    pub fn interface(&self) -> Option<SocketAddr> {
        let ip = self.local.ip();
        let broadcast = match ip {
            IpAddr::V4(v4) => v4.is_broadcast(),
            IpAddr::V6(_) => false,
        };
        (!ip.is_unspecified() && !ip.is_multicast() && !broadcast).then_some(self.local)
    }
}

/// What [`Engine::receive`] did with a datagram.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReceiveOutcome {
    /// Accepted by an existing association.
    Processed,
    /// Answered without keeping state (server reply, kiss-o'-death, NAK).
    Replied,
    /// Mobilized a new association.
    Mobilized(PeerHandle),
    /// Discarded.
    Dropped(DropReason),
}

/// Why a datagram was discarded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DropReason {
    /// Short, malformed, or from a privileged port.
    BadLength,
    /// Refused by an access restriction.
    Restricted,
    /// Acceptable but not wanted: no matching association, or a management
    /// request.
    Declined,
    /// Source is over its rate allowance and no kiss-o'-death was sent.
    RateLimited,
    /// Authentication failed.
    BadAuth,
    /// Replay of the last packet from this peer.
    Duplicate,
    /// The peer could not authenticate us.
    CryptoNak,
    /// The peer sent a kiss-o'-death.
    KissOfDeath(KissOfDeath),
    /// A packet sanity test failed; the bits are the peer's flash word.
    Sanity(Flash),
}

fn dropped(source: SocketAddr, reason: DropReason) -> ReceiveOutcome {
    trace!(%source, ?reason, "datagram dropped");
    ReceiveOutcome::Dropped(reason)
}

impl Engine {
    /// Run one inbound datagram through the pipeline.
    pub fn receive(&mut self, dg: &Datagram<'_>) -> Result<ReceiveOutcome, EngineError> {
        self.refresh_config();
        let counters = self.counters.clone();
        SystemCounters::inc(&counters.received);
        let src = dg.source;

        if src.port() < protocol::PORT || dg.data.len() < Packet::PACKED_SIZE_BYTES {
            SystemCounters::inc(&counters.badlength);
            return Ok(dropped(src, DropReason::BadLength));
        }

        let mut restrict = self.cfg.restrict.lookup(&src.ip());
        if dg.limited {
            restrict |= Restrictions::LIMITED;
        }
        if restrict.contains(Restrictions::IGNORE) {
            SystemCounters::inc(&counters.restricted);
            return Ok(dropped(src, DropReason::Restricted));
        }

        let version = (dg.data[0] >> 3) & 0x07;
        let mut pmode = Mode::from_bits(dg.data[0]);
        if pmode.is_management() {
            // the management protocol is not served
            if restrict.contains(Restrictions::NOQUERY) {
                SystemCounters::inc(&counters.restricted);
                return Ok(dropped(src, DropReason::Restricted));
            }
            SystemCounters::inc(&counters.declined);
            return Ok(dropped(src, DropReason::Declined));
        }
        if restrict.contains(Restrictions::DONTSERVE) {
            SystemCounters::inc(&counters.restricted);
            return Ok(dropped(src, DropReason::Restricted));
        }

        if version == protocol::VERSION {
            SystemCounters::inc(&counters.newversion);
        } else if (protocol::OLD_VERSION..protocol::VERSION).contains(&version)
            && !restrict.contains(Restrictions::VERSION)
        {
            SystemCounters::inc(&counters.oldversion);
        } else {
            SystemCounters::inc(&counters.badlength);
            return Ok(dropped(src, DropReason::BadLength));
        }
        if pmode == Mode::Reserved {
            if version != protocol::OLD_VERSION {
                SystemCounters::inc(&counters.badlength);
                return Ok(dropped(src, DropReason::BadLength));
            }
            pmode = Mode::Client;
        }

        let frame = match Frame::parse(dg.data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%src, error = %e, "malformed datagram");
                SystemCounters::inc(&counters.badlength);
                return Ok(dropped(src, DropReason::BadLength));
            }
        };
        let has_mac = matches!(frame.trailer, Trailer::Mac(_));
        let dont_trust = restrict.contains(Restrictions::DONTTRUST);
        if !has_mac && dont_trust {
            SystemCounters::inc(&counters.restricted);
            return Ok(dropped(src, DropReason::Restricted));
        }

        if restrict.contains(Restrictions::LIMITED) {
            SystemCounters::inc(&counters.limitrejected);
            if !restrict.contains(Restrictions::KOD)
                || matches!(pmode, Mode::Broadcast | Mode::Server)
            {
                return Ok(dropped(src, DropReason::RateLimited));
            }
            let reply = if pmode == Mode::Client {
                Mode::Server
            } else {
                Mode::SymmetricActive
            };
            let key_id = frame.trailer.key_id().unwrap_or(0);
            self.fast_xmit(dg, &frame, reply, key_id, true)?;
            SystemCounters::inc(&counters.kodsent);
            return Ok(ReceiveOutcome::Replied);
        }

        let pkt = frame.header;
        let (code, matched) = self
            .table
            .match_association(src, pmode, pkt.origin_timestamp);
        let verdict = self.verify(dg, &frame);
        let skeyid = match frame.trailer {
            Trailer::Mac(mac) => mac.key_id(),
            _ => 0,
        };
        // mobilization needs authentication when the system or the
        // restriction entry asks for it
        let mobilize_auth = self.cfg.authenticate
            || restrict.contains(Restrictions::NOPEER)
            || dont_trust;
        trace!(%src, mode = ?pmode, ?code, ?verdict, "association match");

        let mut mobilized = None;
        let handle = match code {
            MatchCode::Process => match matched {
                Some(handle) => handle,
                None => {
                    SystemCounters::inc(&counters.declined);
                    return Ok(dropped(src, DropReason::Declined));
                }
            },

            MatchCode::FastReply => {
                if dg.local.ip().is_multicast() {
                    // manycast solicitation: answer only if we would make a
                    // better server than the one the client already has
                    if !self.cfg.manycast_server
                        || self.sys.leap == LeapIndicator::Unknown
                        || self.sys.stratum >= pkt.stratum.to_peer()
                        || pkt.reference_id == ReferenceId::from_addr(dg.local.ip())
                    {
                        SystemCounters::inc(&counters.declined);
                        return Ok(dropped(src, DropReason::Declined));
                    }
                    if !verdict.permits(dont_trust) {
                        SystemCounters::inc(&counters.restricted);
                        return Ok(dropped(src, DropReason::Restricted));
                    }
                    self.fast_xmit(dg, &frame, Mode::Server, skeyid, false)?;
                    return Ok(ReceiveOutcome::Replied);
                }
                if verdict.permits(dont_trust) {
                    self.fast_xmit(dg, &frame, Mode::Server, skeyid, false)?;
                    return Ok(ReceiveOutcome::Replied);
                }
                if verdict == AuthVerdict::Error {
                    self.fast_xmit(dg, &frame, Mode::Server, 0, false)?;
                    SystemCounters::inc(&counters.badauth);
                    return Ok(dropped(src, DropReason::BadAuth));
                }
                SystemCounters::inc(&counters.restricted);
                return Ok(dropped(src, DropReason::Restricted));
            }

            MatchCode::Manycast => {
                if !verdict.permits(mobilize_auth) {
                    SystemCounters::inc(&counters.restricted);
                    return Ok(dropped(src, DropReason::Restricted));
                }
                let Some(solicit) = self
                    .table
                    .find_manycast(pkt.origin_timestamp)
                    .and_then(|h| self.table.get(h))
                else {
                    SystemCounters::inc(&counters.restricted);
                    return Ok(dropped(src, DropReason::Restricted));
                };
                let cast = CastKind::ManycastEphemeral;
                let mut config = PeerConfig::ephemeral(src, HostMode::Client, cast)
                    .poll(solicit.minpoll, solicit.maxpoll)
                    .version(version);
                config.local = dg.interface();
                config.flags = PeerFlags::PREEMPT;
                if solicit.flags.contains(PeerFlags::IBURST) {
                    config.flags |= PeerFlags::IBURST;
                }
                if skeyid != 0 {
                    config.key_id = Some(skeyid);
                }
                return Ok(match self.mobilize(&config) {
                    Ok(handle) => ReceiveOutcome::Mobilized(handle),
                    Err(e) => {
                        debug!(%src, error = %e, "manycast response declined");
                        SystemCounters::inc(&counters.declined);
                        dropped(src, DropReason::Declined)
                    }
                });
            }

            MatchCode::NewBroadcastClient => {
                if !self.cfg.bclient || !verdict.permits(mobilize_auth) {
                    SystemCounters::inc(&counters.restricted);
                    return Ok(dropped(src, DropReason::Restricted));
                }
                let poll = pkt.poll.clamp(protocol::MINPOLL, protocol::MAXPOLL);
                let direct = self.cfg.bdelay.is_some();
                let hmode = if direct {
                    HostMode::BroadcastClient
                } else {
                    HostMode::Client
                };
                let mut config = PeerConfig::ephemeral(src, hmode, CastKind::BroadcastEphemeral)
                    .poll(poll, poll)
                    .version(version);
                config.local = dg.interface();
                config.flags = if direct {
                    PeerFlags::PREEMPT
                } else {
                    // calibrate the broadcast delay with a client volley first
                    PeerFlags::BC_VOL | PeerFlags::IBURST | PeerFlags::PREEMPT
                };
                if skeyid != 0 {
                    config.key_id = Some(skeyid);
                }
                match self.mobilize(&config) {
                    Ok(handle) if direct => {
                        mobilized = Some(handle);
                        handle
                    }
                    Ok(handle) => return Ok(ReceiveOutcome::Mobilized(handle)),
                    Err(e) => {
                        debug!(%src, error = %e, "broadcast client declined");
                        SystemCounters::inc(&counters.restricted);
                        return Ok(dropped(src, DropReason::Restricted));
                    }
                }
            }

            MatchCode::NewPassive => {
                if !verdict.permits(mobilize_auth) {
                    if verdict == AuthVerdict::Error {
                        self.fast_xmit(dg, &frame, Mode::SymmetricActive, 0, false)?;
                        SystemCounters::inc(&counters.restricted);
                        return Ok(dropped(src, DropReason::BadAuth));
                    }
                    // unauthenticated symmetric peers get a stateless answer
                    self.fast_xmit(dg, &frame, Mode::SymmetricPassive, 0, false)?;
                    return Ok(ReceiveOutcome::Replied);
                }
                let his_stratum = pkt.stratum.to_peer();
                if pkt.leap_indicator != LeapIndicator::Unknown
                    && (his_stratum < self.cfg.floor || his_stratum >= self.cfg.ceiling)
                {
                    SystemCounters::inc(&counters.declined);
                    return Ok(dropped(src, DropReason::Declined));
                }
                let minpoll = pkt.poll.clamp(protocol::MINPOLL, NTP_MAXDPOLL);
                let mut config = PeerConfig::ephemeral(src, HostMode::Passive, CastKind::Unicast)
                    .poll(minpoll, NTP_MAXDPOLL)
                    .version(version);
                config.local = dg.interface();
                if skeyid != 0 {
                    config.key_id = Some(skeyid);
                }
                match self.mobilize(&config) {
                    Ok(handle) => {
                        mobilized = Some(handle);
                        handle
                    }
                    Err(e) => {
                        debug!(%src, error = %e, "passive association declined");
                        SystemCounters::inc(&counters.declined);
                        return Ok(dropped(src, DropReason::Declined));
                    }
                }
            }

            MatchCode::Error | MatchCode::NoMatch => {
                SystemCounters::inc(&counters.declined);
                return Ok(dropped(src, DropReason::Declined));
            }
        };

        let outcome = self.peer_checks(handle, dg, &frame, pmode, verdict, dont_trust)?;
        Ok(match mobilized {
            Some(handle) => ReceiveOutcome::Mobilized(handle),
            None => outcome,
        })
    }

    /// Replay, origin, authentication and kiss-o'-death checks against the
    /// matched association, then packet processing.
    fn peer_checks(
        &mut self,
        handle: PeerHandle,
        dg: &Datagram<'_>,
        frame: &Frame,
        pmode: Mode,
        verdict: AuthVerdict,
        dont_trust: bool,
    ) -> Result<ReceiveOutcome, EngineError> {
        let now = self.current_time;
        let precision = self.sys.precision;
        let src = dg.source;
        let pkt = &frame.header;
        let Some(peer) = self.table.get_mut(handle) else {
            return Ok(dropped(src, DropReason::Declined));
        };
        peer.counters.received += 1;
        peer.flash.remove(Flash::PACKET_MASK);

        if pkt.transmit_timestamp.is_zero() {
            peer.flash.insert(Flash::TEST3);
        } else if pkt.transmit_timestamp == peer.xmt {
            peer.flash.insert(Flash::TEST1);
            peer.counters.oldpkt += 1;
            return Ok(dropped(src, DropReason::Duplicate));
        } else if pmode != Mode::Broadcast {
            // A bogus packet still updates rec/xmt below so a crossed
            // symmetric exchange can resynchronize; the sanity check in
            // process_packet drops it.
            if pkt.origin_timestamp != peer.aorg {
                peer.counters.bogusorg += 1;
                peer.flash.insert(Flash::TEST2);
                debug!(peer = %src, "bogus origin timestamp");
            } else {
                peer.aorg = NtpTimestamp::ZERO;
            }
        }
        if pmode != Mode::Broadcast
            && (pkt.origin_timestamp.is_zero() || pkt.receive_timestamp.is_zero())
        {
            peer.flash.insert(Flash::TEST3);
        }
        peer.rec = pkt.transmit_timestamp;
        peer.dst = dg.recv_time;
        peer.xmt = pkt.transmit_timestamp;
        if peer.local.is_none() {
            peer.local = dg.interface();
        }

        let preempt = peer.flags.contains(PeerFlags::PREEMPT);
        if verdict == AuthVerdict::CryptoNak {
            peer.report(PeerEvent::Auth, "crypto-NAK");
            peer.flash.insert(Flash::TEST5);
            peer.counters.badauth += 1;
            if preempt {
                self.unpeer(handle);
            }
            return Ok(dropped(src, DropReason::CryptoNak));
        }

        let has_mac = matches!(frame.trailer, Trailer::Mac(_));
        let required = has_mac || dont_trust || peer.key_id.is_some();
        if !verdict.permits(required) {
            peer.report(PeerEvent::Auth, "digest");
            peer.flash.insert(Flash::TEST5);
            peer.counters.badauth += 1;
            if has_mac && matches!(pmode, Mode::SymmetricActive | Mode::SymmetricPassive) {
                self.fast_xmit(dg, frame, Mode::SymmetricActive, 0, false)?;
            }
            if preempt {
                self.unpeer(handle);
            }
            return Ok(dropped(src, DropReason::BadAuth));
        }

        let ppoll = pkt
            .poll
            .clamp(protocol::MINPOLL, protocol::MAXPOLL)
            .max(peer.minpoll);
        peer.ppoll = ppoll;

        // kiss codes are only believed from a packet answering our own
        if pkt.leap_indicator == LeapIndicator::Unknown
            && !peer.flash.intersects(Flash::TEST2)
            && let Some(kiss) = pkt.kiss_code()
        {
            match kiss {
                KissOfDeath::Rate if pmode == Mode::Server => {
                    peer.counters.selbroken += 1;
                    peer.report(PeerEvent::Rate, "");
                    if ppoll > peer.minpoll {
                        peer.minpoll = ppoll;
                        peer.maxpoll = peer.maxpoll.max(ppoll);
                    }
                    peer.burst = 0;
                    peer.retry = 0;
                    peer.throttle = (NTP_SHIFT as i64 + 1) << peer.minpoll;
                    peer.poll_update(ppoll, now, &mut self.rng);
                    return Ok(dropped(src, DropReason::KissOfDeath(kiss)));
                }
                KissOfDeath::Deny | KissOfDeath::Rstr => {
                    if preempt {
                        self.unpeer(handle);
                    } else {
                        peer.report(PeerEvent::Deny, &pkt.reference_id.to_string());
                        let spread = self.rng.random_range(0..1u64 << peer.minpoll);
                        peer.clear(pkt.reference_id, now, precision, spread);
                        peer.flash.insert(Flash::TEST4);
                    }
                    return Ok(dropped(src, DropReason::KissOfDeath(kiss)));
                }
                KissOfDeath::Rate => {}
            }
        }

        peer.flags.set(PeerFlags::AUTHENTIC, verdict == AuthVerdict::Ok);
        peer.timereceived = now;
        self.process_packet(handle, pkt, pmode, dg.recv_time)
    }

    /// Authenticator verdict for a parsed datagram.
    fn verify(&self, dg: &Datagram<'_>, frame: &Frame) -> AuthVerdict {
        match &frame.trailer {
            Trailer::None => AuthVerdict::None,
            Trailer::CryptoNak { .. } => AuthVerdict::CryptoNak,
            Trailer::Mac(mac) => {
                let covered = &dg.data[..frame.auth_len];
                match self.auth.verify(mac.key_id(), covered, mac.digest()) {
                    AuthStatus::Ok => {}
                    AuthStatus::Failed | AuthStatus::NoSuchKey => return AuthVerdict::Error,
                }
                if let Some(skew) = self.cfg.auth_skew {
                    let age = (dg.recv_time - frame.header.transmit_timestamp).to_seconds_f64();
                    if age.abs() > skew {
                        debug!(peer = %dg.source, age, "authenticated packet outside skew");
                        return AuthVerdict::Error;
                    }
                }
                AuthVerdict::Ok
            }
        }
    }

    /// Answer `request` without an association.
    ///
    /// A kiss-o'-death echoes the request's transmit timestamp in all three
    /// timestamps. The trailer mirrors the request: none if it carried no
    /// MAC, a crypto-NAK if `key_id` is zero or cannot sign, otherwise a MAC.
    pub(crate) fn fast_xmit(
        &mut self,
        dg: &Datagram<'_>,
        request: &Frame,
        mode: Mode,
        key_id: u32,
        kod: bool,
    ) -> Result<(), EngineError> {
        let rpkt = &request.header;
        let version = Version::new((dg.data[0] >> 3) & 0x07).unwrap_or_default();
        let poll = rpkt.poll.max(protocol::MINPOLL);
        let header = if kod {
            Packet {
                leap_indicator: LeapIndicator::Unknown,
                version,
                mode,
                stratum: Stratum::UNSPECIFIED,
                poll,
                precision: self.sys.precision,
                root_delay: rpkt.root_delay,
                root_dispersion: rpkt.root_dispersion,
                reference_id: ReferenceId::RATE,
                reference_timestamp: rpkt.reference_timestamp,
                origin_timestamp: rpkt.transmit_timestamp,
                receive_timestamp: rpkt.transmit_timestamp,
                transmit_timestamp: rpkt.transmit_timestamp,
            }
        } else {
            let sys = &self.sys;
            Packet {
                leap_indicator: sys.leap,
                version,
                mode,
                stratum: Stratum::from_peer(sys.stratum),
                poll,
                precision: sys.precision,
                root_delay: ShortFormat::from_seconds_f64(sys.rootdelay),
                root_dispersion: ShortFormat::from_seconds_f64(sys.rootdisp),
                reference_id: sys.refid,
                reference_timestamp: sys.reftime,
                origin_timestamp: rpkt.transmit_timestamp,
                receive_timestamp: dg.recv_time,
                transmit_timestamp: self.clock.now(),
            }
        };

        let mut frame = Frame::new(header);
        if request.trailer != Trailer::None {
            let mac = if key_id != 0 {
                self.auth.sign(key_id, &encode_frame(&frame)?)
            } else {
                None
            };
            frame.trailer = mac.map_or(Trailer::CryptoNak { key_id: 0 }, Trailer::Mac);
        }
        let data = encode_frame(&frame)?;
        debug!(
            dest = %dg.source,
            mode = ?mode,
            kod,
            len = data.len(),
            "fast reply"
        );
        let local = dg.interface();
        self.outbox.push(Transmission {
            data,
            dest: dg.source,
            local,
            ttl: None,
        });
        Ok(())
    }
}
