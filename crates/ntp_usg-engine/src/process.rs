// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Packet processing: header capture, sanity tests and the on-wire
//! offset/delay calculation for a packet that passed the receive checks.

use ntp_proto::NtpTimestamp;
use ntp_proto::protocol::{self, LeapIndicator, Mode, Packet};
use tracing::debug;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::filter::PHI;
use crate::metrics::SystemCounters;
use crate::peer::{Flash, HostMode, PeerFlags, log2d};
use crate::poll::NTP_IBURST;
use crate::receive::{DropReason, ReceiveOutcome};
use crate::status::PeerEvent;
use crate::table::PeerHandle;

impl Engine {
    /// Turn an accepted packet into a clock filter sample.
    ///
    /// `recv_time` is the destination timestamp. Runs selection when the
    /// filter accepts a sample outside of a burst, or at any time while the
    /// system is unsynchronized.
    pub(crate) fn process_packet(
        &mut self,
        handle: PeerHandle,
        pkt: &Packet,
        pmode: Mode,
        recv_time: NtpTimestamp,
    ) -> Result<ReceiveOutcome, EngineError> {
        let now = self.current_time;
        let fit = self.fitness();
        let ctx = self.filter_context();
        let sys_precision = self.sys.precision;
        let bdelay = self.cfg.bdelay;
        SystemCounters::inc(&self.counters.processed);
        let Some(peer) = self.table.get_mut(handle) else {
            return Ok(ReceiveOutcome::Dropped(DropReason::Declined));
        };
        peer.counters.processed += 1;

        peer.leap = pkt.leap_indicator;
        peer.stratum = pkt.stratum.to_peer();
        peer.pmode = pmode;
        peer.precision = pkt.precision;
        peer.rootdelay = pkt.root_delay.to_seconds_f64();
        peer.rootdisp = pkt.root_dispersion.to_seconds_f64();
        peer.refid = pkt.reference_id;
        peer.reftime = pkt.reference_timestamp;

        if peer.retry > 0 {
            peer.retry = 0;
            peer.burst = if peer.reach != 0 {
                // min(2^(hpoll - minpoll), 8) - 1
                let shift = (peer.hpoll - peer.minpoll).clamp(0, 3);
                (1u8 << shift) - 1
            } else {
                NTP_IBURST - 1
            };
            if peer.burst > 0 {
                peer.nextdate = now;
            }
        }
        let hpoll = peer.hpoll;
        peer.poll_update(hpoll, now, &mut self.rng);

        if peer.leap == LeapIndicator::Unknown
            || peer.stratum < fit.floor
            || peer.stratum >= fit.ceiling
        {
            peer.flash.insert(Flash::TEST6);
        }
        if peer.rootdelay / 2.0 + peer.rootdisp >= protocol::MAXDISP
            || !pkt.transmit_timestamp.is_after(pkt.reference_timestamp)
        {
            peer.flash.insert(Flash::TEST7);
        }
        if peer.flash.intersects(Flash::PACKET_MASK) {
            peer.counters.seldisptoolarge += 1;
            debug!(peer = %peer.addr, flash = peer.flash.bits(), "packet sanity");
            return Ok(ReceiveOutcome::Dropped(DropReason::Sanity(peer.flash)));
        }

        if peer.reach == 0 {
            peer.report(PeerEvent::Reachable, "");
            peer.timereachable = now;
        }
        peer.reach |= 1;

        let (offset, delay) = if pmode == Mode::Broadcast {
            let mut offset = (pkt.transmit_timestamp - recv_time).to_seconds_f64();
            if peer.flags.contains(PeerFlags::BC_VOL) {
                // the volley measured the true offset; the difference is
                // the one-way delay
                peer.flags.remove(PeerFlags::BC_VOL);
                peer.delay = (peer.offset - offset).abs() * 2.0;
            }
            let delay = if peer.delay > 0.0 {
                peer.delay
            } else {
                bdelay.unwrap_or(0.0)
            };
            offset += delay / 2.0;
            (offset, delay)
        } else {
            let t21 = (pkt.receive_timestamp - pkt.origin_timestamp).to_seconds_f64();
            let t34 = (pkt.transmit_timestamp - recv_time).to_seconds_f64();
            let delay = (t21 - t34).abs().max(log2d(sys_precision));
            ((t21 + t34) / 2.0, delay)
        };
        let disp = log2d(sys_precision) + log2d(peer.precision) + PHI * delay;
        debug!(
            peer = %peer.addr,
            offset,
            delay,
            disp,
            "sample"
        );

        let outcome = peer.clock_filter(offset + peer.bias, delay, disp, ctx);

        let calibrated = peer.flags.contains(PeerFlags::BC_VOL)
            && peer.hmode == HostMode::Client
            && !peer.unfit(&fit).intersects(Flash::TEST11);
        let burst = peer.burst;

        if calibrated && self.table.set_hmode(handle, HostMode::BroadcastClient) {
            debug!(%handle, "broadcast calibration complete");
        }
        if outcome.reselect()
            && (burst == 0 || self.sys.leap == LeapIndicator::Unknown)
        {
            self.clock_select()?;
        }
        Ok(ReceiveOutcome::Processed)
    }
}
