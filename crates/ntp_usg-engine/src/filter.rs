// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Per-peer clock filter.
//!
//! Each association keeps the last [`NTP_SHIFT`] samples of offset, delay,
//! dispersion and arrival epoch in a shift register. On every new sample the
//! register is aged, ranked by a distance metric, pruned, and the best slot
//! becomes the peer's estimate unless it is stale or a popcorn spike.
//!
//! Until the system is synchronized the register is not sorted: the newest
//! sample wins, so early noisy samples cannot be locked in as the minimum.

use ntp_proto::protocol::MAXDISP;
use tracing::debug;

use crate::peer::{Peer, log2d};
use crate::status::PeerEvent;

/// Number of slots in the filter register.
pub const NTP_SHIFT: usize = 8;
/// Exponential weight for the filter dispersion.
pub const NTP_FWEIGHT: f64 = 0.5;
/// Popcorn spike gate, in multiples of the jitter.
pub const CLOCK_SGATE: f64 = 3.0;
/// Frequency tolerance (15 PPM), the rate at which dispersion grows.
pub const PHI: f64 = 15e-6;
/// Allan intercept (s). Older samples are ranked by delay plus dispersion.
pub const ALLAN_XPT: u64 = 1 << 11;

/// One filter register slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterSample {
    /// Clock offset (s).
    pub offset: f64,
    /// Round-trip delay (s).
    pub delay: f64,
    /// Dispersion (s).
    pub disp: f64,
    /// Engine time of arrival (s).
    pub epoch: u64,
}

impl FilterSample {
    const EMPTY: FilterSample = FilterSample {
        offset: 0.0,
        delay: 0.0,
        disp: MAXDISP,
        epoch: 0,
    };
}

impl Default for FilterSample {
    fn default() -> Self {
        FilterSample::EMPTY
    }
}

/// What happened to a sample pushed through the filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FilterOutcome {
    /// The best sample became the peer's estimate.
    Accepted,
    /// No slot survived pruning; only the dispersion was updated.
    NoSurvivors,
    /// The best sample was a popcorn spike and was ignored.
    Popcorn {
        /// Offset jump that tripped the gate (s).
        spike: f64,
    },
    /// The best sample is not newer than the current estimate.
    Stale,
}

impl FilterOutcome {
    /// Whether selection has to run again: a new estimate, or a filter
    /// left with nothing but dummy samples.
    pub fn reselect(self) -> bool {
        matches!(self, FilterOutcome::Accepted | FilterOutcome::NoSurvivors)
    }
}

/// Inputs the filter needs from the system.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FilterContext {
    /// Engine time (s).
    pub now: u64,
    /// Whether the system leap indicator is anything but unknown.
    pub locked: bool,
    /// Selection distance threshold (s).
    pub maxdist: f64,
    /// System precision exponent.
    pub precision: i8,
}

/// Shift register of recent samples.
#[derive(Clone, Debug, PartialEq)]
pub struct ClockFilter {
    samples: [FilterSample; NTP_SHIFT],
    order: [usize; NTP_SHIFT],
    next: usize,
}

impl Default for ClockFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockFilter {
    /// An empty register: every slot at maximum dispersion.
    pub fn new() -> Self {
        ClockFilter {
            samples: [FilterSample::EMPTY; NTP_SHIFT],
            order: [0, 1, 2, 3, 4, 5, 6, 7],
            next: 0,
        }
    }

    /// Return every slot to maximum dispersion.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// The raw register, in slot order.
    pub fn samples(&self) -> &[FilterSample; NTP_SHIFT] {
        &self.samples
    }

    /// Slot indices ranked best-first by the last filter pass.
    pub fn order(&self) -> &[usize; NTP_SHIFT] {
        &self.order
    }

    /// Slot that receives the next sample.
    pub fn next_slot(&self) -> usize {
        self.next
    }

    fn shift_in(&mut self, sample: FilterSample) {
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % NTP_SHIFT;
    }
}

impl Peer {
    /// Push one sample through the clock filter.
    ///
    /// On anything but [`FilterOutcome::Accepted`] the previous offset,
    /// delay and jitter are kept; the filter dispersion is always refreshed.
    pub(crate) fn clock_filter(
        &mut self,
        offset: f64,
        delay: f64,
        disp: f64,
        ctx: FilterContext,
    ) -> FilterOutcome {
        self.filter.shift_in(FilterSample {
            offset,
            delay,
            disp,
            epoch: ctx.now,
        });

        // Age every slot but the newest, oldest first, building the
        // distance list as we go.
        let dtemp = PHI * ctx.now.saturating_sub(self.update) as f64;
        self.update = ctx.now;
        let mut dst = [0.0f64; NTP_SHIFT];
        let mut ord = [0usize; NTP_SHIFT];
        let mut j = self.filter.next;
        for i in (0..NTP_SHIFT).rev() {
            let slot = &mut self.filter.samples[j];
            if i != 0 {
                slot.disp += dtemp;
            }
            if slot.disp >= MAXDISP {
                slot.disp = MAXDISP;
                dst[i] = MAXDISP;
            } else if self.update.saturating_sub(slot.epoch) > ALLAN_XPT {
                dst[i] = slot.delay + slot.disp;
            } else {
                dst[i] = slot.delay;
            }
            ord[i] = j;
            j = (j + 1) % NTP_SHIFT;
        }

        // Once locked, rank by distance; ties keep the newer sample first.
        if ctx.locked {
            let mut ranked: [(f64, usize); NTP_SHIFT] = std::array::from_fn(|i| (dst[i], ord[i]));
            ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
            for (i, (d, o)) in ranked.into_iter().enumerate() {
                dst[i] = d;
                ord[i] = o;
            }
        }
        self.filter.order = ord;

        // Keep slots below MAXDISP; of those, at least two regardless of
        // maxdist for the jitter estimate.
        let mut m = 0;
        for &d in &dst {
            if d >= MAXDISP || (m >= 2 && d >= ctx.maxdist) {
                continue;
            }
            m += 1;
        }

        let k = ord[0];
        let best = self.filter.samples[k];
        let mut fdisp = 0.0;
        let mut jitter = 0.0;
        for i in (0..NTP_SHIFT).rev() {
            let s = &self.filter.samples[ord[i]];
            fdisp = NTP_FWEIGHT * (fdisp + s.disp);
            if i < m {
                jitter += (s.offset - best.offset).powi(2);
            }
        }
        self.disp = fdisp;

        if m == 0 {
            debug!(peer = %self.addr, disp = fdisp, "clock filter: no survivors");
            return FilterOutcome::NoSurvivors;
        }

        if m > 1 {
            jitter /= (m - 1) as f64;
        }
        let jitter = jitter.sqrt().max(log2d(ctx.precision));

        let spike = (self.offset - best.offset).abs();
        let since = best.epoch as i64 - self.epoch as i64;
        if fdisp < ctx.maxdist
            && best.disp < ctx.maxdist
            && spike > CLOCK_SGATE * jitter
            && (since as f64) < 2.0 * log2d(self.hpoll)
        {
            self.report(PeerEvent::Popcorn, &format!("{spike:.6} s"));
            return FilterOutcome::Popcorn { spike };
        }

        if best.epoch <= self.epoch {
            debug!(
                peer = %self.addr,
                age = ctx.now.saturating_sub(best.epoch),
                "clock filter: old sample"
            );
            return FilterOutcome::Stale;
        }

        self.offset = best.offset;
        self.delay = best.delay;
        self.jitter = jitter;
        self.epoch = best.epoch;
        debug!(
            peer = %self.addr,
            n = m,
            offset = self.offset,
            delay = self.delay,
            disp = self.disp,
            jitter = self.jitter,
            "clock filter"
        );
        FilterOutcome::Accepted
    }
}
