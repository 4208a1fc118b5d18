// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Conversion between the NTP timescale and Unix time.
//!
//! NTP timestamps carry only 32 bits of seconds, so a raw timestamp names one
//! instant in every 136-year era. Converting to Unix time therefore needs a
//! pivot: the era is chosen that puts the timestamp within half an era of it.

use crate::timestamp::NtpTimestamp;

/// The number of seconds from 1st January 1900 UTC to the start of the Unix epoch.
pub const EPOCH_DELTA: i64 = 2_208_988_800;

/// The number of seconds in one NTP era (2^32 seconds, approximately 136 years).
///
/// Era 0 spans from 1900-01-01 00:00:00 UTC to 2036-02-07 06:28:15 UTC.
pub const ERA_SECONDS: i64 = 1 << 32;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// An instant relative to the Unix epoch, floored to whole seconds plus a
/// non-negative nanosecond remainder.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Instant {
    secs: i64,
    subsec_nanos: u32,
}

impl Instant {
    /// Builds an instant; `subsec_nanos` beyond one second carries into `secs`.
    pub fn new(secs: i64, subsec_nanos: u32) -> Self {
        Instant {
            secs: secs + i64::from(subsec_nanos / NANOS_PER_SEC as u32),
            subsec_nanos: subsec_nanos % NANOS_PER_SEC as u32,
        }
    }

    /// The current wall-clock time.
    #[cfg(feature = "std")]
    pub fn now() -> Self {
        Instant::from(std::time::SystemTime::now())
    }

    /// Whole seconds since the Unix epoch (floored).
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Nanoseconds past [`Instant::secs`].
    pub fn subsec_nanos(&self) -> u32 {
        self.subsec_nanos
    }
}

#[cfg(feature = "std")]
impl From<std::time::SystemTime> for Instant {
    fn from(t: std::time::SystemTime) -> Self {
        match t.duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => Instant::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                let d = e.duration();
                if d.subsec_nanos() == 0 {
                    Instant::new(-(d.as_secs() as i64), 0)
                } else {
                    Instant::new(
                        -(d.as_secs() as i64) - 1,
                        NANOS_PER_SEC as u32 - d.subsec_nanos(),
                    )
                }
            }
        }
    }
}

impl From<Instant> for NtpTimestamp {
    /// Truncates to the 32-bit era-relative seconds used on the wire.
    fn from(t: Instant) -> Self {
        let seconds = (t.secs + EPOCH_DELTA).rem_euclid(ERA_SECONDS) as u32;
        let fraction = ((u64::from(t.subsec_nanos) << 32) / NANOS_PER_SEC) as u32;
        NtpTimestamp::from_parts(seconds, fraction)
    }
}

/// Absolute NTP seconds for `raw_seconds`, choosing the era closest to `pivot`.
pub fn ntp_seconds_near(raw_seconds: u32, pivot: &Instant) -> i64 {
    let pivot_ntp = pivot.secs + EPOCH_DELTA;
    let candidate = pivot_ntp.div_euclid(ERA_SECONDS) * ERA_SECONDS + i64::from(raw_seconds);
    let diff = candidate - pivot_ntp;
    if diff > ERA_SECONDS / 2 {
        candidate - ERA_SECONDS
    } else if diff < -(ERA_SECONDS / 2) {
        candidate + ERA_SECONDS
    } else {
        candidate
    }
}

/// Converts a wire timestamp to Unix time, resolving the era against `pivot`.
pub fn timestamp_to_instant(ts: NtpTimestamp, pivot: &Instant) -> Instant {
    let secs = ntp_seconds_near(ts.seconds(), pivot) - EPOCH_DELTA;
    let nanos = (u64::from(ts.fraction()) * NANOS_PER_SEC) >> 32;
    Instant::new(secs, nanos as u32)
}
