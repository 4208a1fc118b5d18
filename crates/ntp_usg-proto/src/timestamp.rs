// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Fixed-point NTP time values.
//!
//! [`NtpTimestamp`] is a point on the 64-bit NTP timescale: 32 bits of seconds
//! since the prime epoch and 32 bits of binary fraction. [`NtpDuration`] is the
//! signed difference of two timestamps in the same 32.32 layout.
//!
//! Timestamps are modular. Subtracting two of them always yields the shortest
//! signed span between them, so a difference taken across the 2036 era
//! boundary (seconds wrapping from `0xFFFF_FFFF` to `0`) is still correct as
//! long as the two instants are less than 68 years apart. All statistics
//! downstream work on `f64` seconds obtained from [`NtpDuration::to_seconds_f64`];
//! converting the difference rather than the raw timestamps keeps the full
//! 32-bit fraction when the two instants are close together.

use core::cmp::Ordering;
use core::fmt;
use core::ops::{Add, Neg, Sub};

use crate::protocol::{ShortFormat, TimestampFormat};

/// 2^32, the scale of the 32-bit fraction.
const FRAC_SCALE: f64 = 4_294_967_296.0;

/// 2^16, the scale of the short-format fraction.
const SHORT_SCALE: f64 = 65_536.0;

/// A 64-bit NTP timestamp (32.32 unsigned fixed point, modulo 2^64).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct NtpTimestamp(u64);

/// A signed span between two [`NtpTimestamp`]s (32.32 signed fixed point).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NtpDuration(i64);

impl NtpTimestamp {
    /// The all-zero timestamp, which NTP uses to mean "not set".
    pub const ZERO: Self = NtpTimestamp(0);

    /// Builds a timestamp from its raw 64-bit representation.
    pub const fn from_bits(bits: u64) -> Self {
        NtpTimestamp(bits)
    }

    /// The raw 64-bit representation.
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Builds a timestamp from whole seconds and a binary fraction.
    pub const fn from_parts(seconds: u32, fraction: u32) -> Self {
        NtpTimestamp(((seconds as u64) << 32) | fraction as u64)
    }

    /// Whole seconds since the start of the era.
    pub const fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Binary fraction of a second.
    pub const fn fraction(self) -> u32 {
        self.0 as u32
    }

    /// Whether the timestamp is the "not set" value.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Signed span from `earlier` to `self`, wrapping across eras.
    pub const fn duration_since(self, earlier: NtpTimestamp) -> NtpDuration {
        NtpDuration(self.0.wrapping_sub(earlier.0) as i64)
    }

    /// Moves the timestamp by `delta`, wrapping modulo 2^64.
    pub const fn wrapping_add(self, delta: NtpDuration) -> Self {
        NtpTimestamp(self.0.wrapping_add(delta.0 as u64))
    }

    /// Era-safe ordering: `Less` when `self` precedes `other` by less than half an era.
    pub fn compare(self, other: NtpTimestamp) -> Ordering {
        self.duration_since(other).0.cmp(&0)
    }

    /// Whether `self` precedes `other` on the modular timescale.
    pub fn is_before(self, other: NtpTimestamp) -> bool {
        self.compare(other) == Ordering::Less
    }

    /// Whether `self` follows `other` on the modular timescale.
    pub fn is_after(self, other: NtpTimestamp) -> bool {
        self.compare(other) == Ordering::Greater
    }
}

impl NtpDuration {
    /// A zero-length span.
    pub const ZERO: Self = NtpDuration(0);
    /// Largest representable span (just under 2^31 seconds).
    pub const MAX: Self = NtpDuration(i64::MAX);
    /// Most negative representable span (-2^31 seconds).
    pub const MIN: Self = NtpDuration(i64::MIN);

    /// Builds a span from its raw 64-bit representation.
    pub const fn from_bits(bits: i64) -> Self {
        NtpDuration(bits)
    }

    /// The raw 64-bit representation.
    pub const fn to_bits(self) -> i64 {
        self.0
    }

    /// A span of whole seconds.
    pub const fn from_seconds(seconds: i32) -> Self {
        NtpDuration((seconds as i64) << 32)
    }

    /// Converts floating-point seconds, rounding to the nearest 2^-32 s.
    ///
    /// Values beyond the representable range saturate at [`NtpDuration::MAX`] or
    /// [`NtpDuration::MIN`]; NaN maps to zero.
    pub fn from_seconds_f64(seconds: f64) -> Self {
        // `as` saturates at the integer bounds and maps NaN to zero.
        NtpDuration((seconds * FRAC_SCALE).round() as i64)
    }

    /// The span in floating-point seconds.
    pub fn to_seconds_f64(self) -> f64 {
        self.0 as f64 / FRAC_SCALE
    }

    /// Adds two spans, returning `None` on overflow.
    pub const fn checked_add(self, rhs: NtpDuration) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(NtpDuration(v)),
            None => None,
        }
    }

    /// Subtracts two spans, returning `None` on overflow.
    pub const fn checked_sub(self, rhs: NtpDuration) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(NtpDuration(v)),
            None => None,
        }
    }

    /// Absolute value, saturating at [`NtpDuration::MAX`].
    pub const fn abs(self) -> Self {
        NtpDuration(self.0.saturating_abs())
    }

    /// Whether the span points backwards in time.
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl Sub for NtpTimestamp {
    type Output = NtpDuration;

    fn sub(self, rhs: NtpTimestamp) -> NtpDuration {
        self.duration_since(rhs)
    }
}

impl Add<NtpDuration> for NtpTimestamp {
    type Output = NtpTimestamp;

    fn add(self, rhs: NtpDuration) -> NtpTimestamp {
        self.wrapping_add(rhs)
    }
}

impl Sub<NtpDuration> for NtpTimestamp {
    type Output = NtpTimestamp;

    fn sub(self, rhs: NtpDuration) -> NtpTimestamp {
        NtpTimestamp(self.0.wrapping_sub(rhs.0 as u64))
    }
}

impl Add for NtpDuration {
    type Output = NtpDuration;

    fn add(self, rhs: NtpDuration) -> NtpDuration {
        NtpDuration(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for NtpDuration {
    type Output = NtpDuration;

    fn sub(self, rhs: NtpDuration) -> NtpDuration {
        NtpDuration(self.0.wrapping_sub(rhs.0))
    }
}

impl Neg for NtpDuration {
    type Output = NtpDuration;

    fn neg(self) -> NtpDuration {
        NtpDuration(self.0.wrapping_neg())
    }
}

impl From<TimestampFormat> for NtpTimestamp {
    fn from(ts: TimestampFormat) -> Self {
        NtpTimestamp::from_parts(ts.seconds, ts.fraction)
    }
}

impl From<NtpTimestamp> for TimestampFormat {
    fn from(ts: NtpTimestamp) -> Self {
        TimestampFormat {
            seconds: ts.seconds(),
            fraction: ts.fraction(),
        }
    }
}

impl ShortFormat {
    /// The value in floating-point seconds.
    pub fn to_seconds_f64(self) -> f64 {
        f64::from(self.seconds) + f64::from(self.fraction) / SHORT_SCALE
    }

    /// Converts non-negative seconds, clamping to the 16.16 range.
    pub fn from_seconds_f64(seconds: f64) -> Self {
        let bits = (seconds * SHORT_SCALE).round() as u32;
        ShortFormat {
            seconds: (bits >> 16) as u16,
            fraction: bits as u16,
        }
    }
}

impl fmt::Display for NtpTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}.{:08x}", self.seconds(), self.fraction())
    }
}

impl fmt::Display for NtpDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.to_seconds_f64())
    }
}
