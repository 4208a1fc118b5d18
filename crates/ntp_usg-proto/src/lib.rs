// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTPv4 wire types, fixed-point timestamp arithmetic, and datagram framing.
//!
//! This crate is the leaf of the `ntp_usg` protocol engine. It knows how to
//! read and write the 48-octet NTP header (RFC 5905), how to walk the
//! optional extension fields and message authentication code that follow it,
//! and how to do arithmetic on 32.32 fixed-point timestamps without losing
//! precision or tripping over the 2036 era rollover.
//!
//! Nothing here allocates. The `std` feature (on by default) only adds
//! conversions to `std::io::Error`, `std::net` helpers, and wall-clock reads.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

/// Custom error types for buffer-based NTP packet parsing and serialization.
pub mod error;

/// NTP protocol types and constants (RFC 5905).
pub mod protocol;

/// 32.32 fixed-point timestamps and signed durations.
pub mod timestamp;

/// Unix time conversion utilities for NTP timestamps.
pub mod unix_time;

pub use timestamp::{NtpDuration, NtpTimestamp};
