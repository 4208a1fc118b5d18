// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Error types for the protocol engine.
//!
//! Only conditions the caller must act on are errors. A malformed, replayed or
//! unauthenticated datagram is an ordinary outcome of
//! [`Engine::receive`](crate::Engine::receive) and is reported as a
//! [`DropReason`](crate::receive::DropReason) value instead.
//!
//! Both error enums convert into `io::Error` so the async driver can surface
//! them through `io::Result`; callers who want the structured value can
//! downcast through `io::Error::get_ref()`.

use std::fmt;
use std::io;
use std::net::SocketAddr;

pub use ntp_proto::error::ParseError;

/// Errors surfaced by [`Engine`](crate::Engine) operations.
#[derive(Debug)]
pub enum EngineError {
    /// The local clock reported an offset beyond its panic threshold. The
    /// service must stop rather than keep disciplining the clock.
    ClockPanic {
        /// The offset that was rejected, in seconds.
        offset: f64,
    },
    /// A [`PeerHandle`](crate::PeerHandle) refers to an association that no
    /// longer exists.
    StaleHandle,
    /// The association table is full.
    AssociationLimit {
        /// The configured maximum.
        max: usize,
    },
    /// An association with the same address and mode already exists.
    DuplicateAssociation {
        /// The remote address.
        addr: SocketAddr,
    },
    /// The engine or a peer was configured inconsistently.
    Config(ConfigError),
    /// An outbound packet could not be encoded.
    Codec(ParseError),
}

/// Configuration validation errors.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// `minpoll` exceeds `maxpoll`, or either lies outside the protocol range.
    PollRange {
        /// Configured minimum poll exponent.
        minpoll: i8,
        /// Configured maximum poll exponent.
        maxpoll: i8,
    },
    /// The stratum floor is not below the ceiling.
    StratumBand {
        /// Lowest acceptable stratum.
        floor: u8,
        /// First stratum that is rejected.
        ceiling: u8,
    },
    /// The survivor bounds are inconsistent.
    ClockBounds {
        /// Minimum survivors for clustering.
        minclock: usize,
        /// Maximum candidates kept for clustering.
        maxclock: usize,
    },
    /// A numeric setting is out of range.
    InvalidValue {
        /// Name of the setting.
        field: &'static str,
        /// What was wrong with it.
        detail: String,
    },
}

// ── Display implementations ─────────────────────────────────────────

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ClockPanic { offset } => {
                write!(f, "clock offset {offset:.6}s exceeds the panic threshold")
            }
            EngineError::StaleHandle => write!(f, "association no longer exists"),
            EngineError::AssociationLimit { max } => {
                write!(f, "association table full ({max} entries)")
            }
            EngineError::DuplicateAssociation { addr } => {
                write!(f, "association for {addr} already exists")
            }
            EngineError::Config(e) => write!(f, "engine config error: {e}"),
            EngineError::Codec(e) => write!(f, "packet encode failed: {e}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::PollRange { minpoll, maxpoll } => {
                write!(f, "invalid poll range {minpoll}..={maxpoll}")
            }
            ConfigError::StratumBand { floor, ceiling } => {
                write!(f, "stratum floor {floor} must be below ceiling {ceiling}")
            }
            ConfigError::ClockBounds { minclock, maxclock } => {
                write!(f, "minclock {minclock} must not exceed maxclock {maxclock}")
            }
            ConfigError::InvalidValue { field, detail } => write!(f, "{field}: {detail}"),
        }
    }
}

// ── Error trait implementations ─────────────────────────────────────

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(e) => Some(e),
            EngineError::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}

// ── Conversions ─────────────────────────────────────────────────────

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

impl From<ParseError> for EngineError {
    fn from(e: ParseError) -> Self {
        EngineError::Codec(e)
    }
}

impl From<EngineError> for io::Error {
    fn from(e: EngineError) -> io::Error {
        let kind = match &e {
            EngineError::Config(_) | EngineError::DuplicateAssociation { .. } => {
                io::ErrorKind::InvalidInput
            }
            EngineError::StaleHandle => io::ErrorKind::NotFound,
            EngineError::Codec(_) => io::ErrorKind::InvalidData,
            EngineError::ClockPanic { .. } | EngineError::AssociationLimit { .. } => {
                io::ErrorKind::Other
            }
        };
        io::Error::new(kind, e)
    }
}
