//! NTPv4 wire types and constants.
//!
//! Documentation is largely derived from IETF RFC 5905. The header types here
//! implement the slice-based [`FromBytes`] and [`ToBytes`] traits; [`Frame`]
//! adds the trailer (extension fields and MAC) that can follow the header.

/// NTP port number.
pub const PORT: u16 = 123;

/// Current protocol version.
pub const VERSION: u8 = 4;

/// Oldest protocol version still answered.
pub const OLD_VERSION: u8 = 1;

/// Frequency tolerance PHI (s/s).
pub const TOLERANCE: f64 = 15e-6;

/// Minimum poll exponent (8 s).
pub const MINPOLL: i8 = 3;

/// Maximum poll exponent (36 h).
pub const MAXPOLL: i8 = 17;

/// Maximum dispersion (16 s).
pub const MAXDISP: f64 = 16.0;

/// Maximum stratum number; also "unsynchronized".
pub const MAXSTRAT: u8 = 16;

/// Shortest MAC: a bare key identifier (crypto-NAK).
pub const MIN_MAC_LEN: usize = 4;

/// Longest MAC: key identifier plus a SHA-1 digest.
pub const MAX_MAC_LEN: usize = 4 + MAX_DIGEST_LEN;

/// Longest supported message digest.
pub const MAX_DIGEST_LEN: usize = 20;

/// Smallest extension field (RFC 7822).
pub const MIN_EXTENSION_LEN: usize = 16;

// Convert an ascii string to a big-endian u32.
macro_rules! code_to_u32 {
    ($w:expr) => {
        u32::from_be_bytes(*$w)
    };
}

mod bytes;
mod frame;
mod md5;
mod traits;
mod types;

pub use self::frame::*;
pub use self::traits::*;
pub use self::types::*;
