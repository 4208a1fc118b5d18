// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Errors produced while framing NTP datagrams.
//!
//! [`ParseError`] carries no heap data so it works without `std`. With the
//! `std` feature it implements [`std::error::Error`] and converts into
//! [`std::io::Error`].

use core::fmt;

/// Errors that can occur during buffer-based NTP packet parsing or serialization.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The buffer is too short for the expected data.
    BufferTooShort {
        /// Number of bytes needed.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },
    /// An invalid or unrecognized field value was encountered.
    InvalidField {
        /// Name of the field that was invalid.
        field: &'static str,
        /// The invalid value.
        value: u32,
    },
    /// The trailer after the header is not a whole number of 32-bit words.
    UnalignedTrailer {
        /// Trailer length in octets.
        len: usize,
    },
    /// A message authentication code with an unsupported digest length.
    InvalidMacLength {
        /// Total MAC length in octets, key identifier included.
        len: usize,
    },
    /// Extension field declares a length that is too small or not word aligned.
    InvalidExtensionLength {
        /// The declared length that was invalid.
        declared: u16,
    },
    /// Extension field data extends beyond the buffer.
    ExtensionOverflow,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::BufferTooShort { needed, available } => {
                write!(
                    f,
                    "buffer too short: needed {} bytes, got {}",
                    needed, available
                )
            }
            ParseError::InvalidField { field, value } => {
                write!(f, "invalid {} value: {}", field, value)
            }
            ParseError::UnalignedTrailer { len } => {
                write!(f, "trailer of {} bytes is not word aligned", len)
            }
            ParseError::InvalidMacLength { len } => {
                write!(f, "unsupported MAC length: {}", len)
            }
            ParseError::InvalidExtensionLength { declared } => {
                write!(f, "invalid extension field length: {}", declared)
            }
            ParseError::ExtensionOverflow => {
                write!(f, "extension field value extends beyond packet")
            }
        }
    }
}

#[cfg(feature = "std")]
impl From<ParseError> for std::io::Error {
    fn from(err: ParseError) -> std::io::Error {
        let kind = match &err {
            ParseError::BufferTooShort { .. } => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, err)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseError {}
