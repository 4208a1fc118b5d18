use crate::error::ParseError;

use super::traits::ensure_len;
use super::{
    ConstPackedSizeBytes, FromBytes, MAX_DIGEST_LEN, MAX_MAC_LEN, MIN_EXTENSION_LEN,
    MIN_MAC_LEN, Packet, ToBytes,
};

/// Digest lengths accepted in a MAC: MD5 and SHA-1.
const DIGEST_LENGTHS: [usize; 2] = [16, 20];

/// A message authentication code: key identifier plus digest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Mac {
    key_id: u32,
    digest: [u8; MAX_DIGEST_LEN],
    len: u8,
}

impl Mac {
    /// Builds a MAC, rejecting digests of unsupported length.
    pub fn new(key_id: u32, digest: &[u8]) -> Result<Self, ParseError> {
        if !DIGEST_LENGTHS.contains(&digest.len()) {
            return Err(ParseError::InvalidMacLength {
                len: 4 + digest.len(),
            });
        }
        let mut buf = [0u8; MAX_DIGEST_LEN];
        buf[..digest.len()].copy_from_slice(digest);
        Ok(Mac {
            key_id,
            digest: buf,
            len: digest.len() as u8,
        })
    }

    /// The key identifier.
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// The digest octets.
    pub fn digest(&self) -> &[u8] {
        &self.digest[..self.len as usize]
    }

    /// Encoded size, key identifier included.
    pub fn wire_len(&self) -> usize {
        4 + self.len as usize
    }
}

/// What follows the header (and any extension fields) in a datagram.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Trailer {
    /// No authenticator at all.
    #[default]
    None,
    /// A lone key identifier: the sender could not authenticate our last packet.
    CryptoNak {
        /// Key identifier the sender expected.
        key_id: u32,
    },
    /// A full message authentication code.
    Mac(Mac),
}

impl Trailer {
    /// Encoded size of the trailer.
    pub fn wire_len(&self) -> usize {
        match self {
            Trailer::None => 0,
            Trailer::CryptoNak { .. } => MIN_MAC_LEN,
            Trailer::Mac(mac) => mac.wire_len(),
        }
    }

    /// The key identifier, if any.
    pub fn key_id(&self) -> Option<u32> {
        match self {
            Trailer::None => None,
            Trailer::CryptoNak { key_id } => Some(*key_id),
            Trailer::Mac(mac) => Some(mac.key_id()),
        }
    }
}

/// A whole NTP datagram: header, skipped extension fields, and trailer.
///
/// Extension fields are validated and stepped over but not interpreted. The
/// MAC, when present, covers the first [`Frame::auth_len`] octets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Frame {
    /// The fixed header.
    pub header: Packet,
    /// Number of extension fields between the header and the trailer.
    pub extensions: usize,
    /// Octets covered by the MAC (header plus extension fields).
    pub auth_len: usize,
    /// Authenticator, if any.
    pub trailer: Trailer,
}

impl Frame {
    /// A frame with no extension fields and no authenticator.
    pub fn new(header: Packet) -> Self {
        Frame {
            header,
            extensions: 0,
            auth_len: Packet::PACKED_SIZE_BYTES,
            trailer: Trailer::None,
        }
    }

    /// Parses a datagram.
    ///
    /// The trailer is walked word by word: anything up to [`MAX_MAC_LEN`] octets is the
    /// authenticator, anything longer must start with an extension field.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let (header, mut auth_len) = Packet::from_bytes(buf)?;
        let mut extensions = 0;

        while auth_len < buf.len() {
            let rem = buf.len() - auth_len;
            if rem % 4 != 0 {
                return Err(ParseError::UnalignedTrailer { len: rem });
            }
            if rem <= MAX_MAC_LEN {
                let trailer = parse_authenticator(&buf[auth_len..])?;
                return Ok(Frame {
                    header,
                    extensions,
                    auth_len,
                    trailer,
                });
            }

            let declared = u16::from_be_bytes([buf[auth_len + 2], buf[auth_len + 3]]);
            let len = declared as usize;
            if len % 4 != 0 || len < MIN_EXTENSION_LEN {
                return Err(ParseError::InvalidExtensionLength { declared });
            }
            if len > rem {
                return Err(ParseError::ExtensionOverflow);
            }
            auth_len += len;
            extensions += 1;
        }

        Ok(Frame {
            header,
            extensions,
            auth_len,
            trailer: Trailer::None,
        })
    }

    /// Writes the header and trailer. Extension fields are not re-emitted.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, ParseError> {
        let total = Packet::PACKED_SIZE_BYTES + self.trailer.wire_len();
        ensure_len(buf, total)?;
        let mut offset = self.header.to_bytes(buf)?;
        match &self.trailer {
            Trailer::None => {}
            Trailer::CryptoNak { key_id } => {
                buf[offset..offset + 4].copy_from_slice(&key_id.to_be_bytes());
                offset += 4;
            }
            Trailer::Mac(mac) => {
                buf[offset..offset + 4].copy_from_slice(&mac.key_id.to_be_bytes());
                offset += 4;
                let digest = mac.digest();
                buf[offset..offset + digest.len()].copy_from_slice(digest);
                offset += digest.len();
            }
        }
        Ok(offset)
    }
}

fn parse_authenticator(buf: &[u8]) -> Result<Trailer, ParseError> {
    if buf.len() < MIN_MAC_LEN {
        return Err(ParseError::InvalidMacLength { len: buf.len() });
    }
    let key_id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if buf.len() == MIN_MAC_LEN {
        return Ok(Trailer::CryptoNak { key_id });
    }
    Mac::new(key_id, &buf[4..]).map(Trailer::Mac)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn header_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; 48];
        Packet::default().to_bytes(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_bare_header() {
        let frame = Frame::parse(&header_bytes()).unwrap();
        assert_eq!(frame.trailer, Trailer::None);
        assert_eq!(frame.auth_len, 48);
        assert_eq!(frame.extensions, 0);
    }

    #[test]
    fn test_crypto_nak() {
        let mut buf = header_bytes();
        buf.extend_from_slice(&7u32.to_be_bytes());
        let frame = Frame::parse(&buf).unwrap();
        assert_eq!(frame.trailer, Trailer::CryptoNak { key_id: 7 });
    }

    #[test]
    fn test_md5_and_sha1_macs() {
        for digest_len in [16usize, 20] {
            let mut buf = header_bytes();
            buf.extend_from_slice(&42u32.to_be_bytes());
            buf.extend(std::iter::repeat_n(0xAB, digest_len));
            let frame = Frame::parse(&buf).unwrap();
            match frame.trailer {
                Trailer::Mac(mac) => {
                    assert_eq!(mac.key_id(), 42);
                    assert_eq!(mac.digest().len(), digest_len);
                }
                other => panic!("expected MAC, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unsupported_mac_length() {
        let mut buf = header_bytes();
        buf.extend_from_slice(&[0u8; 12]);
        assert_eq!(
            Frame::parse(&buf).unwrap_err(),
            ParseError::InvalidMacLength { len: 12 }
        );
    }

    #[test]
    fn test_unaligned_trailer() {
        let mut buf = header_bytes();
        buf.extend_from_slice(&[0u8; 6]);
        assert_eq!(
            Frame::parse(&buf).unwrap_err(),
            ParseError::UnalignedTrailer { len: 6 }
        );
    }

    #[test]
    fn test_extension_then_mac() {
        let mut buf = header_bytes();
        // type 0x0104, length 28
        buf.extend_from_slice(&[0x01, 0x04, 0x00, 28]);
        buf.extend_from_slice(&[0u8; 24]);
        buf.extend_from_slice(&9u32.to_be_bytes());
        buf.extend_from_slice(&[0x11; 16]);
        let frame = Frame::parse(&buf).unwrap();
        assert_eq!(frame.extensions, 1);
        assert_eq!(frame.auth_len, 48 + 28);
        assert_eq!(frame.trailer.key_id(), Some(9));
    }

    #[test]
    fn test_extension_overflow() {
        let mut buf = header_bytes();
        buf.extend_from_slice(&[0x01, 0x04, 0x01, 0x00]);
        buf.extend_from_slice(&[0u8; 28]);
        assert_eq!(Frame::parse(&buf).unwrap_err(), ParseError::ExtensionOverflow);
    }

    #[test]
    fn test_extension_too_short() {
        let mut buf = header_bytes();
        buf.extend_from_slice(&[0x01, 0x04, 0x00, 0x08]);
        buf.extend_from_slice(&[0u8; 28]);
        assert_eq!(
            Frame::parse(&buf).unwrap_err(),
            ParseError::InvalidExtensionLength { declared: 8 }
        );
    }

    #[test]
    fn test_encode_with_mac() {
        let mut frame = Frame::new(Packet::default());
        frame.trailer = Trailer::Mac(Mac::new(5, &[0x5A; 20]).unwrap());
        let mut buf = [0u8; 72];
        assert_eq!(frame.encode(&mut buf).unwrap(), 72);
        let parsed = Frame::parse(&buf).unwrap();
        assert_eq!(parsed.trailer, frame.trailer);
    }

    #[test]
    fn test_mac_rejects_odd_digest() {
        assert!(Mac::new(1, &[0u8; 8]).is_err());
    }
}
