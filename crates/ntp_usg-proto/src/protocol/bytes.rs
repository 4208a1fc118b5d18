use crate::error::ParseError;
use crate::timestamp::NtpTimestamp;

use super::{
    ConstPackedSizeBytes, FromBytes, LeapIndicator, Mode, Packet, ReferenceId, ShortFormat,
    Stratum, TimestampFormat, ToBytes, Version,
};
use super::traits::ensure_len;

impl FromBytes for ShortFormat {
    fn from_bytes(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        ensure_len(buf, Self::PACKED_SIZE_BYTES)?;
        let seconds = u16::from_be_bytes([buf[0], buf[1]]);
        let fraction = u16::from_be_bytes([buf[2], buf[3]]);
        Ok((ShortFormat { seconds, fraction }, Self::PACKED_SIZE_BYTES))
    }
}

impl FromBytes for TimestampFormat {
    fn from_bytes(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        ensure_len(buf, Self::PACKED_SIZE_BYTES)?;
        let seconds = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let fraction = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok((
            TimestampFormat { seconds, fraction },
            Self::PACKED_SIZE_BYTES,
        ))
    }
}

impl FromBytes for ReferenceId {
    fn from_bytes(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        ensure_len(buf, Self::PACKED_SIZE_BYTES)?;
        Ok((
            ReferenceId([buf[0], buf[1], buf[2], buf[3]]),
            Self::PACKED_SIZE_BYTES,
        ))
    }
}

impl FromBytes for (LeapIndicator, Version, Mode) {
    fn from_bytes(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        ensure_len(buf, 1)?;
        let li_vn_mode = buf[0];
        let li_u8 = li_vn_mode >> 6;
        let li = LeapIndicator::try_from(li_u8).map_err(|_| ParseError::InvalidField {
            field: "leap indicator",
            value: li_u8 as u32,
        })?;
        let vn = Version((li_vn_mode >> 3) & 0b111);
        let mode = Mode::from_bits(li_vn_mode);
        Ok(((li, vn, mode), 1))
    }
}

fn read_timestamp(buf: &[u8]) -> Result<(NtpTimestamp, usize), ParseError> {
    let (ts, n) = TimestampFormat::from_bytes(buf)?;
    Ok((ts.into(), n))
}

impl FromBytes for Packet {
    fn from_bytes(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        ensure_len(buf, Self::PACKED_SIZE_BYTES)?;

        let ((leap_indicator, version, mode), mut offset) =
            <(LeapIndicator, Version, Mode)>::from_bytes(buf)?;

        let stratum = Stratum(buf[offset]);
        let poll = buf[offset + 1] as i8;
        let precision = buf[offset + 2] as i8;
        offset += 3;

        let (root_delay, n) = ShortFormat::from_bytes(&buf[offset..])?;
        offset += n;
        let (root_dispersion, n) = ShortFormat::from_bytes(&buf[offset..])?;
        offset += n;
        let (reference_id, n) = ReferenceId::from_bytes(&buf[offset..])?;
        offset += n;
        let (reference_timestamp, n) = read_timestamp(&buf[offset..])?;
        offset += n;
        let (origin_timestamp, n) = read_timestamp(&buf[offset..])?;
        offset += n;
        let (receive_timestamp, n) = read_timestamp(&buf[offset..])?;
        offset += n;
        let (transmit_timestamp, n) = read_timestamp(&buf[offset..])?;
        offset += n;

        Ok((
            Packet {
                leap_indicator,
                version,
                mode,
                stratum,
                poll,
                precision,
                root_delay,
                root_dispersion,
                reference_id,
                reference_timestamp,
                origin_timestamp,
                receive_timestamp,
                transmit_timestamp,
            },
            offset,
        ))
    }
}

// Buffer-based writer implementations.

impl ToBytes for ShortFormat {
    fn to_bytes(&self, buf: &mut [u8]) -> Result<usize, ParseError> {
        ensure_len(buf, Self::PACKED_SIZE_BYTES)?;
        buf[..2].copy_from_slice(&self.seconds.to_be_bytes());
        buf[2..4].copy_from_slice(&self.fraction.to_be_bytes());
        Ok(Self::PACKED_SIZE_BYTES)
    }
}

impl ToBytes for TimestampFormat {
    fn to_bytes(&self, buf: &mut [u8]) -> Result<usize, ParseError> {
        ensure_len(buf, Self::PACKED_SIZE_BYTES)?;
        buf[..4].copy_from_slice(&self.seconds.to_be_bytes());
        buf[4..8].copy_from_slice(&self.fraction.to_be_bytes());
        Ok(Self::PACKED_SIZE_BYTES)
    }
}

impl ToBytes for NtpTimestamp {
    fn to_bytes(&self, buf: &mut [u8]) -> Result<usize, ParseError> {
        TimestampFormat::from(*self).to_bytes(buf)
    }
}

impl ToBytes for ReferenceId {
    fn to_bytes(&self, buf: &mut [u8]) -> Result<usize, ParseError> {
        ensure_len(buf, Self::PACKED_SIZE_BYTES)?;
        buf[..4].copy_from_slice(&self.0);
        Ok(Self::PACKED_SIZE_BYTES)
    }
}

impl ToBytes for (LeapIndicator, Version, Mode) {
    fn to_bytes(&self, buf: &mut [u8]) -> Result<usize, ParseError> {
        ensure_len(buf, 1)?;
        let (li, vn, mode) = *self;
        buf[0] = (li as u8) << 6 | (vn.0 & 0b111) << 3 | mode as u8;
        Ok(1)
    }
}

impl ToBytes for Packet {
    fn to_bytes(&self, buf: &mut [u8]) -> Result<usize, ParseError> {
        ensure_len(buf, Self::PACKED_SIZE_BYTES)?;

        let mut offset = (self.leap_indicator, self.version, self.mode).to_bytes(buf)?;
        buf[offset] = self.stratum.0;
        buf[offset + 1] = self.poll as u8;
        buf[offset + 2] = self.precision as u8;
        offset += 3;
        offset += self.root_delay.to_bytes(&mut buf[offset..])?;
        offset += self.root_dispersion.to_bytes(&mut buf[offset..])?;
        offset += self.reference_id.to_bytes(&mut buf[offset..])?;
        offset += self.reference_timestamp.to_bytes(&mut buf[offset..])?;
        offset += self.origin_timestamp.to_bytes(&mut buf[offset..])?;
        offset += self.receive_timestamp.to_bytes(&mut buf[offset..])?;
        offset += self.transmit_timestamp.to_bytes(&mut buf[offset..])?;

        Ok(offset)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn sample_packet() -> Packet {
        Packet {
            leap_indicator: LeapIndicator::AddOne,
            version: Version::V4,
            mode: Mode::Server,
            stratum: Stratum(2),
            poll: 6,
            precision: -20,
            root_delay: ShortFormat {
                seconds: 0,
                fraction: 0x0100,
            },
            root_dispersion: ShortFormat {
                seconds: 1,
                fraction: 0x0200,
            },
            reference_id: ReferenceId([10, 0, 0, 1]),
            reference_timestamp: NtpTimestamp::from_parts(3_913_056_000, 1),
            origin_timestamp: NtpTimestamp::from_parts(3_913_056_001, 2),
            receive_timestamp: NtpTimestamp::from_parts(3_913_056_002, 3),
            transmit_timestamp: NtpTimestamp::from_parts(3_913_056_003, 4),
        }
    }

    #[test]
    fn test_header_layout() {
        let mut buf = [0u8; 48];
        let n = sample_packet().to_bytes(&mut buf).unwrap();
        assert_eq!(n, 48);
        // LI=1, VN=4, mode=4
        assert_eq!(buf[0], 0b01_100_100);
        assert_eq!(buf[1], 2);
        assert_eq!(buf[2], 6);
        assert_eq!(buf[3] as i8, -20);
        assert_eq!(&buf[4..8], &[0, 0, 1, 0]);
        assert_eq!(&buf[12..16], &[10, 0, 0, 1]);
        assert_eq!(&buf[44..48], &[0, 0, 0, 4]);
    }

    #[test]
    fn test_parse_written_packet() {
        let pkt = sample_packet();
        let mut buf = [0u8; 48];
        pkt.to_bytes(&mut buf).unwrap();
        let (parsed, consumed) = Packet::from_bytes(&buf).unwrap();
        assert_eq!(consumed, 48);
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn test_short_buffer() {
        let err = Packet::from_bytes(&[0u8; 47]).unwrap_err();
        assert_eq!(
            err,
            ParseError::BufferTooShort {
                needed: 48,
                available: 47
            }
        );
        let mut small = [0u8; 10];
        assert!(sample_packet().to_bytes(&mut small).is_err());
    }

    #[test]
    fn test_unknown_version_still_parses() {
        let mut buf = [0u8; 48];
        buf[0] = 0b11_111_011;
        let (pkt, _) = Packet::from_bytes(&buf).unwrap();
        assert_eq!(pkt.version.value(), 7);
        assert_eq!(pkt.leap_indicator, LeapIndicator::Unknown);
        assert_eq!(pkt.mode, Mode::Client);
    }
}
