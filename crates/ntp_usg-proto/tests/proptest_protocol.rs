use ntp_proto::protocol::{ConstPackedSizeBytes, Frame, FromBytes, Packet, ShortFormat, ToBytes};
use ntp_proto::{NtpDuration, NtpTimestamp};
use proptest::prelude::*;

proptest! {
    /// Any 48 random bytes parse as a header and re-encode to the same bytes.
    #[test]
    fn header_bytes_are_preserved(bytes in prop::collection::vec(any::<u8>(), 48)) {
        let (packet, consumed) = Packet::from_bytes(&bytes).unwrap();
        prop_assert_eq!(consumed, Packet::PACKED_SIZE_BYTES);
        let mut buf = [0u8; Packet::PACKED_SIZE_BYTES];
        packet.to_bytes(&mut buf).unwrap();
        prop_assert_eq!(&buf[..], &bytes[..]);
    }

    /// Arbitrary datagrams never panic the framer.
    #[test]
    fn frame_parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..200)) {
        let _ = Frame::parse(&bytes);
    }

    /// Parsed frames never claim authenticated data past the end of the datagram.
    #[test]
    fn frame_auth_len_in_bounds(bytes in prop::collection::vec(any::<u8>(), 48..200)) {
        if let Ok(frame) = Frame::parse(&bytes) {
            prop_assert!(frame.auth_len + frame.trailer.wire_len() <= bytes.len());
            prop_assert!(frame.auth_len >= 48);
        }
    }

    /// Differences are exact inverses of additions, whatever the era.
    #[test]
    fn timestamp_add_then_subtract(bits in any::<u64>(), delta in any::<i64>()) {
        let ts = NtpTimestamp::from_bits(bits);
        let d = NtpDuration::from_bits(delta);
        prop_assert_eq!((ts + d) - ts, d);
        prop_assert_eq!((ts + d) - d, ts);
    }

    /// Offset and delay from four timestamps match a float reference, even when the
    /// exchange straddles the era rollover.
    #[test]
    fn on_wire_matches_reference(
        t1_secs in (u32::MAX - 1000)..=u32::MAX,
        t1_frac in any::<u32>(),
        a in -100.0f64..100.0,
        b in 0.0f64..1.0,
        c in 0.0f64..2.0,
    ) {
        let t1 = NtpTimestamp::from_parts(t1_secs, t1_frac);
        let t2 = t1 + NtpDuration::from_seconds_f64(a);
        let t3 = t2 + NtpDuration::from_seconds_f64(b);
        let t4 = t1 + NtpDuration::from_seconds_f64(b + c);

        let t21 = (t2 - t1).to_seconds_f64();
        let t34 = (t3 - t4).to_seconds_f64();
        let offset = (t21 + t34) / 2.0;
        let delay = t21 - t34;

        let ref_offset = (a + (a + b - (b + c))) / 2.0;
        let ref_delay = a - (a + b - (b + c));
        prop_assert!((offset - ref_offset).abs() < 1e-8);
        prop_assert!((delay - ref_delay).abs() < 1e-8);
    }

    /// Short-format conversion is accurate to one unit of its fraction.
    #[test]
    fn short_format_seconds(s in 0.0f64..65535.0) {
        let sf = ShortFormat::from_seconds_f64(s);
        prop_assert!((sf.to_seconds_f64() - s).abs() <= 1.0 / 65536.0);
    }
}
