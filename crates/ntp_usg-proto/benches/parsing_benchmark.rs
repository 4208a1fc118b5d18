// Benchmarks for NTP datagram framing and timestamp arithmetic.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use ntp_proto::protocol::{
    ConstPackedSizeBytes, Frame, FromBytes, LeapIndicator, Mac, Mode, Packet, ReferenceId,
    ShortFormat, Stratum, ToBytes, Trailer, Version,
};
use ntp_proto::{NtpDuration, NtpTimestamp};

fn make_test_packet() -> Packet {
    Packet {
        leap_indicator: LeapIndicator::NoWarning,
        version: Version::V4,
        mode: Mode::Server,
        stratum: Stratum::PRIMARY,
        poll: 6,
        precision: -20,
        root_delay: ShortFormat {
            seconds: 0,
            fraction: 256,
        },
        root_dispersion: ShortFormat {
            seconds: 0,
            fraction: 512,
        },
        reference_id: ReferenceId(*b"GPS\0"),
        reference_timestamp: NtpTimestamp::from_parts(3_913_056_000, 0xABCD_1234),
        origin_timestamp: NtpTimestamp::from_parts(3_913_056_001, 0x1111_2222),
        receive_timestamp: NtpTimestamp::from_parts(3_913_056_002, 0x3333_4444),
        transmit_timestamp: NtpTimestamp::from_parts(3_913_056_003, 0x5555_6666),
    }
}

fn bench_packet_from_bytes(c: &mut Criterion) {
    let mut buf = [0u8; Packet::PACKED_SIZE_BYTES];
    make_test_packet().to_bytes(&mut buf).unwrap();

    c.bench_function("packet_from_bytes", |b| {
        b.iter(|| Packet::from_bytes(black_box(&buf)).unwrap())
    });
}

fn bench_packet_to_bytes(c: &mut Criterion) {
    let pkt = make_test_packet();
    let mut buf = [0u8; Packet::PACKED_SIZE_BYTES];

    c.bench_function("packet_to_bytes", |b| {
        b.iter(|| black_box(&pkt).to_bytes(&mut buf).unwrap())
    });
}

fn bench_frame_with_mac(c: &mut Criterion) {
    let mut frame = Frame::new(make_test_packet());
    frame.trailer = Trailer::Mac(Mac::new(1, &[0xAA; 20]).unwrap());
    let mut buf = [0u8; 72];
    frame.encode(&mut buf).unwrap();

    c.bench_function("frame_parse_sha1_mac", |b| {
        b.iter(|| Frame::parse(black_box(&buf)).unwrap())
    });
}

fn bench_on_wire_arithmetic(c: &mut Criterion) {
    let pkt = make_test_packet();
    let t4 = pkt.transmit_timestamp + NtpDuration::from_seconds_f64(0.02);

    c.bench_function("on_wire_offset_delay", |b| {
        b.iter(|| {
            let p = black_box(&pkt);
            let t21 = (p.receive_timestamp - p.origin_timestamp).to_seconds_f64();
            let t34 = (p.transmit_timestamp - black_box(t4)).to_seconds_f64();
            ((t21 + t34) / 2.0, t21 - t34)
        })
    });
}

criterion_group!(
    benches,
    bench_packet_from_bytes,
    bench_packet_to_bytes,
    bench_frame_with_mac,
    bench_on_wire_arithmetic,
);
criterion_main!(benches);
