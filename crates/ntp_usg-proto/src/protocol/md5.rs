// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Single-block MD5 (RFC 1321) for IPv6 reference identifiers.
//!
//! RFC 5905 derives the reference identifier of an IPv6 upstream from the
//! first four octets of `MD5(address)`. A 16-octet address always pads to
//! exactly one 64-octet block, so only one compression round is needed.
//! This is not used for anything security relevant.

const SHIFTS: [[u32; 4]; 4] = [[7, 12, 17, 22], [5, 9, 14, 20], [4, 11, 16, 23], [6, 10, 15, 21]];

const K: [u32; 64] = [
    0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613, 0xfd469501,
    0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193, 0xa679438e, 0x49b40821,
    0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa, 0xd62f105d, 0x02441453, 0xd8a1e681, 0xe7d3fbc8,
    0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed, 0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a,
    0xfffa3942, 0x8771f681, 0x6d9d6122, 0xfde5380c, 0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70,
    0x289b7ec6, 0xeaa127fa, 0xd4ef3085, 0x04881d05, 0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665,
    0xf4292244, 0x432aff97, 0xab9423a7, 0xfc93a039, 0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
    0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1, 0xf7537e82, 0xbd3af235, 0x2ad7d2bb, 0xeb86d391,
];

const INITIAL_STATE: [u32; 4] = [0x67452301, 0xefcdab89, 0x98badcfe, 0x10325476];

/// First four octets of the MD5 digest of a 16-octet address.
#[cfg_attr(not(feature = "std"), allow(dead_code))]
pub(crate) fn refid_digest(octets: &[u8; 16]) -> [u8; 4] {
    let mut block = [0u8; 64];
    block[..16].copy_from_slice(octets);
    block[16] = 0x80;
    block[56..].copy_from_slice(&(16u64 * 8).to_le_bytes());
    compress(INITIAL_STATE, &block)[0].to_le_bytes()
}

fn compress(state: [u32; 4], block: &[u8; 64]) -> [u32; 4] {
    let mut m = [0u32; 16];
    for (word, chunk) in m.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    let [mut a, mut b, mut c, mut d] = state;
    for (i, k) in K.iter().enumerate() {
        let (f, g) = match i / 16 {
            0 => ((b & c) | (!b & d), i),
            1 => ((d & b) | (!d & c), (5 * i + 1) % 16),
            2 => (b ^ c ^ d, (3 * i + 5) % 16),
            _ => (c ^ (b | !d), (7 * i) % 16),
        };
        let mixed = a
            .wrapping_add(f)
            .wrapping_add(*k)
            .wrapping_add(m[g])
            .rotate_left(SHIFTS[i / 16][i % 4]);
        a = d;
        d = c;
        c = b;
        b = b.wrapping_add(mixed);
    }

    [
        state[0].wrapping_add(a),
        state[1].wrapping_add(b),
        state[2].wrapping_add(c),
        state[3].wrapping_add(d),
    ]
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_loopback_digest() {
        assert_eq!(
            refid_digest(&Ipv6Addr::LOCALHOST.octets()),
            [0xcf, 0x40, 0x4d, 0xc8]
        );
    }

    #[test]
    fn test_documentation_prefix_digest() {
        let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert_eq!(refid_digest(&addr.octets()), [0x39, 0xab, 0x9b, 0x37]);
    }
}
