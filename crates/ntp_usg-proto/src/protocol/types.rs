use core::fmt;

use super::ConstPackedSizeBytes;
use crate::timestamp::NtpTimestamp;

/// **NTP Short Format** - Used in delay and dispersion header fields where the full resolution and
/// range of the other formats are not justified. It includes a 16-bit unsigned seconds field and a
/// 16-bit fraction field.
///
/// ```ignore
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Seconds              |           Fraction            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ShortFormat {
    /// Seconds component (16-bit unsigned).
    pub seconds: u16,
    /// Fractional seconds component (16-bit unsigned).
    pub fraction: u16,
}

/// **NTP Timestamp Format** as it appears on the wire: 32-bit seconds since the era start and a
/// 32-bit fraction. Arithmetic happens on [`NtpTimestamp`]; this type only fixes the layout.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TimestampFormat {
    /// Seconds since 1900-01-01 00:00:00 UTC, modulo 2^32.
    pub seconds: u32,
    /// Fractional seconds (resolution of ~232 picoseconds).
    pub fraction: u32,
}

/// A 2-bit integer warning of an impending leap second to be inserted or deleted in the last
/// minute of the current month.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum LeapIndicator {
    /// No leap required.
    #[default]
    NoWarning = 0,
    /// Last minute of the day has 61 seconds.
    AddOne = 1,
    /// Last minute of the day has 59 seconds.
    SubOne = 2,
    /// Clock unsynchronized.
    Unknown = 3,
}

impl TryFrom<u8> for LeapIndicator {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LeapIndicator::NoWarning),
            1 => Ok(LeapIndicator::AddOne),
            2 => Ok(LeapIndicator::SubOne),
            3 => Ok(LeapIndicator::Unknown),
            _ => Err(()),
        }
    }
}

/// A 3-bit integer representing the NTP version number.
///
/// Any 3-bit value can arrive on the wire; [`Version::is_known`] tells whether it is one this
/// implementation answers.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Version(pub(super) u8);

impl Version {
    /// NTP version 1.
    pub const V1: Self = Version(1);
    /// NTP version 2.
    pub const V2: Self = Version(2);
    /// NTP version 3.
    pub const V3: Self = Version(3);
    /// NTP version 4 (current standard).
    pub const V4: Self = Version(4);

    /// Create a `Version` from a raw version number.
    ///
    /// Returns `None` if the value does not fit the 3-bit field.
    pub fn new(v: u8) -> Option<Self> {
        (v <= 7).then_some(Version(v))
    }

    /// Returns the raw version number as a `u8`.
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Whether the version is in the range 1 through 4.
    pub fn is_known(&self) -> bool {
        (super::OLD_VERSION..=super::VERSION).contains(&self.0)
    }
}

impl Default for Version {
    /// Defaults to NTPv4, the current standard (RFC 5905).
    fn default() -> Self {
        Version::V4
    }
}

/// A 3-bit integer representing the association mode.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum Mode {
    /// Reserved mode (value 0).
    Reserved = 0,
    /// Symmetric active mode (value 1).
    SymmetricActive = 1,
    /// Symmetric passive mode (value 2).
    SymmetricPassive = 2,
    /// Client mode (value 3).
    #[default]
    Client = 3,
    /// Server mode (value 4).
    Server = 4,
    /// Broadcast mode (value 5).
    Broadcast = 5,
    /// NTP control message mode (value 6).
    NtpControlMessage = 6,
    /// Reserved for private use (value 7).
    ReservedForPrivateUse = 7,
}

impl Mode {
    /// Decodes the low three bits of `value`.
    pub fn from_bits(value: u8) -> Self {
        match value & 0b111 {
            0 => Mode::Reserved,
            1 => Mode::SymmetricActive,
            2 => Mode::SymmetricPassive,
            3 => Mode::Client,
            4 => Mode::Server,
            5 => Mode::Broadcast,
            6 => Mode::NtpControlMessage,
            _ => Mode::ReservedForPrivateUse,
        }
    }

    /// Whether the mode belongs to the management protocol rather than time transfer.
    pub fn is_management(self) -> bool {
        matches!(self, Mode::NtpControlMessage | Mode::ReservedForPrivateUse)
    }
}

/// An 8-bit integer representing the stratum.
///
/// ```ignore
/// +--------+-----------------------------------------------------+
/// | Value  | Meaning                                             |
/// +--------+-----------------------------------------------------+
/// | 0      | unspecified or invalid                              |
/// | 1      | primary server (e.g., equipped with a GPS receiver) |
/// | 2-15   | secondary server (via NTP)                          |
/// | 16     | unsynchronized                                      |
/// | 17-255 | reserved                                            |
/// +--------+-----------------------------------------------------+
/// ```
///
/// Stratum 0 in a received packet is mapped to 16 in peer variables, so that reference clocks,
/// which appear at stratum 0, are mitigated by the same selection algorithms as network peers.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Stratum(pub u8);

impl Stratum {
    /// Unspecified or invalid; also the stratum of kiss-o'-death packets.
    pub const UNSPECIFIED: Self = Stratum(0);
    /// The primary server (e.g. equipped with a GPS receiver).
    pub const PRIMARY: Self = Stratum(1);
    /// An unsynchronized stratum.
    pub const UNSYNCHRONIZED: Self = Stratum(16);

    /// The stratum as kept in peer variables: 0 and anything above 16 become 16.
    pub fn to_peer(self) -> u8 {
        if self.0 == 0 || self.0 > super::MAXSTRAT {
            super::MAXSTRAT
        } else {
            self.0
        }
    }

    /// The stratum as sent on the wire: 16 and above become 0.
    pub fn from_peer(stratum: u8) -> Self {
        if stratum >= super::MAXSTRAT {
            Stratum::UNSPECIFIED
        } else {
            Stratum(stratum)
        }
    }
}

/// A 32-bit code identifying the particular server or reference clock.
///
/// The interpretation depends on the stratum: a kiss code at stratum 0, a reference clock name
/// at stratum 1, and at higher strata the IPv4 address of the upstream server (or the first four
/// octets of the MD5 digest of its IPv6 address). Comparing reference identifiers against the
/// local address is how timing loops are detected.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ReferenceId(pub [u8; 4]);

impl ReferenceId {
    /// Association still initializing.
    pub const INIT: Self = ReferenceId(*b"INIT");
    /// The local clock was stepped; all associations restarted.
    pub const STEP: Self = ReferenceId(*b"STEP");
    /// Authentication failure forced a restart.
    pub const AUTH: Self = ReferenceId(*b"AUTH");
    /// Rate kiss-o'-death received.
    pub const RATE: Self = ReferenceId(*b"RATE");
    /// Access denied by the server.
    pub const DENY: Self = ReferenceId(*b"DENY");
    /// Orphan mode at stratum 1.
    pub const LOOP: Self = ReferenceId(*b"LOOP");
    /// Orphan mode above stratum 1: the IPv4 loopback address.
    pub const LOOPBACK: Self = ReferenceId([127, 0, 0, 1]);

    /// The identifier as a big-endian integer.
    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Interprets the identifier as a kiss code. Only meaningful at stratum 0.
    pub fn kiss_code(self) -> Option<KissOfDeath> {
        KissOfDeath::try_from(self.to_u32()).ok()
    }

    /// Derives the identifier an upstream server reports for `addr`.
    #[cfg(feature = "std")]
    pub fn from_addr(addr: std::net::IpAddr) -> Self {
        match addr {
            std::net::IpAddr::V4(v4) => ReferenceId(v4.octets()),
            std::net::IpAddr::V6(v6) => ReferenceId(super::md5::refid_digest(&v6.octets())),
        }
    }
}

impl fmt::Display for ReferenceId {
    /// Printable ASCII codes render as text, anything else as a dotted quad.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .0
            .iter()
            .take_while(|b| **b != 0)
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if text && self.0[0] != 0 {
            for &b in self.0.iter().take_while(|b| **b != 0) {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            let [a, b, c, d] = self.0;
            write!(f, "{}.{}.{}.{}", a, b, c, d)
        }
    }
}

/// If the Stratum field is 0, the Reference Identifier field can be used to convey messages
/// useful for status reporting and access control. These are called **Kiss-o'-Death** (KoD)
/// packets and the ASCII messages they convey are called kiss codes.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KissOfDeath {
    /// The client MUST demobilize any associations to that server and stop sending packets to it.
    Deny = code_to_u32!(b"DENY"),
    /// The client MUST demobilize any associations to that server and stop sending packets to it.
    Rstr = code_to_u32!(b"RSTR"),
    /// The client MUST immediately reduce its polling interval to that server and continue to
    /// reduce it each time it receives a RATE kiss code.
    Rate = code_to_u32!(b"RATE"),
}

impl TryFrom<u32> for KissOfDeath {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            v if v == KissOfDeath::Deny as u32 => Ok(KissOfDeath::Deny),
            v if v == KissOfDeath::Rstr as u32 => Ok(KissOfDeath::Rstr),
            v if v == KissOfDeath::Rate as u32 => Ok(KissOfDeath::Rate),
            _ => Err(()),
        }
    }
}

/// **Packet Header** - the 48-octet fixed part of every NTP datagram.
///
/// ```ignore
/// +-----------+------------+-----------------------+
/// | Name      | Formula    | Description           |
/// +-----------+------------+-----------------------+
/// | leap      | leap       | leap indicator (LI)   |
/// | version   | version    | version number (VN)   |
/// | mode      | mode       | mode                  |
/// | stratum   | stratum    | stratum               |
/// | poll      | poll       | poll exponent         |
/// | precision | rho        | precision exponent    |
/// | rootdelay | delta_r    | root delay            |
/// | rootdisp  | epsilon_r  | root dispersion       |
/// | refid     | refid      | reference ID          |
/// | reftime   | reftime    | reference timestamp   |
/// | org       | T1         | origin timestamp      |
/// | rec       | T2         | receive timestamp     |
/// | xmt       | T3         | transmit timestamp    |
/// +-----------+------------+-----------------------+
/// ```
///
/// Extension fields and the MAC that may follow the header are handled by
/// [`Frame`](super::Frame).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Packet {
    /// Leap warning and synchronization state.
    pub leap_indicator: LeapIndicator,
    /// Protocol version.
    pub version: Version,
    /// Association mode of the sender.
    pub mode: Mode,
    /// Stratum of the sender.
    pub stratum: Stratum,
    /// Poll exponent (log2 seconds) the sender is using.
    pub poll: i8,
    /// Precision exponent (log2 seconds) of the sender's clock.
    pub precision: i8,
    /// Round-trip delay to the sender's reference clock.
    pub root_delay: ShortFormat,
    /// Dispersion to the sender's reference clock.
    pub root_dispersion: ShortFormat,
    /// Reference identifier or kiss code.
    pub reference_id: ReferenceId,
    /// Time the sender's clock was last set or corrected.
    pub reference_timestamp: NtpTimestamp,
    /// T1: time the request departed the client.
    pub origin_timestamp: NtpTimestamp,
    /// T2: time the request arrived at the server.
    pub receive_timestamp: NtpTimestamp,
    /// T3: time the reply departed the server.
    pub transmit_timestamp: NtpTimestamp,
}

impl Packet {
    /// The kiss code carried by this packet, if it is a kiss-o'-death.
    pub fn kiss_code(&self) -> Option<KissOfDeath> {
        if self.stratum == Stratum::UNSPECIFIED {
            self.reference_id.kiss_code()
        } else {
            None
        }
    }
}

impl Default for Packet {
    /// An NTPv4 client request with every timestamp unset.
    fn default() -> Self {
        Packet {
            leap_indicator: LeapIndicator::default(),
            version: Version::default(),
            mode: Mode::default(),
            stratum: Stratum::default(),
            poll: 0,
            precision: 0,
            root_delay: ShortFormat::default(),
            root_dispersion: ShortFormat::default(),
            reference_id: ReferenceId::default(),
            reference_timestamp: NtpTimestamp::ZERO,
            origin_timestamp: NtpTimestamp::ZERO,
            receive_timestamp: NtpTimestamp::ZERO,
            transmit_timestamp: NtpTimestamp::ZERO,
        }
    }
}

// Size implementations.

impl ConstPackedSizeBytes for ShortFormat {
    const PACKED_SIZE_BYTES: usize = 4;
}

impl ConstPackedSizeBytes for TimestampFormat {
    const PACKED_SIZE_BYTES: usize = 8;
}

impl ConstPackedSizeBytes for ReferenceId {
    const PACKED_SIZE_BYTES: usize = 4;
}

impl ConstPackedSizeBytes for Packet {
    const PACKED_SIZE_BYTES: usize = 4
        + ShortFormat::PACKED_SIZE_BYTES * 2
        + ReferenceId::PACKED_SIZE_BYTES
        + TimestampFormat::PACKED_SIZE_BYTES * 4;
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_packet_size() {
        assert_eq!(Packet::PACKED_SIZE_BYTES, 48);
    }

    #[test]
    fn test_stratum_peer_mapping() {
        assert_eq!(Stratum(0).to_peer(), 16);
        assert_eq!(Stratum(3).to_peer(), 3);
        assert_eq!(Stratum(200).to_peer(), 16);
        assert_eq!(Stratum::from_peer(16), Stratum::UNSPECIFIED);
        assert_eq!(Stratum::from_peer(2), Stratum(2));
    }

    #[test]
    fn test_kiss_code_only_at_stratum_zero() {
        let mut pkt = Packet {
            reference_id: ReferenceId::RATE,
            ..Packet::default()
        };
        assert_eq!(pkt.kiss_code(), Some(KissOfDeath::Rate));
        pkt.stratum = Stratum(2);
        assert_eq!(pkt.kiss_code(), None);
    }

    #[test]
    fn test_refid_from_ipv4() {
        let id = ReferenceId::from_addr(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7)));
        assert_eq!(id, ReferenceId([192, 0, 2, 7]));
        assert_eq!(id.to_string(), "192.0.2.7");
    }

    #[test]
    fn test_refid_display_ascii() {
        assert_eq!(ReferenceId::STEP.to_string(), "STEP");
        assert_eq!(ReferenceId(*b"GPS\0").to_string(), "GPS");
    }

    #[test]
    fn test_version_known_range() {
        assert!(Version::V1.is_known());
        assert!(Version::V4.is_known());
        assert!(!Version::new(0).unwrap().is_known());
        assert!(!Version::new(5).unwrap().is_known());
        assert_eq!(Version::new(8), None);
    }

    #[test]
    fn test_mode_from_bits() {
        assert_eq!(Mode::from_bits(0b1111_1100), Mode::Server);
        assert!(Mode::from_bits(6).is_management());
        assert!(!Mode::from_bits(3).is_management());
    }
}
