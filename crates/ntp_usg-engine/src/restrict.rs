// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Address-based access restrictions.
//!
//! Each inbound datagram is matched against a list of address/prefix entries;
//! the most specific match wins, and sources matching nothing get the default
//! flags.

use std::fmt;
use std::net::IpAddr;
use std::ops::{BitOr, BitOrAssign};

/// Restriction flags attached to an address range.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Restrictions(u16);

impl Restrictions {
    /// No restrictions.
    pub const NONE: Self = Restrictions(0);
    /// Drop every packet.
    pub const IGNORE: Self = Restrictions(0x0001);
    /// Do not serve time (drop time requests).
    pub const DONTSERVE: Self = Restrictions(0x0002);
    /// Require authentication for any access.
    pub const DONTTRUST: Self = Restrictions(0x0004);
    /// Drop management (mode 6/7) queries.
    pub const NOQUERY: Self = Restrictions(0x0008);
    /// Do not mobilize ephemeral associations unless authenticated.
    pub const NOPEER: Self = Restrictions(0x0010);
    /// The source is over its rate budget.
    pub const LIMITED: Self = Restrictions(0x0020);
    /// Answer limited clients with a RATE kiss-o'-death.
    pub const KOD: Self = Restrictions(0x0040);
    /// Accept only the current protocol version.
    pub const VERSION: Self = Restrictions(0x0080);

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: Restrictions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Clear the flags in `other`.
    pub fn remove(&mut self, other: Restrictions) {
        self.0 &= !other.0;
    }

    /// The raw flag bits.
    pub fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for Restrictions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Restrictions(self.0 | rhs.0)
    }
}

impl BitOrAssign for Restrictions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Restrictions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Restrictions, &str); 8] = [
            (Restrictions::IGNORE, "ignore"),
            (Restrictions::DONTSERVE, "noserve"),
            (Restrictions::DONTTRUST, "notrust"),
            (Restrictions::NOQUERY, "noquery"),
            (Restrictions::NOPEER, "nopeer"),
            (Restrictions::LIMITED, "limited"),
            (Restrictions::KOD, "kod"),
            (Restrictions::VERSION, "version"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// An IP network (address + prefix length).
///
/// Prefix lengths are clamped to the address family maximum (32 or 128).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IpNet {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNet {
    /// Create a network from an address and prefix length.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Self {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        IpNet {
            addr,
            prefix_len: prefix_len.min(max),
        }
    }

    /// A network matching exactly one host.
    pub fn host(addr: IpAddr) -> Self {
        IpNet::new(addr, 128)
    }

    /// The prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `ip` falls within this network. Families never match each other.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - self.prefix_len as u32)
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - self.prefix_len as u32)
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// One restriction entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RestrictEntry {
    /// Matched address range.
    pub net: IpNet,
    /// Flags applied to sources in the range.
    pub flags: Restrictions,
}

impl RestrictEntry {
    /// An entry for `net` carrying `flags`.
    pub fn new(net: IpNet, flags: Restrictions) -> Self {
        RestrictEntry { net, flags }
    }
}

/// Ordered restriction list with a default entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RestrictList {
    entries: Vec<RestrictEntry>,
    default: Restrictions,
}

impl RestrictList {
    /// A list applying `default` to unmatched sources.
    pub fn new(default: Restrictions) -> Self {
        RestrictList {
            entries: Vec::new(),
            default,
        }
    }

    /// Add an entry. Entries with the same network replace the earlier one.
    pub fn add(&mut self, entry: RestrictEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.net == entry.net) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// The flags for `ip`: the longest matching prefix, else the default.
    pub fn lookup(&self, ip: &IpAddr) -> Restrictions {
        self.entries
            .iter()
            .filter(|e| e.net.contains(ip))
            .max_by_key(|e| e.net.prefix_len())
            .map_or(self.default, |e| e.flags)
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether only the default entry exists.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    // ── IpNet ───────────────────────────────────────────────────

    #[test]
    fn test_ipnet_contains_subnet() {
        let net = IpNet::new(ip("192.168.1.0"), 24);
        assert!(net.contains(&ip("192.168.1.255")));
        assert!(!net.contains(&ip("192.168.2.0")));
    }

    #[test]
    fn test_ipnet_slash_zero_matches_family() {
        let net = IpNet::new(ip("0.0.0.0"), 0);
        assert!(net.contains(&ip("255.255.255.255")));
        assert!(!net.contains(&ip("::1")));
    }

    #[test]
    fn test_ipnet_host_clamps_prefix() {
        let net = IpNet::host(ip("10.0.0.1"));
        assert_eq!(net.prefix_len(), 32);
        assert!(net.contains(&ip("10.0.0.1")));
        assert!(!net.contains(&ip("10.0.0.2")));
    }

    #[test]
    fn test_ipnet_ipv6() {
        let net = IpNet::new(ip("2001:db8::"), 32);
        assert!(net.contains(&ip("2001:db8:ffff::1")));
        assert!(!net.contains(&ip("2001:db9::1")));
    }

    // ── RestrictList ────────────────────────────────────────────

    #[test]
    fn test_lookup_default() {
        let list = RestrictList::new(Restrictions::NOQUERY);
        assert_eq!(list.lookup(&ip("1.2.3.4")), Restrictions::NOQUERY);
    }

    #[test]
    fn test_lookup_most_specific_wins() {
        let mut list = RestrictList::new(Restrictions::NONE);
        list.add(RestrictEntry::new(
            IpNet::new(ip("10.0.0.0"), 8),
            Restrictions::IGNORE,
        ));
        list.add(RestrictEntry::new(
            IpNet::new(ip("10.1.0.0"), 16),
            Restrictions::NOPEER,
        ));
        assert_eq!(list.lookup(&ip("10.1.2.3")), Restrictions::NOPEER);
        assert_eq!(list.lookup(&ip("10.2.0.1")), Restrictions::IGNORE);
        assert_eq!(list.lookup(&ip("11.0.0.1")), Restrictions::NONE);
    }

    #[test]
    fn test_add_replaces_same_network() {
        let mut list = RestrictList::default();
        let net = IpNet::new(ip("192.0.2.0"), 24);
        list.add(RestrictEntry::new(net, Restrictions::IGNORE));
        list.add(RestrictEntry::new(net, Restrictions::LIMITED | Restrictions::KOD));
        assert_eq!(list.len(), 1);
        let flags = list.lookup(&ip("192.0.2.7"));
        assert!(flags.contains(Restrictions::LIMITED));
        assert!(flags.contains(Restrictions::KOD));
        assert!(!flags.contains(Restrictions::IGNORE));
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(Restrictions::NONE.to_string(), "none");
        assert_eq!(
            (Restrictions::LIMITED | Restrictions::KOD).to_string(),
            "limited kod"
        );
    }

    #[test]
    fn test_flags_remove() {
        let mut r = Restrictions::LIMITED | Restrictions::KOD;
        r.remove(Restrictions::KOD);
        assert_eq!(r, Restrictions::LIMITED);
    }
}
