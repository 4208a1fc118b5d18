// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Association table.
//!
//! Peers live in an arena of generation-tagged slots and are addressed by
//! [`PeerHandle`]. A handle whose slot has been freed (or reused) no longer
//! resolves, so removing a peer while another component still holds its
//! handle is safe. A secondary index maps `(remote address, host mode)` to
//! the handle for receive-path lookups.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use ntp_proto::NtpTimestamp;
use ntp_proto::protocol::Mode;

use crate::config::PeerConfig;
use crate::error::EngineError;
use crate::peer::{CastKind, HostMode, Peer};

/// Stable reference to an association.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PeerHandle {
    index: u32,
    generation: u32,
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// How an inbound packet relates to the association table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchCode {
    /// Belongs to an existing association.
    Process,
    /// Symmetric active from an unknown host: mobilize a passive association.
    NewPassive,
    /// Client request: answer without keeping state.
    FastReply,
    /// Server reply to a manycast solicitation.
    Manycast,
    /// Broadcast from an unknown server: mobilize a broadcast client.
    NewBroadcastClient,
    /// Not acceptable in any association.
    Error,
    /// No association and nothing to mobilize.
    NoMatch,
}

/// The decision for one (host mode, packet mode) pair.
fn match_assoc(hmode: Option<HostMode>, pmode: Mode) -> MatchCode {
    use MatchCode::*;
    match (hmode, pmode) {
        (_, Mode::Reserved) => Error,
        (None, Mode::SymmetricActive) => NewPassive,
        (None, Mode::Client) => FastReply,
        (None, Mode::Server) => Manycast,
        (None, Mode::Broadcast) => NewBroadcastClient,
        (Some(HostMode::Active), Mode::SymmetricActive | Mode::SymmetricPassive) => Process,
        (Some(HostMode::Passive), Mode::SymmetricActive) => Process,
        (Some(HostMode::Passive), Mode::SymmetricPassive) => Error,
        (Some(HostMode::Client), Mode::Server) => Process,
        (Some(HostMode::BroadcastClient), Mode::Broadcast) => Process,
        _ => NoMatch,
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    peer: Option<Peer>,
}

/// Arena of associations with an address index.
#[derive(Debug, Default)]
pub struct PeerTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<(SocketAddr, HostMode), PeerHandle>,
    next_associd: u16,
    capacity: usize,
}

impl PeerTable {
    /// An empty table holding at most `capacity` associations.
    pub fn new(capacity: usize) -> Self {
        PeerTable {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            next_associd: 0,
            capacity,
        }
    }

    /// Number of associations.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Add an association built from `config`.
    pub(crate) fn insert(&mut self, config: &PeerConfig) -> Result<PeerHandle, EngineError> {
        if self.len() >= self.capacity {
            return Err(EngineError::AssociationLimit { max: self.capacity });
        }
        let key = (config.addr, config.mode);
        if self.index.contains_key(&key) {
            return Err(EngineError::DuplicateAssociation { addr: config.addr });
        }
        let associd = self.alloc_associd();
        let peer = Peer::new(config, associd);

        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.peer = Some(peer);
                PeerHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    peer: Some(peer),
                });
                PeerHandle {
                    index,
                    generation: 0,
                }
            }
        };
        self.index.insert(key, handle);
        Ok(handle)
    }

    /// Remove an association, returning it.
    pub(crate) fn remove(&mut self, handle: PeerHandle) -> Option<Peer> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let peer = slot.peer.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.index.remove(&(peer.addr, peer.hmode));
        Some(peer)
    }

    /// Resolve a handle.
    pub fn get(&self, handle: PeerHandle) -> Option<&Peer> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.peer.as_ref())
    }

    /// Resolve a handle mutably.
    pub(crate) fn get_mut(&mut self, handle: PeerHandle) -> Option<&mut Peer> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.peer.as_mut())
    }

    /// Whether `handle` still refers to a live association.
    pub fn contains(&self, handle: PeerHandle) -> bool {
        self.get(handle).is_some()
    }

    /// The association for `addr` in mode `hmode`.
    pub fn find(&self, addr: SocketAddr, hmode: HostMode) -> Option<PeerHandle> {
        self.index.get(&(addr, hmode)).copied()
    }

    /// The association with id `associd`.
    pub fn find_associd(&self, associd: u16) -> Option<PeerHandle> {
        self.iter()
            .find(|(_, p)| p.associd == associd)
            .map(|(h, _)| h)
    }

    /// Handles of every association, in slot order. The list is a snapshot:
    /// removing a peer later leaves its handle stale rather than dangling.
    pub fn handles(&self) -> Vec<PeerHandle> {
        self.iter().map(|(h, _)| h).collect()
    }

    /// Every association with its handle.
    pub fn iter(&self) -> impl Iterator<Item = (PeerHandle, &Peer)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.peer.as_ref().map(|p| {
                (
                    PeerHandle {
                        index: i as u32,
                        generation: s.generation,
                    },
                    p,
                )
            })
        })
    }

    /// Every association, mutably.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (PeerHandle, &mut Peer)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.peer.as_mut().map(|p| {
                (
                    PeerHandle {
                        index: i as u32,
                        generation,
                    },
                    p,
                )
            })
        })
    }

    /// Change an association's host mode and move its index entry.
    pub(crate) fn set_hmode(&mut self, handle: PeerHandle, hmode: HostMode) -> bool {
        let Some(peer) = self.get(handle) else {
            return false;
        };
        let old = (peer.addr, peer.hmode);
        let new = (peer.addr, hmode);
        if old == new {
            return true;
        }
        if self.index.contains_key(&new) {
            return false;
        }
        if let Some(peer) = self.get_mut(handle) {
            peer.hmode = hmode;
        }
        self.index.remove(&old);
        self.index.insert(new, handle);
        true
    }

    /// Classify a packet of mode `pmode` from `src` carrying origin `org`.
    ///
    /// Existing associations for the source are tried in turn; the first one
    /// whose mode pairs with the packet wins. Otherwise the packet is
    /// classified as if no association existed.
    pub(crate) fn match_association(
        &self,
        src: SocketAddr,
        pmode: Mode,
        org: NtpTimestamp,
    ) -> (MatchCode, Option<PeerHandle>) {
        for hmode in HostMode::ALL {
            let Some(handle) = self.find(src, hmode) else {
                continue;
            };
            let code = match_assoc(Some(hmode), pmode);
            match code {
                MatchCode::Error => return (MatchCode::Error, None),
                MatchCode::NoMatch => continue,
                MatchCode::Process => {
                    // a second reply to a manycast solicitation already answered
                    if pmode == Mode::Server
                        && let Some(peer) = self.get(handle)
                        && peer.aorg != org
                        && self.find_manycast(org).is_some()
                    {
                        return (MatchCode::Error, None);
                    }
                    return (MatchCode::Process, Some(handle));
                }
                other => return (other, Some(handle)),
            }
        }
        (match_assoc(None, pmode), None)
    }

    /// The manycast client whose outstanding solicitation carried `org`.
    pub(crate) fn find_manycast(&self, org: NtpTimestamp) -> Option<PeerHandle> {
        if org.is_zero() {
            return None;
        }
        self.iter()
            .find(|(_, p)| p.cast == CastKind::ManycastClient && p.aorg == org)
            .map(|(h, _)| h)
    }

    fn alloc_associd(&mut self) -> u16 {
        loop {
            self.next_associd = self.next_associd.wrapping_add(1);
            let id = self.next_associd;
            if id != 0 && !self.iter().any(|(_, p)| p.associd == id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn table() -> PeerTable {
        PeerTable::new(4)
    }

    // ── Arena ───────────────────────────────────────────────────

    #[test]
    fn test_insert_and_get() {
        let mut t = table();
        let h = t.insert(&PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        assert_eq!(t.len(), 1);
        let p = t.get(h).unwrap();
        assert_eq!(p.addr(), addr("192.0.2.1:123"));
        assert_eq!(p.associd(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut t = table();
        let cfg = PeerConfig::server(addr("192.0.2.1:123"));
        t.insert(&cfg).unwrap();
        assert!(matches!(
            t.insert(&cfg),
            Err(EngineError::DuplicateAssociation { .. })
        ));
        // same address in another mode is a separate association
        t.insert(&PeerConfig::symmetric(addr("192.0.2.1:123"))).unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_capacity() {
        let mut t = PeerTable::new(1);
        t.insert(&PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        assert!(matches!(
            t.insert(&PeerConfig::server(addr("192.0.2.2:123"))),
            Err(EngineError::AssociationLimit { max: 1 })
        ));
    }

    #[test]
    fn test_stale_handle_after_remove() {
        let mut t = table();
        let h1 = t.insert(&PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        assert!(t.remove(h1).is_some());
        assert!(t.get(h1).is_none());
        assert!(t.remove(h1).is_none());

        // slot reused with a new generation
        let h2 = t.insert(&PeerConfig::server(addr("192.0.2.2:123"))).unwrap();
        assert_eq!(h1.index, h2.index);
        assert_ne!(h1, h2);
        assert!(t.get(h1).is_none());
        assert!(t.get(h2).is_some());
        assert!(t.find(addr("192.0.2.1:123"), HostMode::Client).is_none());
    }

    #[test]
    fn test_associd_skips_in_use() {
        let mut t = table();
        t.next_associd = u16::MAX - 1;
        let h1 = t.insert(&PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        let h2 = t.insert(&PeerConfig::server(addr("192.0.2.2:123"))).unwrap();
        assert_eq!(t.get(h1).unwrap().associd(), u16::MAX);
        // wraps past zero
        assert_eq!(t.get(h2).unwrap().associd(), 1);
        assert_eq!(t.find_associd(1), Some(h2));
    }

    #[test]
    fn test_set_hmode_rekeys() {
        let mut t = table();
        let a = addr("192.0.2.1:123");
        let h = t.insert(&PeerConfig::server(a)).unwrap();
        assert!(t.set_hmode(h, HostMode::BroadcastClient));
        assert_eq!(t.find(a, HostMode::BroadcastClient), Some(h));
        assert!(t.find(a, HostMode::Client).is_none());
        assert_eq!(t.get(h).unwrap().host_mode(), HostMode::BroadcastClient);
    }

    #[test]
    fn test_set_hmode_refuses_taken_key() {
        let mut t = table();
        let a = addr("192.0.2.1:123");
        let client = t.insert(&PeerConfig::server(a)).unwrap();
        let active = t.insert(&PeerConfig::symmetric(a)).unwrap();
        assert!(!t.set_hmode(client, HostMode::Active));
        assert_eq!(t.get(client).unwrap().host_mode(), HostMode::Client);
        assert_eq!(t.find(a, HostMode::Client), Some(client));
        assert_eq!(t.find(a, HostMode::Active), Some(active));
        assert!(!t.set_hmode(PeerHandle { index: 99, generation: 0 }, HostMode::Client));
    }

    #[test]
    fn test_handles_snapshot() {
        let mut t = table();
        let h1 = t.insert(&PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        let h2 = t.insert(&PeerConfig::server(addr("192.0.2.2:123"))).unwrap();
        let snap = t.handles();
        t.remove(h1);
        assert_eq!(snap, vec![h1, h2]);
        assert_eq!(snap.iter().filter(|h| t.contains(**h)).count(), 1);
    }

    // ── Matching ────────────────────────────────────────────────

    #[test]
    fn test_match_no_association() {
        let t = table();
        let src = addr("198.51.100.7:123");
        let org = NtpTimestamp::ZERO;
        assert_eq!(t.match_association(src, Mode::SymmetricActive, org).0, MatchCode::NewPassive);
        assert_eq!(t.match_association(src, Mode::SymmetricPassive, org).0, MatchCode::NoMatch);
        assert_eq!(t.match_association(src, Mode::Client, org).0, MatchCode::FastReply);
        assert_eq!(t.match_association(src, Mode::Server, org).0, MatchCode::Manycast);
        assert_eq!(t.match_association(src, Mode::Broadcast, org).0, MatchCode::NewBroadcastClient);
        assert_eq!(t.match_association(src, Mode::Reserved, org).0, MatchCode::Error);
    }

    #[test]
    fn test_match_client_association() {
        let mut t = table();
        let src = addr("192.0.2.1:123");
        let h = t.insert(&PeerConfig::server(src)).unwrap();
        assert_eq!(
            t.match_association(src, Mode::Server, NtpTimestamp::ZERO),
            (MatchCode::Process, Some(h))
        );
        // a client request from our own server is still served statelessly
        assert_eq!(
            t.match_association(src, Mode::Client, NtpTimestamp::ZERO),
            (MatchCode::FastReply, None)
        );
    }

    #[test]
    fn test_match_symmetric() {
        let mut t = table();
        let src = addr("192.0.2.9:123");
        let h = t.insert(&PeerConfig::symmetric(src)).unwrap();
        let org = NtpTimestamp::ZERO;
        assert_eq!(t.match_association(src, Mode::SymmetricPassive, org), (MatchCode::Process, Some(h)));
        assert_eq!(t.match_association(src, Mode::SymmetricActive, org), (MatchCode::Process, Some(h)));
    }

    #[test]
    fn test_match_passive_passive_is_error() {
        let mut t = table();
        let src = addr("192.0.2.9:123");
        let mut cfg = PeerConfig::symmetric(src);
        cfg.mode = HostMode::Passive;
        t.insert(&cfg).unwrap();
        assert_eq!(
            t.match_association(src, Mode::SymmetricPassive, NtpTimestamp::ZERO).0,
            MatchCode::Error
        );
    }

    #[test]
    fn test_redundant_manycast_reply() {
        let mut t = table();
        let group = addr("239.1.1.1:123");
        let server = addr("192.0.2.5:123");
        let mc = t.insert(&PeerConfig::manycast(group)).unwrap();
        let solicit = NtpTimestamp::from_parts(100, 0);
        t.get_mut(mc).unwrap().aorg = solicit;

        let mut cfg = PeerConfig::server(server);
        cfg.cast = CastKind::ManycastEphemeral;
        let eph = t.insert(&cfg).unwrap();
        t.get_mut(eph).unwrap().aorg = NtpTimestamp::from_parts(90, 0);

        assert_eq!(t.find_manycast(solicit), Some(mc));
        assert_eq!(t.match_association(server, Mode::Server, solicit).0, MatchCode::Error);
        assert_eq!(
            t.match_association(server, Mode::Server, NtpTimestamp::from_parts(90, 0)),
            (MatchCode::Process, Some(eph))
        );
    }

    #[test]
    fn test_find_manycast_ignores_zero_origin() {
        let mut t = table();
        t.insert(&PeerConfig::manycast(addr("239.1.1.1:123"))).unwrap();
        assert!(t.find_manycast(NtpTimestamp::ZERO).is_none());
    }
}
