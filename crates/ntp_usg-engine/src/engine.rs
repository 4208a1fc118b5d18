// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The protocol engine.
//!
//! An [`Engine`] owns every association, the system variables, the
//! counters, and the two collaborators it talks to: a [`LocalClock`] and an
//! [`Authenticator`]. It does no I/O. The caller feeds it datagrams through
//! [`Engine::receive`], calls [`Engine::timer`] once a second, and drains
//! outbound packets with [`Engine::take_transmissions`].
//!
//! # Examples
//!
//! ```
//! use ntp_engine::{Engine, EngineConfig, PeerConfig, SimulatedClock};
//! use ntp_proto::NtpTimestamp;
//!
//! let clock = SimulatedClock::new(NtpTimestamp::from_parts(3_900_000_000, 0));
//! let mut engine = Engine::new(EngineConfig::default(), clock)?;
//! engine.add_peer(PeerConfig::server("192.0.2.1:123".parse().unwrap()).iburst())?;
//!
//! engine.timer()?;
//! let packets = engine.take_transmissions();
//! assert_eq!(packets.len(), 1);
//! assert_eq!(packets[0].data.len(), 48);
//! # Ok::<(), ntp_engine::EngineError>(())
//! ```

use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;

use ntp_proto::NtpTimestamp;
use ntp_proto::protocol::{LeapIndicator, ReferenceId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::auth::{Authenticator, NullAuthenticator};
use crate::clock::LocalClock;
use crate::config::{ConfigHandle, EngineConfig, PeerConfig};
use crate::error::EngineError;
use crate::filter::FilterContext;
use crate::metrics::{PeerCounters, SystemCounters, SystemStats};
use crate::peer::{Fitness, HostMode, Peer};
use crate::poll::{NTP_MINPKT, Transmission};
use crate::select::SelectionResult;
use crate::status::PeerEvent;
use crate::system::SystemState;
use crate::table::{PeerHandle, PeerTable};

/// A single NTP protocol instance.
pub struct Engine {
    pub(crate) config: ConfigHandle,
    /// Configuration snapshot for the current pass.
    pub(crate) cfg: EngineConfig,
    pub(crate) table: PeerTable,
    pub(crate) sys: SystemState,
    pub(crate) counters: Arc<SystemCounters>,
    pub(crate) clock: Box<dyn LocalClock + Send>,
    pub(crate) auth: Box<dyn Authenticator + Send>,
    pub(crate) rng: StdRng,
    pub(crate) outbox: Vec<Transmission>,
    /// Seconds since the engine started, advanced by [`Engine::timer`].
    pub(crate) current_time: u64,
    pub(crate) selection: SelectionResult,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("current_time", &self.current_time)
            .field("associations", &self.table.len())
            .field("system", &self.sys)
            .field("pending", &self.outbox.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine that neither signs nor verifies MACs.
    pub fn new<C>(config: impl Into<ConfigHandle>, clock: C) -> Result<Self, EngineError>
    where
        C: LocalClock + Send + 'static,
    {
        Self::with_authenticator(config, clock, NullAuthenticator)
    }

    /// Create an engine with a symmetric-key authenticator.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] if the configuration does not validate.
    pub fn with_authenticator<C, A>(
        config: impl Into<ConfigHandle>,
        clock: C,
        auth: A,
    ) -> Result<Self, EngineError>
    where
        C: LocalClock + Send + 'static,
        A: Authenticator + Send + 'static,
    {
        let config = config.into();
        let cfg = config.snapshot();
        cfg.validate()?;
        let rng = match cfg.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let precision = clock.precision();
        debug!(
            precision,
            minclock = cfg.minclock,
            maxclock = cfg.maxclock,
            orphan = ?cfg.orphan,
            "engine created"
        );
        Ok(Engine {
            table: PeerTable::new(cfg.max_associations),
            sys: SystemState::new(precision, cfg.orphan_wait),
            config,
            cfg,
            counters: Arc::new(SystemCounters::new()),
            clock: Box::new(clock),
            auth: Box::new(auth),
            rng,
            outbox: Vec::new(),
            current_time: 0,
            selection: SelectionResult::default(),
        })
    }

    // ── Associations ────────────────────────────────────────────────

    /// Add a configured association.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] for invalid settings,
    /// [`EngineError::DuplicateAssociation`] if one already exists for the
    /// address and mode, [`EngineError::AssociationLimit`] if the table is
    /// full.
    pub fn add_peer(&mut self, config: PeerConfig) -> Result<PeerHandle, EngineError> {
        config.validate()?;
        self.refresh_config();
        self.mobilize(&config)
    }

    /// Demobilize an association.
    pub fn remove_peer(&mut self, handle: PeerHandle) -> Result<(), EngineError> {
        if !self.table.contains(handle) {
            return Err(EngineError::StaleHandle);
        }
        self.unpeer(handle);
        Ok(())
    }

    /// Insert, clear and announce a new association.
    pub(crate) fn mobilize(&mut self, config: &PeerConfig) -> Result<PeerHandle, EngineError> {
        let handle = self.table.insert(config)?;
        let spread = if config.mode == HostMode::Passive {
            NTP_MINPKT
        } else {
            self.rng.random_range(0..self.table.len() as u64)
        };
        let now = self.current_time;
        let precision = self.sys.precision;
        if let Some(peer) = self.table.get_mut(handle) {
            peer.clear(ReferenceId::INIT, now, precision, spread);
            peer.report(PeerEvent::Mobilize, &format!("{} {}", peer.hmode, peer.associd));
        }
        Ok(handle)
    }

    /// Remove an association, dropping it as system peer if selected.
    pub(crate) fn unpeer(&mut self, handle: PeerHandle) {
        if let Some(peer) = self.table.get_mut(handle) {
            peer.report(PeerEvent::Demobilize, "");
        }
        if self.sys.peer == Some(handle) {
            self.sys.peer = None;
        }
        self.table.remove(handle);
    }

    // ── Timer ───────────────────────────────────────────────────────

    /// Advance engine time by one second and transmit to every association
    /// that is due.
    ///
    /// # Errors
    ///
    /// [`EngineError::ClockPanic`] if a clock update triggered by an
    /// unreachable peer's dispersion sample was refused.
    pub fn timer(&mut self) -> Result<(), EngineError> {
        self.refresh_config();
        self.current_time += 1;
        let now = self.current_time;
        for handle in self.table.handles() {
            // an earlier transmit may have demobilized it
            let Some(peer) = self.table.get_mut(handle) else {
                continue;
            };
            if peer.throttle > 0 {
                peer.throttle -= 1;
            }
            if peer.nextdate <= now {
                self.transmit(handle)?;
            }
        }
        self.orphan_check();
        Ok(())
    }

    /// Drain the packets queued since the last call.
    pub fn take_transmissions(&mut self) -> Vec<Transmission> {
        mem::take(&mut self.outbox)
    }

    // ── Internal helpers ────────────────────────────────────────────

    pub(crate) fn refresh_config(&mut self) {
        let cfg = self.config.snapshot();
        self.table.set_capacity(cfg.max_associations);
        self.cfg = cfg;
    }

    pub(crate) fn fitness(&self) -> Fitness {
        Fitness {
            now: self.current_time,
            floor: self.cfg.floor,
            ceiling: self.cfg.ceiling,
            maxdist: self.cfg.maxdist,
            mindisp: self.cfg.mindisp,
            refid: self.sys.refid,
        }
    }

    pub(crate) fn filter_context(&self) -> FilterContext {
        FilterContext {
            now: self.current_time,
            locked: self.sys.leap != LeapIndicator::Unknown,
            maxdist: self.cfg.maxdist,
            precision: self.sys.precision,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Current local clock reading, for stamping received datagrams.
    pub fn now(&self) -> NtpTimestamp {
        self.clock.now()
    }

    /// Engine time in seconds.
    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    /// System variables.
    pub fn system(&self) -> &SystemState {
        &self.sys
    }

    /// Resolve a handle.
    pub fn peer(&self, handle: PeerHandle) -> Option<&Peer> {
        self.table.get(handle)
    }

    /// Find an association by remote address and host mode.
    pub fn find_peer(&self, addr: SocketAddr, hmode: HostMode) -> Option<PeerHandle> {
        self.table.find(addr, hmode)
    }

    /// Every association.
    pub fn peers(&self) -> impl Iterator<Item = (PeerHandle, &Peer)> {
        self.table.iter()
    }

    /// Number of associations.
    pub fn associations(&self) -> usize {
        self.table.len()
    }

    /// Outcome of the most recent selection pass.
    pub fn last_selection(&self) -> &SelectionResult {
        &self.selection
    }

    /// Snapshot of the system counters.
    pub fn stats(&self) -> SystemStats {
        self.counters.snapshot()
    }

    /// Shared handle to the live system counters.
    pub fn metrics(&self) -> Arc<SystemCounters> {
        Arc::clone(&self.counters)
    }

    /// The 16-bit system status word.
    pub fn system_status_word(&self) -> u16 {
        self.sys.status_word()
    }

    /// The 16-bit status word of an association.
    pub fn peer_status_word(&self, handle: PeerHandle) -> Option<u16> {
        self.table.get(handle).map(Peer::status_word)
    }

    /// Zero the system counters.
    pub fn clear_system_stats(&self) {
        self.counters.reset();
    }

    /// Zero the counters of one association.
    pub fn clear_peer_stats(&mut self, handle: PeerHandle) -> Result<(), EngineError> {
        let peer = self
            .table
            .get_mut(handle)
            .ok_or(EngineError::StaleHandle)?;
        peer.counters = PeerCounters::default();
        Ok(())
    }

    /// Handle for changing the configuration at runtime. Changes take
    /// effect at the next timer tick or datagram.
    pub fn config(&self) -> ConfigHandle {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::status::SystemEvent;

    fn engine() -> Engine {
        let clock = SimulatedClock::new(NtpTimestamp::from_parts(3_900_000_000, 0));
        Engine::new(EngineConfig::default().rng_seed(9), clock).unwrap()
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let clock = SimulatedClock::new(NtpTimestamp::ZERO);
        let result = Engine::new(EngineConfig::default().minclock(0), clock);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_add_and_remove_peer() {
        let mut e = engine();
        let h = e.add_peer(PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        assert_eq!(e.associations(), 1);
        assert_eq!(e.find_peer(addr("192.0.2.1:123"), HostMode::Client), Some(h));
        let peer = e.peer(h).unwrap();
        assert_eq!(peer.refid(), ReferenceId::INIT);
        assert_eq!(peer.events().last(), PeerEvent::Mobilize as u8);

        e.remove_peer(h).unwrap();
        assert!(e.peer(h).is_none());
        assert!(matches!(e.remove_peer(h), Err(EngineError::StaleHandle)));
    }

    #[test]
    fn test_add_peer_validates() {
        let mut e = engine();
        let bad = PeerConfig::server(addr("192.0.2.1:123")).poll(10, 6);
        assert!(matches!(e.add_peer(bad), Err(EngineError::Config(_))));
        assert_eq!(e.associations(), 0);
    }

    #[test]
    fn test_duplicate_peer() {
        let mut e = engine();
        e.add_peer(PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        let again = e.add_peer(PeerConfig::server(addr("192.0.2.1:123")));
        assert!(matches!(again, Err(EngineError::DuplicateAssociation { .. })));
    }

    #[test]
    fn test_association_limit_follows_config() {
        let mut e = engine();
        e.config().update(|c| c.max_associations = 1).unwrap();
        e.add_peer(PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        let second = e.add_peer(PeerConfig::server(addr("192.0.2.2:123")));
        assert!(matches!(second, Err(EngineError::AssociationLimit { max: 1 })));
    }

    #[test]
    fn test_timer_polls_new_peer() {
        let mut e = engine();
        let h = e.add_peer(PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        e.timer().unwrap();
        let out = e.take_transmissions();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dest, addr("192.0.2.1:123"));
        assert_eq!(out[0].ttl, None);
        assert_eq!(e.peer(h).unwrap().counters().sent, 1);
        assert!(e.take_transmissions().is_empty());
        assert_eq!(e.current_time(), 1);
    }

    #[test]
    fn test_unreachable_peer_backs_off() {
        let mut e = engine();
        let h = e.add_peer(PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        let mut sent = 0;
        for _ in 0..2000 {
            e.timer().unwrap();
            sent += e.take_transmissions().len();
        }
        let peer = e.peer(h).unwrap();
        assert_eq!(peer.reach(), 0);
        // backed off past the 64 s default after ten silent polls
        assert!(peer.hpoll() > 6);
        assert!(sent < 2000 / 64 + 1);
    }

    #[test]
    fn test_clear_stats() {
        let mut e = engine();
        let h = e.add_peer(PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        e.timer().unwrap();
        SystemCounters::inc(&e.counters.received);
        e.clear_system_stats();
        assert_eq!(e.stats().received, 0);
        e.clear_peer_stats(h).unwrap();
        assert_eq!(e.peer(h).unwrap().counters().sent, 0);
    }

    #[test]
    fn test_status_words() {
        let mut e = engine();
        assert_eq!(e.system_status_word() >> 14, 3);
        let h = e.add_peer(PeerConfig::server(addr("192.0.2.1:123"))).unwrap();
        let word = e.peer_status_word(h).unwrap();
        // configured, mobilize event
        assert_eq!((word >> 8) & 0x80, 0x80);
        assert_eq!(word & 0x0f, PeerEvent::Mobilize as u16);
        e.sys.report(SystemEvent::Restart, "");
        assert_eq!(e.system_status_word() & 0x0f, SystemEvent::Restart as u16);
    }

    #[test]
    fn test_orphan_after_wait() {
        let clock = SimulatedClock::new(NtpTimestamp::from_parts(3_900_000_000, 0));
        let cfg = EngineConfig::default().orphan(5).rng_seed(1);
        let mut e = Engine::new(cfg, clock.clone()).unwrap();
        for _ in 0..300 {
            e.timer().unwrap();
        }
        assert_eq!(e.system().stratum(), 16);
        assert_eq!(e.system().reftime(), NtpTimestamp::ZERO);
        clock.advance(301.0);
        e.timer().unwrap();
        assert_eq!(e.system().stratum(), 5);
        assert_eq!(e.system().refid(), ReferenceId::LOOPBACK);
        assert_eq!(e.system().leap(), LeapIndicator::NoWarning);
        assert_eq!(e.system().reftime(), clock.now());

        // refreshed every tick while orphaned
        clock.advance(1.0);
        e.timer().unwrap();
        assert_eq!(e.system().reftime(), clock.now());
    }
}
