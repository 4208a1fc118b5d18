// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Engine and association configuration.
//!
//! [`EngineConfig`] holds the system-wide tunables (selection thresholds,
//! stratum band, orphan mode, broadcast client, restrictions). It lives
//! behind a [`ConfigHandle`] so another task can change it while the engine
//! runs; the engine reads one copy at the start of every receive or timer
//! pass.
//!
//! [`PeerConfig`] describes one statically configured association.
//!
//! # Examples
//!
//! ```
//! use ntp_engine::config::{EngineConfig, PeerConfig};
//!
//! let config = EngineConfig::default().minclock(2).maxdist(1.0);
//! assert!(config.validate().is_ok());
//!
//! let peer = PeerConfig::server("192.0.2.1:123".parse().unwrap())
//!     .iburst()
//!     .prefer()
//!     .poll(4, 8);
//! assert!(peer.validate().is_ok());
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use ntp_proto::protocol::{self, ReferenceId};

use crate::error::ConfigError;
use crate::peer::{CastKind, HostMode, PeerFlags};
use crate::restrict::{RestrictEntry, RestrictList, Restrictions};

/// Minimum survivors the cluster algorithm keeps.
pub const NTP_MINCLOCK: usize = 3;
/// Maximum candidates handed to the cluster algorithm.
pub const NTP_MAXCLOCK: usize = 10;
/// Maximum number of associations.
pub const NTP_MAXASSOC: usize = 50;
/// Default selection distance threshold (s).
pub const MAXDISTANCE: f64 = 1.5;
/// Default minimum root distance (s).
pub const MINDISPERSE: f64 = 0.001;
/// Default poll exponent bounds for new associations.
pub const NTP_MINDPOLL: i8 = 6;
/// Default maximum poll exponent for new associations.
pub const NTP_MAXDPOLL: i8 = 10;
/// Manycast beacon: unanswered polls before the TTL search restarts.
pub const BEACON: u32 = 15;
/// Number of manycast TTL steps.
pub const MAX_TTL: u8 = 8;
/// Seconds without a system peer before orphan mode engages.
pub const NTP_ORPHWAIT: u64 = 300;

/// System-wide engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Survivors the cluster algorithm will not go below.
    pub minclock: usize,
    /// Candidates kept for clustering; extras are marked excess.
    pub maxclock: usize,
    /// Survivors required before a system peer is chosen.
    pub minsane: usize,
    /// Root distance above which a peer is unfit (s).
    pub maxdist: f64,
    /// Floor for root distance and the anticlockhop threshold (s).
    pub mindisp: f64,
    /// Lowest acceptable peer stratum.
    pub floor: u8,
    /// First peer stratum that is rejected.
    pub ceiling: u8,
    /// Orphan stratum; `None` disables orphan mode.
    pub orphan: Option<u8>,
    /// Seconds without a system peer before claiming the orphan stratum.
    pub orphan_wait: u64,
    /// Synthetic root delay advertised in orphan mode (s).
    pub orphan_delay: f64,
    /// Require authentication before mobilizing ephemeral associations.
    pub authenticate: bool,
    /// Accept broadcast servers and mobilize broadcast client associations.
    pub bclient: bool,
    /// Fixed broadcast propagation delay; `None` runs a calibration volley.
    pub bdelay: Option<f64>,
    /// Answer manycast solicitations.
    pub manycast_server: bool,
    /// Unanswered polls before a manycast client restarts its TTL search.
    pub beacon: u32,
    /// Largest TTL index used by manycast clients.
    pub ttl_max: u8,
    /// Reject authenticated packets whose transmit time is farther than this
    /// from the receive time (s).
    pub auth_skew: Option<f64>,
    /// Access restrictions.
    pub restrict: RestrictList,
    /// Association table capacity.
    pub max_associations: usize,
    /// Seed for poll jitter; `None` seeds from the operating system.
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            minclock: NTP_MINCLOCK,
            maxclock: NTP_MAXCLOCK,
            minsane: 1,
            maxdist: MAXDISTANCE,
            mindisp: MINDISPERSE,
            floor: 0,
            ceiling: protocol::MAXSTRAT,
            orphan: None,
            orphan_wait: NTP_ORPHWAIT,
            orphan_delay: 1.0,
            authenticate: true,
            bclient: false,
            bdelay: None,
            manycast_server: false,
            beacon: BEACON,
            ttl_max: MAX_TTL - 1,
            auth_skew: None,
            restrict: RestrictList::new(Restrictions::NONE),
            max_associations: NTP_MAXASSOC,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    /// Set the minimum cluster survivors.
    pub fn minclock(mut self, n: usize) -> Self {
        self.minclock = n;
        self
    }

    /// Set the maximum clustering candidates.
    pub fn maxclock(mut self, n: usize) -> Self {
        self.maxclock = n;
        self
    }

    /// Set the survivors required for a system peer.
    pub fn minsane(mut self, n: usize) -> Self {
        self.minsane = n;
        self
    }

    /// Set the selection distance threshold.
    pub fn maxdist(mut self, seconds: f64) -> Self {
        self.maxdist = seconds;
        self
    }

    /// Set the acceptable stratum band `[floor, ceiling)`.
    pub fn stratum_band(mut self, floor: u8, ceiling: u8) -> Self {
        self.floor = floor;
        self.ceiling = ceiling;
        self
    }

    /// Enable orphan mode at `stratum`.
    pub fn orphan(mut self, stratum: u8) -> Self {
        self.orphan = Some(stratum);
        self
    }

    /// Set whether ephemeral associations require authentication.
    pub fn authenticate(mut self, on: bool) -> Self {
        self.authenticate = on;
        self
    }

    /// Enable the broadcast client, optionally with a fixed delay.
    pub fn bclient(mut self, delay: Option<f64>) -> Self {
        self.bclient = true;
        self.bdelay = delay;
        self
    }

    /// Answer manycast solicitations.
    pub fn manycast_server(mut self, on: bool) -> Self {
        self.manycast_server = on;
        self
    }

    /// Bound the authenticated transmit-time skew.
    pub fn auth_skew(mut self, seconds: f64) -> Self {
        self.auth_skew = Some(seconds);
        self
    }

    /// Add a restriction entry.
    pub fn restrict(mut self, entry: RestrictEntry) -> Self {
        self.restrict.add(entry);
        self
    }

    /// Set the association table capacity.
    pub fn max_associations(mut self, n: usize) -> Self {
        self.max_associations = n;
        self
    }

    /// Use a fixed seed for poll jitter.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Check the configuration for inconsistencies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.floor >= self.ceiling || self.ceiling > protocol::MAXSTRAT {
            return Err(ConfigError::StratumBand {
                floor: self.floor,
                ceiling: self.ceiling,
            });
        }
        if self.minclock == 0 || self.minclock > self.maxclock {
            return Err(ConfigError::ClockBounds {
                minclock: self.minclock,
                maxclock: self.maxclock,
            });
        }
        if !(self.maxdist.is_finite() && self.maxdist > 0.0) {
            return Err(invalid("maxdist", "must be a positive number of seconds"));
        }
        if !(self.mindisp.is_finite() && self.mindisp >= 0.0) {
            return Err(invalid("mindisp", "must not be negative"));
        }
        if let Some(orphan) = self.orphan
            && !(1..=protocol::MAXSTRAT).contains(&orphan)
        {
            return Err(invalid("orphan", "stratum must be within 1..=16"));
        }
        if !(self.orphan_delay.is_finite() && self.orphan_delay >= 0.0) {
            return Err(invalid("orphan_delay", "must not be negative"));
        }
        if let Some(bdelay) = self.bdelay
            && !(bdelay.is_finite() && bdelay >= 0.0)
        {
            return Err(invalid("bdelay", "must not be negative"));
        }
        if let Some(skew) = self.auth_skew
            && !(skew.is_finite() && skew > 0.0)
        {
            return Err(invalid("auth_skew", "must be positive"));
        }
        if self.max_associations == 0 || self.max_associations >= u16::MAX as usize {
            return Err(invalid("max_associations", "must be within 1..65535"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        detail: detail.to_string(),
    }
}

/// A statically configured association.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerConfig {
    /// Remote address (or multicast group for broadcast/manycast).
    pub addr: SocketAddr,
    /// Local address to send from, if bound to a specific interface.
    pub local: Option<SocketAddr>,
    /// Association mode on this side.
    pub mode: HostMode,
    /// How packets are addressed.
    pub cast: CastKind,
    /// Protocol version to send.
    pub version: u8,
    /// Minimum poll exponent.
    pub minpoll: i8,
    /// Maximum poll exponent.
    pub maxpoll: i8,
    /// Association flags.
    pub flags: PeerFlags,
    /// Symmetric key used to authenticate outbound packets.
    pub key_id: Option<u32>,
    /// TTL index for broadcast/manycast transmissions.
    pub ttl: u8,
    /// Constant added to every offset sample (s).
    pub bias: f64,
    /// Reference identifier of a reference clock.
    pub refid: Option<ReferenceId>,
}

impl PeerConfig {
    fn with_mode(addr: SocketAddr, mode: HostMode, cast: CastKind) -> Self {
        PeerConfig {
            addr,
            local: None,
            mode,
            cast,
            version: protocol::VERSION,
            minpoll: NTP_MINDPOLL,
            maxpoll: NTP_MAXDPOLL,
            flags: PeerFlags::CONFIG,
            key_id: None,
            ttl: 0,
            bias: 0.0,
            refid: None,
        }
    }

    /// A client association polling a server.
    pub fn server(addr: SocketAddr) -> Self {
        Self::with_mode(addr, HostMode::Client, CastKind::Unicast)
    }

    /// A symmetric active association.
    pub fn symmetric(addr: SocketAddr) -> Self {
        Self::with_mode(addr, HostMode::Active, CastKind::Unicast)
    }

    /// A broadcast server sending to `group`.
    pub fn broadcast(group: SocketAddr) -> Self {
        Self::with_mode(group, HostMode::Broadcast, CastKind::Broadcast)
    }

    /// A manycast client soliciting servers on `group`.
    pub fn manycast(group: SocketAddr) -> Self {
        Self::with_mode(group, HostMode::Client, CastKind::ManycastClient)
    }

    /// A reference clock fed through
    /// [`Engine::refclock_sample`](crate::Engine::refclock_sample).
    pub fn refclock(addr: SocketAddr, refid: ReferenceId) -> Self {
        let mut config = Self::with_mode(addr, HostMode::Client, CastKind::Unicast);
        config.flags |= PeerFlags::REFCLOCK;
        config.refid = Some(refid);
        config.minpoll = 4;
        config.maxpoll = 4;
        config
    }

    /// An association mobilized by an inbound packet rather than by
    /// configuration. Carries no flags, not even `CONFIG`.
    pub(crate) fn ephemeral(addr: SocketAddr, mode: HostMode, cast: CastKind) -> Self {
        let mut config = Self::with_mode(addr, mode, cast);
        config.flags = PeerFlags::NONE;
        config
    }

    /// Prefer this peer in selection.
    pub fn prefer(mut self) -> Self {
        self.flags |= PeerFlags::PREFER;
        self
    }

    /// Send a burst when the peer is unreachable.
    pub fn iburst(mut self) -> Self {
        self.flags |= PeerFlags::IBURST;
        self
    }

    /// Send a burst at every poll while reachable.
    pub fn burst(mut self) -> Self {
        self.flags |= PeerFlags::BURST;
        self
    }

    /// Never select this peer.
    pub fn noselect(mut self) -> Self {
        self.flags |= PeerFlags::NOSELECT;
        self
    }

    /// Always treat this peer as a truechimer.
    pub fn truechimer(mut self) -> Self {
        self.flags |= PeerFlags::TRUE;
        self
    }

    /// Allow the association to be demobilized when it times out.
    pub fn preempt(mut self) -> Self {
        self.flags |= PeerFlags::PREEMPT;
        self
    }

    /// Mark as a pulse-per-second source.
    pub fn pps(mut self) -> Self {
        self.flags |= PeerFlags::PPS;
        self
    }

    /// Authenticate with symmetric key `key_id`.
    pub fn key(mut self, key_id: u32) -> Self {
        self.key_id = Some(key_id);
        self
    }

    /// Set the poll exponent bounds.
    pub fn poll(mut self, minpoll: i8, maxpoll: i8) -> Self {
        self.minpoll = minpoll;
        self.maxpoll = maxpoll;
        self
    }

    /// Set the protocol version.
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Bind to a local address.
    pub fn local(mut self, local: SocketAddr) -> Self {
        self.local = Some(local);
        self
    }

    /// Set the TTL index.
    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Add a constant offset correction.
    pub fn bias(mut self, seconds: f64) -> Self {
        self.bias = seconds;
        self
    }

    /// Check the association settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let range = protocol::MINPOLL..=protocol::MAXPOLL;
        if !range.contains(&self.minpoll)
            || !range.contains(&self.maxpoll)
            || self.minpoll > self.maxpoll
        {
            return Err(ConfigError::PollRange {
                minpoll: self.minpoll,
                maxpoll: self.maxpoll,
            });
        }
        if !(protocol::OLD_VERSION..=protocol::VERSION).contains(&self.version) {
            return Err(invalid("version", "must be within 1..=4"));
        }
        if !self.bias.is_finite() {
            return Err(invalid("bias", "must be finite"));
        }
        if self.mode == HostMode::Passive || self.mode == HostMode::BroadcastClient {
            return Err(invalid("mode", "passive and broadcast client are ephemeral only"));
        }
        Ok(())
    }
}

/// A cloneable handle for updating engine configuration at runtime.
///
/// Cloning is cheap (it shares the inner `Arc`). A poisoned lock is
/// recovered rather than propagated, since the configuration is plain data.
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    inner: Arc<RwLock<EngineConfig>>,
}

impl ConfigHandle {
    /// Wrap a configuration.
    pub fn new(config: EngineConfig) -> Self {
        ConfigHandle {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Apply a change, keeping the old configuration if the result is invalid.
    pub fn update(&self, f: impl FnOnce(&mut EngineConfig)) -> Result<(), ConfigError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        f(&mut next);
        next.validate()?;
        *guard = next;
        Ok(())
    }

    /// A copy of the current configuration.
    pub fn snapshot(&self) -> EngineConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl From<EngineConfig> for ConfigHandle {
    fn from(config: EngineConfig) -> Self {
        ConfigHandle::new(config)
    }
}
