// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Clock selection.
//!
//! Selection runs after every accepted sample. It drops peers that fail the
//! fitness tests, finds the largest interval consistent with a majority of
//! the remaining correctness intervals (truechimers), prunes outliers from
//! the truechimers by selection jitter, and designates one survivor as the
//! system peer. The intersection and clustering steps are pure functions
//! over plain numbers so they can be tested and benchmarked on their own.

use ntp_proto::protocol::{LeapIndicator, ReferenceId};
use tracing::debug;

use crate::combine::combine;
use crate::config::NTP_MAXASSOC;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::filter::PHI;
use crate::peer::{PeerFlags, log2d};
use crate::status::{PeerEvent, SelectStatus, SystemEvent};
use crate::table::PeerHandle;

/// Combined offsets above this disqualify the PPS peer (s).
const PPS_MAXOFFSET: f64 = 0.4;

/// The truechimer interval found by [`find_intersection`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval {
    /// Lower bound (s).
    pub low: f64,
    /// Upper bound (s).
    pub high: f64,
    /// Number of falsetickers the interval allows for.
    pub falsetickers: usize,
}

impl Interval {
    /// Whether `offset` lies strictly inside the interval.
    pub fn contains(&self, offset: f64) -> bool {
        offset > self.low && offset < self.high
    }
}

/// Find the interval shared by the most correctness intervals.
///
/// Each candidate is `(offset, root_distance)` and contributes the
/// interval `[offset - distance, offset + distance]` with its midpoint.
/// Returns `None` when no interval is consistent with more than half of
/// the candidates.
pub fn find_intersection(candidates: &[(f64, f64)]) -> Option<Interval> {
    let n = candidates.len() as i32;
    if n == 0 {
        return None;
    }

    // (value, type): low -1, midpoint 0, high +1
    let mut endpoints: Vec<(f64, i32)> = Vec::with_capacity(candidates.len() * 3);
    for &(offset, distance) in candidates {
        endpoints.push((offset - distance, -1));
        endpoints.push((offset, 0));
        endpoints.push((offset + distance, 1));
    }
    endpoints.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut allow = 0;
    while 2 * allow < n {
        let mut found = 0;
        let mut chime = 0;
        let mut low = f64::INFINITY;
        for &(value, kind) in &endpoints {
            low = value;
            chime -= kind;
            if chime >= n - allow {
                break;
            }
            if kind == 0 {
                found += 1;
            }
        }

        chime = 0;
        let mut high = f64::NEG_INFINITY;
        for &(value, kind) in endpoints.iter().rev() {
            high = value;
            chime += kind;
            if chime >= n - allow {
                break;
            }
            if kind == 0 {
                found += 1;
            }
        }

        if found <= allow && high > low {
            return Some(Interval {
                low,
                high,
                falsetickers: allow as usize,
            });
        }
        allow += 1;
    }
    None
}

/// One truechimer entering the cluster step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusterEntry<T> {
    /// Caller's identifier.
    pub id: T,
    /// Peer offset (s).
    pub offset: f64,
    /// Peer jitter (s).
    pub jitter: f64,
    /// Selection metric; lower is better.
    pub metric: f64,
    /// Never pruned (always-trusted or preferred).
    pub pinned: bool,
}

/// Survivor-count limits for [`cluster`].
#[derive(Clone, Copy, Debug)]
pub struct ClusterLimits {
    /// Stop pruning at this many survivors.
    pub minclock: usize,
    /// Entries dropped while more than this many remain are excess.
    pub maxclock: usize,
    /// Never prune to fewer than this many.
    pub minsane: usize,
    /// Floor for the selection jitter (s).
    pub precision: f64,
}

/// Output of [`cluster`].
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster<T> {
    /// Remaining entries, best metric first.
    pub survivors: Vec<ClusterEntry<T>>,
    /// Pruned entries with their new status.
    pub dropped: Vec<(T, SelectStatus)>,
    /// Selection jitter of the survivors (s).
    pub seljitter: f64,
}

/// Selection jitter of entry `i`: RMS of the offset differences to every
/// other entry.
fn seljit<T>(list: &[ClusterEntry<T>], i: usize) -> f64 {
    if list.len() < 2 {
        return 0.0;
    }
    let sum: f64 = list
        .iter()
        .map(|e| (e.offset - list[i].offset).powi(2))
        .sum();
    (sum / (list.len() - 1) as f64).sqrt()
}

/// Prune outliers from a metric-ordered truechimer list.
///
/// Each round computes every entry's selection jitter and removes the entry
/// with the largest `seljit * metric`, until the list is down to
/// `minclock` (or `minsane`) entries, the smallest selection jitter no
/// longer exceeds the largest peer jitter, or the worst entry is pinned.
pub fn cluster<T: Copy>(mut list: Vec<ClusterEntry<T>>, limits: ClusterLimits) -> Cluster<T> {
    let mut dropped = Vec::new();
    let mut seljitter = 0.0;
    loop {
        let n = list.len();
        if n <= limits.minsane || n <= limits.minclock {
            break;
        }

        let mut min_seljit = f64::INFINITY;
        let mut max_jitter = 0.0f64;
        let mut worst = 0;
        let mut worst_score = f64::NEG_INFINITY;
        for i in 0..n {
            let s = seljit(&list, i).max(limits.precision);
            min_seljit = min_seljit.min(s);
            max_jitter = max_jitter.max(list[i].jitter);
            let score = s * list[i].metric;
            if score > worst_score {
                worst_score = score;
                worst = i;
            }
        }

        if min_seljit <= max_jitter || list[worst].pinned {
            seljitter = min_seljit;
            break;
        }

        let status = if n > limits.maxclock {
            SelectStatus::Excess
        } else {
            SelectStatus::Outlier
        };
        let removed = list.remove(worst);
        dropped.push((removed.id, status));
    }
    Cluster {
        survivors: list,
        dropped,
        seljitter,
    }
}

/// What the last selection pass decided.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionResult {
    /// Survivors in metric order.
    pub survivors: Vec<PeerHandle>,
    /// Fit peers outside the intersection interval.
    pub falsetickers: Vec<PeerHandle>,
    /// The truechimer interval, if one was found.
    pub interval: Option<Interval>,
    /// Selection jitter (s).
    pub seljitter: f64,
    /// Survivors announcing a leap second.
    pub leap_votes: usize,
    /// The peer chosen for the system.
    pub system_peer: Option<PeerHandle>,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    handle: PeerHandle,
    offset: f64,
    distance: f64,
    jitter: f64,
    metric: f64,
    flags: PeerFlags,
}

impl Engine {
    /// Run selection across every association and update the clock from
    /// the chosen system peer.
    pub(crate) fn clock_select(&mut self) -> Result<(), EngineError> {
        let now = self.current_time;
        let fit = self.fitness();
        let maxdist = self.cfg.maxdist;
        let orphan = self.cfg.orphan;
        let osys = self.sys.peer;
        self.sys.survivors = 0;

        let mut statuses: Vec<(PeerHandle, SelectStatus)> = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut orphan_parent: Option<PeerHandle> = None;
        let mut orphan_metric = 2 * u64::from(u32::MAX);

        for (handle, peer) in self.table.iter_mut() {
            statuses.push((handle, SelectStatus::Reject));
            if !peer.unfit(&fit).is_empty() {
                continue;
            }
            if let Some(orphan) = orphan {
                if peer.stratum == orphan {
                    let local = peer
                        .local
                        .map(|l| ReferenceId::from_addr(l.ip()).to_u32())
                        .unwrap_or(u32::MAX);
                    let metric = ReferenceId::from_addr(peer.addr.ip()).to_u32();
                    if metric < local && u64::from(metric) < orphan_metric {
                        orphan_parent = Some(handle);
                        orphan_metric = u64::from(metric);
                    }
                    continue;
                }
                if peer.stratum > orphan {
                    continue;
                }
            }
            let distance = peer.root_distance(now, fit.mindisp);
            let ahead = peer.nextdate.saturating_sub(now) as f64;
            candidates.push(Candidate {
                handle,
                offset: peer.offset,
                distance,
                jitter: peer.jitter,
                metric: (distance + PHI * ahead) / maxdist + f64::from(peer.stratum),
                flags: peer.flags,
            });
            set_status(&mut statuses, handle, SelectStatus::Falseticker);
        }

        let pairs: Vec<(f64, f64)> = candidates.iter().map(|c| (c.offset, c.distance)).collect();
        let interval = find_intersection(&pairs);
        let multiple = candidates.len() > 1;

        let mut list: Vec<ClusterEntry<PeerHandle>> = Vec::new();
        let mut falsetickers = Vec::new();
        let mut typepps: Option<PeerHandle> = None;
        for c in &candidates {
            let inside = interval.is_some_and(|iv| iv.contains(c.offset));
            if multiple && !inside && !c.flags.contains(PeerFlags::TRUE) {
                falsetickers.push(c.handle);
                continue;
            }
            if c.flags.contains(PeerFlags::PPS) {
                if typepps.is_none() {
                    typepps = Some(c.handle);
                }
                continue;
            }
            let entry = ClusterEntry {
                id: c.handle,
                offset: c.offset,
                jitter: c.jitter,
                metric: c.metric,
                pinned: c.flags.intersects(PeerFlags::TRUE | PeerFlags::PREFER),
            };
            // stable insertion keeps table order among equal metrics
            let pos = list.partition_point(|e| e.metric <= entry.metric);
            if pos < NTP_MAXASSOC {
                list.insert(pos, entry);
                list.truncate(NTP_MAXASSOC);
            }
        }

        if list.is_empty()
            && let Some(parent) = orphan_parent
            && let Some(peer) = self.table.get(parent)
        {
            list.push(ClusterEntry {
                id: parent,
                offset: peer.offset,
                jitter: 0.0,
                metric: 0.0,
                pinned: false,
            });
        }
        for e in &list {
            set_status(&mut statuses, e.id, SelectStatus::Outlier);
        }

        let result = cluster(
            list,
            ClusterLimits {
                minclock: self.cfg.minclock,
                maxclock: self.cfg.maxclock,
                minsane: self.cfg.minsane,
                precision: log2d(self.sys.precision),
            },
        );
        for &(handle, status) in &result.dropped {
            set_status(&mut statuses, handle, status);
        }

        let survivors: Vec<PeerHandle> = result.survivors.iter().map(|e| e.id).collect();
        let mut leap_votes = 0;
        let mut prefer: Option<PeerHandle> = None;
        for &handle in &survivors {
            let Some(peer) = self.table.get_mut(handle) else {
                continue;
            };
            peer.unreach = 0;
            set_status(&mut statuses, handle, SelectStatus::Candidate);
            self.sys.survivors += 1;
            if peer.leap == LeapIndicator::AddOne {
                if peer.flags.contains(PeerFlags::REFCLOCK) {
                    leap_votes = survivors.len();
                } else {
                    leap_votes += 1;
                }
            }
            if peer.flags.contains(PeerFlags::PREFER) {
                prefer = Some(handle);
            }
        }

        // Clockhop: hold on to the previous system peer while the best
        // survivor differs from it by less than a shrinking threshold.
        let mut typesystem = None;
        if !survivors.is_empty() && survivors.len() >= self.cfg.minsane {
            let best = survivors[0];
            typesystem = Some(best);
            match osys {
                Some(old) if old != best && survivors.contains(&old) => {
                    let offset_of = |h| self.table.get(h).map_or(0.0, |p| p.offset);
                    let x = (offset_of(best) - offset_of(old)).abs();
                    if x < self.cfg.mindisp {
                        self.sys.clockhop = if self.sys.clockhop == 0.0 {
                            self.cfg.mindisp
                        } else {
                            self.sys.clockhop * 0.5
                        };
                        if x < self.sys.clockhop {
                            typesystem = Some(old);
                        } else {
                            self.sys.clockhop = 0.0;
                        }
                    } else {
                        self.sys.clockhop = 0.0;
                    }
                }
                _ => self.sys.clockhop = 0.0,
            }
        }

        if let Some(chosen) = typesystem {
            match prefer {
                None => {
                    set_status(&mut statuses, chosen, SelectStatus::SystemPeer);
                    let pairs: Vec<(f64, f64)> = survivors
                        .iter()
                        .filter_map(|&h| self.table.get(h))
                        .map(|p| (p.offset, p.root_distance(now, fit.mindisp)))
                        .collect();
                    let (offset, jitter) = combine(&pairs);
                    self.sys.offset = offset;
                    self.sys.jitter = jitter.hypot(result.seljitter);
                }
                Some(p) => {
                    typesystem = Some(p);
                    self.sys.clockhop = 0.0;
                    set_status(&mut statuses, p, SelectStatus::SystemPeer);
                    if let Some(peer) = self.table.get(p) {
                        self.sys.offset = peer.offset;
                        self.sys.jitter = peer.jitter;
                    }
                }
            }
        }

        if let Some(pps) = typepps
            && self.sys.offset.abs() < PPS_MAXOFFSET
            && prefer.is_some()
            && let Some(peer) = self.table.get(pps)
        {
            typesystem = Some(pps);
            self.sys.clockhop = 0.0;
            set_status(&mut statuses, pps, SelectStatus::PpsPeer);
            self.sys.offset = peer.offset;
            self.sys.jitter = peer.jitter;
        }

        debug!(
            candidates = candidates.len(),
            falsetickers = falsetickers.len(),
            survivors = survivors.len(),
            seljitter = result.seljitter,
            system_peer = ?typesystem,
            "clock select"
        );
        self.selection = SelectionResult {
            survivors,
            falsetickers,
            interval,
            seljitter: result.seljitter,
            leap_votes,
            system_peer: typesystem,
        };

        let Some(chosen) = typesystem else {
            if osys.is_some() {
                self.sys.report(SystemEvent::NoSystemPeer, "");
                self.sys.orphan_deadline = now + self.cfg.orphan_wait;
            }
            self.sys.peer = None;
            self.apply_statuses(&statuses);
            return Ok(());
        };

        let Some(epoch) = self.table.get(chosen).map(|p| p.epoch) else {
            return Ok(());
        };
        if epoch <= self.sys.epoch {
            return Ok(());
        }

        if osys != Some(chosen)
            && let Some(peer) = self.table.get_mut(chosen)
        {
            peer.report(PeerEvent::NewPeer, "");
        }
        self.apply_statuses(&statuses);
        self.clock_update(chosen, leap_votes)
    }

    fn apply_statuses(&mut self, statuses: &[(PeerHandle, SelectStatus)]) {
        for &(handle, status) in statuses {
            if let Some(peer) = self.table.get_mut(handle) {
                peer.status = status;
            }
        }
    }
}

fn set_status(statuses: &mut [(PeerHandle, SelectStatus)], handle: PeerHandle, status: SelectStatus) {
    if let Some(entry) = statuses.iter_mut().find(|(h, _)| *h == handle) {
        entry.1 = status;
    }
}

#[cfg(test)]
mod tests {
    use ntp_proto::NtpTimestamp;

    use super::*;
    use crate::clock::SimulatedClock;
    use crate::config::{EngineConfig, PeerConfig};

    fn entry(id: u32, offset: f64, jitter: f64, metric: f64) -> ClusterEntry<u32> {
        ClusterEntry {
            id,
            offset,
            jitter,
            metric,
            pinned: false,
        }
    }

    fn limits(minclock: usize) -> ClusterLimits {
        ClusterLimits {
            minclock,
            maxclock: 10,
            minsane: 1,
            precision: 1e-6,
        }
    }

    // ── find_intersection ──────────────────────────────────────────

    #[test]
    fn test_intersection_empty() {
        assert_eq!(find_intersection(&[]), None);
    }

    #[test]
    fn test_intersection_single() {
        let iv = find_intersection(&[(0.1, 0.05)]).unwrap();
        assert!((iv.low - 0.05).abs() < 1e-12);
        assert!((iv.high - 0.15).abs() < 1e-12);
        assert_eq!(iv.falsetickers, 0);
    }

    #[test]
    fn test_intersection_agreeing() {
        let iv = find_intersection(&[(0.010, 0.05), (0.012, 0.05), (0.011, 0.05)]).unwrap();
        assert_eq!(iv.falsetickers, 0);
        assert!(iv.contains(0.010) && iv.contains(0.012));
    }

    #[test]
    fn test_intersection_one_falseticker() {
        let iv = find_intersection(&[(0.010, 0.05), (0.012, 0.05), (5.0, 0.05)]).unwrap();
        assert_eq!(iv.falsetickers, 1);
        assert!(iv.contains(0.010));
        assert!(iv.contains(0.012));
        assert!(!iv.contains(5.0));
    }

    #[test]
    fn test_intersection_two_disjoint_fails() {
        assert_eq!(find_intersection(&[(0.0, 0.01), (1.0, 0.01)]), None);
    }

    #[test]
    fn test_intersection_majority_required() {
        // two groups of two never agree
        let c = [(0.0, 0.01), (0.001, 0.01), (1.0, 0.01), (1.001, 0.01)];
        assert_eq!(find_intersection(&c), None);
    }

    // ── cluster ──────────────────────────────────────────

    #[test]
    fn test_cluster_stops_at_minclock() {
        let list = vec![entry(1, 0.0, 0.0, 1.0), entry(2, 0.5, 0.0, 1.0), entry(3, 1.0, 0.0, 1.0)];
        let out = cluster(list, limits(3));
        assert_eq!(out.survivors.len(), 3);
        assert!(out.dropped.is_empty());
        assert_eq!(out.seljitter, 0.0);
    }

    #[test]
    fn test_cluster_drops_outlier() {
        let list = vec![
            entry(1, 0.010, 0.001, 1.0),
            entry(2, 0.011, 0.001, 1.0),
            entry(3, 0.012, 0.001, 1.0),
            entry(4, 0.500, 0.001, 1.0),
        ];
        let out = cluster(list, limits(3));
        assert_eq!(out.dropped, vec![(4, SelectStatus::Outlier)]);
        assert_eq!(out.survivors.len(), 3);
    }

    #[test]
    fn test_cluster_excess_above_maxclock() {
        let list = vec![
            entry(1, 0.010, 0.001, 1.0),
            entry(2, 0.011, 0.001, 1.0),
            entry(3, 0.500, 0.001, 1.0),
        ];
        let out = cluster(
            list,
            ClusterLimits {
                minclock: 1,
                maxclock: 2,
                minsane: 1,
                precision: 1e-6,
            },
        );
        assert_eq!(out.dropped[0], (3, SelectStatus::Excess));
    }

    #[test]
    fn test_cluster_stops_when_jitter_dominates() {
        let list = vec![
            entry(1, 0.010, 0.5, 1.0),
            entry(2, 0.011, 0.5, 1.0),
            entry(3, 0.012, 0.5, 1.0),
            entry(4, 0.013, 0.5, 1.0),
        ];
        let out = cluster(list, limits(3));
        assert!(out.dropped.is_empty());
        assert!(out.seljitter > 0.0);
    }

    #[test]
    fn test_cluster_pinned_survives() {
        let mut pinned = entry(4, 0.500, 0.001, 1.0);
        pinned.pinned = true;
        let list = vec![
            entry(1, 0.010, 0.001, 1.0),
            entry(2, 0.011, 0.001, 1.0),
            entry(3, 0.012, 0.001, 1.0),
            pinned,
        ];
        let out = cluster(list, limits(3));
        assert!(out.dropped.is_empty());
        assert!(out.survivors.iter().any(|e| e.id == 4));
    }

    #[test]
    fn test_cluster_metric_weights_choice() {
        // equal spread, the worse metric goes first
        let list = vec![
            entry(1, 0.0, 0.0001, 1.0),
            entry(2, 0.1, 0.0001, 1.0),
            entry(3, 0.2, 0.0001, 5.0),
            entry(4, 0.05, 0.0001, 1.0),
        ];
        let out = cluster(list, limits(3));
        assert_eq!(out.dropped[0].0, 3);
    }

    // ── clock_select ───────────────────────────────────────────────

    /// An engine whose associations are fit stratum 1 peers with the given
    /// offset and path delay.
    fn engine_with(peers: &[(f64, f64)]) -> (Engine, Vec<PeerHandle>) {
        let clock = SimulatedClock::new(NtpTimestamp::from_parts(3_900_000_000, 0));
        let mut e = Engine::new(EngineConfig::default().rng_seed(1), clock).unwrap();
        let mut handles = Vec::new();
        for (i, &(offset, delay)) in peers.iter().enumerate() {
            let addr = format!("192.0.2.{}:123", i + 1).parse().unwrap();
            let h = e.add_peer(PeerConfig::server(addr)).unwrap();
            let p = e.table.get_mut(h).unwrap();
            p.leap = LeapIndicator::NoWarning;
            p.stratum = 1;
            p.refid = ReferenceId(*b"GPS\0");
            p.reach = 0xff;
            p.offset = offset;
            p.delay = delay;
            p.disp = 0.001;
            p.jitter = 0.0001;
            p.nextdate = 0;
            p.update = 0;
            p.epoch = 3;
            handles.push(h);
        }
        (e, handles)
    }

    /// Make `h` the current system peer without a fresh sample to apply.
    fn adopt(e: &mut Engine, h: PeerHandle) {
        e.sys.peer = Some(h);
        e.sys.epoch = 2;
        e.table.get_mut(h).unwrap().epoch = 2;
    }

    #[test]
    fn test_clockhop_holds_system_peer() {
        // h[0] has the best metric, h[1] is the current system peer
        let (mut e, h) = engine_with(&[(0.0102, 0.002), (0.0100, 0.020), (0.0101, 0.030)]);
        adopt(&mut e, h[1]);

        e.clock_select().unwrap();
        assert_eq!(e.last_selection().survivors[0], h[0]);
        assert!(e.last_selection().survivors.contains(&h[1]));
        assert_eq!(e.last_selection().system_peer, Some(h[1]));
        assert_eq!(e.system().system_peer(), Some(h[1]));
        assert_eq!(e.sys.clockhop, e.cfg.mindisp);
    }

    #[test]
    fn test_clockhop_hold_expires() {
        let (mut e, h) = engine_with(&[(0.0102, 0.002), (0.0100, 0.020), (0.0101, 0.030)]);
        adopt(&mut e, h[1]);

        // threshold halves each pass: 1 ms, 0.5 ms, 0.25 ms hold a 0.2 ms gap
        for _ in 0..3 {
            e.clock_select().unwrap();
            assert_eq!(e.system().system_peer(), Some(h[1]));
        }
        e.clock_select().unwrap();
        assert_eq!(e.last_selection().system_peer, Some(h[0]));
        assert_eq!(e.system().system_peer(), Some(h[0]));
        assert_eq!(e.sys.clockhop, 0.0);
    }

    #[test]
    fn test_clockhop_skipped_for_large_gap() {
        // best survivor more than mindisp away from the system peer
        let (mut e, h) = engine_with(&[(0.0150, 0.002), (0.0100, 0.020), (0.0120, 0.030)]);
        adopt(&mut e, h[1]);

        e.clock_select().unwrap();
        assert_eq!(e.system().system_peer(), Some(h[0]));
        assert_eq!(e.sys.clockhop, 0.0);
    }
}
