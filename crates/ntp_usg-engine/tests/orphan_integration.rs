// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! A client synchronizing to an engine that has fallen back to orphan mode.

mod common;

use std::net::SocketAddr;

use common::{START, addr, init_tracing};
use ntp_engine::ntp_proto::NtpTimestamp;
use ntp_engine::ntp_proto::protocol::{LeapIndicator, ReferenceId};
use ntp_engine::{
    Datagram, Engine, EngineConfig, LocalClock, PeerConfig, PeerHandle, ReceiveOutcome,
    SimulatedClock,
};

/// Network delay each way (s).
const HOP: f64 = 0.001;

fn parent_addr() -> SocketAddr {
    addr("192.0.2.50:123")
}

fn child_addr() -> SocketAddr {
    addr("192.0.2.60:123")
}

struct Mesh {
    parent: Engine,
    child: Engine,
    clock: SimulatedClock,
    /// Outcome of every reply the child received.
    outcomes: Vec<ReceiveOutcome>,
}

impl Mesh {
    fn new() -> Self {
        init_tracing();
        let clock = SimulatedClock::new(NtpTimestamp::from_parts(START, 0));
        let parent = Engine::new(
            EngineConfig::default().orphan(5).rng_seed(31),
            clock.clone(),
        )
        .unwrap();
        let child = Engine::new(EngineConfig::default().rng_seed(32), clock.clone()).unwrap();
        Mesh {
            parent,
            child,
            clock,
            outcomes: Vec::new(),
        }
    }

    fn step(&mut self) {
        self.clock.advance(1.0 - 2.0 * HOP);
        self.parent.timer().unwrap();
        self.child.timer().unwrap();

        let requests = self.child.take_transmissions();
        self.clock.advance(HOP);
        for tx in requests.iter().filter(|tx| tx.dest == parent_addr()) {
            let now = self.parent.now();
            self.parent
                .receive(&Datagram::new(&tx.data, child_addr(), parent_addr(), now))
                .unwrap();
        }
        let replies = self.parent.take_transmissions();
        self.clock.advance(HOP);
        for tx in replies.iter().filter(|tx| tx.dest == child_addr()) {
            let now = self.child.now();
            let out = self
                .child
                .receive(&Datagram::new(&tx.data, parent_addr(), child_addr(), now))
                .unwrap();
            self.outcomes.push(out);
        }
    }

    fn run(&mut self, seconds: u32) {
        for _ in 0..seconds {
            self.step();
        }
    }

    fn orphan_parent(&mut self) -> PeerHandle {
        self.run(301);
        assert_eq!(self.parent.system().stratum(), 5);
        self.child
            .add_peer(PeerConfig::server(parent_addr()).iburst())
            .unwrap()
    }
}

#[test]
fn test_orphan_parent_advertises_fresh_reftime() {
    let mut mesh = Mesh::new();
    mesh.run(301);
    let sys = mesh.parent.system();
    assert_eq!(sys.leap(), LeapIndicator::NoWarning);
    assert_ne!(sys.reftime(), NtpTimestamp::ZERO);
    assert!(!sys.reftime().is_after(mesh.clock.now()));
}

#[test]
fn test_child_synchronizes_to_orphan_parent() {
    let mut mesh = Mesh::new();
    let h = mesh.orphan_parent();
    mesh.run(200);

    assert!(mesh.outcomes.contains(&ReceiveOutcome::Processed));
    assert!(
        !mesh
            .outcomes
            .iter()
            .any(|o| matches!(o, ReceiveOutcome::Dropped(_)))
    );

    let sys = mesh.child.system();
    assert!(sys.is_synchronized());
    assert_eq!(sys.system_peer(), Some(h));
    assert_eq!(sys.stratum(), 6);
    assert_eq!(sys.refid(), ReferenceId::from_addr(parent_addr().ip()));
    assert!(sys.offset().abs() < 1e-3);
}
