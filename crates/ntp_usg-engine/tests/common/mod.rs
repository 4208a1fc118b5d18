// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Simulated network shared by the engine integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use ntp_engine::ntp_proto::protocol::{
    Frame, LeapIndicator, Mode, Packet, ReferenceId, Stratum,
};
use ntp_engine::ntp_proto::{NtpDuration, NtpTimestamp};
use ntp_engine::{
    Datagram, Engine, EngineConfig, EngineError, ReceiveOutcome, SimulatedClock,
};
use tracing_subscriber::EnvFilter;

/// 2023-08-02, well inside era 0.
pub const START: u32 = 3_900_000_000;

/// One-way network delay used by the simulated servers (s).
pub const ONE_WAY: f64 = 0.001;

/// Server turnaround (s).
pub const TURNAROUND: f64 = 0.0001;

/// Request transmit to reply arrival (s).
pub const RTT: f64 = 2.0 * ONE_WAY + TURNAROUND;

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

pub fn local() -> SocketAddr {
    addr("192.0.2.100:123")
}

/// Route engine events to the test harness; `RUST_LOG=ntp_engine=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine(cfg: EngineConfig) -> (Engine, SimulatedClock) {
    init_tracing();
    let clock = SimulatedClock::new(NtpTimestamp::from_parts(START, 0));
    let engine = Engine::new(cfg, clock.clone()).unwrap();
    (engine, clock)
}

pub fn encode(pkt: Packet) -> Vec<u8> {
    let mut buf = [0u8; 128];
    let len = Frame::new(pkt).encode(&mut buf).unwrap();
    buf[..len].to_vec()
}

/// A stratum 1 server whose clock runs `offset` seconds ahead of ours.
#[derive(Clone, Copy, Debug)]
pub struct SimServer {
    pub addr: SocketAddr,
    pub offset: f64,
    pub responding: bool,
}

impl SimServer {
    pub fn new(addr: &str, offset: f64) -> Self {
        SimServer {
            addr: self::addr(addr),
            offset,
            responding: true,
        }
    }

    /// The server's answer to `request`.
    pub fn reply(&self, request: &Packet) -> Packet {
        let rec = request.transmit_timestamp + NtpDuration::from_seconds_f64(self.offset + ONE_WAY);
        let xmt = rec + NtpDuration::from_seconds_f64(TURNAROUND);
        Packet {
            mode: Mode::Server,
            leap_indicator: LeapIndicator::NoWarning,
            stratum: Stratum(1),
            poll: request.poll,
            precision: -20,
            reference_id: ReferenceId(*b"GPS\0"),
            reference_timestamp: NtpTimestamp::from_parts(rec.seconds() - 10, 0),
            origin_timestamp: request.transmit_timestamp,
            receive_timestamp: rec,
            transmit_timestamp: xmt,
            ..Packet::default()
        }
    }
}

/// Runs an engine against a set of simulated servers, one second per step.
pub struct Network {
    pub engine: Engine,
    pub clock: SimulatedClock,
    pub servers: Vec<SimServer>,
    /// Every reply delivered so far, with its outcome.
    pub log: Vec<(SocketAddr, Vec<u8>, ReceiveOutcome)>,
}

impl Network {
    pub fn new(engine: Engine, clock: SimulatedClock, servers: Vec<SimServer>) -> Self {
        Network {
            engine,
            clock,
            servers,
            log: Vec::new(),
        }
    }

    pub fn step(&mut self) {
        self.try_step().unwrap();
    }

    /// One second of simulated time, surfacing engine errors.
    pub fn try_step(&mut self) -> Result<(), EngineError> {
        self.clock.advance(1.0);
        self.engine.timer()?;
        for tx in self.engine.take_transmissions() {
            let Some(server) = self.servers.iter().find(|s| s.addr == tx.dest).copied() else {
                continue;
            };
            if !server.responding {
                continue;
            }
            let request = Frame::parse(&tx.data).unwrap().header;
            let data = encode(server.reply(&request));
            // round trip plus server turnaround
            let arrival = request.transmit_timestamp + NtpDuration::from_seconds_f64(RTT);
            let outcome = self
                .engine
                .receive(&Datagram::new(&data, server.addr, local(), arrival))?;
            self.log.push((server.addr, data, outcome));
        }
        Ok(())
    }

    pub fn run(&mut self, seconds: u32) {
        for _ in 0..seconds {
            self.step();
        }
    }

    pub fn server_mut(&mut self, addr: SocketAddr) -> &mut SimServer {
        self.servers.iter_mut().find(|s| s.addr == addr).unwrap()
    }
}
