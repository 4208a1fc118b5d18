// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Tokio dispatch loop.
//!
//! [`run`] binds an [`Engine`] to one UDP socket. Datagrams and the
//! one-second timer are funneled onto the same engine from a single task,
//! so the engine itself needs no locking. After each event the outbox is
//! flushed to the socket.
//!
//! A socket bound to a wildcard address does not say which interface a
//! datagram arrived on. The loop resolves the interface a reply to each
//! source would leave from and hands that to the engine instead; a socket
//! bound to a multicast group reports the group so manycast solicitations
//! are recognized.
//!
//! # Examples
//!
//! ```no_run
//! # async fn example() -> std::io::Result<()> {
//! use ntp_engine::{Engine, EngineConfig, PeerConfig, SystemLocalClock};
//! use tokio::net::UdpSocket;
//! use tokio::sync::watch;
//!
//! let socket = UdpSocket::bind("0.0.0.0:123").await?;
//! let mut engine = Engine::new(EngineConfig::default(), SystemLocalClock::new())?;
//! engine.add_peer(PeerConfig::server("192.0.2.1:123".parse().unwrap()).iburst())?;
//!
//! let (_stop, shutdown) = watch::channel(false);
//! ntp_engine::driver::run(&mut engine, &socket, shutdown).await
//! # }
//! ```

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::engine::Engine;
use crate::poll::Transmission;
use crate::receive::{Datagram, ReceiveOutcome};

/// Receive buffer size; larger than any datagram the engine accepts.
const RECV_BUF_LEN: usize = 2048;

/// Drive `engine` from `socket` until `shutdown` turns true or its sender
/// is dropped.
///
/// # Errors
///
/// The socket's local address cannot be read, or the engine reports a
/// clock panic (as an `io::Error` wrapping
/// [`EngineError`](crate::EngineError)). Receive and send errors are
/// logged and skipped.
pub async fn run(
    engine: &mut Engine,
    socket: &UdpSocket,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let bound = socket.local_addr()?;
    let mut interfaces = Interfaces::new(bound);
    let mut buf = [0u8; RECV_BUF_LEN];
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("NTP engine listening on {}", bound);

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        // e.g. an ICMP port unreachable reported on the socket
                        warn!("receive failed: {}", e);
                        continue;
                    }
                };
                let local = interfaces.toward(src.ip());
                let dg = Datagram::new(&buf[..len], src, local, engine.now());
                if let ReceiveOutcome::Dropped(reason) = engine.receive(&dg)? {
                    debug!("dropped packet from {}: {:?}", src, reason);
                }
            }
            _ = tick.tick() => {
                engine.timer()?;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("NTP engine shutting down");
                    return Ok(());
                }
            }
        }
        for tx in engine.take_transmissions() {
            send(socket, &tx).await;
        }
    }
}

/// Local addresses by remote host for a wildcard-bound socket.
struct Interfaces {
    bound: SocketAddr,
    cache: HashMap<IpAddr, SocketAddr>,
}

impl Interfaces {
    fn new(bound: SocketAddr) -> Self {
        Interfaces {
            bound,
            cache: HashMap::new(),
        }
    }

    /// The address `remote` sees us as, or the bound address when the
    /// socket already names one (or the lookup fails).
    fn toward(&mut self, remote: IpAddr) -> SocketAddr {
        if !self.bound.ip().is_unspecified() {
            return self.bound;
        }
        if let Some(local) = self.cache.get(&remote) {
            return *local;
        }
        match route_source(remote) {
            Ok(ip) => {
                let local = SocketAddr::new(ip, self.bound.port());
                debug!("{} reached via {}", remote, local);
                self.cache.insert(remote, local);
                local
            }
            Err(e) => {
                debug!("no route to {}: {}", remote, e);
                self.bound
            }
        }
    }
}

/// Source address the kernel picks for traffic to `remote`. Connecting a
/// UDP socket sends nothing.
fn route_source(remote: IpAddr) -> io::Result<IpAddr> {
    let any: IpAddr = match remote {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let scratch = std::net::UdpSocket::bind(SocketAddr::new(any, 0))?;
    scratch.connect(SocketAddr::new(remote, ntp_proto::protocol::PORT))?;
    Ok(scratch.local_addr()?.ip())
}

async fn send(socket: &UdpSocket, tx: &Transmission) {
    if let Some(ttl) = tx.ttl {
        let set = match tx.dest {
            SocketAddr::V4(dest) if dest.ip().is_multicast() => {
                socket.set_multicast_ttl_v4(u32::from(ttl))
            }
            _ => socket.set_ttl(u32::from(ttl)),
        };
        if let Err(e) = set {
            debug!("cannot set ttl {} for {}: {}", ttl, tx.dest, e);
        }
    }
    if let Err(e) = socket.send_to(&tx.data, tx.dest).await {
        warn!("send to {} failed: {}", tx.dest, e);
    }
}
