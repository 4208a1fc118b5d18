// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

/*!
NTPv4 protocol engine (RFC 5905).

The engine holds the association table and the system variables, screens
every inbound datagram, runs the clock filter, selection, cluster and combine
algorithms, and schedules polls. It performs no I/O of its own: datagrams go
in through [`Engine::receive`], the one-second tick through [`Engine::timer`],
and outbound packets come back from [`Engine::take_transmissions`]. Time is
read from and corrections are handed to a [`LocalClock`], and digests are
delegated to an [`Authenticator`].

# Example

```rust
use std::collections::HashSet;

use ntp_engine::ntp_proto::NtpTimestamp;
use ntp_engine::{Engine, EngineConfig, PeerConfig, SimulatedClock};

let clock = SimulatedClock::new(NtpTimestamp::from_parts(3_900_000_000, 0));
let mut engine = Engine::new(EngineConfig::default().minclock(1), clock)?;
for server in ["192.0.2.1:123", "192.0.2.2:123", "192.0.2.3:123"] {
    engine.add_peer(PeerConfig::server(server.parse().unwrap()).iburst())?;
}
// first polls are spread over the first few seconds
let mut polled = HashSet::new();
for _ in 0..3 {
    engine.timer()?;
    polled.extend(engine.take_transmissions().into_iter().map(|tx| tx.dest));
}
assert_eq!(polled.len(), 3);
# Ok::<(), ntp_engine::EngineError>(())
```

# Feature Flags

| Feature | Default | Description |
|---------|---------|-------------|
| `tokio` | no | [`driver::run`] loop binding an engine to a tokio UDP socket. |
*/

#![warn(missing_docs)]

pub use ntp_proto;

/// Symmetric-key authentication seam.
pub mod auth;

/// Local clock collaborator and a simulated clock for tests.
pub mod clock;

/// Weighted combine of the selection survivors.
pub mod combine;

/// Engine and association configuration.
pub mod config;

/// Tokio UDP dispatch loop.
#[cfg(feature = "tokio")]
pub mod driver;

mod engine;

/// Error types for engine operations.
pub mod error;

/// Eight-stage clock filter.
pub mod filter;

/// Protocol and per-association counters.
pub mod metrics;

/// Association state.
pub mod peer;

/// Poll scheduling and packet transmission.
pub mod poll;

mod process;

/// Inbound datagram screening and dispatch.
pub mod receive;

/// Reference clock samples.
pub mod refclock;

/// Address-based access restrictions.
pub mod restrict;

/// Intersection and cluster algorithms.
pub mod select;

/// Status words and event codes.
pub mod status;

/// System variables and clock update.
pub mod system;

/// Association table and packet-to-association matching.
pub mod table;

pub use auth::{AuthStatus, Authenticator, NullAuthenticator};
pub use clock::{ClockStatus, LocalClock, SimulatedClock, SystemLocalClock};
pub use config::{ConfigHandle, EngineConfig, PeerConfig};
pub use engine::Engine;
pub use error::{ConfigError, EngineError};
pub use filter::FilterOutcome;
pub use metrics::{PeerCounters, SystemCounters, SystemStats};
pub use peer::{CastKind, Flash, HostMode, Peer, PeerFlags};
pub use poll::Transmission;
pub use receive::{Datagram, DropReason, ReceiveOutcome};
pub use refclock::RefclockSample;
pub use restrict::{IpNet, RestrictEntry, Restrictions};
pub use select::SelectionResult;
pub use system::SystemState;
pub use table::PeerHandle;
