// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Local clock collaborator.
//!
//! The engine reads time and hands its combined offset to a [`LocalClock`].
//! The clock decides whether to slew, step, ignore, or give up; a step
//! makes the engine flush every association, a panic stops it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use ntp_proto::unix_time::Instant;
use ntp_proto::{NtpDuration, NtpTimestamp};

/// Offsets above this are stepped rather than slewed (s).
pub const STEP_THRESHOLD: f64 = 0.128;
/// Offsets above this are refused (s).
pub const PANIC_THRESHOLD: f64 = 1000.0;

/// How the local clock handled an offset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClockStatus {
    /// Offset discarded.
    Ignore,
    /// Offset is being slewed out.
    Slew,
    /// Clock was stepped.
    Step,
    /// Offset exceeds the panic threshold.
    Panic,
}

/// Source of local time and sink for offset corrections.
pub trait LocalClock {
    /// Current local time.
    fn now(&self) -> NtpTimestamp;

    /// Clock precision as a log2 seconds exponent.
    fn precision(&self) -> i8;

    /// Apply a correction of `offset` seconds.
    fn adjust(&mut self, offset: f64) -> ClockStatus;
}

fn classify(offset: f64, step: f64, panic: f64) -> ClockStatus {
    if !offset.is_finite() {
        return ClockStatus::Ignore;
    }
    let magnitude = offset.abs();
    if magnitude > panic {
        ClockStatus::Panic
    } else if magnitude > step {
        ClockStatus::Step
    } else {
        ClockStatus::Slew
    }
}

/// Reads the system clock; classifies offsets without changing the clock.
#[derive(Clone, Debug)]
pub struct SystemLocalClock {
    precision: i8,
    step_threshold: f64,
    panic_threshold: f64,
}

impl Default for SystemLocalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemLocalClock {
    /// A clock with measured precision and the default thresholds.
    pub fn new() -> Self {
        SystemLocalClock {
            precision: measure_precision(),
            step_threshold: STEP_THRESHOLD,
            panic_threshold: PANIC_THRESHOLD,
        }
    }

    /// Override the step threshold.
    pub fn step_threshold(mut self, seconds: f64) -> Self {
        self.step_threshold = seconds;
        self
    }

    /// Override the panic threshold.
    pub fn panic_threshold(mut self, seconds: f64) -> Self {
        self.panic_threshold = seconds;
        self
    }
}

impl LocalClock for SystemLocalClock {
    fn now(&self) -> NtpTimestamp {
        Instant::now().into()
    }

    fn precision(&self) -> i8 {
        self.precision
    }

    fn adjust(&mut self, offset: f64) -> ClockStatus {
        classify(offset, self.step_threshold, self.panic_threshold)
    }
}

/// Smallest observable tick of `SystemTime`, as a log2 exponent.
fn measure_precision() -> i8 {
    let mut tick = f64::MAX;
    let mut last = SystemTime::now();
    for _ in 0..1000 {
        let now = SystemTime::now();
        if let Ok(d) = now.duration_since(last) {
            let secs = d.as_secs_f64();
            if secs > 0.0 {
                tick = tick.min(secs);
            }
        }
        last = now;
    }
    if tick == f64::MAX {
        return -20;
    }
    (tick.log2().ceil() as i32).clamp(-30, 0) as i8
}

#[derive(Debug)]
struct SimState {
    now: NtpTimestamp,
    precision: i8,
    adjustments: Vec<f64>,
    scripted: Vec<ClockStatus>,
}

/// A manually driven clock for tests and simulation.
///
/// Clones share state, so a test can keep one copy while the engine owns
/// another. Adjustments are recorded, not applied.
#[derive(Clone, Debug)]
pub struct SimulatedClock {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedClock {
    /// A clock reading `start`, with precision 2^-20 s.
    pub fn new(start: NtpTimestamp) -> Self {
        SimulatedClock {
            state: Arc::new(Mutex::new(SimState {
                now: start,
                precision: -20,
                adjustments: Vec::new(),
                scripted: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the clock forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        let mut s = self.lock();
        s.now = s.now + NtpDuration::from_seconds_f64(seconds);
    }

    /// Set the clock.
    pub fn set(&self, now: NtpTimestamp) {
        self.lock().now = now;
    }

    /// Set the reported precision.
    pub fn set_precision(&self, precision: i8) {
        self.lock().precision = precision;
    }

    /// Make the next `adjust` return `status`. Scripted results are used
    /// first-in, first-out before falling back to threshold classification.
    pub fn script(&self, status: ClockStatus) {
        self.lock().scripted.insert(0, status);
    }

    /// Every offset passed to `adjust`, in order.
    pub fn adjustments(&self) -> Vec<f64> {
        self.lock().adjustments.clone()
    }
}

impl LocalClock for SimulatedClock {
    fn now(&self) -> NtpTimestamp {
        self.lock().now
    }

    fn precision(&self) -> i8 {
        self.lock().precision
    }

    fn adjust(&mut self, offset: f64) -> ClockStatus {
        let mut s = self.lock();
        s.adjustments.push(offset);
        s.scripted
            .pop()
            .unwrap_or_else(|| classify(offset, STEP_THRESHOLD, PANIC_THRESHOLD))
    }
}
