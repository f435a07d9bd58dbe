// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::decay::{self, Window, DEFAULT_TICK_INTERVAL};
use crate::error::Result;

/// A single exponentially-weighted moving average driven by an outside
/// source of clock ticks.
pub trait Ewma: Send + Sync + fmt::Debug {
    /// Moving average rate of events per second.
    fn rate(&self) -> f64;

    /// Read-only copy of the current rate.
    fn snapshot(&self) -> EwmaSnapshot;

    /// Folds the events recorded since the previous tick into the average.
    ///
    /// Must be called by exactly one scheduling path at the tick interval
    /// the average was built for.
    fn tick(&self);

    /// Records `n` events without blocking.
    fn update(&self, n: i64);
}

/// Builds a standard EWMA with the given alpha, or a [`NilEwma`] while
/// metrics are disabled with [`set_nil_metrics`](crate::set_nil_metrics).
pub fn new(alpha: f64) -> Arc<dyn Ewma> {
    if crate::nil_metrics() {
        return Arc::new(NilEwma);
    }
    Arc::new(StandardEwma::new(alpha))
}

#[derive(Debug, Clone, Copy)]
struct State {
    window: Window,
    initialized: bool,
}

/// The standard EWMA. Uncounted events accumulate in an atomic and are
/// drained on each tick.
#[derive(Debug)]
pub struct StandardEwma {
    uncounted: AtomicI64,
    tick_interval: Duration,
    state: Mutex<State>,
}

impl StandardEwma {
    /// Creates an EWMA ticked at the default five second cadence.
    pub fn new(alpha: f64) -> Self {
        Self::build(alpha, DEFAULT_TICK_INTERVAL)
    }

    /// Creates an EWMA ticked every `tick_interval`.
    ///
    /// Fails with [`Error::InvalidTickInterval`](crate::Error::InvalidTickInterval)
    /// if the interval is zero.
    pub fn with_tick_interval(alpha: f64, tick_interval: Duration) -> Result<Self> {
        decay::check_tick_interval(tick_interval)?;
        Ok(Self::build(alpha, tick_interval))
    }

    fn build(alpha: f64, tick_interval: Duration) -> Self {
        Self {
            uncounted: AtomicI64::new(0),
            tick_interval,
            state: Mutex::new(State {
                window: Window::new(alpha),
                initialized: false,
            }),
        }
    }

    /// One-minute moving average.
    pub fn one_minute() -> Self {
        Self::new(decay::alpha_for(1.0, DEFAULT_TICK_INTERVAL))
    }

    /// Five-minute moving average.
    pub fn five_minute() -> Self {
        Self::new(decay::alpha_for(5.0, DEFAULT_TICK_INTERVAL))
    }

    /// Fifteen-minute moving average.
    pub fn fifteen_minute() -> Self {
        Self::new(decay::alpha_for(15.0, DEFAULT_TICK_INTERVAL))
    }

    pub fn alpha(&self) -> f64 {
        self.lock().window.alpha()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Ewma for StandardEwma {
    fn rate(&self) -> f64 {
        self.lock().window.rate()
    }

    fn snapshot(&self) -> EwmaSnapshot {
        EwmaSnapshot(self.rate())
    }

    fn tick(&self) {
        let count = self.uncounted.swap(0, Ordering::AcqRel);
        let instant_rate = decay::instant_rate(count, self.tick_interval);
        let mut state = self.lock();
        if state.initialized {
            state.window.fold(instant_rate);
        } else {
            state.initialized = true;
            state.window.seed(instant_rate);
        }
    }

    fn update(&self, n: i64) {
        self.uncounted.fetch_add(n, Ordering::AcqRel);
    }
}

/// Read-only copy of another EWMA.
///
/// Calling [`tick`](Ewma::tick) or [`update`](Ewma::update) on a snapshot
/// panics: a snapshot never changes once taken.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EwmaSnapshot(f64);

impl EwmaSnapshot {
    pub fn new(rate: f64) -> Self {
        Self(rate)
    }
}

impl Ewma for EwmaSnapshot {
    fn rate(&self) -> f64 {
        self.0
    }

    fn snapshot(&self) -> EwmaSnapshot {
        *self
    }

    fn tick(&self) {
        panic!("tick called on an EwmaSnapshot");
    }

    fn update(&self, _n: i64) {
        panic!("update called on an EwmaSnapshot");
    }
}

/// No-op EWMA.
#[derive(Debug, Clone, Copy, Default)]
pub struct NilEwma;

impl Ewma for NilEwma {
    fn rate(&self) -> f64 {
        0.0
    }

    fn snapshot(&self) -> EwmaSnapshot {
        EwmaSnapshot::default()
    }

    fn tick(&self) {}

    fn update(&self, _n: i64) {}
}
