// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::decay::{self, Window, DEFAULT_TICK_INTERVAL};
use crate::error::Result;

const RATE1: usize = 0;
const RATE5: usize = 1;
const RATE15: usize = 2;

/// Several exponentially-weighted moving averages of different windows fed
/// by one shared event accumulator and ticked together.
///
/// The first three windows are exposed as [`rate1`](MultiEwma::rate1),
/// [`rate5`](MultiEwma::rate5) and [`rate15`](MultiEwma::rate15), which hold
/// the 1/5/15-minute averages for the default construction.
pub trait MultiEwma: Send + Sync + fmt::Debug {
    /// Rate of events per second in window `index`, if that window exists.
    fn rate(&self, index: usize) -> Option<f64>;

    fn rate1(&self) -> f64 {
        self.rate(RATE1).unwrap_or(0.0)
    }

    fn rate5(&self) -> f64 {
        self.rate(RATE5).unwrap_or(0.0)
    }

    fn rate15(&self) -> f64 {
        self.rate(RATE15).unwrap_or(0.0)
    }

    /// Read-only copy of every window, taken under a single lock.
    fn snapshot(&self) -> MultiEwmaSnapshot;

    /// Folds the events recorded since the previous tick into every window.
    fn tick(&self);

    /// Records `n` events without blocking.
    fn update(&self, n: i64);
}

/// Builds a standard 1/5/15-minute average, or a [`NilMultiEwma`] while
/// metrics are disabled.
pub fn new() -> Arc<dyn MultiEwma> {
    if crate::nil_metrics() {
        return Arc::new(NilMultiEwma);
    }
    Arc::new(StandardMultiEwma::new())
}

/// Builds a standard average with custom decay constants, or a
/// [`NilMultiEwma`] while metrics are disabled.
pub fn with_alphas(alphas: impl AsRef<[f64]>) -> Arc<dyn MultiEwma> {
    if crate::nil_metrics() {
        return Arc::new(NilMultiEwma);
    }
    Arc::new(StandardMultiEwma::build(alphas, DEFAULT_TICK_INTERVAL))
}

#[derive(Debug)]
struct State {
    windows: Box<[Window]>,
    initialized: bool,
}

/// The standard multi-window average.
///
/// All windows share one accumulator so an event is counted exactly once,
/// and they leave the uninitialized state on the same tick.
#[derive(Debug)]
pub struct StandardMultiEwma {
    uncounted: AtomicI64,
    tick_interval: Duration,
    state: Mutex<State>,
}

impl Default for StandardMultiEwma {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardMultiEwma {
    /// 1/5/15-minute averages ticked every five seconds.
    pub fn new() -> Self {
        Self::standard(DEFAULT_TICK_INTERVAL)
    }

    /// 1/5/15-minute averages ticked every `tick_interval`.
    ///
    /// Fails with [`Error::InvalidTickInterval`](crate::Error::InvalidTickInterval)
    /// if the interval is zero.
    pub fn with_tick_interval(tick_interval: Duration) -> Result<Self> {
        decay::check_tick_interval(tick_interval)?;
        Ok(Self::standard(tick_interval))
    }

    /// One window per decay constant, ticked every `tick_interval`.
    pub fn with_alphas(alphas: impl AsRef<[f64]>, tick_interval: Duration) -> Result<Self> {
        decay::check_tick_interval(tick_interval)?;
        Ok(Self::build(alphas, tick_interval))
    }

    /// Caller guarantees a non-zero interval.
    pub(crate) fn standard(tick_interval: Duration) -> Self {
        Self::build(decay::default_alphas(tick_interval), tick_interval)
    }

    fn build(alphas: impl AsRef<[f64]>, tick_interval: Duration) -> Self {
        let windows = alphas.as_ref().iter().copied().map(Window::new).collect();
        Self {
            uncounted: AtomicI64::new(0),
            tick_interval,
            state: Mutex::new(State {
                windows,
                initialized: false,
            }),
        }
    }

    pub fn alphas(&self) -> Vec<f64> {
        self.lock().windows.iter().map(Window::alpha).collect()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MultiEwma for StandardMultiEwma {
    fn rate(&self, index: usize) -> Option<f64> {
        self.lock().windows.get(index).map(Window::rate)
    }

    fn snapshot(&self) -> MultiEwmaSnapshot {
        let state = self.lock();
        MultiEwmaSnapshot {
            rates: state.windows.iter().map(Window::rate).collect(),
        }
    }

    fn tick(&self) {
        let count = self.uncounted.swap(0, Ordering::AcqRel);
        let instant_rate = decay::instant_rate(count, self.tick_interval);
        let mut state = self.lock();
        if state.initialized {
            state
                .windows
                .iter_mut()
                .for_each(|window| window.fold(instant_rate));
        } else {
            state.initialized = true;
            state
                .windows
                .iter_mut()
                .for_each(|window| window.seed(instant_rate));
        }
    }

    fn update(&self, n: i64) {
        self.uncounted.fetch_add(n, Ordering::AcqRel);
    }
}

/// Read-only copy of another multi-window average.
///
/// Mutating calls panic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiEwmaSnapshot {
    rates: Box<[f64]>,
}

impl MultiEwmaSnapshot {
    pub fn new(rates: impl Into<Box<[f64]>>) -> Self {
        Self {
            rates: rates.into(),
        }
    }

    /// Rates of every window in events per second.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }
}

impl MultiEwma for MultiEwmaSnapshot {
    fn rate(&self, index: usize) -> Option<f64> {
        self.rates.get(index).copied()
    }

    fn snapshot(&self) -> MultiEwmaSnapshot {
        self.clone()
    }

    fn tick(&self) {
        panic!("tick called on a MultiEwmaSnapshot");
    }

    fn update(&self, _n: i64) {
        panic!("update called on a MultiEwmaSnapshot");
    }
}

/// No-op multi-window average.
#[derive(Debug, Clone, Copy, Default)]
pub struct NilMultiEwma;

impl MultiEwma for NilMultiEwma {
    fn rate(&self, _index: usize) -> Option<f64> {
        None
    }

    fn snapshot(&self) -> MultiEwmaSnapshot {
        MultiEwmaSnapshot::default()
    }

    fn tick(&self) {}

    fn update(&self, _n: i64) {}
}
