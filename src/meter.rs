// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Meters
//!
//! A meter counts events and reports exponentially-weighted moving average
//! rates over one, five and fifteen minutes plus the mean rate since it was
//! created.
//!
//! # Thread Safety
//!
//! - [`Meter::mark`] is two atomic additions and never takes a lock.
//! - Rate reads are served from a cached [`MeterSnapshot`] under a shared
//!   lock. Only when the event count has moved since the cache was built does
//!   a reader take the exclusive lock to rebuild it.
//! - Ticks come from an [`Arbiter`](crate::Arbiter), which rebuilds the cache
//!   after folding the interval's events into the averages.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::decay::{self, DEFAULT_TICK_INTERVAL};
use crate::error::Result;
use crate::multi_ewma::{MultiEwma, StandardMultiEwma};

/// Counts events to produce 1/5/15-minute moving average rates and a mean rate.
pub trait Meter: Send + Sync + fmt::Debug {
    /// Number of events recorded.
    fn count(&self) -> i64;

    /// Records the occurrence of `n` events.
    fn mark(&self, n: i64);

    /// One-minute moving average rate of events per second.
    fn rate1(&self) -> f64;

    /// Five-minute moving average rate of events per second.
    fn rate5(&self) -> f64;

    /// Fifteen-minute moving average rate of events per second.
    fn rate15(&self) -> f64;

    /// Mean rate of events per second since the meter was created.
    fn rate_mean(&self) -> f64;

    /// Read-only copy of the meter.
    fn snapshot(&self) -> MeterSnapshot;
}

/// Read-only copy of a meter at a point in time.
///
/// The rates are always those computed when `count` was observed. Calling
/// [`mark`](Meter::mark) on a snapshot panics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeterSnapshot {
    count: i64,
    rate1: f64,
    rate5: f64,
    rate15: f64,
    rate_mean: f64,
}

impl MeterSnapshot {
    pub fn new(count: i64, rate1: f64, rate5: f64, rate15: f64, rate_mean: f64) -> Self {
        Self {
            count,
            rate1,
            rate5,
            rate15,
            rate_mean,
        }
    }
}

impl Meter for MeterSnapshot {
    fn count(&self) -> i64 {
        self.count
    }

    fn mark(&self, _n: i64) {
        panic!("mark called on a MeterSnapshot");
    }

    fn rate1(&self) -> f64 {
        self.rate1
    }

    fn rate5(&self) -> f64 {
        self.rate5
    }

    fn rate15(&self) -> f64 {
        self.rate15
    }

    fn rate_mean(&self) -> f64 {
        self.rate_mean
    }

    fn snapshot(&self) -> MeterSnapshot {
        *self
    }
}

/// No-op meter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NilMeter;

impl Meter for NilMeter {
    fn count(&self) -> i64 {
        0
    }

    fn mark(&self, _n: i64) {}

    fn rate1(&self) -> f64 {
        0.0
    }

    fn rate5(&self) -> f64 {
        0.0
    }

    fn rate15(&self) -> f64 {
        0.0
    }

    fn rate_mean(&self) -> f64 {
        0.0
    }

    fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot::default()
    }
}

/// The standard meter.
///
/// Only an [`Arbiter`](crate::Arbiter) ticks a meter: build one through
/// [`Arbiter::new_meter`](crate::Arbiter::new_meter), or construct it
/// directly and hand it to [`Arbiter::register`](crate::Arbiter::register).
/// The mean rate is undefined until some time has elapsed since construction.
pub struct StandardMeter {
    count: AtomicI64,
    average: StandardMultiEwma,
    start: Instant,
    // Guards the cached snapshot only.
    snapshot: RwLock<MeterSnapshot>,
}

impl fmt::Debug for StandardMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardMeter")
            .field("count", &self.count())
            .field("uptime", &self.start.elapsed())
            .finish_non_exhaustive()
    }
}

impl Default for StandardMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardMeter {
    /// Creates a meter whose averages assume the default five second tick.
    pub fn new() -> Self {
        Self::build(DEFAULT_TICK_INTERVAL)
    }

    /// Creates a meter whose averages assume ticks every `tick_interval`.
    ///
    /// Fails with [`Error::InvalidTickInterval`](crate::Error::InvalidTickInterval)
    /// if the interval is zero.
    pub fn with_tick_interval(tick_interval: Duration) -> Result<Self> {
        decay::check_tick_interval(tick_interval)?;
        Ok(Self::build(tick_interval))
    }

    /// Caller guarantees a non-zero interval.
    pub(crate) fn build(tick_interval: Duration) -> Self {
        Self {
            count: AtomicI64::new(0),
            average: StandardMultiEwma::standard(tick_interval),
            start: Instant::now(),
            snapshot: RwLock::new(MeterSnapshot::default()),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.average.tick_interval()
    }

    /// Folds the events of the elapsed interval into the averages and
    /// rebuilds the cached snapshot.
    pub(crate) fn tick(&self) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        self.average.tick();
        self.refresh(&mut snapshot);
    }

    /// Runs `f` with at least a shared lock on an up-to-date snapshot.
    fn with_updated_snapshot<R>(&self, f: impl FnOnce(&MeterSnapshot) -> R) -> R {
        {
            let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
            if snapshot.count == self.count.load(Ordering::Acquire) {
                return f(&snapshot);
            }
        }

        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        // Another reader may have refreshed while we waited.
        if snapshot.count != self.count.load(Ordering::Acquire) {
            self.refresh(&mut snapshot);
        }
        f(&snapshot)
    }

    // Caller holds the write lock.
    fn refresh(&self, snapshot: &mut MeterSnapshot) {
        let count = self.count.load(Ordering::Acquire);
        let rates = self.average.snapshot();
        *snapshot = MeterSnapshot {
            count,
            rate1: rates.rate1(),
            rate5: rates.rate5(),
            rate15: rates.rate15(),
            rate_mean: count as f64 / self.start.elapsed().as_secs_f64(),
        };
    }
}

impl Meter for StandardMeter {
    fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    fn mark(&self, n: i64) {
        self.count.fetch_add(n, Ordering::AcqRel);
        self.average.update(n);
    }

    fn rate1(&self) -> f64 {
        self.with_updated_snapshot(|snapshot| snapshot.rate1)
    }

    fn rate5(&self) -> f64 {
        self.with_updated_snapshot(|snapshot| snapshot.rate5)
    }

    fn rate15(&self) -> f64 {
        self.with_updated_snapshot(|snapshot| snapshot.rate15)
    }

    fn rate_mean(&self) -> f64 {
        self.with_updated_snapshot(|snapshot| snapshot.rate_mean)
    }

    fn snapshot(&self) -> MeterSnapshot {
        self.with_updated_snapshot(|snapshot| *snapshot)
    }
}
