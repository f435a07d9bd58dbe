// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Decay Engine
//!
//! Pure functions behind every decaying average in this crate. Rates are
//! carried in events per nanosecond between ticks and only converted to
//! events per second when read, which keeps the arithmetic identical to the
//! classic 1/5/15-minute load-average style meters.
//!
//! With a tick interval `t` seconds and a window of `w` minutes:
//!
//! ```text
//! alpha   = 1 - exp(-t / 60 / w)
//! instant = count / t
//! next    = rate + alpha * (instant - rate)
//! ```

use std::time::Duration;

use crate::error::{Error, Result};

/// Cadence assumed by decaying averages that are not given one explicitly.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Window lengths, in minutes, of the standard 1/5/15-minute averages.
pub const STANDARD_WINDOWS: [f64; 3] = [1.0, 5.0, 15.0];

const SECONDS_PER_MINUTE: f64 = 60.0;
const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Rejects intervals that cannot drive a decaying average.
pub(crate) fn check_tick_interval(tick_interval: Duration) -> Result<()> {
    if tick_interval.is_zero() {
        return Err(Error::InvalidTickInterval {
            interval: tick_interval,
        });
    }
    Ok(())
}

/// Returns the decay constant for a window of `window_minutes` ticked every
/// `tick_interval`.
#[inline]
pub fn alpha_for(window_minutes: f64, tick_interval: Duration) -> f64 {
    1.0 - (-tick_interval.as_secs_f64() / SECONDS_PER_MINUTE / window_minutes).exp()
}

/// Decay constants for the standard 1/5/15-minute windows.
pub fn default_alphas(tick_interval: Duration) -> [f64; 3] {
    STANDARD_WINDOWS.map(|window| alpha_for(window, tick_interval))
}

/// Rate observed over one tick interval, in events per nanosecond.
#[inline]
pub fn instant_rate(count: i64, tick_interval: Duration) -> f64 {
    count as f64 / tick_interval.as_nanos() as f64
}

/// Single-pole EWMA update.
#[inline]
pub fn next_rate(rate: f64, alpha: f64, instant_rate: f64) -> f64 {
    rate + alpha * (instant_rate - rate)
}

/// Converts an internal per-nanosecond rate to events per second.
#[inline]
pub fn per_second(rate: f64) -> f64 {
    rate * NANOS_PER_SECOND
}

/// One decaying rate. Owned by a single average and mutated under its lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    alpha: f64,
    rate: f64,
}

impl Window {
    pub(crate) fn new(alpha: f64) -> Self {
        Self { alpha, rate: 0.0 }
    }

    /// First sample: taken as-is, no decay.
    pub(crate) fn seed(&mut self, instant_rate: f64) {
        self.rate = instant_rate;
    }

    pub(crate) fn fold(&mut self, instant_rate: f64) {
        self.rate = next_rate(self.rate, self.alpha, instant_rate);
    }

    /// Current rate in events per second.
    pub(crate) fn rate(&self) -> f64 {
        per_second(self.rate)
    }

    pub(crate) fn alpha(&self) -> f64 {
        self.alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_alphas() {
        let alphas = default_alphas(DEFAULT_TICK_INTERVAL);
        assert_eq!(alphas[0], 1.0 - (-5.0f64 / 60.0 / 1.0).exp());
        assert_eq!(alphas[1], 1.0 - (-5.0f64 / 60.0 / 5.0).exp());
        assert_eq!(alphas[2], 1.0 - (-5.0f64 / 60.0 / 15.0).exp());
        assert!((alphas[0] - 0.07995558537067671).abs() < 1e-15);
    }

    #[test]
    fn test_shorter_window_decays_faster() {
        let alphas = default_alphas(DEFAULT_TICK_INTERVAL);
        assert!(alphas[0] > alphas[1]);
        assert!(alphas[1] > alphas[2]);
        assert!(alphas.iter().all(|a| *a > 0.0 && *a < 1.0));
    }

    #[test]
    fn test_instant_rate_units() {
        let rate = instant_rate(3, DEFAULT_TICK_INTERVAL);
        assert_eq!(per_second(rate), 0.6);
        assert_eq!(instant_rate(0, DEFAULT_TICK_INTERVAL), 0.0);
    }

    #[test]
    fn test_check_tick_interval() {
        assert!(check_tick_interval(DEFAULT_TICK_INTERVAL).is_ok());
        assert!(check_tick_interval(Duration::from_nanos(1)).is_ok());
        assert!(matches!(
            check_tick_interval(Duration::ZERO),
            Err(Error::InvalidTickInterval { .. })
        ));
    }

    #[test]
    fn test_next_rate() {
        assert_eq!(next_rate(10.0, 0.5, 0.0), 5.0);
        assert_eq!(next_rate(10.0, 0.5, 10.0), 10.0);
        assert_eq!(next_rate(0.0, 1.0, 4.0), 4.0);
    }

    #[test]
    fn test_window_seed_then_fold() {
        let mut window = Window::new(0.5);
        window.seed(instant_rate(10, Duration::from_secs(1)));
        assert!((window.rate() - 10.0).abs() < 1e-9);
        window.fold(0.0);
        assert!((window.rate() - 5.0).abs() < 1e-9);
        assert_eq!(window.alpha(), 0.5);
    }
}
