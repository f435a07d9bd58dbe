// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::decay::{self, DEFAULT_TICK_INTERVAL};
use crate::error::Result;

const DEFAULT_THREAD_NAME: &str = "rsmeter-arbiter";

/// Configuration for an [`Arbiter`](crate::Arbiter).
///
/// The tick interval is shared by the arbiter's timer and by every decaying
/// average it creates, so the decay constants always match the cadence that
/// actually drives them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Time between two tick rounds.
    pub tick_interval: Duration,
    /// Name given to the background driver thread.
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl Config {
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Checks that the configuration can drive decaying averages.
    pub fn validate(&self) -> Result<()> {
        decay::check_tick_interval(self.tick_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.thread_name, "rsmeter-arbiter");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = Config::default().with_tick_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidTickInterval { interval }) if interval.is_zero()
        ));
    }

    #[test]
    fn test_builder() {
        let config = Config::default()
            .with_tick_interval(Duration::from_millis(250))
            .with_thread_name("ticker");
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.thread_name, "ticker");
    }
}
