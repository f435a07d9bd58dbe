//! # rsmeter: Exponentially-Weighted Moving Average Meters
//!
//! `rsmeter` measures event rates the way Unix load averages do: every meter
//! keeps 1, 5 and 15-minute exponentially-weighted moving averages plus a
//! mean rate, and a background [`Arbiter`] ticks all meters on one shared
//! clock.
//!
//! ## Features
//!
//! - **Lock-free recording**: [`Meter::mark`] is a pair of atomic additions.
//! - **Cached reads**: rates are served from a cached snapshot that is only
//!   rebuilt when the event count changed or a tick happened.
//! - **One clock**: a single [`Arbiter`] drives any number of meters; each
//!   meter tick is isolated so one faulty meter cannot stall the others.
//! - **Explicit cadence**: the tick interval in [`Config`] feeds both the
//!   arbiter's timer and the decay constants of the meters it creates.
//! - **Kill switch**: [`set_nil_metrics`] makes every factory return no-op
//!   variants that ignore writes and report zero.
//!
//! ## Core Concepts
//!
//! - **[`decay`]**: the pure EWMA math (`alpha`, instant rate, update).
//! - **[`Ewma`]** / **[`MultiEwma`]**: one window, or several windows sharing
//!   one event accumulator.
//! - **[`Meter`]**: event count, 1/5/15-minute rates and mean rate.
//! - **Snapshots**: [`EwmaSnapshot`], [`MultiEwmaSnapshot`] and
//!   [`MeterSnapshot`] are immutable; mutating one panics.
//! - **[`Arbiter`]**: owns the driver and the registered meters.
//!
//! ## Getting Started
//!
//! ```rust
//! use rsmeter::{Arbiter, Config, Meter};
//! use std::time::Duration;
//!
//! # fn main() -> rsmeter::Result<()> {
//! let arbiter = Arbiter::new(Config::default())?;
//! let requests = arbiter.new_meter();
//!
//! requests.mark(3);
//!
//! // Normally the background driver does this every five seconds.
//! arbiter.tick_meters();
//!
//! assert_eq!(requests.count(), 3);
//! assert!((requests.rate1() - 0.6).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```
//!
//! For a process-wide meter ticked in the background, use [`new_meter`],
//! which registers with [`Arbiter::global`] and starts its driver on first
//! use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::error;

mod arbiter;
mod config;
pub mod decay;
mod error;
pub mod ewma;
mod meter;
pub mod multi_ewma;
mod registry;

pub use arbiter::{Arbiter, MeterId};
pub use config::Config;
pub use error::{Error, Result};
pub use ewma::{Ewma, EwmaSnapshot, NilEwma, StandardEwma};
pub use meter::{Meter, MeterSnapshot, NilMeter, StandardMeter};
pub use multi_ewma::{MultiEwma, MultiEwmaSnapshot, NilMultiEwma, StandardMultiEwma};
pub use registry::{get_or_register_meter, new_registered_meter, MeterRegistry};

static NIL_METRICS: AtomicBool = AtomicBool::new(false);

/// Switches every factory in this crate to its no-op variant.
///
/// Only affects values created afterwards. Meters that already exist keep
/// recording.
pub fn set_nil_metrics(enabled: bool) {
    NIL_METRICS.store(enabled, Ordering::Release);
}

/// Returns whether metrics are currently disabled.
pub fn nil_metrics() -> bool {
    NIL_METRICS.load(Ordering::Acquire)
}

/// Creates a meter ticked by the process-wide [`Arbiter::global`], starting
/// its driver on first use. Returns a [`NilMeter`] while metrics are
/// disabled.
pub fn new_meter() -> Arc<dyn Meter> {
    if nil_metrics() {
        return Arc::new(NilMeter);
    }
    let arbiter = Arbiter::global();
    let meter = arbiter.new_meter();
    if let Err(e) = arbiter.ensure_started() {
        error!("Failed to start the global arbiter: {}", e);
    }
    meter
}
