// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Arbiter
//!
//! The arbiter is the single clock source for a population of meters. It
//! keeps a weak reference to each registered meter and, on every tick
//! interval, ticks them one after the other.
//!
//! # Lifecycle
//!
//! - [`Arbiter::start`] launches the background driver: a dedicated thread
//!   running a current-thread tokio runtime and a [`tokio::time::interval`].
//! - [`Arbiter::stop`] signals the driver and joins its thread.
//! - Dropping the last [`Arbiter`] handle also ends the driver.
//! - [`Arbiter::global`] is a process-wide instance whose driver is started
//!   lazily by [`new_meter`](crate::new_meter).
//!
//! # Failure isolation
//!
//! Each meter is ticked inside [`std::panic::catch_unwind`]. A meter that
//! panics is logged and skipped; the rest of the round still runs.
//!
//! # Example
//!
//! ```rust
//! use rsmeter::{Arbiter, Config, Meter};
//! use std::time::Duration;
//!
//! # fn main() -> rsmeter::Result<()> {
//! let arbiter = Arbiter::new(Config::default().with_tick_interval(Duration::from_secs(1)))?;
//! let meter = arbiter.new_meter();
//! arbiter.start()?;
//!
//! meter.mark(3);
//! assert_eq!(meter.count(), 3);
//!
//! arbiter.stop()?;
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::sync::oneshot;
use tokio::time::{self, MissedTickBehavior};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meter::{Meter, NilMeter, StandardMeter};

/// Something the arbiter ticks once per interval.
pub(crate) trait Scheduled: Send + Sync {
    fn on_tick(&self);
}

impl Scheduled for StandardMeter {
    fn on_tick(&self) {
        self.tick();
    }
}

/// Handle of a meter registered with an [`Arbiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeterId(u64);

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "meter-{}", self.0)
    }
}

struct Driver {
    shutdown: oneshot::Sender<()>,
    thread: thread::JoinHandle<()>,
}

struct Inner {
    config: Config,
    next_id: AtomicU64,
    meters: RwLock<BTreeMap<MeterId, Weak<dyn Scheduled>>>,
    // Held while starting so concurrent callers cannot launch two drivers.
    driver: Mutex<Option<Driver>>,
    tick_rounds: AtomicU64,
}

impl Inner {
    fn new(config: Config) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            meters: RwLock::new(BTreeMap::new()),
            driver: Mutex::new(None),
            tick_rounds: AtomicU64::new(0),
        }
    }

    fn tick_meters(&self) {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "tick_meters",
            round = self.tick_rounds.load(Ordering::Relaxed)
        )
        .entered();

        let mut dropped = Vec::new();
        {
            let meters = self.meters.read().unwrap_or_else(PoisonError::into_inner);
            trace!("Ticking {} meters", meters.len());
            for (id, meter) in meters.iter() {
                let Some(meter) = meter.upgrade() else {
                    dropped.push(*id);
                    continue;
                };
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| meter.on_tick())) {
                    error!(
                        "Meter {} panicked during tick: {}",
                        id,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        if !dropped.is_empty() {
            let mut meters = self.meters.write().unwrap_or_else(PoisonError::into_inner);
            for id in &dropped {
                meters.remove(id);
            }
            debug!("Pruned {} dropped meters", dropped.len());
        }

        self.tick_rounds.fetch_add(1, Ordering::AcqRel);
    }
}

/// Ticks every registered meter on a fixed interval.
///
/// `Arbiter` is a cheap handle; clones share the same meters and driver.
#[derive(Clone)]
pub struct Arbiter {
    inner: Arc<Inner>,
}

impl fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arbiter")
            .field("tick_interval", &self.inner.config.tick_interval)
            .field("meters", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Arbiter {
    /// Creates an arbiter. The driver is not started.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner::new(config)),
        })
    }

    /// The process-wide arbiter, configured with [`Config::default`].
    pub fn global() -> &'static Arbiter {
        static GLOBAL: OnceLock<Arbiter> = OnceLock::new();
        GLOBAL.get_or_init(|| Arbiter {
            inner: Arc::new(Inner::new(Config::default())),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn tick_interval(&self) -> Duration {
        self.inner.config.tick_interval
    }

    /// Creates a meter matching this arbiter's tick interval and registers
    /// it. Returns a [`NilMeter`] while metrics are disabled.
    ///
    /// The arbiter only holds the meter weakly; it stops being ticked once
    /// every returned handle is dropped.
    pub fn new_meter(&self) -> Arc<dyn Meter> {
        if crate::nil_metrics() {
            return Arc::new(NilMeter);
        }
        let meter = Arc::new(StandardMeter::build(self.tick_interval()));
        self.register(&meter);
        meter
    }

    /// Registers a meter to be ticked on every round.
    pub fn register(&self, meter: &Arc<StandardMeter>) -> MeterId {
        if meter.tick_interval() != self.tick_interval() {
            warn!(
                "Registering a meter built for {:?} ticks with an arbiter ticking every {:?}; \
                 its rates will be skewed",
                meter.tick_interval(),
                self.tick_interval()
            );
        }
        let meter: Weak<StandardMeter> = Arc::downgrade(meter);
        self.register_scheduled(meter)
    }

    pub(crate) fn register_scheduled(&self, meter: Weak<dyn Scheduled>) -> MeterId {
        let id = MeterId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .meters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, meter);
        debug!("Registered {}", id);
        id
    }

    /// Stops ticking a meter. Returns `false` if it was not registered.
    pub fn unregister(&self, id: MeterId) -> bool {
        let removed = self
            .inner
            .meters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!("Unregistered {}", id);
        }
        removed
    }

    /// Number of registered meters, including dropped ones not yet pruned.
    pub fn len(&self) -> usize {
        self.inner
            .meters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs one tick round on the calling thread.
    ///
    /// The background driver calls this once per interval. Call it directly
    /// only when driving the arbiter from another clock source, and never
    /// while the driver is running.
    pub fn tick_meters(&self) {
        self.inner.tick_meters();
    }

    /// Number of tick rounds completed so far.
    pub fn tick_rounds(&self) -> u64 {
        self.inner.tick_rounds.load(Ordering::Acquire)
    }

    /// Starts the background driver.
    ///
    /// Returns [`Error::AlreadyStarted`] if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut driver = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if driver.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|source| Error::Runtime {
                details: "build driver runtime".to_string(),
                source,
            })?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let inner = Arc::downgrade(&self.inner);
        let tick_interval = self.tick_interval();
        let thread = thread::Builder::new()
            .name(self.inner.config.thread_name.clone())
            .spawn(move || runtime.block_on(drive(inner, tick_interval, shutdown_rx)))
            .map_err(|source| Error::Runtime {
                details: "spawn driver thread".to_string(),
                source,
            })?;

        info!("Arbiter driver started, ticking every {:?}", tick_interval);
        *driver = Some(Driver { shutdown, thread });
        Ok(())
    }

    /// Starts the driver unless it is already running.
    pub fn ensure_started(&self) -> Result<()> {
        match self.start() {
            Ok(()) | Err(Error::AlreadyStarted) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stops the background driver and waits for its thread to exit.
    ///
    /// Must not be called from inside a meter tick.
    pub fn stop(&self) -> Result<()> {
        let driver = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::NotStarted)?;

        // The driver may already be gone if it was dropped concurrently.
        let _ = driver.shutdown.send(());
        driver.thread.join().map_err(|payload| Error::Join {
            details: panic_message(payload.as_ref()),
        })?;
        info!("Arbiter driver stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

async fn drive(inner: Weak<Inner>, tick_interval: Duration, mut shutdown: oneshot::Receiver<()>) {
    let mut interval = time::interval_at(time::Instant::now() + tick_interval, tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                debug!("Arbiter driver received shutdown");
                break;
            }

            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else {
                    debug!("Arbiter dropped, driver exiting");
                    break;
                };
                inner.tick_meters();
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
