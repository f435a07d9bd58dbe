// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Tests for the arbiter's background driver and the registry contract

use anyhow::Result;
use rsmeter::{
    get_or_register_meter, new_registered_meter, Arbiter, Config, Error, Meter, MeterRegistry,
    StandardMeter,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn init_test_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

fn fast_arbiter() -> Result<Arbiter> {
    Ok(Arbiter::new(
        Config::default()
            .with_tick_interval(Duration::from_millis(10))
            .with_thread_name("test-arbiter"),
    )?)
}

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + deadline;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[derive(Default)]
struct MapRegistry {
    meters: Mutex<HashMap<String, Arc<dyn Meter>>>,
}

impl MeterRegistry for MapRegistry {
    fn get_or_insert_with<F>(&self, name: &str, create: F) -> Arc<dyn Meter>
    where
        F: FnOnce() -> Arc<dyn Meter>,
    {
        let mut meters = self.meters.lock().unwrap();
        Arc::clone(meters.entry(name.to_string()).or_insert_with(create))
    }

    fn register(&self, name: &str, meter: Arc<dyn Meter>) -> rsmeter::Result<()> {
        match self.meters.lock().unwrap().entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateMeter {
                name: name.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(meter);
                Ok(())
            }
        }
    }
}

impl MapRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Meter>> {
        self.meters.lock().unwrap().get(name).cloned()
    }
}

// ============================================================================
// Driver
// ============================================================================

#[tokio::test]
async fn test_driver_ticks_registered_meters() -> Result<()> {
    init_test_logger();
    let arbiter = fast_arbiter()?;
    let meter = arbiter.new_meter();
    arbiter.start()?;

    meter.mark(10);
    let ticked = wait_until(Duration::from_secs(5), || meter.rate1() > 0.0).await;
    assert!(ticked, "meter was never ticked");

    // With no new events the rate decays.
    let peak = meter.rate1();
    let decayed = wait_until(Duration::from_secs(5), || meter.rate1() < peak).await;
    assert!(decayed, "rate did not decay");

    arbiter.stop()?;
    assert!(!arbiter.is_running());
    Ok(())
}

#[tokio::test]
async fn test_driver_ticks_every_meter() -> Result<()> {
    let arbiter = fast_arbiter()?;
    let meters: Vec<_> = (0..32).map(|_| arbiter.new_meter()).collect();
    for (i, meter) in meters.iter().enumerate() {
        meter.mark(i as i64 + 1);
    }
    arbiter.start()?;

    let all_ticked = wait_until(Duration::from_secs(5), || {
        meters.iter().all(|meter| meter.rate1() > 0.0)
    })
    .await;
    arbiter.stop()?;

    assert!(all_ticked);
    assert_eq!(arbiter.len(), 32);
    Ok(())
}

#[tokio::test]
async fn test_dropped_meter_is_pruned_by_driver() -> Result<()> {
    let arbiter = fast_arbiter()?;
    let kept = arbiter.new_meter();
    drop(arbiter.new_meter());
    assert_eq!(arbiter.len(), 2);
    arbiter.start()?;

    let pruned = wait_until(Duration::from_secs(5), || arbiter.len() == 1).await;
    arbiter.stop()?;

    assert!(pruned);
    assert_eq!(kept.count(), 0);
    Ok(())
}

#[test]
fn test_start_errors() -> Result<()> {
    let arbiter = fast_arbiter()?;
    assert!(matches!(arbiter.stop(), Err(Error::NotStarted)));
    arbiter.start()?;
    assert!(matches!(arbiter.start(), Err(Error::AlreadyStarted)));
    arbiter.stop()?;
    Ok(())
}

#[test]
fn test_mismatched_meter_is_still_ticked() -> Result<()> {
    init_test_logger();
    let arbiter = Arbiter::new(Config::default())?;
    let meter = Arc::new(StandardMeter::with_tick_interval(Duration::from_secs(1))?);
    arbiter.register(&meter);

    meter.mark(2);
    arbiter.tick_meters();
    // Rates follow the meter's own interval.
    assert!((meter.rate1() - 2.0).abs() < 1e-12);
    Ok(())
}

// ============================================================================
// Process-wide arbiter and registry
// ============================================================================

#[test]
fn test_global_new_meter_starts_driver() {
    let meter = rsmeter::new_meter();
    meter.mark(2);
    assert_eq!(meter.count(), 2);
    assert!(Arbiter::global().is_running());
    assert_eq!(Arbiter::global().tick_interval(), Duration::from_secs(5));
}

#[test]
fn test_get_or_register_meter_reuses_by_name() -> Result<()> {
    let arbiter = Arbiter::new(Config::default())?;
    let registry = MapRegistry::default();

    let requests = arbiter.get_or_register_meter("requests", &registry);
    requests.mark(4);
    let again = arbiter.get_or_register_meter("requests", &registry);
    let errors = arbiter.get_or_register_meter("errors", &registry);

    assert!(Arc::ptr_eq(&requests, &again));
    assert_eq!(again.count(), 4);
    assert_eq!(errors.count(), 0);
    assert_eq!(arbiter.len(), 2);

    arbiter.tick_meters();
    assert!(again.rate1() > 0.0);
    Ok(())
}

#[test]
fn test_global_get_or_register_meter() {
    let registry = MapRegistry::default();
    let first = get_or_register_meter("jobs", &registry);
    let second = get_or_register_meter("jobs", &registry);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_new_registered_meter_stores_by_name() -> Result<()> {
    init_test_logger();
    let arbiter = Arbiter::new(Config::default())?;
    let registry = MapRegistry::default();

    let requests = arbiter.new_registered_meter("requests", &registry);
    requests.mark(5);
    let stored = registry.get("requests").expect("meter was registered");
    assert!(Arc::ptr_eq(&requests, &stored));
    assert_eq!(arbiter.len(), 1);

    arbiter.tick_meters();
    assert!((stored.rate1() - 1.0).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_new_registered_meter_keeps_existing_name() -> Result<()> {
    init_test_logger();
    let arbiter = Arbiter::new(Config::default())?;
    let registry = MapRegistry::default();

    let first = arbiter.new_registered_meter("jobs", &registry);
    let second = arbiter.new_registered_meter("jobs", &registry);

    // The duplicate is still a live meter, but the name keeps the first one.
    assert!(!Arc::ptr_eq(&first, &second));
    let stored = registry.get("jobs").expect("meter was registered");
    assert!(Arc::ptr_eq(&first, &stored));
    second.mark(2);
    assert_eq!(second.count(), 2);
    assert_eq!(first.count(), 0);
    assert_eq!(arbiter.len(), 2);

    assert!(matches!(
        registry.register("jobs", second),
        Err(Error::DuplicateMeter { name }) if name == "jobs"
    ));
    Ok(())
}

#[test]
fn test_global_new_registered_meter() {
    let registry = MapRegistry::default();
    let meter = new_registered_meter("uploads", &registry);
    let stored = registry.get("uploads").expect("meter was registered");
    assert!(Arc::ptr_eq(&meter, &stored));
    assert!(Arbiter::global().is_running());
}

#[cfg(feature = "tracing")]
#[test]
fn test_tick_rounds_with_tracing_subscriber() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    let arbiter = Arbiter::new(Config::default())?;
    let meter = arbiter.new_meter();
    meter.mark(1);
    arbiter.tick_meters();
    arbiter.tick_meters();
    assert_eq!(arbiter.tick_rounds(), 2);
    Ok(())
}
