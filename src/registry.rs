// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use log::warn;

use crate::arbiter::Arbiter;
use crate::error::Result;
use crate::meter::Meter;

/// Name-indexed storage for meters.
///
/// Implementations decide how names are stored and exported. This crate
/// relies on two operations:
///
/// - `get_or_insert_with` calls `create` at most once per name, and only
///   when no meter is stored under it.
/// - `register` stores a meter under a free name and fails with
///   [`Error::DuplicateMeter`](crate::Error::DuplicateMeter) when the name is
///   taken, leaving the stored meter in place.
pub trait MeterRegistry {
    fn get_or_insert_with<F>(&self, name: &str, create: F) -> Arc<dyn Meter>
    where
        F: FnOnce() -> Arc<dyn Meter>;

    fn register(&self, name: &str, meter: Arc<dyn Meter>) -> Result<()>;
}

/// Returns the meter registered under `name`, creating it with
/// [`new_meter`](crate::new_meter) on the process-wide arbiter if missing.
pub fn get_or_register_meter<R: MeterRegistry>(name: &str, registry: &R) -> Arc<dyn Meter> {
    registry.get_or_insert_with(name, crate::new_meter)
}

/// Creates a meter with [`new_meter`](crate::new_meter) and registers it
/// under `name`.
///
/// The new meter is returned even when the name is already taken; it is
/// ticked but not reachable through the registry.
pub fn new_registered_meter<R: MeterRegistry>(name: &str, registry: &R) -> Arc<dyn Meter> {
    register_new(name, registry, crate::new_meter())
}

fn register_new<R: MeterRegistry>(
    name: &str,
    registry: &R,
    meter: Arc<dyn Meter>,
) -> Arc<dyn Meter> {
    if let Err(e) = registry.register(name, Arc::clone(&meter)) {
        warn!("Meter {:?} was not registered: {}", name, e);
    }
    meter
}

impl Arbiter {
    /// Returns the meter registered under `name`, creating and registering
    /// it with this arbiter if missing.
    pub fn get_or_register_meter<R>(&self, name: &str, registry: &R) -> Arc<dyn Meter>
    where
        R: MeterRegistry,
    {
        registry.get_or_insert_with(name, || self.new_meter())
    }

    /// Creates a meter ticked by this arbiter and registers it under `name`.
    pub fn new_registered_meter<R>(&self, name: &str, registry: &R) -> Arc<dyn Meter>
    where
        R: MeterRegistry,
    {
        register_new(name, registry, self.new_meter())
    }
}
