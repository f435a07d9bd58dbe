// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

#[derive(Debug)]
/// Represents errors that can occur while configuring or driving an [`Arbiter`](crate::Arbiter).
///
/// Recording events and reading rates never fail. Mutating a snapshot is a
/// programming error and panics instead of returning one of these variants.
pub enum Error {
    /// The configured tick interval cannot drive a decaying average
    InvalidTickInterval {
        /// The rejected interval
        interval: Duration,
    },
    /// The arbiter's background driver is already running
    AlreadyStarted,
    /// The arbiter's background driver is not running
    NotStarted,
    /// Error when the driver thread or its runtime could not be created
    Runtime {
        /// Additional context about the error
        details: String,
        /// The underlying I/O error
        source: std::io::Error,
    },
    /// Error when joining the driver thread fails
    Join {
        /// Panic payload rendered as text, when available
        details: String,
    },
    /// A registry already holds a meter under this name
    DuplicateMeter {
        /// The name that was already taken
        name: String,
    },
}

/// Implementation of the Display trait for Error enum.
///
/// Provides human-readable error messages for each error variant.
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTickInterval { interval } => {
                write!(f, "Invalid tick interval {interval:?}: must be non-zero")
            }
            Error::AlreadyStarted => write!(f, "Arbiter driver is already running"),
            Error::NotStarted => write!(f, "Arbiter driver is not running"),
            Error::Runtime { details, source } => {
                write!(f, "Failed to start arbiter driver: {details}: {source}")
            }
            Error::Join { details } => {
                write!(f, "Failed to join arbiter driver thread: {details}")
            }
            Error::DuplicateMeter { name } => {
                write!(f, "A meter named {name:?} is already registered")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Runtime { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A Result type specialized for rsmeter operations.
///
/// ```rust
/// use rsmeter::{Arbiter, Config, Result};
///
/// fn build() -> Result<Arbiter> {
///     Arbiter::new(Config::default())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
