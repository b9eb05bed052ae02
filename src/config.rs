//! Configuration management for harness runs
//!
//! This module provides runtime configuration loading from JSON files so
//! experiments can be re-tuned without recompilation. Table size, run
//! duration, delay plans and fairness thresholds all live here. The
//! thresholds are calibration constants for one machine's scheduler, not
//! guarantees of the protocol.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::TableError;
use crate::strategy::DelayPlan;
use crate::table::MIN_SEATS;

/// Upper bound for `run_ms` and `join_grace_ms`: one day.
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1_000;

/// Complete harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub delays: DelayPlan,
    #[serde(default)]
    pub fairness: FairnessConfig,
    /// Emit every synchronization event through `tracing`
    #[serde(default)]
    pub trace_events: bool,
}

/// Table size and run bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Number of philosophers (and forks)
    pub seats: usize,
    /// Wall-clock run duration in milliseconds
    pub run_ms: u64,
    /// Time workers get to stop after the run ends
    pub join_grace_ms: u64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            seats: 5,
            run_ms: 2_000,
            join_grace_ms: 2_000,
        }
    }
}

impl TableConfig {
    pub fn run_duration(&self) -> Duration {
        Duration::from_millis(self.run_ms)
    }

    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }
}

/// Thresholds used when judging scenario outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairnessConfig {
    /// `max_meals >= max_ratio * min_meals` counts as unfair
    pub max_ratio: f64,
    /// Meals the busiest philosopher must exceed beside a slow neighbour
    pub slow_meal_floor: u64,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            max_ratio: 1.5,
            slow_meal_floor: 1_000,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or the defaults if the file is missing or
    /// the JSON is invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Reject values no run can honour.
    pub fn validate(&self) -> Result<(), TableError> {
        if self.table.seats < MIN_SEATS {
            return Err(TableError::InvalidConfig {
                reason: format!(
                    "seats must be at least {} (got {})",
                    MIN_SEATS, self.table.seats
                ),
            });
        }
        if self.table.run_ms == 0 {
            return Err(TableError::InvalidConfig {
                reason: "run_ms must be greater than 0".to_string(),
            });
        }
        for (name, value) in [
            ("run_ms", self.table.run_ms),
            ("join_grace_ms", self.table.join_grace_ms),
        ] {
            if value > MAX_DURATION_MS {
                return Err(TableError::InvalidConfig {
                    reason: format!(
                        "{} must be at most {} (got {})",
                        name, MAX_DURATION_MS, value
                    ),
                });
            }
        }
        if !self.fairness.max_ratio.is_finite() || self.fairness.max_ratio < 1.0 {
            return Err(TableError::InvalidConfig {
                reason: format!(
                    "max_ratio must be a finite number >= 1.0 (got {})",
                    self.fairness.max_ratio
                ),
            });
        }
        Ok(())
    }
}
