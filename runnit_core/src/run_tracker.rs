//! The "RUN" Engine - lifecycle state machine and filtered statistics.
//!
//! Turns a noisy stream of GPS fixes into trustworthy run statistics:
//! 1. Accuracy gating (drop fixes the receiver itself distrusts)
//! 2. Jitter gating (ignore sub-3 m wobble while standing still)
//! 3. Teleport gating (ignore >100 m jumps between consecutive fixes)
//! 4. Accumulation (distance, speed, pace, elevation, route)
//!
//! The tracker is Sans-IO: it never reads a clock or spawns a timer. The
//! owner calls [`RunTracker::tick`] once per second and
//! [`RunTracker::ingest`] for every fix, from one sequential context.

use crate::geodesy::{estimate_calories, haversine_km, pace_min_per_km, speed_kmh};
use crate::territory::CellId;
use runnit_env::Coordinate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the RunTracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Fixes with a worse horizontal accuracy are dropped (default: 30 m)
    pub max_accuracy_m: f64,

    /// Segments shorter than this are jitter (default: 3 m)
    pub min_segment_m: f64,

    /// Segments longer than this are GPS glitches (default: 100 m)
    pub max_segment_m: f64,

    /// Segment paces at or above this are ignored for current pace (default: 30 min/km)
    pub max_plausible_pace: f64,

    /// Body weight for the calorie estimate (default: 70 kg)
    pub weight_kg: f64,

    /// Statistics refresh period (default: 1000 ms)
    pub tick_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 30.0,
            min_segment_m: 3.0,
            max_segment_m: 100.0,
            max_plausible_pace: 30.0,
            weight_kg: crate::geodesy::DEFAULT_WEIGHT_KG,
            tick_interval_ms: 1000,
        }
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Finished,
}

impl RunState {
    /// True while a run is live (running or paused).
    pub fn is_live(&self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Aggregate statistics for one run.
///
/// `Default` is the zeroed state a fresh run starts from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Cumulative distance over accepted segments (km)
    pub distance_km: f64,

    /// Elapsed running time, paused time excluded (s)
    pub duration_sec: u64,

    /// Pace over the most recent plausible segment (min/km)
    pub current_pace: f64,

    /// Pace over the whole run (min/km)
    pub average_pace: f64,

    /// Speed over the most recent segment (km/h)
    pub current_speed: f64,

    /// Highest segment speed seen (km/h)
    pub max_speed: f64,

    /// Speed over the whole run (km/h)
    pub average_speed: f64,

    /// Cumulative energy estimate (kcal)
    pub calories: f64,

    /// Sum of positive altitude deltas (m)
    pub elevation_gain: f64,

    /// Accepted fixes in order
    pub route: Vec<Coordinate>,

    /// Cells captured during this run, in capture order
    pub cells_captured: Vec<CellId>,

    /// Run start (Unix milliseconds)
    pub started_at: Option<u64>,
}

/// What the filter decided about a single fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixOutcome {
    /// Tracker is not running; fix ignored
    Ignored,
    /// Horizontal accuracy worse than the configured limit
    LowAccuracy { accuracy_m: f64 },
    /// First fix of the run, recorded as the reference point
    Reference,
    /// Too close to the reference point
    Jitter { segment_m: f64 },
    /// Implausibly far from the reference point
    Teleport { segment_m: f64 },
    /// Segment accepted into the statistics
    Accepted { segment_m: f64 },
}

impl FixOutcome {
    /// True when the fix became the new reference point.
    ///
    /// Only these fixes are forwarded to the territory detector.
    pub fn advanced_reference(&self) -> bool {
        matches!(self, FixOutcome::Reference | FixOutcome::Accepted { .. })
    }
}

// ============================================================================
// RUN TRACKER (The Engine)
// ============================================================================

/// The run lifecycle state machine.
#[derive(Debug, Clone)]
pub struct RunTracker {
    config: TrackerConfig,
    state: RunState,
    stats: RunStats,

    /// Last accepted fix (segment origin)
    reference: Option<Coordinate>,

    /// Running time accumulated by ticks
    elapsed_ms: u64,

    /// Incremented on every start and reset
    epoch: u64,
}

impl RunTracker {
    /// Create a new RunTracker with the given configuration.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: RunState::Idle,
            stats: RunStats::default(),
            reference: None,
            elapsed_ms: 0,
            epoch: 0,
        }
    }

    /// Create a new RunTracker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TrackerConfig::default())
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Current run epoch. Results produced for an older epoch are stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Last accepted fix, if any.
    pub fn reference_point(&self) -> Option<&Coordinate> {
        self.reference.as_ref()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Idle → Running. Zeroes the statistics and returns the new epoch.
    pub fn start(&mut self, started_at_ms: u64) -> Result<u64, TrackerError> {
        self.require("start", self.state == RunState::Idle)?;

        self.epoch += 1;
        self.stats = RunStats {
            started_at: Some(started_at_ms),
            ..RunStats::default()
        };
        self.reference = None;
        self.elapsed_ms = 0;
        self.state = RunState::Running;
        info!(epoch = self.epoch, "run started");
        Ok(self.epoch)
    }

    /// Running → Paused. Fixes and ticks are ignored until resumed.
    pub fn pause(&mut self) -> Result<(), TrackerError> {
        self.require("pause", self.state == RunState::Running)?;
        self.state = RunState::Paused;
        info!(epoch = self.epoch, "run paused");
        Ok(())
    }

    /// Paused → Running.
    pub fn resume(&mut self) -> Result<(), TrackerError> {
        self.require("resume", self.state == RunState::Paused)?;
        self.state = RunState::Running;
        info!(epoch = self.epoch, "run resumed");
        Ok(())
    }

    /// Running|Paused → Finished. Returns the frozen statistics.
    ///
    /// Bumps the epoch so late results cannot touch the frozen run.
    pub fn stop(&mut self) -> Result<RunStats, TrackerError> {
        self.require("stop", self.state.is_live())?;
        self.epoch += 1;
        self.state = RunState::Finished;
        info!(
            epoch = self.epoch,
            distance_km = self.stats.distance_km,
            duration_sec = self.stats.duration_sec,
            "run finished"
        );
        Ok(self.stats.clone())
    }

    /// Any → Idle. Zeroes everything and invalidates the current epoch.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.state = RunState::Idle;
        self.stats = RunStats::default();
        self.reference = None;
        self.elapsed_ms = 0;
        info!(epoch = self.epoch, "run reset");
    }

    fn require(&self, op: &'static str, allowed: bool) -> Result<(), TrackerError> {
        if allowed {
            Ok(())
        } else {
            Err(TrackerError::InvalidTransition { op, from: self.state })
        }
    }

    // ========================================================================
    // FIX INGESTION
    // ========================================================================

    /// Run one fix through the acceptance filter.
    ///
    /// Rejected fixes never touch the statistics or the reference point.
    pub fn ingest(&mut self, fix: Coordinate) -> FixOutcome {
        if self.state != RunState::Running {
            return FixOutcome::Ignored;
        }

        if let Some(accuracy_m) = fix.accuracy {
            if accuracy_m > self.config.max_accuracy_m {
                debug!(accuracy_m, "dropping low-accuracy fix");
                return FixOutcome::LowAccuracy { accuracy_m };
            }
        }

        let last = match self.reference {
            Some(last) => last,
            None => {
                self.stats.route.push(fix);
                self.reference = Some(fix);
                return FixOutcome::Reference;
            }
        };

        let segment_km = haversine_km(last.latitude, last.longitude, fix.latitude, fix.longitude);
        let segment_m = segment_km * 1000.0;

        if segment_m < self.config.min_segment_m {
            debug!(segment_m, "dropping jitter fix");
            return FixOutcome::Jitter { segment_m };
        }

        if segment_m > self.config.max_segment_m {
            warn!(segment_m, "GPS teleportation detected, skipping fix");
            return FixOutcome::Teleport { segment_m };
        }

        let elapsed_sec = fix.timestamp.saturating_sub(last.timestamp) as f64 / 1000.0;

        let instant_speed = match fix.speed {
            Some(mps) if mps >= 0.0 => mps * 3.6,
            _ => speed_kmh(segment_km, elapsed_sec),
        };

        let segment_pace = pace_min_per_km(segment_km, elapsed_sec);
        if segment_pace > 0.0 && segment_pace < self.config.max_plausible_pace {
            self.stats.current_pace = segment_pace;
        }

        if let (Some(alt), Some(prev_alt)) = (fix.altitude, last.altitude) {
            let climb = alt - prev_alt;
            if climb > 0.0 {
                self.stats.elevation_gain += climb;
            }
        }

        self.stats.distance_km += segment_km;
        self.stats.current_speed = instant_speed;
        self.stats.max_speed = self.stats.max_speed.max(instant_speed);
        self.stats.route.push(fix);
        self.reference = Some(fix);

        FixOutcome::Accepted { segment_m }
    }

    /// Credit a captured cell to this run's statistics (deduplicated).
    pub fn record_capture(&mut self, cell: CellId) {
        if self.state.is_live() && !self.stats.cells_captured.contains(&cell) {
            self.stats.cells_captured.push(cell);
        }
    }

    // ========================================================================
    // PERIODIC TICK
    // ========================================================================

    /// Advance the run clock by one tick interval and refresh averages.
    ///
    /// Returns false (and does nothing) unless the run is running.
    pub fn tick(&mut self) -> bool {
        if self.state != RunState::Running {
            return false;
        }

        self.elapsed_ms += self.config.tick_interval_ms;
        self.stats.duration_sec = self.elapsed_ms / 1000;

        let duration = self.elapsed_ms as f64 / 1000.0;
        self.stats.average_pace = pace_min_per_km(self.stats.distance_km, duration);
        self.stats.average_speed = speed_kmh(self.stats.distance_km, duration);

        // A drop in average speed can step the MET table down; calories never shrink.
        let calories = estimate_calories(
            duration / 60.0,
            self.stats.average_speed,
            self.config.weight_kg,
        );
        self.stats.calories = self.stats.calories.max(calories);
        true
    }
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur during run lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid transition: cannot {op} while {from}")]
    InvalidTransition { op: &'static str, from: RunState },
}

// ============================================================================
// TESTS
// ============================================================================
