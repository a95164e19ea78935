//! Finished-run records and the persistence collaborator.

use crate::rewards::run_xp;
use crate::run_tracker::RunStats;
use crate::territory::{CellId, TerritoryStats};
use async_trait::async_trait;
use runnit_env::{Coordinate, EnvError, RunId};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A finalized run as handed to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub distance_km: f64,
    pub duration_sec: u64,
    /// min/km
    pub avg_pace: f64,
    /// km/h
    pub avg_speed: f64,
    /// km/h
    pub max_speed: f64,
    pub calories: f64,
    pub elevation_gain: f64,
    pub route: Vec<Coordinate>,
    pub cells_captured: Vec<CellId>,
    /// Unix milliseconds
    pub started_at: u64,
    /// Unix milliseconds
    pub finished_at: u64,
    pub group_run: bool,
    pub xp_earned: u64,
}

/// Frozen result of one run, returned when the run stops.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub stats: RunStats,
    pub territory: TerritoryStats,
}

impl RunSummary {
    pub fn xp(&self, group_run: bool) -> u64 {
        run_xp(&self.stats, &self.territory, group_run)
    }

    /// Builds the record the persistence layer stores.
    pub fn to_record(&self, id: RunId, finished_at_ms: u64, group_run: bool) -> RunRecord {
        RunRecord {
            id,
            distance_km: self.stats.distance_km,
            duration_sec: self.stats.duration_sec,
            avg_pace: self.stats.average_pace,
            avg_speed: self.stats.average_speed,
            max_speed: self.stats.max_speed,
            calories: self.stats.calories,
            elevation_gain: self.stats.elevation_gain,
            route: self.stats.route.clone(),
            cells_captured: self.territory.cells_captured.clone(),
            started_at: self.stats.started_at.unwrap_or(finished_at_ms),
            finished_at: finished_at_ms,
            group_run,
            xp_earned: self.xp(group_run),
        }
    }
}

/// Storage for finished runs and profile totals.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_run(&self, record: &RunRecord) -> Result<(), EnvError>;

    /// Adds a run's distance and XP to the runner's lifetime totals.
    async fn update_profile(&self, distance_km: f64, xp: u64) -> Result<(), EnvError>;
}

/// Saves the run, then credits the profile. Returns the stored record.
pub async fn persist_run<S: RunStore + ?Sized>(
    store: &S,
    summary: &RunSummary,
    id: RunId,
    finished_at_ms: u64,
    group_run: bool,
) -> Result<RunRecord, EnvError> {
    let record = summary.to_record(id, finished_at_ms, group_run);
    store.save_run(&record).await?;
    store.update_profile(record.distance_km, record.xp_earned).await?;

    info!(run = %id, xp = record.xp_earned, cells = record.cells_captured.len(), "run persisted");
    Ok(record)
}
