//! JSON exporter for run replay.
//!
//! Exports one frame per fix plus the outline of every captured cell, so a
//! map viewer can replay the run and shade the territory.

use runnit_core::territory::{CellId, H3Indexer};
use runnit_core::FixOutcome;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single frame of simulation data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimFrame {
    /// Seconds since the scenario started
    pub time_sec: f64,

    /// Fix position as reported by the noisy GPS
    pub lat: f64,
    pub lng: f64,

    /// Filter verdict for this fix
    pub outcome: String,

    /// Run statistics after the fix
    pub distance_km: f64,
    pub duration_sec: u64,

    /// Cell captured by this fix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured: Option<CellId>,
}

/// Short label for a filter verdict.
pub fn outcome_label(outcome: &FixOutcome) -> &'static str {
    match outcome {
        FixOutcome::Ignored => "ignored",
        FixOutcome::LowAccuracy { .. } => "low_accuracy",
        FixOutcome::Reference => "reference",
        FixOutcome::Jitter { .. } => "jitter",
        FixOutcome::Teleport { .. } => "teleport",
        FixOutcome::Accepted { .. } => "accepted",
    }
}

/// Outline of a captured cell as `[lat, lng]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellOutline {
    pub cell: CellId,
    /// The backend never confirmed this capture
    pub unconfirmed: bool,
    pub boundary: Vec<[f64; 2]>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Captured territory
    pub cells: Vec<CellOutline>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            cells: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Adds the outline of a captured cell. Cells H3 cannot decode are skipped.
    pub fn add_cell(&mut self, indexer: &H3Indexer, cell: CellId, unconfirmed: bool) {
        let Ok(polygon) = indexer.boundary_polygon(cell) else {
            return;
        };
        let boundary = polygon
            .exterior()
            .points()
            .map(|p| [p.y(), p.x()])
            .collect();
        self.cells.push(CellOutline {
            cell,
            unconfirmed,
            boundary,
        });
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
