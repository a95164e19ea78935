//! Run Engine - composes the Run Tracker and the Capture Detector.
//!
//! Synchronous and clock-free: the caller supplies fixes, ticks and
//! receipts in order. [`crate::session::RunSession`] drives it from a Tokio
//! task; the simulator drives it directly against a virtual clock.
//!
//! # Data Flow
//!
//! ```text
//!   fix ──► RunTracker::ingest ──(Reference | Accepted)──► CaptureDetector
//!                 │                                              │
//!                 ▼                                              ▼
//!             RunStats                              CapturedCellEvent ──► confirmer
//!                                                                │
//!   receipt(epoch) ───────── epoch guard ──────────► apply_receipt
//! ```

use crate::record::RunSummary;
use crate::run_tracker::{FixOutcome, RunState, RunStats, RunTracker, TrackerConfig, TrackerError};
use crate::territory::{
    CaptureConfig, CaptureDetector, CaptureError, CaptureReceipt, CapturedCellEvent, CellId,
    CellIndexer, H3Indexer, TerritoryStats,
};
use runnit_env::Coordinate;
use tracing::debug;

/// Result of feeding one fix to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FixReport {
    pub outcome: FixOutcome,
    pub capture: Option<CapturedCellEvent>,
}

/// One run's tracker and detector, reset and started together.
#[derive(Debug)]
pub struct RunEngine<I = H3Indexer> {
    tracker: RunTracker,
    detector: CaptureDetector<I>,
}

impl RunEngine<H3Indexer> {
    pub fn new(tracker: TrackerConfig, capture: CaptureConfig) -> Self {
        Self {
            tracker: RunTracker::new(tracker),
            detector: CaptureDetector::new(capture),
        }
    }
}

impl Default for RunEngine<H3Indexer> {
    fn default() -> Self {
        Self::new(TrackerConfig::default(), CaptureConfig::default())
    }
}

impl<I: CellIndexer> RunEngine<I> {
    pub fn with_indexer(tracker: TrackerConfig, capture: CaptureConfig, indexer: I) -> Self {
        Self {
            tracker: RunTracker::new(tracker),
            detector: CaptureDetector::with_indexer(capture, indexer),
        }
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    pub fn detector(&self) -> &CaptureDetector<I> {
        &self.detector
    }

    pub fn state(&self) -> RunState {
        self.tracker.state()
    }

    pub fn epoch(&self) -> u64 {
        self.tracker.epoch()
    }

    pub fn stats(&self) -> &RunStats {
        self.tracker.stats()
    }

    pub fn territory(&self) -> &TerritoryStats {
        self.detector.stats()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            stats: self.tracker.stats().clone(),
            territory: self.detector.stats().clone(),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Starts a fresh run with empty territory. Returns the run epoch.
    pub fn start(&mut self, started_at_ms: u64) -> Result<u64, TrackerError> {
        let epoch = self.tracker.start(started_at_ms)?;
        self.detector.reset();
        Ok(epoch)
    }

    pub fn pause(&mut self) -> Result<(), TrackerError> {
        self.tracker.pause()
    }

    pub fn resume(&mut self) -> Result<(), TrackerError> {
        self.tracker.resume()
    }

    pub fn stop(&mut self) -> Result<RunSummary, TrackerError> {
        let stats = self.tracker.stop()?;
        Ok(RunSummary {
            stats,
            territory: self.detector.stats().clone(),
        })
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
        self.detector.reset();
    }

    // ========================================================================
    // INPUTS
    // ========================================================================

    /// Filters one fix and forwards it to the detector if it was accepted.
    ///
    /// The fix timestamp is the detector's notion of "now". Fixes outside
    /// the WGS84 range are refused before they reach the tracker.
    pub fn on_fix(&mut self, fix: Coordinate) -> Result<FixReport, CaptureError> {
        if !valid_position(&fix) {
            return Err(CaptureError::InvalidCoordinates(format!(
                "({}, {})",
                fix.latitude, fix.longitude
            )));
        }

        let outcome = self.tracker.ingest(fix);
        if !outcome.advanced_reference() {
            return Ok(FixReport { outcome, capture: None });
        }

        let capture = self
            .detector
            .on_location_update(fix.latitude, fix.longitude, fix.timestamp)?;
        if let Some(event) = &capture {
            self.tracker.record_capture(event.cell_id);
        }

        Ok(FixReport { outcome, capture })
    }

    pub fn tick(&mut self) -> bool {
        self.tracker.tick()
    }

    pub fn dismiss_capture(&mut self) -> Option<CapturedCellEvent> {
        self.detector.dismiss_capture()
    }

    /// Applies a confirmation receipt issued during `epoch`.
    ///
    /// Returns false if the receipt is stale or names an unknown cell.
    pub fn apply_receipt(&mut self, epoch: u64, cell: CellId, receipt: &CaptureReceipt) -> bool {
        if epoch != self.epoch() {
            debug!(cell = %cell, epoch, current = self.epoch(), "discarding stale receipt");
            return false;
        }
        self.detector.apply_receipt(cell, receipt)
    }

    /// Records a capture whose confirmation was abandoned during `epoch`.
    pub fn mark_unconfirmed(&mut self, epoch: u64, cell: CellId) -> bool {
        if epoch != self.epoch() {
            debug!(cell = %cell, epoch, current = self.epoch(), "discarding stale confirmation failure");
            return false;
        }
        self.detector.mark_unconfirmed(cell);
        true
    }
}

fn valid_position(fix: &Coordinate) -> bool {
    fix.latitude.is_finite()
        && fix.longitude.is_finite()
        && (-90.0..=90.0).contains(&fix.latitude)
        && (-180.0..=180.0).contains(&fix.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    const M_PER_DEG_LAT: f64 = 111_194.926_644_558_73;

    /// Fix `meters` north of (lat, 0).
    fn fix_at(base_lat: f64, meters: f64, timestamp: u64) -> Coordinate {
        Coordinate::new(base_lat + meters / M_PER_DEG_LAT, 0.0, timestamp).with_accuracy(5.0)
    }

    /// Every fix lands in the same cell.
    struct OneCell;

    impl CellIndexer for OneCell {
        fn cell_for(&self, _lat: f64, _lng: f64) -> Result<CellId, CaptureError> {
            Ok(CellId::from_raw(1))
        }
    }

    fn one_cell_engine() -> RunEngine<OneCell> {
        RunEngine::with_indexer(TrackerConfig::default(), CaptureConfig::default(), OneCell)
    }

    #[test]
    fn test_accepted_fixes_drive_capture() {
        let mut engine = one_cell_engine();
        engine.start(0).unwrap();

        let first = engine.on_fix(fix_at(10.0, 0.0, 0)).unwrap();
        assert_eq!(first.outcome, FixOutcome::Reference);

        engine.on_fix(fix_at(10.0, 5.0, 1_000)).unwrap();
        let report = engine.on_fix(fix_at(10.0, 10.0, 2_000)).unwrap();

        let event = report.capture.unwrap();
        assert_eq!(event.cell_id, CellId::from_raw(1));
        assert_eq!(engine.stats().cells_captured, vec![CellId::from_raw(1)]);
        assert_eq!(engine.territory().new_cells, 1);
    }

    #[test]
    fn test_rejected_fixes_never_reach_detector() {
        let mut engine = one_cell_engine();
        engine.start(0).unwrap();
        engine.on_fix(fix_at(10.0, 0.0, 0)).unwrap();

        // Jitter, low accuracy and a teleport, all past the dwell time
        let jitter = engine.on_fix(fix_at(10.0, 1.0, 3_000)).unwrap();
        assert!(matches!(jitter.outcome, FixOutcome::Jitter { .. }));
        let noisy = engine.on_fix(fix_at(10.0, 10.0, 4_000).with_accuracy(50.0)).unwrap();
        assert!(matches!(noisy.outcome, FixOutcome::LowAccuracy { .. }));
        let jump = engine.on_fix(fix_at(10.0, 500.0, 5_000)).unwrap();
        assert!(matches!(jump.outcome, FixOutcome::Teleport { .. }));

        assert!(engine.territory().cells_captured.is_empty());
    }

    #[test]
    fn test_paused_run_ignores_fixes() {
        let mut engine = one_cell_engine();
        engine.start(0).unwrap();
        engine.on_fix(fix_at(10.0, 0.0, 0)).unwrap();
        engine.pause().unwrap();

        let report = engine.on_fix(fix_at(10.0, 10.0, 5_000)).unwrap();
        assert_eq!(report.outcome, FixOutcome::Ignored);
        assert!(report.capture.is_none());
        assert!(!engine.tick());
    }

    #[test]
    fn test_invalid_coordinates_refused() {
        let mut engine = RunEngine::default();
        engine.start(0).unwrap();

        let err = engine.on_fix(Coordinate::new(f64::NAN, 0.0, 0)).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidCoordinates(_)));
        assert!(engine.on_fix(Coordinate::new(91.0, 0.0, 0)).is_err());
        assert!(engine.stats().route.is_empty());
    }

    #[test]
    fn test_stale_receipt_is_discarded() {
        let mut engine = one_cell_engine();
        let epoch = engine.start(0).unwrap();
        engine.on_fix(fix_at(10.0, 0.0, 0)).unwrap();
        engine.on_fix(fix_at(10.0, 10.0, 2_000)).unwrap();

        engine.reset();
        let fresh = engine.start(10_000).unwrap();
        assert_ne!(epoch, fresh);

        let stolen = CaptureReceipt { previous_owner: Some("rival".to_string()) };
        assert!(!engine.apply_receipt(epoch, CellId::from_raw(1), &stolen));
        assert!(!engine.mark_unconfirmed(epoch, CellId::from_raw(1)));
        assert_eq!(engine.territory(), &TerritoryStats::default());
    }

    #[test]
    fn test_current_receipt_marks_stolen() {
        let mut engine = one_cell_engine();
        let epoch = engine.start(0).unwrap();
        engine.on_fix(fix_at(10.0, 0.0, 0)).unwrap();
        engine.on_fix(fix_at(10.0, 10.0, 2_000)).unwrap();

        let stolen = CaptureReceipt { previous_owner: Some("rival".to_string()) };
        assert!(engine.apply_receipt(epoch, CellId::from_raw(1), &stolen));
        assert_eq!(engine.territory().stolen_cells, 1);
        assert_eq!(engine.territory().new_cells, 0);
    }

    #[test]
    fn test_stop_freezes_summary_and_epoch() {
        let mut engine = one_cell_engine();
        let epoch = engine.start(0).unwrap();
        engine.on_fix(fix_at(10.0, 0.0, 0)).unwrap();
        engine.on_fix(fix_at(10.0, 10.0, 2_000)).unwrap();
        engine.tick();

        let summary = engine.stop().unwrap();
        assert_eq!(summary.stats.duration_sec, 1);
        assert_eq!(summary.territory.cells_captured.len(), 1);

        // A receipt for the finished run arrives late
        let stolen = CaptureReceipt { previous_owner: Some("rival".to_string()) };
        assert!(!engine.apply_receipt(epoch, CellId::from_raw(1), &stolen));
        assert_eq!(engine.summary(), summary);
    }

    #[test]
    fn test_reset_matches_fresh_engine() {
        let mut engine = one_cell_engine();
        engine.start(0).unwrap();
        engine.on_fix(fix_at(10.0, 0.0, 0)).unwrap();
        engine.on_fix(fix_at(10.0, 10.0, 2_000)).unwrap();
        engine.tick();

        engine.reset();
        let fresh = one_cell_engine();
        assert_eq!(engine.state(), RunState::Idle);
        assert_eq!(engine.stats(), fresh.stats());
        assert_eq!(engine.territory(), fresh.territory());
        assert!(engine.dismiss_capture().is_none());
    }
}
