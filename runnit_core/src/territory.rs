//! The "TERRITORY" Engine - hexagonal cell capture with dwell discipline.
//!
//! Each accepted fix is mapped to an H3 cell. A cell is captured once the
//! runner has stayed inside it for the dwell time, subject to:
//! - a per-run captured set (a cell is awarded at most once per run)
//! - a global cooldown between captures (boundary oscillation guard)
//!
//! Captures are local-first: the event is queued and counted immediately,
//! confirmation with the backend happens elsewhere and can only refine the
//! "new" / "stolen" flags through [`CaptureDetector::apply_receipt`].

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use tracing::info;

// ============================================================================
// CELL IDENTIFIER
// ============================================================================

/// Opaque territory cell key.
///
/// Rendered (and serialized) as the lowercase hex string H3 uses for its
/// indexes. The engine only ever compares these for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CellId(u64);

impl CellId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<CellIndex> for CellId {
    fn from(cell: CellIndex) -> Self {
        Self(u64::from(cell))
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for CellId {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| CaptureError::InvalidCellId(s.to_string()))
    }
}

impl From<CellId> for String {
    fn from(cell: CellId) -> Self {
        cell.to_string()
    }
}

impl TryFrom<String> for CellId {
    type Error = CaptureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// GRID INDEXING
// ============================================================================

/// Maps a WGS84 position to a territory cell.
pub trait CellIndexer: Send + Sync + 'static {
    fn cell_for(&self, lat: f64, lng: f64) -> Result<CellId, CaptureError>;
}

/// H3 grid indexer at a fixed resolution.
///
/// Resolution 9 cells average ~0.1 km², about one city block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H3Indexer {
    resolution: Resolution,
}

impl H3Indexer {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Polygon outline of a cell for map rendering (x = lng, y = lat).
    ///
    /// The ring is closed. Not used by the capture logic itself.
    pub fn boundary_polygon(&self, cell: CellId) -> Result<geo::Polygon<f64>, CaptureError> {
        let index = CellIndex::try_from(cell.raw())
            .map_err(|e| CaptureError::InvalidCellId(format!("{cell}: {e:?}")))?;

        let ring: Vec<(f64, f64)> = index
            .boundary()
            .iter()
            .map(|vertex| (vertex.lng(), vertex.lat()))
            .collect();

        Ok(geo::Polygon::new(geo::LineString::from(ring), vec![]))
    }
}

impl Default for H3Indexer {
    fn default() -> Self {
        Self::new(Resolution::Nine)
    }
}

impl CellIndexer for H3Indexer {
    fn cell_for(&self, lat: f64, lng: f64) -> Result<CellId, CaptureError> {
        let latlng = LatLng::new(lat, lng)
            .map_err(|e| CaptureError::InvalidCoordinates(format!("{:?}", e)))?;
        Ok(latlng.to_cell(self.resolution).into())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the CaptureDetector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// H3 resolution for territory cells (default: Resolution::Nine ~0.1 km²)
    pub resolution: Resolution,

    /// Continuous time inside a cell before it can be captured (default: 2000 ms)
    pub dwell_ms: u64,

    /// Minimum gap between two captures (default: 1000 ms)
    pub cooldown_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::Nine,
            dwell_ms: 2000,
            cooldown_ms: 1000,
        }
    }
}

// ============================================================================
// EVENTS & STATS
// ============================================================================

/// One successful capture, queued for the UI toast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedCellEvent {
    pub cell_id: CellId,
    pub lat: f64,
    pub lng: f64,
    /// Capture time (Unix milliseconds)
    pub timestamp: u64,
    /// First time this cell is owned by the runner
    pub is_new: bool,
    /// Cell was taken from another owner
    pub was_stolen: bool,
}

/// Territory aggregate for one run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TerritoryStats {
    /// Captured cells in capture order
    pub cells_captured: Vec<CellId>,
    pub new_cells: u32,
    pub stolen_cells: u32,
    /// Distinct cells entered, captured or not
    pub cells_visited: u32,
    pub last_captured: Option<CapturedCellEvent>,
    /// Captures the backend never confirmed; reconciled after the run
    pub unconfirmed: Vec<CellId>,
}

/// Backend answer to a capture confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureReceipt {
    /// Owner the cell was taken from, if any
    pub previous_owner: Option<String>,
}

impl CaptureReceipt {
    pub fn was_stolen(&self) -> bool {
        self.previous_owner.is_some()
    }
}

// ============================================================================
// CAPTURE DETECTOR (The Engine)
// ============================================================================

/// Dwell/cooldown capture state machine.
#[derive(Debug)]
pub struct CaptureDetector<I = H3Indexer> {
    config: CaptureConfig,
    indexer: I,

    /// Cell the runner is currently inside
    current_cell: Option<CellId>,

    /// When the runner entered `current_cell` (Unix ms)
    entered_at: u64,

    captured: HashSet<CellId>,
    visited: HashSet<CellId>,
    stolen: HashSet<CellId>,
    last_capture_at: Option<u64>,

    /// Pending UI notifications, oldest first
    queue: VecDeque<CapturedCellEvent>,

    stats: TerritoryStats,
}

impl CaptureDetector<H3Indexer> {
    /// Create a detector indexing with H3 at the configured resolution.
    pub fn new(config: CaptureConfig) -> Self {
        let indexer = H3Indexer::new(config.resolution);
        Self::with_indexer(config, indexer)
    }

    /// Create a detector with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CaptureConfig::default())
    }
}

impl<I: CellIndexer> CaptureDetector<I> {
    /// Create a detector with a custom grid.
    pub fn with_indexer(config: CaptureConfig, indexer: I) -> Self {
        Self {
            config,
            indexer,
            current_cell: None,
            entered_at: 0,
            captured: HashSet::new(),
            visited: HashSet::new(),
            stolen: HashSet::new(),
            last_capture_at: None,
            queue: VecDeque::new(),
            stats: TerritoryStats::default(),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn indexer(&self) -> &I {
        &self.indexer
    }

    pub fn stats(&self) -> &TerritoryStats {
        &self.stats
    }

    pub fn current_cell(&self) -> Option<CellId> {
        self.current_cell
    }

    pub fn has_captured(&self, cell: &CellId) -> bool {
        self.captured.contains(cell)
    }

    /// Pending capture notifications, oldest first.
    pub fn capture_queue(&self) -> impl Iterator<Item = &CapturedCellEvent> {
        self.queue.iter()
    }

    /// Oldest pending notification, if any.
    pub fn pending_capture(&self) -> Option<&CapturedCellEvent> {
        self.queue.front()
    }

    /// Feed one accepted fix. Returns the capture it triggered, if any.
    ///
    /// # Arguments
    /// * `lat`, `lng` - Fix position in degrees
    /// * `now_ms` - Fix time (Unix milliseconds)
    pub fn on_location_update(
        &mut self,
        lat: f64,
        lng: f64,
        now_ms: u64,
    ) -> Result<Option<CapturedCellEvent>, CaptureError> {
        let cell = self.indexer.cell_for(lat, lng)?;

        self.visited.insert(cell);
        self.stats.cells_visited = self.visited.len() as u32;

        if self.current_cell != Some(cell) {
            self.current_cell = Some(cell);
            self.entered_at = now_ms;
            return Ok(None);
        }

        let dwell = now_ms.saturating_sub(self.entered_at);
        if dwell < self.config.dwell_ms {
            return Ok(None);
        }

        if self.captured.contains(&cell) {
            return Ok(None);
        }

        if let Some(last) = self.last_capture_at {
            if now_ms.saturating_sub(last) < self.config.cooldown_ms {
                return Ok(None);
            }
        }

        self.captured.insert(cell);
        self.last_capture_at = Some(now_ms);

        let event = CapturedCellEvent {
            cell_id: cell,
            lat,
            lng,
            timestamp: now_ms,
            is_new: true,
            was_stolen: false,
        };

        self.stats.cells_captured.push(cell);
        self.stats.new_cells += 1;
        self.stats.last_captured = Some(event.clone());
        self.queue.push_back(event.clone());

        info!(cell = %cell, dwell_ms = dwell, "cell captured");
        Ok(Some(event))
    }

    /// Remove and return the oldest capture notification.
    pub fn dismiss_capture(&mut self) -> Option<CapturedCellEvent> {
        self.queue.pop_front()
    }

    /// Fold a backend receipt into the local state.
    ///
    /// A capture counts as either new or stolen, never both. Returns false
    /// if the cell was not captured in this run.
    pub fn apply_receipt(&mut self, cell: CellId, receipt: &CaptureReceipt) -> bool {
        if !self.captured.contains(&cell) {
            return false;
        }

        if receipt.was_stolen() && self.stolen.insert(cell) {
            self.stats.stolen_cells += 1;
            self.stats.new_cells = self.stats.new_cells.saturating_sub(1);

            let events = self.queue.iter_mut().chain(self.stats.last_captured.iter_mut());
            for event in events.filter(|e| e.cell_id == cell) {
                event.is_new = false;
                event.was_stolen = true;
            }
        }
        true
    }

    /// Record that the backend never confirmed this capture.
    pub fn mark_unconfirmed(&mut self, cell: CellId) {
        if self.captured.contains(&cell) && !self.stats.unconfirmed.contains(&cell) {
            self.stats.unconfirmed.push(cell);
        }
    }

    /// Clear all per-run territory state.
    pub fn reset(&mut self) {
        self.current_cell = None;
        self.entered_at = 0;
        self.captured.clear();
        self.visited.clear();
        self.stolen.clear();
        self.last_capture_at = None;
        self.queue.clear();
        self.stats = TerritoryStats::default();
    }
}

impl Default for CaptureDetector<H3Indexer> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur during territory operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid cell id: {0}")]
    InvalidCellId(String),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// One cell per whole degree of latitude.
    #[derive(Debug)]
    struct BandIndexer;

    impl CellIndexer for BandIndexer {
        fn cell_for(&self, lat: f64, _lng: f64) -> Result<CellId, CaptureError> {
            Ok(CellId::from_raw(lat.floor() as u64))
        }
    }

    fn band_detector(config: CaptureConfig) -> CaptureDetector<BandIndexer> {
        CaptureDetector::with_indexer(config, BandIndexer)
    }

    #[test]
    fn test_h3_cell_for_san_francisco() {
        let indexer = H3Indexer::default();
        let cell = indexer.cell_for(37.7749, -122.4194).unwrap();

        // Resolution 9 indexes start with mode/resolution nibbles "89"
        assert!(cell.to_string().starts_with("89"));
        assert_eq!(cell, indexer.cell_for(37.7749, -122.4194).unwrap());
        assert_ne!(cell, indexer.cell_for(37.7849, -122.4194).unwrap());
    }

    #[test]
    fn test_h3_rejects_invalid_coordinates() {
        let indexer = H3Indexer::default();
        assert!(matches!(
            indexer.cell_for(f64::NAN, 0.0),
            Err(CaptureError::InvalidCoordinates(_))
        ));
    }

    #[test]
    fn test_boundary_polygon_is_closed_hexagon() {
        let indexer = H3Indexer::default();
        let cell = indexer.cell_for(37.7749, -122.4194).unwrap();
        let polygon = indexer.boundary_polygon(cell).unwrap();

        let ring = polygon.exterior();
        assert!(ring.is_closed());
        // 6 vertices + closing point (pentagons only occur at 12 fixed spots)
        assert_eq!(ring.0.len(), 7);
    }

    #[test]
    fn test_cell_id_string_round_trip() {
        let cell = CellId::from_raw(0x8928308280fffff);
        assert_eq!(cell.to_string(), "8928308280fffff");
        assert_eq!("8928308280fffff".parse::<CellId>().unwrap(), cell);
        assert!("not-hex".parse::<CellId>().is_err());

        let json = serde_json::to_string(&cell).unwrap();
        assert_eq!(json, "\"8928308280fffff\"");
    }

    #[test]
    fn test_dwell_gating() {
        let mut detector = band_detector(CaptureConfig::default());

        // Fixes every 500 ms inside one cell: nothing until 2000 ms of dwell
        for i in 0..4u64 {
            let captured = detector.on_location_update(10.5, 0.0, i * 500).unwrap();
            assert!(captured.is_none(), "captured early at fix {}", i + 1);
        }
        let event = detector.on_location_update(10.5, 0.0, 2_000).unwrap().unwrap();
        assert_eq!(event.cell_id, CellId::from_raw(10));
        assert_eq!(event.timestamp, 2_000);
        assert!(event.is_new);
        assert!(!event.was_stolen);
    }

    #[test]
    fn test_capture_is_idempotent_within_run() {
        let mut detector = band_detector(CaptureConfig::default());
        detector.on_location_update(10.5, 0.0, 0).unwrap();
        assert!(detector.on_location_update(10.5, 0.0, 2_000).unwrap().is_some());

        // Keep dwelling
        assert!(detector.on_location_update(10.5, 0.0, 6_000).unwrap().is_none());

        // Leave and come back for a long time
        detector.on_location_update(11.5, 0.0, 7_000).unwrap();
        detector.on_location_update(10.5, 0.0, 8_000).unwrap();
        assert!(detector.on_location_update(10.5, 0.0, 20_000).unwrap().is_none());

        assert_eq!(detector.stats().cells_captured, vec![CellId::from_raw(10)]);
        assert_eq!(detector.capture_queue().count(), 1);
    }

    #[test]
    fn test_cooldown_defers_second_capture() {
        let mut detector = band_detector(CaptureConfig {
            dwell_ms: 200,
            cooldown_ms: 1_000,
            ..CaptureConfig::default()
        });

        detector.on_location_update(10.5, 0.0, 0).unwrap();
        assert!(detector.on_location_update(10.5, 0.0, 200).unwrap().is_some());

        // Second cell meets dwell while the cooldown is still running
        detector.on_location_update(11.5, 0.0, 300).unwrap();
        assert!(detector.on_location_update(11.5, 0.0, 600).unwrap().is_none());
        assert!(detector.on_location_update(11.5, 0.0, 1_100).unwrap().is_none());

        // Deferred, not dropped
        let event = detector.on_location_update(11.5, 0.0, 1_200).unwrap().unwrap();
        assert_eq!(event.cell_id, CellId::from_raw(11));
        assert_eq!(detector.stats().new_cells, 2);
    }

    #[test]
    fn test_leaving_restarts_dwell_clock() {
        let mut detector = band_detector(CaptureConfig::default());
        detector.on_location_update(10.5, 0.0, 0).unwrap();
        detector.on_location_update(10.5, 0.0, 1_500).unwrap();
        detector.on_location_update(11.5, 0.0, 1_600).unwrap();
        detector.on_location_update(10.5, 0.0, 1_700).unwrap();

        assert!(detector.on_location_update(10.5, 0.0, 3_000).unwrap().is_none());
        assert!(detector.on_location_update(10.5, 0.0, 3_700).unwrap().is_some());
        assert_eq!(detector.stats().cells_visited, 2);
    }

    #[test]
    fn test_dismiss_is_fifo() {
        let mut detector = band_detector(CaptureConfig {
            dwell_ms: 0,
            cooldown_ms: 0,
            ..CaptureConfig::default()
        });
        for (i, lat) in [10.5, 11.5, 12.5].iter().enumerate() {
            let t = i as u64 * 100;
            detector.on_location_update(*lat, 0.0, t).unwrap();
            detector.on_location_update(*lat, 0.0, t + 1).unwrap();
        }

        let order: Vec<u64> = std::iter::from_fn(|| detector.dismiss_capture())
            .map(|e| e.cell_id.raw())
            .collect();
        assert_eq!(order, vec![10, 11, 12]);
        assert!(detector.dismiss_capture().is_none());
        // Dismissal only drains notifications
        assert_eq!(detector.stats().cells_captured.len(), 3);
    }

    #[test]
    fn test_stolen_receipt_moves_counters_once() {
        let mut detector = band_detector(CaptureConfig::default());
        detector.on_location_update(10.5, 0.0, 0).unwrap();
        detector.on_location_update(10.5, 0.0, 2_000).unwrap();
        let cell = CellId::from_raw(10);

        let receipt = CaptureReceipt { previous_owner: Some("rival".to_string()) };
        assert!(detector.apply_receipt(cell, &receipt));
        assert!(detector.apply_receipt(cell, &receipt));

        let stats = detector.stats();
        assert_eq!(stats.stolen_cells, 1);
        assert_eq!(stats.new_cells, 0);
        let head = detector.pending_capture().unwrap();
        assert!(head.was_stolen && !head.is_new);
        assert!(stats.last_captured.as_ref().unwrap().was_stolen);

        // Unknown cells are ignored
        assert!(!detector.apply_receipt(CellId::from_raw(99), &receipt));
    }

    #[test]
    fn test_plain_receipt_keeps_new_flag() {
        let mut detector = band_detector(CaptureConfig::default());
        detector.on_location_update(10.5, 0.0, 0).unwrap();
        detector.on_location_update(10.5, 0.0, 2_000).unwrap();

        assert!(detector.apply_receipt(CellId::from_raw(10), &CaptureReceipt::default()));
        assert_eq!(detector.stats().new_cells, 1);
        assert_eq!(detector.stats().stolen_cells, 0);
    }

    #[test]
    fn test_mark_unconfirmed() {
        let mut detector = band_detector(CaptureConfig::default());
        detector.on_location_update(10.5, 0.0, 0).unwrap();
        detector.on_location_update(10.5, 0.0, 2_000).unwrap();

        detector.mark_unconfirmed(CellId::from_raw(10));
        detector.mark_unconfirmed(CellId::from_raw(10));
        detector.mark_unconfirmed(CellId::from_raw(42));
        assert_eq!(detector.stats().unconfirmed, vec![CellId::from_raw(10)]);
    }

    #[test]
    fn test_reset_restores_fresh_state() {
        let mut detector = band_detector(CaptureConfig::default());
        detector.on_location_update(10.5, 0.0, 0).unwrap();
        detector.on_location_update(10.5, 0.0, 2_000).unwrap();
        detector.on_location_update(11.5, 0.0, 2_500).unwrap();

        detector.reset();
        assert_eq!(detector.stats(), &TerritoryStats::default());
        assert_eq!(detector.current_cell(), None);
        assert!(detector.pending_capture().is_none());
        assert!(!detector.has_captured(&CellId::from_raw(10)));

        // A fresh run can capture the same cell again
        detector.on_location_update(10.5, 0.0, 10_000).unwrap();
        assert!(detector.on_location_update(10.5, 0.0, 12_000).unwrap().is_some());
    }
}
