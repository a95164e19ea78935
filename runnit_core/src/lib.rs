//! Runnit Core - live run tracking and hexagonal territory capture
//!
//! This library turns a noisy, irregular GPS stream into:
//! 1. **Trustworthy run statistics**: distance, pace, speed, elevation and
//!    calories behind an accuracy / jitter / teleport filter
//! 2. **Territory captures**: H3 cells awarded after a dwell time, with a
//!    global cooldown and per-run deduplication
//! 3. **Local-first confirmation**: captures stand immediately and are
//!    reconciled with the backend in the background

pub mod geodesy;
pub mod run_tracker;
pub mod territory;
pub mod engine;
pub mod rewards;
pub mod confirm;
pub mod record;
pub mod journal;
pub mod session;

// Re-export key types for convenience
pub use run_tracker::{FixOutcome, RunState, RunStats, RunTracker, TrackerConfig, TrackerError};
pub use territory::{
    CaptureConfig, CaptureDetector, CaptureError, CaptureReceipt, CapturedCellEvent, CellId,
    CellIndexer, H3Indexer, TerritoryStats,
};
pub use engine::{FixReport, RunEngine};
pub use confirm::{CaptureConfirmer, ConfirmationPolicy};
pub use record::{persist_run, RunRecord, RunStore, RunSummary};
pub use journal::{JournalError, ProfileTotals, RunJournal};
pub use session::{RunSession, SessionConfig, SessionError, SessionHandle, SessionSnapshot};
