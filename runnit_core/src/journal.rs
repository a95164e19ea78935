//! Local run journal backed by sled.
//!
//! Keeps finished runs and lifetime profile totals on the device so a run
//! survives when the hosted backend is unreachable. Records are stored as
//! JSON keyed by run id.

use crate::record::{RunRecord, RunStore};
use crate::rewards::level_for_xp;
use async_trait::async_trait;
use runnit_env::{EnvError, RunId};
use serde::{Deserialize, Serialize};
use std::path::Path;

const RUNS_TREE: &str = "runs";
const PROFILE_KEY: &[u8] = b"profile";

/// Lifetime totals, updated once per persisted run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileTotals {
    pub total_distance_km: f64,
    pub xp: u64,
    pub level: u32,
    pub runs: u32,
}

/// Sled-backed [`RunStore`].
pub struct RunJournal {
    db: sled::Db,
    runs: sled::Tree,
}

impl RunJournal {
    /// Open a persistent journal at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, JournalError> {
        let db = sled::open(path)
            .map_err(|e| JournalError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Self::from_db(db)
    }

    /// Create a journal that is deleted on drop
    pub fn open_temp() -> Result<Self, JournalError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| JournalError::Storage(format!("Failed to open temp DB: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, JournalError> {
        let runs = db
            .open_tree(RUNS_TREE)
            .map_err(|e| JournalError::Storage(format!("Failed to open runs tree: {}", e)))?;
        Ok(Self { db, runs })
    }

    pub fn insert_run(&self, record: &RunRecord) -> Result<(), JournalError> {
        let value = serde_json::to_vec(record)?;
        self.runs
            .insert(record.id.as_uuid().as_bytes(), value)
            .map_err(|e| JournalError::Storage(format!("Insert failed: {}", e)))?;
        self.flush()
    }

    pub fn get_run(&self, id: RunId) -> Result<Option<RunRecord>, JournalError> {
        let value = self
            .runs
            .get(id.as_uuid().as_bytes())
            .map_err(|e| JournalError::Storage(format!("Read failed: {}", e)))?;
        value
            .map(|bytes| serde_json::from_slice(&bytes).map_err(JournalError::from))
            .transpose()
    }

    /// All stored runs, most recent start first.
    pub fn list_runs(&self) -> Result<Vec<RunRecord>, JournalError> {
        let mut records = Vec::with_capacity(self.runs.len());
        for entry in self.runs.iter() {
            let (_, value) =
                entry.map_err(|e| JournalError::Storage(format!("Iteration failed: {}", e)))?;
            records.push(serde_json::from_slice::<RunRecord>(&value)?);
        }
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }

    /// Returns true if a run was removed.
    pub fn remove_run(&self, id: RunId) -> Result<bool, JournalError> {
        let removed = self
            .runs
            .remove(id.as_uuid().as_bytes())
            .map_err(|e| JournalError::Storage(format!("Remove failed: {}", e)))?;
        self.flush()?;
        Ok(removed.is_some())
    }

    pub fn profile(&self) -> Result<ProfileTotals, JournalError> {
        decode_profile(self.read_profile()?.as_deref())
    }

    /// Adds one run to the lifetime totals.
    ///
    /// Compare-and-swap on the profile key; retries when another writer got
    /// there first, so concurrent updates are never lost.
    pub fn add_to_profile(&self, distance_km: f64, xp: u64) -> Result<ProfileTotals, JournalError> {
        loop {
            let current = self.read_profile()?;
            let mut totals = decode_profile(current.as_deref())?;
            totals.total_distance_km += distance_km;
            totals.xp += xp;
            totals.level = level_for_xp(totals.xp);
            totals.runs += 1;

            let swapped = self
                .db
                .compare_and_swap(PROFILE_KEY, current, Some(serde_json::to_vec(&totals)?))
                .map_err(|e| JournalError::Storage(format!("Insert failed: {}", e)))?;
            if swapped.is_ok() {
                self.flush()?;
                return Ok(totals);
            }
        }
    }

    fn read_profile(&self) -> Result<Option<sled::IVec>, JournalError> {
        self.db
            .get(PROFILE_KEY)
            .map_err(|e| JournalError::Storage(format!("Read failed: {}", e)))
    }

    fn flush(&self) -> Result<(), JournalError> {
        self.db
            .flush()
            .map_err(|e| JournalError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }
}

fn decode_profile(bytes: Option<&[u8]>) -> Result<ProfileTotals, JournalError> {
    match bytes {
        Some(bytes) => Ok(serde_json::from_slice(bytes)?),
        None => Ok(ProfileTotals { level: 1, ..ProfileTotals::default() }),
    }
}

#[async_trait]
impl RunStore for RunJournal {
    async fn save_run(&self, record: &RunRecord) -> Result<(), EnvError> {
        self.insert_run(record).map_err(EnvError::from)
    }

    async fn update_profile(&self, distance_km: f64, xp: u64) -> Result<(), EnvError> {
        self.add_to_profile(distance_km, xp).map(|_| ()).map_err(EnvError::from)
    }
}

/// Errors from the local journal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt record: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for JournalError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<JournalError> for EnvError {
    fn from(e: JournalError) -> Self {
        EnvError::storage(e)
    }
}
