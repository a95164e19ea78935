//! Runnit Deterministic Simulation Testing (DST) Harness
//!
//! This crate provides a controlled environment where a whole run, from
//! noisy GPS to backend confirmation, replays deterministically.
//!
//! # Core Principle: The Reactor Pattern
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock advances only between scripted events
//! - **GPS**: Ground-truth routes degraded by a seeded noise model
//! - **Backend**: Ownership, failures and latency drawn from the same seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ScenarioRunner                        │
//! │                                                              │
//! │  RouteBuilder ──► GpsNoise ──► SimLocationSource             │
//! │                                      │ fixes                 │
//! │                                      ▼                       │
//! │  SimContext clock ──ticks──►     RunEngine ──captures──┐     │
//! │                                      ▲                 ▼     │
//! │                                      └──receipts── SimBackend│
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use runnit_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::BoundaryDance).await;
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod location;
pub mod routes;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{outcome_label, CellOutline, SimExport, SimFrame};
pub use location::SimLocationSource;
pub use routes::{GpsNoise, NoisyRoute, RouteBuilder};
pub use runner::{BackendProfile, ScenarioMetrics, ScenarioResult, ScenarioRunner, SimBackend, SimError};
