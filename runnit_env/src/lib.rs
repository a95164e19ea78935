//! Runnit Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the Runnit engine
//! to run against both a **Device** (tokio + platform location bridge) and a
//! **Simulation** (virtual clock + scripted route).
//!
//! # Core Concept: The Reactor Pattern
//!
//! The engine never touches the outside world directly. Everything that
//! would make a run non-reproducible goes through a trait:
//! - Time (`now()`, `sleep()`)
//! - Background work (`spawn()`)
//! - Location fixes (`subscribe()`, `current_fix()`)
//!
//! # Example
//!
//! ```ignore
//! use runnit_env::{LocationSource, RunContext};
//!
//! async fn run_loop<Ctx: RunContext, Loc: LocationSource>(ctx: &Ctx, loc: &Loc) {
//!     let mut fixes = loc.subscribe().await?;
//!     loop {
//!         tokio::select! {
//!             Some(fix) = fixes.next() => ingest(fix),
//!             _ = ctx.sleep(Duration::from_secs(1)) => tick(),
//!         }
//!     }
//! }
//! ```

mod context;
mod location;
mod types;
mod error;
mod tokio_impl;

pub use context::RunContext;
pub use location::{ChannelLocationSource, FixSender, FixSubscription, LocationSource};
pub use types::{Coordinate, RunId};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
