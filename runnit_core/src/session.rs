//! Run Session - the single owner of a live run.
//!
//! One task owns the [`RunEngine`] and serializes everything that mutates
//! it: commands from handles, fixes from the location subscription, the
//! 1 Hz statistics tick and confirmation receipts. Nothing else ever holds
//! the engine, so the tick and fix handlers always see the latest stats.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        RunSession                          │
//! │                                                            │
//! │   SessionHandle ──cmd──►┐                                  │
//! │   FixSubscription ─fix─►│  select!  ──►  RunEngine         │
//! │   ctx.sleep(tick) ─────►│                   │              │
//! │   confirmations ──────►┘                    │ capture      │
//! │        ▲                                    ▼              │
//! │        └──── epoch-tagged receipt ◄── spawned confirm task │
//! │                                                            │
//! │   watch::Sender<SessionSnapshot> ──► handle.stats() ...    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let ctx = TokioContext::shared();
//! let handle = RunSession::spawn(ctx, location, confirmer, SessionConfig::default());
//!
//! handle.start().await?;
//! // ...
//! let summary = handle.stop().await?;
//! ```

use crate::confirm::{confirm_with_retry, CaptureConfirmer, ConfirmationPolicy};
use crate::engine::RunEngine;
use crate::record::RunSummary;
use crate::run_tracker::{RunState, RunStats, TrackerConfig, TrackerError};
use crate::territory::{
    CaptureConfig, CaptureError, CaptureReceipt, CapturedCellEvent, CellId, TerritoryStats,
};
use runnit_env::{Coordinate, EnvError, FixSubscription, LocationSource, RunContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Configuration for a run session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tracker: TrackerConfig,
    pub capture: CaptureConfig,
    pub confirmation: ConfirmationPolicy,

    /// Queued commands before `send` waits (default: 32)
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            capture: CaptureConfig::default(),
            confirmation: ConfirmationPolicy::default(),
            command_buffer: 32,
        }
    }
}

/// Everything the UI reads, republished whenever the run changes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub state: RunState,
    pub epoch: u64,
    pub stats: RunStats,
    pub territory: TerritoryStats,
    /// Pending capture notifications, oldest first
    pub capture_queue: Vec<CapturedCellEvent>,
}

enum Command {
    Start(oneshot::Sender<Result<u64, SessionError>>),
    Pause(oneshot::Sender<Result<(), SessionError>>),
    Resume(oneshot::Sender<Result<(), SessionError>>),
    Stop(oneshot::Sender<Result<RunSummary, SessionError>>),
    Reset(oneshot::Sender<()>),
    DismissCapture(oneshot::Sender<Option<CapturedCellEvent>>),
}

/// Outcome of a detached confirmation, tagged with the epoch it ran for.
struct Confirmation {
    epoch: u64,
    cell: CellId,
    result: Result<CaptureReceipt, EnvError>,
}

// ============================================================================
// SESSION ACTOR
// ============================================================================

/// The run actor. Created through [`RunSession::spawn`].
pub struct RunSession<Ctx, Loc, Conf> {
    ctx: Arc<Ctx>,
    location: Arc<Loc>,
    confirmer: Arc<Conf>,
    config: SessionConfig,
    engine: RunEngine,

    /// Live only between start and stop/reset
    subscription: Option<FixSubscription>,

    /// Next tick deadline on the context clock, while running
    next_tick: Option<Duration>,

    confirmations_tx: mpsc::UnboundedSender<Confirmation>,
    confirmations_rx: mpsc::UnboundedReceiver<Confirmation>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<Ctx, Loc, Conf> RunSession<Ctx, Loc, Conf>
where
    Ctx: RunContext,
    Loc: LocationSource,
    Conf: CaptureConfirmer,
{
    /// Spawns the actor on the context and returns its handle.
    ///
    /// The actor exits once every handle has been dropped.
    pub fn spawn(
        ctx: Arc<Ctx>,
        location: Arc<Loc>,
        confirmer: Arc<Conf>,
        config: SessionConfig,
    ) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer.max(1));
        let (confirmations_tx, confirmations_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let session = Self {
            engine: RunEngine::new(config.tracker.clone(), config.capture.clone()),
            ctx: Arc::clone(&ctx),
            location,
            confirmer,
            config,
            subscription: None,
            next_tick: None,
            confirmations_tx,
            confirmations_rx,
            snapshot: snapshot_tx,
        };
        ctx.spawn("run-session", session.run(commands_rx));

        SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!(seed = self.ctx.seed(), "run session online");

        loop {
            let tick_in = self
                .next_tick
                .map(|deadline| deadline.saturating_sub(self.ctx.now()));

            // Commands publish through `reply`; events only when they changed the run.
            let changed = tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => {
                        self.handle(command).await;
                        false
                    }
                    None => break,
                },
                Some(confirmation) = self.confirmations_rx.recv() => {
                    self.on_confirmation(confirmation)
                }
                fix = next_fix(&mut self.subscription) => match fix {
                    Some(fix) => self.on_fix(fix),
                    None => {
                        warn!("location provider closed the fix stream");
                        self.subscription = None;
                        false
                    }
                },
                _ = self.ctx.sleep(tick_in.unwrap_or_default()), if tick_in.is_some() => {
                    self.on_tick()
                }
            };

            if changed {
                self.publish();
            }
        }

        debug!("run session shut down");
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                self.reply(reply, result);
            }
            Command::Pause(reply) => {
                let result = self.engine.pause().map_err(SessionError::from);
                if result.is_ok() {
                    self.next_tick = None;
                }
                self.reply(reply, result);
            }
            Command::Resume(reply) => {
                let result = self.engine.resume().map_err(SessionError::from);
                if result.is_ok() {
                    self.next_tick = Some(self.ctx.now() + self.tick_interval());
                }
                self.reply(reply, result);
            }
            Command::Stop(reply) => {
                let result = self.engine.stop().map_err(SessionError::from);
                if result.is_ok() {
                    self.subscription = None;
                    self.next_tick = None;
                }
                self.reply(reply, result);
            }
            Command::Reset(reply) => {
                self.subscription = None;
                self.next_tick = None;
                self.engine.reset();
                self.reply(reply, ());
            }
            Command::DismissCapture(reply) => {
                let event = self.engine.dismiss_capture();
                self.reply(reply, event);
            }
        }
    }

    async fn start(&mut self) -> Result<u64, SessionError> {
        let state = self.engine.state();
        if state != RunState::Idle {
            return Err(TrackerError::InvalidTransition { op: "start", from: state }.into());
        }

        let subscription = match self.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "cannot start run without location access");
                return Err(e.into());
            }
        };

        let epoch = self.engine.start(self.ctx.unix_millis())?;
        self.subscription = Some(subscription);
        self.next_tick = Some(self.ctx.now() + self.tick_interval());
        Ok(epoch)
    }

    async fn subscribe(&self) -> Result<FixSubscription, EnvError> {
        self.location.request_permission().await?;
        self.location.subscribe().await
    }

    /// Publishes first so callers observe the new state once they get a reply.
    fn reply<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish();
        if reply.send(value).is_err() {
            debug!("caller dropped before the reply");
        }
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Returns true when the fix moved the run; rejected fixes leave it untouched.
    fn on_fix(&mut self, fix: Coordinate) -> bool {
        match self.engine.on_fix(fix) {
            Ok(report) => {
                let moved = report.outcome.advanced_reference();
                if let Some(event) = report.capture {
                    self.dispatch_confirmation(event);
                }
                moved
            }
            Err(e) => {
                debug!(error = %e, "dropping unusable fix");
                false
            }
        }
    }

    fn on_tick(&mut self) -> bool {
        let ticked = self.engine.tick();
        if let Some(deadline) = self.next_tick {
            self.next_tick = Some(deadline + self.tick_interval());
        }
        ticked
    }

    fn on_confirmation(&mut self, confirmation: Confirmation) -> bool {
        let Confirmation { epoch, cell, result } = confirmation;
        match result {
            Ok(receipt) => self.engine.apply_receipt(epoch, cell, &receipt),
            Err(e) => {
                let marked = self.engine.mark_unconfirmed(epoch, cell);
                if marked {
                    warn!(cell = %cell, error = %e, "capture left unconfirmed");
                }
                marked
            }
        }
    }

    /// Confirms a capture on a detached task. Fix processing never waits.
    fn dispatch_confirmation(&self, event: CapturedCellEvent) {
        let ctx = Arc::clone(&self.ctx);
        let confirmer = Arc::clone(&self.confirmer);
        let policy = self.config.confirmation.clone();
        let results = self.confirmations_tx.clone();
        let epoch = self.engine.epoch();

        self.ctx.spawn("confirm-capture", async move {
            let result = confirm_with_retry(ctx.as_ref(), confirmer.as_ref(), &policy, &event).await;
            let confirmation = Confirmation { epoch, cell: event.cell_id, result };
            if results.send(confirmation).is_err() {
                debug!(cell = %event.cell_id, "session gone before confirmation landed");
            }
        });
    }

    fn publish(&self) {
        let engine = &self.engine;
        self.snapshot.send_replace(SessionSnapshot {
            state: engine.state(),
            epoch: engine.epoch(),
            stats: engine.stats().clone(),
            territory: engine.territory().clone(),
            capture_queue: engine.detector().capture_queue().cloned().collect(),
        });
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.tracker.tick_interval_ms.max(1))
    }
}

async fn next_fix(subscription: &mut Option<FixSubscription>) -> Option<Coordinate> {
    match subscription.as_mut() {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Cloneable front end to a running [`RunSession`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Idle → Running. Fails with `Env(PermissionDenied)` without location access.
    pub async fn start(&self) -> Result<u64, SessionError> {
        self.request(Command::Start).await?
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(Command::Pause).await?
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(Command::Resume).await?
    }

    /// Ends the run and returns its frozen summary.
    ///
    /// No fix, tick or receipt reaches the run once this returns.
    pub async fn stop(&self) -> Result<RunSummary, SessionError> {
        self.request(Command::Stop).await?
    }

    /// Back to idle with zeroed statistics and territory.
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.request(Command::Reset).await
    }

    /// Removes the oldest pending capture notification.
    pub async fn dismiss_capture(&self) -> Result<Option<CapturedCellEvent>, SessionError> {
        self.request(Command::DismissCapture).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> RunState {
        self.snapshot.borrow().state
    }

    pub fn stats(&self) -> RunStats {
        self.snapshot.borrow().stats.clone()
    }

    pub fn territory(&self) -> TerritoryStats {
        self.snapshot.borrow().territory.clone()
    }

    pub fn capture_queue(&self) -> Vec<CapturedCellEvent> {
        self.snapshot.borrow().capture_queue.clone()
    }

    /// Waits until the session publishes a new snapshot.
    pub async fn changed(&mut self) -> Result<(), SessionError> {
        self.snapshot.changed().await.map_err(|_| SessionError::Closed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Run session has shut down")]
    Closed,
}

// ============================================================================
// TESTS
// ============================================================================
