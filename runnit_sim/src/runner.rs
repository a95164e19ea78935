//! Scenario runner - drives the run engine through scripted runs.
//!
//! The engine is fed directly against a [`SimContext`] clock: fixes, ticks
//! and confirmation receipts are merged into one timeline, so a run of any
//! length completes instantly and identically for the same seed.

use crate::context::SimContext;
use crate::exporter::{outcome_label, SimFrame};
use crate::location::SimLocationSource;
use crate::routes::{cell_center, cell_of, offset, route_distance_km, GpsNoise, RouteBuilder, SF_ORIGIN};
use crate::scenarios::ScenarioId;

use async_trait::async_trait;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::NormalError;
use runnit_core::confirm::confirm_with_retry;
use runnit_core::{
    CaptureConfirmer, CaptureError, CaptureReceipt, CapturedCellEvent, CellId, FixOutcome,
    JournalError, RunEngine, RunState, RunSummary, SessionConfig, TerritoryStats, TrackerError,
};
use runnit_env::{Coordinate, EnvError, LocationSource, RunContext};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Identity the simulated backend knows this runner by.
const RUNNER_ID: &str = "sim-runner";

/// Results from running a scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Frozen run at stop (empty if the run never started)
    pub summary: RunSummary,

    /// One frame per fix
    pub frames: Vec<SimFrame>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Fixes delivered by the location source
    pub fixes: u64,

    /// Filter verdicts
    pub reference: u64,
    pub accepted: u64,
    pub jitter: u64,
    pub teleports: u64,
    pub low_accuracy: u64,
    pub ignored: u64,

    /// What the noise model injected
    pub glitches_injected: u64,
    pub low_accuracy_injected: u64,

    /// Ticks that advanced the run clock
    pub ticks: u64,

    /// Backend traffic
    pub confirm_calls: u64,
    pub receipts_applied: u64,
    pub unconfirmed: u64,
    pub stale_results: u64,
}

impl ScenarioMetrics {
    fn count(&mut self, outcome: &FixOutcome) {
        self.fixes += 1;
        match outcome {
            FixOutcome::Ignored => self.ignored += 1,
            FixOutcome::LowAccuracy { .. } => self.low_accuracy += 1,
            FixOutcome::Reference => self.reference += 1,
            FixOutcome::Jitter { .. } => self.jitter += 1,
            FixOutcome::Teleport { .. } => self.teleports += 1,
            FixOutcome::Accepted { .. } => self.accepted += 1,
        }
    }
}

/// Errors that abort a scenario before its checks run.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("GPS noise model: {0}")]
    Noise(#[from] NormalError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("Scenario setup: {0}")]
    Setup(String),
}

// ============================================================================
// SIMULATED BACKEND
// ============================================================================

/// How the simulated backend misbehaves.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendProfile {
    /// Chance that a single call fails
    pub failure_rate: f64,

    /// Chance that an unowned cell already belongs to a rival
    pub rival_share: f64,

    /// Round trip per call (ms)
    pub latency_ms: u64,
}

/// In-memory cell ownership with injected failures.
pub struct SimBackend {
    profile: BackendProfile,
    rng: Mutex<ChaCha8Rng>,
    owners: Mutex<HashMap<CellId, String>>,
    calls: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimBackend {
    pub fn new(profile: BackendProfile, rng: ChaCha8Rng) -> Self {
        Self {
            profile,
            rng: Mutex::new(rng),
            owners: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn owner_of(&self, cell: CellId) -> Option<String> {
        lock(&self.owners).get(&cell).cloned()
    }
}

#[async_trait]
impl CaptureConfirmer for SimBackend {
    async fn confirm_capture(
        &self,
        cell: CellId,
        _lat: f64,
        _lng: f64,
    ) -> Result<CaptureReceipt, EnvError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (fails, rival) = {
            let mut rng = lock(&self.rng);
            let fails = rng.gen_bool(self.profile.failure_rate.clamp(0.0, 1.0));
            let rival = rng.gen_bool(self.profile.rival_share.clamp(0.0, 1.0));
            (fails, rival)
        };
        if fails {
            return Err(EnvError::rpc("simulated backend failure"));
        }

        let mut owners = lock(&self.owners);
        if rival && !owners.contains_key(&cell) {
            owners.insert(cell, format!("rival-{cell}"));
        }
        let previous = owners.insert(cell, RUNNER_ID.to_string());
        Ok(CaptureReceipt {
            previous_owner: previous.filter(|owner| owner != RUNNER_ID),
        })
    }
}

// ============================================================================
// SCENARIO PLANS
// ============================================================================

/// Lifecycle action applied just before a given fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Pause,
    Resume,
    /// Reset and immediately start a new run
    Restart,
}

/// Everything a scenario feeds the engine.
struct Plan {
    truth: Vec<Coordinate>,
    noise: GpsNoise,
    controls: Vec<(usize, Control)>,
    backend: Option<BackendProfile>,
    permission: bool,
}

impl Plan {
    fn new(truth: Vec<Coordinate>, noise: GpsNoise) -> Self {
        Self {
            truth,
            noise,
            controls: Vec::new(),
            backend: None,
            permission: true,
        }
    }

    fn control(mut self, at_fix: usize, control: Control) -> Self {
        self.controls.push((at_fix, control));
        self
    }

    fn backend(mut self, profile: BackendProfile) -> Self {
        self.backend = Some(profile);
        self
    }
}

/// What a finished plan left behind for the checks.
struct Outcome {
    summary: RunSummary,
    state: RunState,
    start_error: Option<EnvError>,
    truth_km: f64,
    metrics: ScenarioMetrics,
    frames: Vec<SimFrame>,
    /// Fix index of every capture
    capture_fixes: Vec<usize>,
    /// Whether each restart left a pristine run behind
    restarts_clean: Vec<bool>,
}

impl Outcome {
    fn captured(&self) -> &[CellId] {
        &self.summary.territory.cells_captured
    }
}

/// Collects failed checks.
#[derive(Default)]
struct Verdict {
    failures: Vec<String>,
}

impl Verdict {
    fn check(&mut self, ok: bool, what: impl FnOnce() -> String) {
        if !ok {
            self.failures.push(what());
        }
    }

    fn into_reason(self) -> Option<String> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.join("; "))
        }
    }
}

// ============================================================================
// SIMULATED RUN
// ============================================================================

/// A confirmation result waiting for its virtual arrival time.
struct PendingResult {
    due_ms: u64,
    epoch: u64,
    cell: CellId,
    result: Result<CaptureReceipt, EnvError>,
}

/// One run of the engine on a virtual timeline.
struct SimRun {
    ctx: SimContext,
    engine: RunEngine,
    config: SessionConfig,
    backend: Option<SimBackend>,
    retry_seed: u64,
    pending: Vec<PendingResult>,
    next_tick_ms: u64,
    metrics: ScenarioMetrics,
    frames: Vec<SimFrame>,
    started_ms: u64,
}

impl SimRun {
    fn new(ctx: SimContext, config: SessionConfig, backend: Option<SimBackend>) -> Self {
        let engine = RunEngine::new(config.tracker.clone(), config.capture.clone());
        let started_ms = ctx.unix_millis();
        let retry_seed = ctx.seed();
        Self {
            ctx,
            engine,
            config,
            backend,
            retry_seed,
            pending: Vec::new(),
            next_tick_ms: u64::MAX,
            metrics: ScenarioMetrics::default(),
            frames: Vec::new(),
            started_ms,
        }
    }

    fn tick_interval_ms(&self) -> u64 {
        self.config.tracker.tick_interval_ms.max(1)
    }

    fn start(&mut self) -> Result<u64, TrackerError> {
        let now = self.ctx.unix_millis();
        let epoch = self.engine.start(now)?;
        self.next_tick_ms = now + self.tick_interval_ms();
        Ok(epoch)
    }

    /// Moves the clock to `target_ms`, firing ticks and arrivals on the way.
    ///
    /// A tick and an arrival at the same instant fire tick first.
    fn advance_to(&mut self, target_ms: u64) {
        loop {
            let arrival = self.pending.first().map(|p| p.due_ms);
            let receipt_first = arrival.is_some_and(|due| due < self.next_tick_ms);
            let next = match arrival {
                Some(due) if receipt_first => due,
                _ => self.next_tick_ms,
            };
            if next > target_ms {
                break;
            }

            self.ctx.advance_to_ms(next - self.ctx.epoch_millis());
            if receipt_first {
                let pending = self.pending.remove(0);
                self.deliver(pending);
            } else {
                if self.engine.tick() {
                    self.metrics.ticks += 1;
                }
                self.next_tick_ms += self.tick_interval_ms();
            }
        }
        self.ctx
            .advance_to_ms(target_ms.saturating_sub(self.ctx.epoch_millis()));
    }

    fn deliver(&mut self, pending: PendingResult) {
        let PendingResult { epoch, cell, result, .. } = pending;
        let applied = match &result {
            Ok(receipt) => self.engine.apply_receipt(epoch, cell, receipt),
            Err(_) => self.engine.mark_unconfirmed(epoch, cell),
        };
        match (applied, result.is_ok()) {
            (true, true) => self.metrics.receipts_applied += 1,
            (true, false) => self.metrics.unconfirmed += 1,
            (false, _) => self.metrics.stale_results += 1,
        }
    }

    fn apply(&mut self, control: Control) -> Result<(), SimError> {
        match control {
            Control::Pause => self.engine.pause()?,
            Control::Resume => self.engine.resume()?,
            Control::Restart => {
                self.engine.reset();
                self.start()?;
            }
        }
        debug!(?control, state = ?self.engine.state(), "control applied");
        Ok(())
    }

    /// Feeds one fix at its own timestamp. Returns the capture, if any.
    async fn feed(&mut self, fix: Coordinate) -> Result<Option<CapturedCellEvent>, SimError> {
        self.advance_to(fix.timestamp);

        let report = self.engine.on_fix(fix)?;
        self.metrics.count(&report.outcome);

        let stats = self.engine.stats();
        self.frames.push(SimFrame {
            time_sec: fix.timestamp.saturating_sub(self.started_ms) as f64 / 1000.0,
            lat: fix.latitude,
            lng: fix.longitude,
            outcome: outcome_label(&report.outcome).to_string(),
            distance_km: stats.distance_km,
            duration_sec: stats.duration_sec,
            captured: report.capture.as_ref().map(|event| event.cell_id),
        });

        if let Some(event) = &report.capture {
            self.confirm(event).await;
        }
        Ok(report.capture)
    }

    /// Runs the whole retry schedule now and queues its result for the
    /// virtual time it would have arrived.
    async fn confirm(&mut self, event: &CapturedCellEvent) {
        let Some(backend) = &self.backend else {
            return;
        };

        let retry_clock = SimContext::new(self.retry_seed);
        let calls_before = backend.calls();
        let result =
            confirm_with_retry(&retry_clock, backend, &self.config.confirmation, event).await;
        let calls = backend.calls() - calls_before;

        self.metrics.confirm_calls += calls;
        let due_ms = self.ctx.unix_millis()
            + retry_clock.time_ms()
            + calls * backend.profile.latency_ms;

        let at = self.pending.partition_point(|p| p.due_ms <= due_ms);
        self.pending.insert(
            at,
            PendingResult {
                due_ms,
                epoch: self.engine.epoch(),
                cell: event.cell_id,
                result,
            },
        );
    }

    /// Stops the run and lets every outstanding result land.
    fn finish(&mut self) -> Result<RunSummary, SimError> {
        let summary = if self.engine.state().is_live() {
            self.engine.stop()?
        } else {
            self.engine.summary()
        };

        if let Some(last) = self.pending.last().map(|p| p.due_ms) {
            self.advance_to(last);
        }
        Ok(summary)
    }
}

// ============================================================================
// RUNNER
// ============================================================================

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Engine configuration shared by every scenario
    config: SessionConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: SessionConfig::default(),
        }
    }

    /// Overrides the engine configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let ctx = SimContext::new(self.seed);
        let physics = SimContext::new(self.seed.wrapping_mul(0x9e3779b97f4a7c15));
        let start_ms = ctx.unix_millis();

        let outcome = match self.plan(scenario, start_ms) {
            Ok(plan) => self.execute(&ctx, &physics, plan).await,
            Err(e) => Err(e),
        };

        let (passed, failure_reason, metrics, summary, frames) = match outcome {
            Ok(outcome) => {
                let reason = self.verify(scenario, &outcome);
                (reason.is_none(), reason, outcome.metrics, outcome.summary, outcome.frames)
            }
            Err(e) => (
                false,
                Some(e.to_string()),
                ScenarioMetrics::default(),
                RunSummary::default(),
                Vec::new(),
            ),
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            final_time_secs: ctx.time_ms() as f64 / 1000.0,
            failure_reason,
            metrics,
            summary,
            frames,
        }
    }

    fn plan(&self, scenario: ScenarioId, start_ms: u64) -> Result<Plan, SimError> {
        let origin = cell_center(SF_ORIGIN, self.config.capture.resolution);

        let plan = match scenario {
            ScenarioId::CleanKilometer => Plan::new(
                RouteBuilder::new(origin, start_ms, 1_500).walk(0.0, 5.0, 200).build(),
                GpsNoise::clean(),
            ),

            ScenarioId::StandingStill => Plan::new(
                RouteBuilder::new(origin, start_ms, 1_500).stand(200).build(),
                GpsNoise::settled(),
            ),

            ScenarioId::GpsTeleport => Plan::new(
                RouteBuilder::new(origin, start_ms, 1_200).walk(45.0, 4.0, 150).build(),
                GpsNoise::glitchy(0.05),
            ),

            ScenarioId::NoisyCity => Plan::new(
                RouteBuilder::new(origin, start_ms, 2_000).walk(90.0, 6.0, 334).build(),
                GpsNoise::urban(),
            ),

            ScenarioId::BoundaryDance => Plan::new(
                boundary_dance_route(origin, start_ms, self.config.capture.resolution)?,
                GpsNoise::clean(),
            ),

            ScenarioId::FlakyBackend => Plan::new(
                RouteBuilder::new(origin, start_ms, 1_500)
                    .walk(0.0, 5.0, 400)
                    .stand(14)
                    .build(),
                GpsNoise::clean(),
            )
            .backend(BackendProfile {
                failure_rate: 0.5,
                rival_share: 0.3,
                latency_ms: 250,
            }),

            ScenarioId::RestartFence => Plan::new(
                RouteBuilder::new(origin, start_ms, 1_500)
                    .walk(0.0, 5.0, 200)
                    .stand(8)
                    .build(),
                GpsNoise::clean(),
            )
            .control(3, Control::Restart)
            .backend(BackendProfile {
                failure_rate: 0.0,
                rival_share: 1.0,
                latency_ms: 5_000,
            }),

            // Walk, wait 60 s at a light, walk on
            ScenarioId::TrafficLight => Plan::new(
                RouteBuilder::new(origin, start_ms, 1_500)
                    .walk(0.0, 5.0, 60)
                    .stand(40)
                    .walk(0.0, 5.0, 60)
                    .build(),
                GpsNoise::clean(),
            )
            .control(61, Control::Pause)
            .control(101, Control::Resume),

            ScenarioId::PermissionDenied => Plan {
                permission: false,
                ..Plan::new(
                    RouteBuilder::new(origin, start_ms, 1_500).walk(0.0, 5.0, 20).build(),
                    GpsNoise::clean(),
                )
            },
        };
        Ok(plan)
    }

    async fn execute(
        &self,
        ctx: &SimContext,
        physics: &SimContext,
        plan: Plan,
    ) -> Result<Outcome, SimError> {
        let mut noise_rng = physics.fork_rng();
        let backend_rng = physics.fork_rng();

        let noisy = plan.noise.apply(&plan.truth, &mut noise_rng)?;
        let source = if plan.permission {
            SimLocationSource::new(noisy.fixes)
        } else {
            SimLocationSource::denied(noisy.fixes)
        };
        let backend = plan
            .backend
            .map(|profile| SimBackend::new(profile, backend_rng));

        let mut run = SimRun::new(ctx.clone(), self.config.clone(), backend);
        run.metrics.glitches_injected = noisy.glitches as u64;
        run.metrics.low_accuracy_injected = noisy.low_accuracy as u64;

        let mut outcome = Outcome {
            summary: RunSummary::default(),
            state: RunState::Idle,
            start_error: None,
            truth_km: route_distance_km(&plan.truth),
            metrics: ScenarioMetrics::default(),
            frames: Vec::new(),
            capture_fixes: Vec::new(),
            restarts_clean: Vec::new(),
        };

        // Starting a run asks for location access first
        if let Err(e) = source.request_permission().await {
            warn!(error = %e, "run not started");
            outcome.start_error = Some(e);
            outcome.state = run.engine.state();
            return Ok(outcome);
        }
        let mut fixes = source.subscribe().await?;
        run.start()?;

        let mut index = 0;
        while let Some(fix) = fixes.next().await {
            run.advance_to(fix.timestamp);
            for (_, control) in plan.controls.iter().filter(|(at, _)| *at == index) {
                run.apply(*control)?;
                if *control == Control::Restart {
                    outcome.restarts_clean.push(
                        run.engine.territory() == &TerritoryStats::default()
                            && run.engine.stats().route.is_empty()
                            && run.engine.stats().distance_km == 0.0,
                    );
                }
            }

            if run.feed(fix).await?.is_some() {
                outcome.capture_fixes.push(index);
            }
            index += 1;
        }

        outcome.summary = run.finish()?;
        outcome.state = run.engine.state();
        outcome.metrics = run.metrics;
        outcome.frames = run.frames;
        Ok(outcome)
    }

    // ========================================================================
    // CHECKS
    // ========================================================================

    fn verify(&self, scenario: ScenarioId, out: &Outcome) -> Option<String> {
        let stats = &out.summary.stats;
        let territory = &out.summary.territory;
        let m = &out.metrics;
        let mut v = Verdict::default();

        let unique = {
            let mut cells = out.captured().to_vec();
            cells.sort();
            cells.dedup();
            cells.len() == out.captured().len()
        };
        v.check(unique, || "a cell was captured twice".to_string());
        v.check(territory.cells_captured == stats.cells_captured, || {
            "tracker and detector disagree on captured cells".to_string()
        });

        match scenario {
            ScenarioId::CleanKilometer => {
                v.check((stats.distance_km - 1.0).abs() <= 0.005, || {
                    format!("distance {:.4} km, expected 1.000", stats.distance_km)
                });
                v.check(stats.duration_sec == 300, || {
                    format!("duration {} s, expected 300", stats.duration_sec)
                });
                v.check((stats.average_pace - 5.0).abs() <= 0.05, || {
                    format!("pace {:.3} min/km, expected 5.00", stats.average_pace)
                });
                v.check(m.accepted == 200, || format!("{} fixes accepted, expected 200", m.accepted));
                v.check(!out.captured().is_empty(), || "no cell captured".to_string());
            }

            ScenarioId::StandingStill => {
                v.check(stats.distance_km == 0.0, || {
                    format!("stationary runner covered {:.4} km", stats.distance_km)
                });
                v.check(m.jitter == m.fixes - 1, || {
                    format!("{} of {} fixes read as jitter", m.jitter, m.fixes - 1)
                });
                v.check(out.captured().is_empty(), || "stationary runner captured a cell".to_string());
            }

            ScenarioId::GpsTeleport => {
                v.check(m.teleports == m.glitches_injected, || {
                    format!("{} teleports for {} glitches", m.teleports, m.glitches_injected)
                });
                v.check(stats.distance_km <= out.truth_km + 1e-6, || {
                    format!("distance {:.4} km exceeds truth {:.4}", stats.distance_km, out.truth_km)
                });
                v.check(stats.distance_km >= out.truth_km - 0.012, || {
                    format!("distance {:.4} km far below truth {:.4}", stats.distance_km, out.truth_km)
                });
            }

            ScenarioId::NoisyCity => {
                let error = (stats.distance_km - out.truth_km).abs() / out.truth_km;
                v.check(error < 0.15, || {
                    format!("distance {:.3} km is {:.1}% off truth", stats.distance_km, error * 100.0)
                });
                v.check(m.low_accuracy == m.low_accuracy_injected, || {
                    format!("{} poor fixes dropped of {}", m.low_accuracy, m.low_accuracy_injected)
                });
                v.check(out.captured().len() >= 2, || {
                    format!("{} captures on a 2 km run", out.captured().len())
                });
            }

            ScenarioId::BoundaryDance => {
                v.check(out.captured().len() == 1, || {
                    format!("{} captures, expected exactly one", out.captured().len())
                });
                v.check(territory.cells_visited == 2, || {
                    format!("{} cells visited, expected 2", territory.cells_visited)
                });
                // The last oscillation fix is number 61
                v.check(out.capture_fixes.first().is_some_and(|&i| i > 61), || {
                    format!("captured during the oscillation at fix {:?}", out.capture_fixes)
                });
                let settled = out.frames.last().and_then(|f| cell_of((f.lat, f.lng), self.config.capture.resolution));
                v.check(settled.map(CellId::from) == out.captured().first().copied(), || {
                    "captured cell is not where the runner settled".to_string()
                });
            }

            ScenarioId::FlakyBackend => {
                let captured = out.captured().len() as u64;
                v.check(m.receipts_applied + m.unconfirmed == captured, || {
                    format!(
                        "{} confirmed + {} unconfirmed for {} captures",
                        m.receipts_applied, m.unconfirmed, captured
                    )
                });
                v.check(u64::from(territory.new_cells + territory.stolen_cells) == captured, || {
                    format!(
                        "{} new + {} stolen for {} captures",
                        territory.new_cells, territory.stolen_cells, captured
                    )
                });
                v.check(territory.unconfirmed.iter().all(|c| out.captured().contains(c)), || {
                    "unconfirmed cell outside the captured set".to_string()
                });
                v.check(m.stale_results == 0, || format!("{} stale results", m.stale_results));
            }

            ScenarioId::RestartFence => {
                let captured = out.captured().len() as u64;
                v.check(m.stale_results >= 1, || "no result from the first run was fenced".to_string());
                v.check(out.restarts_clean == vec![true], || "restart left state behind".to_string());
                v.check(u64::from(territory.new_cells + territory.stolen_cells) == captured, || {
                    format!(
                        "{} new + {} stolen for {} captures",
                        territory.new_cells, territory.stolen_cells, captured
                    )
                });
                v.check(m.receipts_applied == captured, || {
                    format!("{} receipts applied for {} captures", m.receipts_applied, captured)
                });
            }

            ScenarioId::TrafficLight => {
                let elapsed = out.frames.last().map_or(0.0, |f| f.time_sec);
                let paused = out.frames.get(101).map_or(0.0, |f| f.time_sec)
                    - out.frames.get(61).map_or(0.0, |f| f.time_sec);
                let expected = elapsed - paused;
                v.check((stats.duration_sec as f64 - expected).abs() <= 2.0, || {
                    format!("duration {} s, expected {:.0} s", stats.duration_sec, expected)
                });
                v.check((stats.distance_km - 0.6).abs() <= 0.03, || {
                    format!("distance {:.4} km, expected 0.600", stats.distance_km)
                });
                v.check(m.ignored == 40, || format!("{} fixes ignored while paused, expected 40", m.ignored));
            }

            ScenarioId::PermissionDenied => {
                v.check(out.start_error == Some(EnvError::PermissionDenied), || {
                    format!("start error {:?}, expected permission denied", out.start_error)
                });
                v.check(out.state == RunState::Idle, || format!("run left Idle: {:?}", out.state));
            }
        }

        v.into_reason()
    }
}

/// Oscillates across the east edge of a cell, then settles on the far side.
///
/// Scans east one meter at a time from `origin` for the first point in a
/// different cell, shifting the scan line north until a clean edge shows
/// up (one not touching a third cell near the settle points).
fn boundary_dance_route(
    origin: (f64, f64),
    start_ms: u64,
    resolution: h3o::Resolution,
) -> Result<Vec<Coordinate>, SimError> {
    for attempt in 0..8 {
        let line = offset(origin, 25.0 * attempt as f64, 0.0);
        let at = |east_m: f64| offset(line, 0.0, east_m);
        let cell = |east_m: f64| cell_of(at(east_m), resolution);

        let Some(home) = cell(0.0) else {
            continue;
        };
        let Some(edge) = (1..400).map(f64::from).find(|&m| cell(m) != Some(home)) else {
            continue;
        };
        let far = cell(edge);
        let clean = edge >= 6.0
            && cell(edge - 6.0) == Some(home)
            && [6.0, 10.0, 14.0].iter().all(|d| cell(edge + d) == far);
        if !clean {
            continue;
        }

        let (near, away) = (at(edge - 6.0), at(edge + 6.0));
        let mut points = Vec::with_capacity(66);
        for _ in 0..30 {
            points.push(away);
            points.push(near);
        }
        points.extend([away, at(edge + 10.0), at(edge + 14.0), at(edge + 10.0), at(edge + 14.0)]);

        return Ok(RouteBuilder::new(near, start_ms, 1_500).visit(&points).build());
    }
    Err(SimError::Setup("no clean cell edge near the origin".to_string()))
}
