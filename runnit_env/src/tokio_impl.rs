//! On-device [`RunContext`] on the Tokio runtime.

use crate::RunContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Context for a run on the phone.
///
/// Both clocks advance together: the wall clock is read once, when the
/// context is created, and from then on moves with the monotonic Tokio
/// clock. A network time correction during a run therefore cannot make
/// `finished_at - started_at` disagree with the ticked duration. Under a
/// paused Tokio clock both clocks are virtual.
pub struct TokioContext {
    start: Instant,
    wall_anchor: SystemTime,
}

impl TokioContext {
    pub fn new() -> Self {
        Self::anchored_at(SystemTime::now())
    }

    /// Context whose wall clock reads `anchor` at creation.
    pub fn anchored_at(anchor: SystemTime) -> Self {
        Self {
            start: Instant::now(),
            wall_anchor: anchor,
        }
    }

    /// Shared context for the session and its confirmation tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_anchor + self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    const RUN_START_MS: u64 = 1_700_000_000_000;

    #[tokio::test(start_paused = true)]
    async fn test_tick_clock_follows_tokio_time() {
        let ctx = TokioContext::new();
        let before = ctx.now();
        ctx.sleep(Duration::from_millis(1_000)).await;

        let waited = ctx.now() - before;
        assert!(waited >= Duration::from_millis(1_000));
        assert!(waited < Duration::from_millis(1_002));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timestamps_move_with_tick_clock() {
        let ctx = TokioContext::anchored_at(UNIX_EPOCH + Duration::from_millis(RUN_START_MS));
        assert_eq!(ctx.unix_millis(), RUN_START_MS);

        ctx.sleep(Duration::from_millis(1_500)).await;
        assert!((RUN_START_MS + 1_500..RUN_START_MS + 1_502).contains(&ctx.unix_millis()));
        assert_eq!(ctx.unix_millis() - RUN_START_MS, ctx.now().as_millis() as u64);
    }

    #[tokio::test]
    async fn test_confirmation_task_runs_detached() {
        let ctx = TokioContext::shared();
        let (tx, rx) = tokio::sync::oneshot::channel();
        ctx.spawn("confirm-capture", async move {
            let _ = tx.send(7u32);
        });

        assert_eq!(rx.await.ok(), Some(7));
    }

    #[test]
    fn test_device_is_unseeded() {
        let ctx = TokioContext::new();
        assert_eq!(ctx.seed(), 0);
        assert!(ctx.unix_millis() > RUN_START_MS);
    }
}
