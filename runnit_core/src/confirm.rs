//! Capture confirmation against the hosted backend.
//!
//! Ownership is authoritative server-side, but a run never waits for it:
//! the session hands each capture to [`confirm_with_retry`] on a detached
//! task and folds the receipt back in later.

use crate::territory::{CaptureReceipt, CapturedCellEvent, CellId};
use async_trait::async_trait;
use runnit_env::{EnvError, RunContext};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Backend call that records a capture and reports the previous owner.
#[async_trait]
pub trait CaptureConfirmer: Send + Sync + 'static {
    async fn confirm_capture(
        &self,
        cell: CellId,
        lat: f64,
        lng: f64,
    ) -> Result<CaptureReceipt, EnvError>;
}

/// Retry schedule for failed confirmations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationPolicy {
    /// Total attempts including the first (default: 3)
    pub max_attempts: u32,

    /// Wait before the second attempt (default: 500 ms)
    pub initial_backoff_ms: u64,

    /// Growth factor between waits (default: 2)
    pub backoff_multiplier: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2,
        }
    }
}

impl ConfirmationPolicy {
    /// Wait after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.backoff_multiplier).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

/// Confirms one capture, retrying with exponential backoff.
///
/// Every failure is logged. Returns the last error once the attempts are
/// exhausted; the caller decides how to record the unconfirmed cell.
pub async fn confirm_with_retry<Ctx, C>(
    ctx: &Ctx,
    confirmer: &C,
    policy: &ConfirmationPolicy,
    event: &CapturedCellEvent,
) -> Result<CaptureReceipt, EnvError>
where
    Ctx: RunContext,
    C: CaptureConfirmer + ?Sized,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match confirmer.confirm_capture(event.cell_id, event.lat, event.lng).await {
            Ok(receipt) => return Ok(receipt),
            Err(e) if attempt < attempts => {
                let backoff = policy.backoff_after(attempt);
                warn!(
                    cell = %event.cell_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "capture confirmation failed, retrying"
                );
                ctx.sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(cell = %event.cell_id, attempts, error = %e, "capture confirmation gave up");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnit_env::TokioContext;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then reports `owner`.
    struct FlakyConfirmer {
        failures: u32,
        calls: AtomicU32,
        owner: Option<String>,
    }

    #[async_trait]
    impl CaptureConfirmer for FlakyConfirmer {
        async fn confirm_capture(
            &self,
            _cell: CellId,
            _lat: f64,
            _lng: f64,
        ) -> Result<CaptureReceipt, EnvError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(EnvError::rpc("backend unreachable"))
            } else {
                Ok(CaptureReceipt { previous_owner: self.owner.clone() })
            }
        }
    }

    fn event() -> CapturedCellEvent {
        CapturedCellEvent {
            cell_id: CellId::from_raw(0x8928308280fffff),
            lat: 37.7749,
            lng: -122.4194,
            timestamp: 2_000,
            is_new: true,
            was_stolen: false,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = ConfirmationPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let ctx = TokioContext::new();
        let confirmer = FlakyConfirmer {
            failures: 2,
            calls: AtomicU32::new(0),
            owner: Some("rival".to_string()),
        };

        let receipt = confirm_with_retry(&ctx, &confirmer, &ConfirmationPolicy::default(), &event())
            .await
            .unwrap();

        assert!(receipt.was_stolen());
        assert_eq!(confirmer.calls.load(Ordering::SeqCst), 3);
        // 500 ms + 1000 ms of backoff on the virtual clock
        assert!(ctx.now() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let ctx = TokioContext::new();
        let confirmer = FlakyConfirmer {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            owner: None,
        };

        let err = confirm_with_retry(&ctx, &confirmer, &ConfirmationPolicy::default(), &event())
            .await
            .unwrap_err();

        assert!(matches!(err, EnvError::Rpc(_)));
        assert_eq!(confirmer.calls.load(Ordering::SeqCst), 3);
    }
}
