//! Scripted location source for simulation.

use async_trait::async_trait;
use runnit_env::{Coordinate, EnvError, FixSubscription, LocationSource};

/// Replays a prepared route.
///
/// Every subscription receives the whole route up front and then ends, so
/// replay is independent of task scheduling.
#[derive(Debug, Clone)]
pub struct SimLocationSource {
    fixes: Vec<Coordinate>,
    permission_granted: bool,
}

impl SimLocationSource {
    pub fn new(fixes: Vec<Coordinate>) -> Self {
        Self {
            fixes,
            permission_granted: true,
        }
    }

    /// A source whose user refuses location access.
    pub fn denied(fixes: Vec<Coordinate>) -> Self {
        Self {
            fixes,
            permission_granted: false,
        }
    }

    pub fn fixes(&self) -> &[Coordinate] {
        &self.fixes
    }
}

#[async_trait]
impl LocationSource for SimLocationSource {
    async fn request_permission(&self) -> Result<(), EnvError> {
        if self.permission_granted {
            Ok(())
        } else {
            Err(EnvError::PermissionDenied)
        }
    }

    async fn subscribe(&self) -> Result<FixSubscription, EnvError> {
        self.request_permission().await?;

        let (tx, subscription) = FixSubscription::channel(self.fixes.len().max(1));
        for fix in &self.fixes {
            tx.try_send(*fix).map_err(|_| EnvError::SubscriptionClosed)?;
        }
        Ok(subscription)
    }

    async fn current_fix(&self) -> Result<Coordinate, EnvError> {
        self.request_permission().await?;
        self.fixes
            .first()
            .copied()
            .ok_or_else(|| EnvError::LocationUnavailable("empty route".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> Vec<Coordinate> {
        (0..3).map(|i| Coordinate::new(1.0, i as f64, i * 1000)).collect()
    }

    #[tokio::test]
    async fn test_replays_route_then_ends() {
        let source = SimLocationSource::new(route());
        let mut sub = source.subscribe().await.unwrap();

        let mut timestamps = Vec::new();
        while let Some(fix) = sub.next().await {
            timestamps.push(fix.timestamp);
        }
        assert_eq!(timestamps, vec![0, 1000, 2000]);
    }

    #[tokio::test]
    async fn test_denied_source() {
        let source = SimLocationSource::denied(route());
        assert_eq!(source.subscribe().await.unwrap_err(), EnvError::PermissionDenied);
        assert_eq!(source.current_fix().await.unwrap_err(), EnvError::PermissionDenied);
    }

    #[tokio::test]
    async fn test_current_fix_is_route_start() {
        let source = SimLocationSource::new(route());
        assert_eq!(source.current_fix().await.unwrap().timestamp, 0);

        let empty = SimLocationSource::new(Vec::new());
        assert!(matches!(
            empty.current_fix().await,
            Err(EnvError::LocationUnavailable(_))
        ));
    }
}
