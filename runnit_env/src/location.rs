//! Location source abstraction for the Runnit engine.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::Coordinate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Buffered fixes per subscription before the producer starts dropping.
const SUBSCRIPTION_BUFFER: usize = 64;

/// Abstraction over the device's positioning provider.
///
/// # Implementations
///
/// - **Device**: `ChannelLocationSource`, fed by a native or browser bridge
/// - **Simulation**: `SimLocationSource`, replaying a scripted route
///
/// # Fix Flow
///
/// ```text
/// Platform GPS             Source                    Engine
///   |                        |                          |
///   |-- fix ---------------->|                          |
///   |                        |-- FixSubscription ------>|
///   |                        |                          |-- next() -> fix
/// ```
#[async_trait]
pub trait LocationSource: Send + Sync + 'static {
    /// Asks the platform for location access.
    ///
    /// # Returns
    /// * `Ok(())` - Access granted
    /// * `Err(EnvError::PermissionDenied)` - The user refused
    async fn request_permission(&self) -> Result<(), EnvError>;

    /// Starts delivering fixes.
    ///
    /// Dropping the returned subscription unsubscribes synchronously: no
    /// fix is delivered through it afterwards.
    async fn subscribe(&self) -> Result<FixSubscription, EnvError>;

    /// Returns a single fresh fix (used to center the map before a run).
    async fn current_fix(&self) -> Result<Coordinate, EnvError>;
}

/// Receiving end of a fix stream.
#[derive(Debug)]
pub struct FixSubscription {
    rx: mpsc::Receiver<Coordinate>,
}

impl FixSubscription {
    /// Wraps a channel receiver.
    pub fn new(rx: mpsc::Receiver<Coordinate>) -> Self {
        Self { rx }
    }

    /// Creates a connected (sender, subscription) pair.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Coordinate>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }

    /// Waits for the next fix. `None` once the provider has gone away.
    pub async fn next(&mut self) -> Option<Coordinate> {
        self.rx.recv().await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SourceState {
    permission_granted: AtomicBool,
    subscriber: Mutex<Option<mpsc::Sender<Coordinate>>>,
    last_fix: Mutex<Option<Coordinate>>,
}

/// Location source fed by a platform bridge.
///
/// The native (or browser) layer holds a [`FixSender`] and pushes every
/// fix the OS reports; the engine consumes them through
/// [`LocationSource::subscribe`]. Only one subscription is live at a time;
/// subscribing again replaces the previous one.
#[derive(Clone)]
pub struct ChannelLocationSource {
    state: Arc<SourceState>,
}

/// Producer handle for a [`ChannelLocationSource`].
#[derive(Clone)]
pub struct FixSender {
    state: Arc<SourceState>,
}

impl ChannelLocationSource {
    /// Creates a source and its producer handle.
    pub fn new(permission_granted: bool) -> (Self, FixSender) {
        let state = Arc::new(SourceState {
            permission_granted: AtomicBool::new(permission_granted),
            subscriber: Mutex::new(None),
            last_fix: Mutex::new(None),
        });
        (
            Self { state: Arc::clone(&state) },
            FixSender { state },
        )
    }

    /// Returns true while a subscription is attached and not dropped.
    pub fn has_subscriber(&self) -> bool {
        lock(&self.state.subscriber)
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

impl FixSender {
    /// Records the platform's permission decision.
    pub fn set_permission(&self, granted: bool) {
        self.state.permission_granted.store(granted, Ordering::SeqCst);
    }

    /// Delivers a fix to the current subscriber.
    ///
    /// Returns `false` when nobody is subscribed or the subscriber's buffer
    /// is full; the fix is still remembered for `current_fix()`.
    pub fn push(&self, fix: Coordinate) -> bool {
        *lock(&self.state.last_fix) = Some(fix);

        let mut subscriber = lock(&self.state.subscriber);
        let delivered = match subscriber.as_ref() {
            Some(tx) => tx.try_send(fix),
            None => return false,
        };

        match delivered {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *subscriber = None;
                false
            }
        }
    }
}

#[async_trait]
impl LocationSource for ChannelLocationSource {
    async fn request_permission(&self) -> Result<(), EnvError> {
        if self.state.permission_granted.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EnvError::PermissionDenied)
        }
    }

    async fn subscribe(&self) -> Result<FixSubscription, EnvError> {
        self.request_permission().await?;
        let (tx, subscription) = FixSubscription::channel(SUBSCRIPTION_BUFFER);
        *lock(&self.state.subscriber) = Some(tx);
        Ok(subscription)
    }

    async fn current_fix(&self) -> Result<Coordinate, EnvError> {
        self.request_permission().await?;
        (*lock(&self.state.last_fix))
            .ok_or_else(|| EnvError::LocationUnavailable("no fix received yet".to_string()))
    }
}
