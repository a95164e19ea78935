//! Simulation context implementing RunContext for deterministic testing.

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use runnit_env::RunContext;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Virtual time 0 maps to 2024-01-01 00:00:00 UTC.
const SIM_EPOCH_SECS: u64 = 1_704_067_200;

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `RunContext` using:
/// - A virtual clock that only moves when advanced
/// - A seeded ChaCha8 RNG from which independent streams are forked
/// - Simulated sleep that advances virtual time
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG shared by clones
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(SIM_EPOCH_SECS),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        *lock(&self.virtual_time_ns) += duration.as_nanos() as u64;
    }

    /// Moves virtual time forward to `time_ms`. Never moves it back.
    pub fn advance_to_ms(&self, time_ms: u64) {
        let mut time = lock(&self.virtual_time_ns);
        *time = (*time).max(time_ms.saturating_mul(1_000_000));
    }

    /// Returns the current virtual time in milliseconds.
    pub fn time_ms(&self) -> u64 {
        *lock(&self.virtual_time_ns) / 1_000_000
    }

    /// Unix milliseconds of virtual time 0.
    pub fn epoch_millis(&self) -> u64 {
        SIM_EPOCH_SECS * 1000
    }

    /// Forks an independent RNG stream.
    ///
    /// Streams are drawn from the master RNG in call order, so the same
    /// sequence of forks yields the same streams for the same seed.
    pub fn fork_rng(&self) -> ChaCha8Rng {
        let mut master = lock(&self.rng);
        ChaCha8Rng::from_rng(&mut *master).unwrap_or_else(|_| ChaCha8Rng::seed_from_u64(self.seed))
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl RunContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(*lock(&self.virtual_time_ns))
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Nothing else shares this clock's timeline; sleeping is advancing
        self.advance_time(duration);
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
