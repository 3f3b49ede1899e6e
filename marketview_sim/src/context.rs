//! Simulation context implementing ViewContext for deterministic testing.

use async_trait::async_trait;
use marketview_env::{TaskHandle, ViewContext};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Simulation context backed by a virtual clock.
///
/// This implements `ViewContext` using:
/// - A virtual clock that only moves when advanced (or slept on)
/// - Seeded ChaCha8 streams so every random component replays exactly
///
/// The clock is shared and `sleep` adds to it. With one sleeper that is exact
/// pacing. With several tasks sleeping concurrently, every sleep moves the
/// shared clock, so time runs faster than any single task's cadence (two
/// tasks sleeping 16 ms each move it 32 ms). Harnesses that need exact pacing
/// for several actors advance the clock themselves, as `ScenarioRunner` does.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time += duration.as_nanos() as u64;
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time: Duration) {
        let mut current = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *current = time.as_nanos() as u64;
    }

    /// Independent RNG stream derived from the master seed.
    ///
    /// The same `(seed, stream)` pair always yields the same sequence.
    pub fn rng(&self, stream: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(stream);
        rng
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl ViewContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(*self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Additive across tasks; yield so other tasks observe the new time
        self.advance_time(duration);
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        TaskHandle::new(name, tokio::spawn(future))
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));

        ctx.set_time(Duration::from_millis(20));
        assert_eq!(ctx.now(), Duration::from_millis(20));
    }

    #[test]
    fn test_rng_streams_are_deterministic_and_distinct() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let a: u64 = ctx1.rng(1).gen();
        let b: u64 = ctx2.rng(1).gen();
        let c: u64 = ctx1.rng(2).gen();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        // Both should see the same time
        assert_eq!(ctx1.now(), ctx2.now());
        assert_eq!(ctx2.seed(), 42);
    }

    #[tokio::test]
    async fn test_concurrent_sleepers_add_up() {
        let ctx = SimContext::shared(7);
        let sleepers: Vec<_> = (0..2)
            .map(|i| {
                let task_ctx = Arc::clone(&ctx);
                ctx.spawn(&format!("sleeper-{i}"), async move {
                    task_ctx.sleep(Duration::from_millis(16)).await;
                })
            })
            .collect();
        while !sleepers.iter().all(|s| s.is_finished()) {
            tokio::task::yield_now().await;
        }
        assert_eq!(ctx.now(), Duration::from_millis(32));
    }

    #[tokio::test]
    async fn test_sleep_advances_virtual_clock() {
        let ctx = SimContext::new(7);
        ctx.sleep(Duration::from_millis(16)).await;
        assert_eq!(ctx.now(), Duration::from_millis(16));
        assert_eq!(ctx.system_time(), UNIX_EPOCH + Duration::from_secs(1704067200) + Duration::from_millis(16));
    }
}
