//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (randomness, time). Tests
//! run the engine against a seeded RNG, production uses OS entropy.

use std::time::Duration;

/// Abstract environment providing randomness, wall-clock time and sleeping.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// Feeds key generation, AEAD nonces and padding filler.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Sleeps for the specified duration.
    ///
    /// Only used by application glue (send jitter), never inside the engine.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Milliseconds since the Unix epoch, used for relay envelope timestamps.
    fn wall_clock_millis(&self) -> u64;

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
