//! Production environment backed by OS entropy and the system clock.
//!
//! Non-deterministic by nature: keys, nonces and padding filler come from
//! getrandom, sleeping uses tokio timers.

use std::time::Duration;

use quillwire_core::Environment;

/// Production environment using getrandom and tokio time.
///
/// # Security
///
/// getrandom reads OS-level cryptographic randomness (`getrandom(2)` or
/// `/dev/urandom` on Linux, `BCryptGenRandom` on Windows). Every identity key,
/// AEAD nonce and padding byte the engine produces is drawn from here.
///
/// # Panics
///
/// Panics if the OS RNG fails. An engine without working randomness would
/// repeat nonces, so it must not continue.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_differ() {
        let env = SystemEnv::new();

        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        env.random_bytes(&mut first);
        env.random_bytes(&mut second);

        assert_ne!(first, second);
    }

    #[test]
    fn wall_clock_is_after_2020() {
        assert!(SystemEnv::new().wall_clock_millis() > 1_577_836_800_000);
    }

    #[tokio::test]
    async fn sleep_waits() {
        let env = SystemEnv::new();

        let start = tokio::time::Instant::now();
        env.sleep(Duration::from_millis(20)).await;

        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
