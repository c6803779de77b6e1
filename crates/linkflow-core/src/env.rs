//! Environment abstraction.
//!
//! The engine never reaches for ambient randomness. Container ids and
//! generated link names draw from an [`Environment`] supplied at
//! construction, so simulations can replay a run from a seed.

use rand::RngCore;

/// Source of randomness for the engine.
pub trait Environment {
    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// A random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Production environment backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::thread_rng().fill_bytes(buffer);
    }
}
