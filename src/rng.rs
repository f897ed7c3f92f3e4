//! Seeded, mutex-serialized randomness.
//!
//! One generator per run: concurrent draws are serialized so a run is
//! reproducible given the seed and the interleaving schedule.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<StdRng>>,
}

impl SharedRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Uniform integer in `[lo, hi]`.
    pub fn int_in(&self, lo: u64, hi: u64) -> u64 {
        let mut rng = self.inner.lock().expect("rng lock poisoned");
        rng.gen_range(lo..=hi)
    }

    /// Uniform value in `[0, 1)`.
    pub fn unit(&self) -> f64 {
        let mut rng = self.inner.lock().expect("rng lock poisoned");
        rng.gen::<f64>()
    }

    /// Bernoulli draw with probability `p`.
    pub fn chance(&self, p: f64) -> bool {
        self.unit() < p
    }
}
