//! Per-agent random number generators
//!
//! With a run seed, every agent's generator is seeded from
//! `seed XOR (hash(agent id) * golden ratio)`, so one agent's draws never
//! depend on how many other agents exist or in what order they were built.
//! Without a seed, generators are seeded from the thread RNG.

use std::hash::{DefaultHasher, Hash, Hasher};

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::types::AgentId;

/// 64-bit fractional golden-ratio constant for seed mixing
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, Clone, Copy, Default)]
pub struct RngFactory {
    seed: Option<u64>,
}

impl RngFactory {
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn for_agent(&self, id: &AgentId) -> StdRng {
        match self.seed {
            Some(seed) => {
                // DefaultHasher::new uses fixed keys, so the hash is stable
                let mut hasher = DefaultHasher::new();
                id.hash(&mut hasher);
                StdRng::seed_from_u64(seed ^ hasher.finish().wrapping_mul(MIXING_CONSTANT))
            }
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }
}
