//! Score threshold policy for discovery validation
//!
//! Scores are three independent 0–10000 metrics assigned at validation
//! time: coherence, density, novelty. A discovery validates only if ALL
//! three clear their minimum — independent AND gates, not a weighted
//! average. The same three scores double as reward multipliers.

use serde::{Deserialize, Serialize};

/// Scores live on a 0–10000 fixed-point scale (10000 = 1.0).
pub const SCORE_SCALE: u64 = 10_000;

/// Minimum coherence score for validation
pub const MIN_COHERENCE_SCORE: u64 = 500;

/// Minimum density score for validation
pub const MIN_DENSITY_SCORE: u64 = 300;

/// Minimum novelty score for validation
pub const MIN_NOVELTY_SCORE: u64 = 300;

/// Stateless threshold policy: given three scores, decides pass/fail.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScoreValidator {
    pub min_coherence: u64,
    pub min_density: u64,
    pub min_novelty: u64,
}

impl Default for ScoreValidator {
    fn default() -> Self {
        Self {
            min_coherence: MIN_COHERENCE_SCORE,
            min_density: MIN_DENSITY_SCORE,
            min_novelty: MIN_NOVELTY_SCORE,
        }
    }
}

impl ScoreValidator {
    /// True iff every score clears its own gate.
    pub fn passes(&self, coherence: u64, density: u64, novelty: u64) -> bool {
        coherence >= self.min_coherence && density >= self.min_density && novelty >= self.min_novelty
    }
}

/// Reward for a validated discovery, in whole SYNTH:
/// `floor(coherence * density * novelty / 10000^2)`.
///
/// Max input product is 10000^3 = 1e12, so the intermediate fits u64,
/// but rewards accumulate into u128 balances.
pub fn reward_for(coherence: u64, density: u64, novelty: u64) -> u128 {
    (coherence as u128 * density as u128 * novelty as u128)
        / (SCORE_SCALE as u128 * SCORE_SCALE as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_gates_must_pass() {
        let policy = ScoreValidator::default();
        assert!(policy.passes(500, 300, 300));
        assert!(policy.passes(800, 500, 400));
        // Any single score below its gate forces a fail
        assert!(!policy.passes(499, 10_000, 10_000));
        assert!(!policy.passes(10_000, 299, 10_000));
        assert!(!policy.passes(10_000, 10_000, 299));
        assert!(!policy.passes(100, 100, 100));
    }

    #[test]
    fn test_reward_formula() {
        assert_eq!(reward_for(8000, 5000, 4000), 1600);
        assert_eq!(reward_for(10_000, 10_000, 10_000), 10_000);
        // Truncating division, never rounding up
        assert_eq!(reward_for(1, 1, 1), 0);
        assert_eq!(reward_for(500, 300, 300), 0);
        assert_eq!(reward_for(5000, 5000, 5000), 1250);
    }
}
