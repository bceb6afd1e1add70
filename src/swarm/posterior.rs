//! Beta-Bernoulli belief over a single principle-domain pair

use crate::config::validate_forgetting_factor;
use crate::error::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};

/// Posterior state for a single principle-domain pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    /// Alpha (successes + prior), never below 1
    pub alpha: f64,
    /// Beta (failures + prior), never below 1
    pub beta: f64,
    /// Effective number of own observations
    pub observations: u32,
}

impl Default for Posterior {
    fn default() -> Self {
        Self {
            alpha: 1.0, // Uniform prior
            beta: 1.0,
            observations: 0,
        }
    }
}

impl Posterior {
    /// Conjugate update with one binary outcome
    pub fn update(&mut self, success: bool) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        self.observations += 1;
    }

    /// Finite parameters, each at least the uniform prior's 1
    pub fn is_valid(&self) -> bool {
        self.alpha.is_finite() && self.beta.is_finite() && self.alpha >= 1.0 && self.beta >= 1.0
    }

    /// Mean success probability
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Variance (uncertainty)
    pub fn variance(&self) -> f64 {
        let sum = self.alpha + self.beta;
        (self.alpha * self.beta) / (sum * sum * (sum + 1.0))
    }

    /// Inverse variance in (0, 1], the weight this belief carries in a merge
    pub fn confidence(&self) -> f64 {
        1.0 / (1.0 + self.variance())
    }

    /// Exponential forgetting.
    ///
    /// Rebuilds alpha/beta from the prior plus `observations * factor` units
    /// of evidence split at the current mean ratio. Evidence merged from
    /// peers only survives through that ratio. `factor == 1.0` leaves the
    /// posterior untouched.
    pub fn decay(&mut self, factor: f64) -> Result<()> {
        validate_forgetting_factor(factor)?;
        if factor == 1.0 {
            return Ok(());
        }

        let effective = f64::from(self.observations) * factor;
        let ratio = self.mean();

        self.alpha = 1.0 + ratio * effective;
        self.beta = 1.0 + (1.0 - ratio) * effective;
        self.observations = effective.floor() as u32;
        Ok(())
    }

    /// Thompson sample from Beta(alpha, beta)
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        let u: f64 = rng.gen();
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.inverse_cdf(u),
            Err(_) => self.mean(),
        }
    }

    /// 95% credible interval
    pub fn credible_interval_95(&self) -> (f64, f64) {
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => (dist.inverse_cdf(0.025), dist.inverse_cdf(0.975)),
            Err(_) => (0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SwarmError;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_posterior_update() {
        let mut state = Posterior::default();
        assert!((state.mean() - 0.5).abs() < 1e-12);

        state.update(true);
        state.update(true);
        state.update(false);

        // Alpha = 3, Beta = 2, Mean = 3/5
        assert!((state.mean() - 0.6).abs() < 1e-12);
        assert_eq!(state.observations, 3);
    }

    #[test]
    fn test_ten_successes_then_ten_failures() {
        let mut state = Posterior::default();
        for _ in 0..10 {
            state.update(true);
        }
        for _ in 0..10 {
            state.update(false);
        }
        assert_eq!(state.alpha, 11.0);
        assert_eq!(state.beta, 11.0);
        assert_eq!(state.mean(), 0.5);
    }

    #[test]
    fn test_decay_identity_at_one() {
        let mut state = Posterior::default();
        for i in 0..7 {
            state.update(i % 3 != 0);
        }
        let before = state.clone();
        state.decay(1.0).unwrap();
        assert_eq!(state, before);
    }

    #[test]
    fn test_decay_balanced_posterior_keeps_mean() {
        let mut state = Posterior::default();
        for _ in 0..6 {
            state.update(true);
            state.update(false);
        }
        let mean_before = state.mean();
        let confidence_before = state.confidence();

        state.decay(0.9).unwrap();

        assert!((state.mean() - mean_before).abs() < 1e-9);
        assert_eq!(state.observations, 10); // floor(12 * 0.9)
        assert!(state.confidence() < confidence_before);
    }

    #[test]
    fn test_decay_pulls_toward_prior_without_crossing() {
        let mut state = Posterior::default();
        for _ in 0..20 {
            state.update(true);
        }
        let mean_before = state.mean();
        state.decay(0.5).unwrap();

        // Effective evidence 10 at ratio 21/22
        let ratio = 21.0 / 22.0;
        assert!((state.alpha - (1.0 + ratio * 10.0)).abs() < 1e-12);
        assert!((state.beta - (1.0 + (1.0 - ratio) * 10.0)).abs() < 1e-12);
        assert!(state.mean() < mean_before);
        assert!(state.mean() > 0.5);
    }

    #[test]
    fn test_decay_wipes_unobserved_evidence() {
        // Only merged (peer) evidence, no own observations
        let mut state = Posterior {
            alpha: 4.0,
            beta: 2.0,
            observations: 0,
        };
        state.decay(0.95).unwrap();
        assert_eq!(state, Posterior::default());
    }

    #[test]
    fn test_decay_rejects_out_of_range_factor() {
        let mut state = Posterior::default();
        for factor in [0.0, -0.5, 1.5, f64::NAN] {
            assert!(matches!(
                state.decay(factor),
                Err(SwarmError::InvalidParameter { .. })
            ));
        }
        assert_eq!(state, Posterior::default());
    }

    #[test]
    fn test_thompson_sampling() {
        let mut state = Posterior::default();
        for i in 0..20 {
            state.update(i % 5 != 0);
        }

        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<f64> = (0..1000).map(|_| state.sample(&mut rng)).collect();
        let avg: f64 = samples.iter().sum::<f64>() / samples.len() as f64;

        assert!(samples.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!((avg - state.mean()).abs() < 0.05);
    }

    #[test]
    fn test_credible_interval_narrows() {
        let prior = Posterior::default();
        let (lower, upper) = prior.credible_interval_95();
        assert!(lower < 0.1);
        assert!(upper > 0.9);

        let mut informed = Posterior::default();
        for i in 0..100 {
            informed.update(i % 10 < 7);
        }
        let (lower2, upper2) = informed.credible_interval_95();
        assert!(upper2 - lower2 < upper - lower);
    }

    proptest! {
        #[test]
        fn prop_bounds_hold_for_any_history(
            outcomes in prop::collection::vec(any::<bool>(), 0..200),
            decays in prop::collection::vec(0.01f64..=1.0, 0..200),
        ) {
            let mut state = Posterior::default();
            for (i, success) in outcomes.iter().enumerate() {
                state.update(*success);
                if let Some(factor) = decays.get(i) {
                    state.decay(*factor).unwrap();
                }
                prop_assert!(state.alpha >= 1.0);
                prop_assert!(state.beta >= 1.0);
                prop_assert!(state.mean() > 0.0 && state.mean() < 1.0);
            }
        }

        #[test]
        fn prop_update_moves_mean_strictly(
            alpha in 1.0f64..500.0,
            beta in 1.0f64..500.0,
        ) {
            let state = Posterior { alpha, beta, observations: 0 };

            let mut up = state.clone();
            up.update(true);
            prop_assert!(up.mean() > state.mean());

            let mut down = state.clone();
            down.update(false);
            prop_assert!(down.mean() < state.mean());
        }

        #[test]
        fn prop_decay_shrinks_observations_and_confidence(
            successes in 0u32..100,
            failures in 0u32..100,
            factor in 0.01f64..0.999,
        ) {
            prop_assume!(successes + failures > 0);
            let mut state = Posterior::default();
            for _ in 0..successes { state.update(true); }
            for _ in 0..failures { state.update(false); }
            let before = state.clone();

            state.decay(factor).unwrap();

            prop_assert!(state.observations < before.observations);
            prop_assert!(state.confidence() <= before.confidence() + 1e-12);
            prop_assert!(state.alpha >= 1.0 && state.beta >= 1.0);
        }
    }
}
