//! Sampling decisions for consistency checks.
//!
//! The tracker never draws random numbers itself; it asks a [`Sampler`].
//! Production code uses [`RandomSampler`], tests inject a [`FixedSampler`].

use std::fmt;

/// Decides whether a sampled measurement should be taken.
pub trait Sampler: Send + Sync + fmt::Debug {
    /// Returns `true` if a measurement with the given ratio should run.
    ///
    /// `ratio` is a probability in `[0, 1]`. A ratio of `1` (or more) always
    /// samples; a ratio of `0` (or less, or NaN) never does.
    fn should_sample(&self, ratio: f64) -> bool;
}

/// Samples with a uniform draw from a non-cryptographic RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn should_sample(&self, ratio: f64) -> bool {
        if ratio >= 1.0 {
            return true;
        }
        if ratio.is_nan() || ratio <= 0.0 {
            return false;
        }
        rand::random::<f64>() <= ratio
    }
}

/// Always returns the same decision.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub bool);

impl FixedSampler {
    /// A sampler that samples everything.
    pub const ALWAYS: Self = Self(true);
    /// A sampler that samples nothing.
    pub const NEVER: Self = Self(false);
}

impl Sampler for FixedSampler {
    fn should_sample(&self, _ratio: f64) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_sampler_bounds() {
        let sampler = RandomSampler;
        for _ in 0..100 {
            assert!(sampler.should_sample(1.0));
            assert!(sampler.should_sample(2.5));
            assert!(!sampler.should_sample(0.0));
            assert!(!sampler.should_sample(-1.0));
            assert!(!sampler.should_sample(f64::NAN));
        }
    }

    #[test]
    fn test_random_sampler_fractional_ratio_hits_both_outcomes() {
        let sampler = RandomSampler;
        let hits = (0..2_000).filter(|_| sampler.should_sample(0.5)).count();
        assert!(hits > 0 && hits < 2_000, "hits = {hits}");
    }

    #[test]
    fn test_fixed_sampler() {
        assert!(FixedSampler::ALWAYS.should_sample(0.0));
        assert!(!FixedSampler::NEVER.should_sample(1.0));
    }
}
