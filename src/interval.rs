//! Retry interval policies
//!
//! An [`IntervalPolicy`] maps a 1-based attempt number to the wait before
//! that attempt is retried. All variants live in one validated sum type;
//! the named constructors are the only way to build one, so an existing
//! policy is always in range.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use fusebox::IntervalPolicy;
//!
//! let policy = IntervalPolicy::exponential(Duration::from_millis(500), 2.0).unwrap();
//! assert_eq!(policy.wait_duration(1).unwrap(), Duration::from_millis(500));
//! assert_eq!(policy.wait_duration(4).unwrap(), Duration::from_millis(4000));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::errors::Error;

/// Initial interval used by [`IntervalPolicy::default`].
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
/// Multiplier used when an exponential constructor is given none.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Randomization factor used when a randomized constructor is given none.
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Smallest accepted initial interval.
const MIN_INITIAL_INTERVAL_MILLIS: u64 = 10;

type StepFn = Arc<dyn Fn(u64) -> u64 + Send + Sync>;

/// Policy mapping `attempt ∈ {1, 2, …}` to a non-negative wait.
#[derive(Clone)]
pub struct IntervalPolicy {
    initial_millis: u64,
    kind: Kind,
}

#[derive(Clone)]
enum Kind {
    Fixed,
    Randomized { factor: f64 },
    Exponential { multiplier: f64 },
    ExponentialRandom { multiplier: f64, factor: f64 },
    Custom { step: StepFn },
}

impl IntervalPolicy {
    /// Same wait before every attempt.
    pub fn fixed(initial: Duration) -> Result<Self, Error> {
        Ok(Self {
            initial_millis: check_initial_interval(initial)?,
            kind: Kind::Fixed,
        })
    }

    /// Uniform draw from `[initial·(1−factor), initial·(1+factor)]` on every
    /// attempt.
    pub fn randomized(initial: Duration, factor: f64) -> Result<Self, Error> {
        check_randomization_factor(factor)?;
        Ok(Self {
            initial_millis: check_initial_interval(initial)?,
            kind: Kind::Randomized { factor },
        })
    }

    /// `initial · multiplier^(attempt−1)`, truncated toward zero at every
    /// multiplication step.
    pub fn exponential(initial: Duration, multiplier: f64) -> Result<Self, Error> {
        check_multiplier(multiplier)?;
        Ok(Self {
            initial_millis: check_initial_interval(initial)?,
            kind: Kind::Exponential { multiplier },
        })
    }

    /// Exponential growth with the randomized draw applied to the sample for
    /// the given attempt.
    pub fn exponential_random(
        initial: Duration,
        multiplier: f64,
        factor: f64,
    ) -> Result<Self, Error> {
        check_multiplier(multiplier)?;
        check_randomization_factor(factor)?;
        Ok(Self {
            initial_millis: check_initial_interval(initial)?,
            kind: Kind::ExponentialRandom { multiplier, factor },
        })
    }

    /// `step` applied `attempt − 1` times to the initial interval, in whole
    /// milliseconds.
    pub fn custom<F>(initial: Duration, step: F) -> Result<Self, Error>
    where
        F: Fn(u64) -> u64 + Send + Sync + 'static,
    {
        Ok(Self {
            initial_millis: check_initial_interval(initial)?,
            kind: Kind::Custom {
                step: Arc::new(step),
            },
        })
    }

    /// The wait before the given 1-based attempt.
    ///
    /// Randomized variants draw from the thread RNG; use [`Self::sample_with`]
    /// to supply a seeded one.
    pub fn wait_duration(&self, attempt: u64) -> Result<Duration, Error> {
        self.sample_with(&mut rand::rng(), attempt)
    }

    /// [`Self::wait_duration`] with a caller-supplied RNG.
    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R, attempt: u64) -> Result<Duration, Error> {
        if attempt < 1 {
            return Err(Error::invalid_argument("attempt", "must be at least 1"));
        }
        let millis = match &self.kind {
            Kind::Fixed => self.initial_millis,
            Kind::Randomized { factor } => randomize(rng, self.initial_millis, *factor),
            Kind::Exponential { multiplier } => {
                let multiplier = *multiplier;
                iterate(self.initial_millis, attempt, |wait| {
                    (wait as f64 * multiplier) as u64
                })
            }
            Kind::ExponentialRandom { multiplier, factor } => {
                let multiplier = *multiplier;
                let sample = iterate(self.initial_millis, attempt, |wait| {
                    (wait as f64 * multiplier) as u64
                });
                randomize(rng, sample, *factor)
            }
            Kind::Custom { step } => iterate(self.initial_millis, attempt, |wait| step(wait)),
        };
        Ok(Duration::from_millis(millis))
    }
}

impl Default for IntervalPolicy {
    /// Fixed wait of [`DEFAULT_INITIAL_INTERVAL`].
    fn default() -> Self {
        Self {
            initial_millis: DEFAULT_INITIAL_INTERVAL.as_millis() as u64,
            kind: Kind::Fixed,
        }
    }
}

impl fmt::Debug for IntervalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("IntervalPolicy");
        s.field("initial_millis", &self.initial_millis);
        match &self.kind {
            Kind::Fixed => s.field("kind", &"Fixed"),
            Kind::Randomized { factor } => s.field("kind", &"Randomized").field("factor", factor),
            Kind::Exponential { multiplier } => {
                s.field("kind", &"Exponential").field("multiplier", multiplier)
            }
            Kind::ExponentialRandom { multiplier, factor } => s
                .field("kind", &"ExponentialRandom")
                .field("multiplier", multiplier)
                .field("factor", factor),
            Kind::Custom { .. } => s.field("kind", &"Custom"),
        };
        s.finish()
    }
}

/// Apply `step` to the initial wait `attempt − 1` times.
fn iterate(initial: u64, attempt: u64, step: impl Fn(u64) -> u64) -> u64 {
    let mut wait = initial;
    for _ in 1..attempt {
        wait = step(wait);
    }
    wait
}

/// Uniform draw from `[current·(1−factor), current·(1+factor)]`, truncated
/// toward zero to whole milliseconds.
fn randomize<R: Rng + ?Sized>(rng: &mut R, current: u64, factor: f64) -> u64 {
    if factor == 0.0 {
        return current;
    }
    let delta = factor * current as f64;
    let low = current as f64 - delta;
    let high = current as f64 + delta;
    rng.random_range(low..=high) as u64
}

fn check_initial_interval(initial: Duration) -> Result<u64, Error> {
    let millis = u64::try_from(initial.as_millis())
        .map_err(|_| Error::invalid_argument("initial_interval", "exceeds the supported range"))?;
    if millis < MIN_INITIAL_INTERVAL_MILLIS {
        return Err(Error::invalid_argument(
            "initial_interval",
            format!("{millis} ms is below the {MIN_INITIAL_INTERVAL_MILLIS} ms minimum"),
        ));
    }
    Ok(millis)
}

fn check_multiplier(multiplier: f64) -> Result<(), Error> {
    if multiplier.is_nan() || multiplier < 1.0 {
        return Err(Error::invalid_argument(
            "multiplier",
            format!("{multiplier} is below the 1.0 minimum"),
        ));
    }
    Ok(())
}

fn check_randomization_factor(factor: f64) -> Result<(), Error> {
    if factor.is_nan() || factor < 0.0 || factor >= 1.0 {
        return Err(Error::invalid_argument(
            "randomization_factor",
            format!("{factor} is outside [0.0, 1.0)"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn millis(policy: &IntervalPolicy, attempt: u64) -> u64 {
        policy.wait_duration(attempt).unwrap().as_millis() as u64
    }

    #[test]
    fn test_fixed_returns_initial_for_every_attempt() {
        let policy = IntervalPolicy::fixed(Duration::from_millis(500)).unwrap();
        for attempt in [1, 2, 7, 100] {
            assert_eq!(millis(&policy, attempt), 500);
        }
    }

    #[test]
    fn test_attempt_zero_is_rejected() {
        let policy = IntervalPolicy::default();
        let err = policy.wait_duration(0).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument { field: "attempt", .. }
        ));
    }

    #[test]
    fn test_initial_below_ten_millis_is_rejected() {
        let err = IntervalPolicy::fixed(Duration::from_millis(9)).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument {
                field: "initial_interval",
                ..
            }
        ));
    }

    #[test]
    fn test_multiplier_below_one_is_rejected() {
        let err = IntervalPolicy::exponential(Duration::from_millis(500), 0.99).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument { field: "multiplier", .. }
        ));
    }

    #[test]
    fn test_randomization_factor_bounds() {
        for bad in [-0.1, 1.0, 1.5, f64::NAN] {
            let err = IntervalPolicy::randomized(Duration::from_millis(500), bad).unwrap_err();
            assert!(
                matches!(
                    err,
                    Error::InvalidArgument {
                        field: "randomization_factor",
                        ..
                    }
                ),
                "factor {bad} should be rejected"
            );
        }
        IntervalPolicy::randomized(Duration::from_millis(500), 0.0).unwrap();
        IntervalPolicy::randomized(Duration::from_millis(500), 0.999).unwrap();
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let policy = IntervalPolicy::exponential(Duration::from_millis(500), 2.0).unwrap();
        assert_eq!(millis(&policy, 1), 500);
        assert_eq!(millis(&policy, 2), 1000);
        assert_eq!(millis(&policy, 3), 2000);
        assert_eq!(millis(&policy, 4), 4000);
    }

    #[test]
    fn test_exponential_truncates_toward_zero_each_step() {
        let policy = IntervalPolicy::exponential(Duration::from_millis(500), 1.5).unwrap();
        assert_eq!(millis(&policy, 1), 500);
        assert_eq!(millis(&policy, 2), 750);
        assert_eq!(millis(&policy, 3), 1125);
        // 1125 * 1.5 = 1687.5, truncated before the next step
        assert_eq!(millis(&policy, 4), 1687);
    }

    #[test]
    fn test_exponential_matches_custom_with_same_step() {
        let exponential = IntervalPolicy::exponential(Duration::from_millis(500), 1.5).unwrap();
        let custom =
            IntervalPolicy::custom(Duration::from_millis(500), |wait| (wait as f64 * 1.5) as u64)
                .unwrap();
        for attempt in 1..=10 {
            assert_eq!(millis(&exponential, attempt), millis(&custom, attempt));
        }
    }

    #[test]
    fn test_custom_step_applied_attempt_minus_one_times() {
        let policy = IntervalPolicy::custom(Duration::from_millis(500), |wait| wait + 100).unwrap();
        assert_eq!(millis(&policy, 1), 500);
        assert_eq!(millis(&policy, 2), 600);
        assert_eq!(millis(&policy, 5), 900);
    }

    #[test]
    fn test_randomized_draws_stay_in_bounds() {
        let policy =
            IntervalPolicy::randomized(Duration::from_millis(500), DEFAULT_RANDOMIZATION_FACTOR)
                .unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let wait = policy
                .sample_with(&mut rng, 1)
                .unwrap()
                .as_millis() as u64;
            assert!((250..=750).contains(&wait), "draw {wait} out of bounds");
        }
    }

    #[test]
    fn test_exponential_random_bounds_follow_the_sample() {
        let policy =
            IntervalPolicy::exponential_random(Duration::from_millis(500), 2.0, 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        // attempt 3 samples 2000ms, so draws live in [1000, 3000]
        for _ in 0..1000 {
            let wait = policy
                .sample_with(&mut rng, 3)
                .unwrap()
                .as_millis() as u64;
            assert!((1000..=3000).contains(&wait), "draw {wait} out of bounds");
        }
    }

    #[test]
    fn test_randomized_produces_variance() {
        let policy = IntervalPolicy::randomized(Duration::from_millis(500), 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            seen.insert(policy.sample_with(&mut rng, 1).unwrap());
        }
        assert!(seen.len() >= 2, "expected variance, got {} value(s)", seen.len());
    }

    #[test]
    fn test_default_policy_is_fixed_at_default_interval() {
        let policy = IntervalPolicy::default();
        assert_eq!(millis(&policy, 1), 500);
        assert_eq!(millis(&policy, 9), 500);
    }
}
