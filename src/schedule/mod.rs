//! Learning rate schedules for training optimization
//!
//! Every schedule is a pure function of an externally supplied step index.
//! There are no internal counters to advance or serialize: resuming a run
//! only requires the host loop to resume feeding its own step count, which
//! makes checkpoint restore trivial.

mod chain;

pub use chain::Chain;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A deterministic mapping from training step to a scalar value
///
/// Typically consumed as a learning rate or learning rate multiplier.
/// Implementations hold no mutable state: evaluating the same step twice
/// always yields the same value.
pub trait Schedule: Send + Sync {
    /// Schedule name
    fn name(&self) -> &str;

    /// Value at the given step
    fn at(&self, step: usize) -> Result<f64>;
}

/// Schedule returning the same value at every step
#[derive(Debug, Clone)]
pub struct Constant {
    value: f64,
}

impl Constant {
    /// Create a new constant schedule
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl Schedule for Constant {
    fn name(&self) -> &str {
        "constant"
    }

    fn at(&self, _step: usize) -> Result<f64> {
        Ok(self.value)
    }
}

/// Linear interpolation from `start` to `end` over the warmup window
///
/// Steps at or beyond `warmup_steps` return `end`. A zero-length window
/// degenerates to a constant `end`.
#[derive(Debug, Clone)]
pub struct LinearWarmup {
    start: f64,
    end: f64,
    warmup_steps: usize,
}

impl LinearWarmup {
    /// Create a new linear warmup schedule
    pub fn new(start: f64, end: f64, warmup_steps: usize) -> Self {
        Self {
            start,
            end,
            warmup_steps,
        }
    }
}

impl Schedule for LinearWarmup {
    fn name(&self) -> &str {
        "linear_warmup"
    }

    fn at(&self, step: usize) -> Result<f64> {
        if step >= self.warmup_steps {
            return Ok(self.end);
        }
        let progress = step as f64 / self.warmup_steps as f64;
        Ok(self.start + (self.end - self.start) * progress)
    }
}

/// Half-cosine decay from `base` down to `min_value` over `total_steps`
///
/// Steps beyond `total_steps` clamp to `min_value`.
#[derive(Debug, Clone)]
pub struct CosineDecay {
    base: f64,
    total_steps: usize,
    min_value: f64,
}

impl CosineDecay {
    /// Create a new cosine decay schedule
    ///
    /// Fails when `total_steps` is zero.
    pub fn new(base: f64, total_steps: usize, min_value: f64) -> Result<Self> {
        if total_steps == 0 {
            return Err(Error::config("cosine decay requires total_steps >= 1"));
        }
        Ok(Self {
            base,
            total_steps,
            min_value,
        })
    }
}

impl Schedule for CosineDecay {
    fn name(&self) -> &str {
        "cosine_decay"
    }

    fn at(&self, step: usize) -> Result<f64> {
        let progress = step.min(self.total_steps) as f64 / self.total_steps as f64;
        let cosine_factor = 0.5 * (1.0 + (std::f64::consts::PI * progress).cos());
        Ok((self.base * cosine_factor).max(self.min_value))
    }
}

/// Declarative schedule configuration
///
/// A tree of schedule descriptions that [`build_schedule`] turns into a
/// boxed [`Schedule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Constant value at every step
    Constant {
        /// Value returned at every step
        value: f64,
    },
    /// Linear warmup from `start` to `end`
    LinearWarmup {
        /// Value at step 0
        start: f64,
        /// Value reached at the end of the warmup window
        end: f64,
        /// Length of the warmup window in steps
        warmup_steps: usize,
    },
    /// Cosine decay from `base` to `min_value`
    CosineDecay {
        /// Value at step 0
        base: f64,
        /// Number of steps over which to decay
        total_steps: usize,
        /// Floor value, held beyond `total_steps`
        min_value: f64,
    },
    /// Ordered sequence of child schedules with activation boundaries
    Chain {
        /// Child stages, sorted ascending by boundary
        stages: Vec<ChainStageConfig>,
    },
}

/// One stage of a [`ScheduleConfig::Chain`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStageConfig {
    /// Global step at which this stage becomes active
    pub boundary_step: usize,
    /// Schedule evaluated with steps re-based to this stage's origin
    pub schedule: ScheduleConfig,
}

/// Build a schedule from its configuration
pub fn build_schedule(config: &ScheduleConfig) -> Result<Box<dyn Schedule>> {
    match config {
        ScheduleConfig::Constant { value } => Ok(Box::new(Constant::new(*value))),
        ScheduleConfig::LinearWarmup {
            start,
            end,
            warmup_steps,
        } => Ok(Box::new(LinearWarmup::new(*start, *end, *warmup_steps))),
        ScheduleConfig::CosineDecay {
            base,
            total_steps,
            min_value,
        } => Ok(Box::new(CosineDecay::new(*base, *total_steps, *min_value)?)),
        ScheduleConfig::Chain { stages } => {
            let mut children = Vec::with_capacity(stages.len());
            for stage in stages {
                children.push((build_schedule(&stage.schedule)?, stage.boundary_step));
            }
            Ok(Box::new(Chain::new(children)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test]
    fn test_constant_schedule() {
        let schedule = Constant::new(0.001);

        assert_eq!(schedule.name(), "constant");
        for step in [0, 1, 17, 100_000] {
            assert_eq!(schedule.at(step).unwrap(), 0.001);
        }
    }

    #[test]
    fn test_linear_warmup_is_monotonic() {
        let schedule = LinearWarmup::new(0.0, 0.01, 100);

        let mut previous = schedule.at(0).unwrap();
        for step in 1..100 {
            let value = schedule.at(step).unwrap();
            assert!(value >= previous, "warmup decreased at step {step}");
            previous = value;
        }
    }

    #[test_case(0, 0.0 ; "at start")]
    #[test_case(50, 0.005 ; "midway")]
    #[test_case(100, 0.01 ; "at boundary")]
    #[test_case(5000, 0.01 ; "long after boundary")]
    fn test_linear_warmup_values(step: usize, expected: f64) {
        let schedule = LinearWarmup::new(0.0, 0.01, 100);
        assert_relative_eq!(schedule.at(step).unwrap(), expected);
    }

    #[test]
    fn test_linear_warmup_zero_window_is_constant_end() {
        let schedule = LinearWarmup::new(0.5, 0.01, 0);

        for step in [0, 1, 999] {
            assert_eq!(schedule.at(step).unwrap(), 0.01);
        }
    }

    #[test]
    fn test_cosine_decay_boundary_exactness() {
        let schedule = CosineDecay::new(0.001, 1000, 1e-5).unwrap();

        assert_relative_eq!(schedule.at(0).unwrap(), 0.001);
        assert_relative_eq!(schedule.at(1000).unwrap(), 1e-5);
        // Clamps past the horizon.
        assert_relative_eq!(schedule.at(5000).unwrap(), 1e-5);
    }

    #[test]
    fn test_cosine_decay_midpoint() {
        let schedule = CosineDecay::new(1.0, 100, 0.0).unwrap();
        assert_relative_eq!(schedule.at(50).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_cosine_decay_rejects_zero_horizon() {
        assert!(matches!(
            CosineDecay::new(0.001, 0, 0.0),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_build_schedule_from_json() {
        let json = r#"{
            "type": "chain",
            "stages": [
                {
                    "boundary_step": 0,
                    "schedule": {
                        "type": "linear_warmup",
                        "start": 0.0,
                        "end": 0.01,
                        "warmup_steps": 10
                    }
                },
                {
                    "boundary_step": 10,
                    "schedule": {
                        "type": "cosine_decay",
                        "base": 0.01,
                        "total_steps": 90,
                        "min_value": 0.0001
                    }
                }
            ]
        }"#;

        let config: ScheduleConfig = serde_json::from_str(json).unwrap();
        let schedule = build_schedule(&config).unwrap();

        assert_relative_eq!(schedule.at(0).unwrap(), 0.0);
        // The cosine stage sees local step 0 at the boundary.
        assert_relative_eq!(schedule.at(10).unwrap(), 0.01);
        assert_relative_eq!(schedule.at(100).unwrap(), 0.0001);
    }
}
