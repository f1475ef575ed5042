//! Piecewise composition of schedules

use tracing::debug;

use super::Schedule;
use crate::error::{Error, Result};

struct Stage {
    schedule: Box<dyn Schedule>,
    boundary: usize,
}

/// Ordered sequence of child schedules, each active from its boundary step
///
/// Evaluation delegates to the last child whose boundary is at or before the
/// queried step, with the step re-based to the child's local origin
/// (`step - boundary`). Children therefore compose without knowing their
/// position in the chain and can be tested in isolation.
pub struct Chain {
    stages: Vec<Stage>,
}

impl Chain {
    /// Create a chain from (schedule, boundary_step) pairs
    ///
    /// Fails when the sequence is empty or the boundaries are not strictly
    /// increasing.
    pub fn new(children: Vec<(Box<dyn Schedule>, usize)>) -> Result<Self> {
        if children.is_empty() {
            return Err(Error::config("schedule chain must have at least one stage"));
        }
        for pair in children.windows(2) {
            if pair[1].1 <= pair[0].1 {
                return Err(Error::config(format!(
                    "chain boundaries must be strictly increasing, got {} after {}",
                    pair[1].1, pair[0].1
                )));
            }
        }
        debug!(stages = children.len(), "schedule chain constructed");
        let stages = children
            .into_iter()
            .map(|(schedule, boundary)| Stage { schedule, boundary })
            .collect();
        Ok(Self { stages })
    }

    /// First step covered by the chain
    pub fn first_boundary(&self) -> usize {
        self.stages[0].boundary
    }
}

impl Schedule for Chain {
    fn name(&self) -> &str {
        "chain"
    }

    fn at(&self, step: usize) -> Result<f64> {
        let stage = self
            .stages
            .iter()
            .rev()
            .find(|stage| stage.boundary <= step)
            .ok_or_else(|| {
                Error::domain(format!(
                    "step {step} precedes the chain's first boundary {}",
                    self.first_boundary()
                ))
            })?;
        stage.schedule.at(step - stage.boundary)
    }
}
