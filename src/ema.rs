//! Exponential moving average shadowing of model parameters
//!
//! A [`ShadowAverager`] keeps a smoothed copy of a model's weights alongside
//! the live, directly trained ones. The smoothed copy often evaluates and
//! exports better than the raw final weights. The averager is driven by the
//! host training loop: it never counts steps itself, so a resumed run only
//! has to keep feeding its own step index and the bias-correction semantics
//! carry over without any averager state to restore.

use std::collections::HashMap;

use candle_core::Tensor;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::params::ParameterSet;

/// Averager mode, toggled by `apply`/`restore`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AveragerMode {
    /// Normal operation: `update` advances the shadow values
    Training,
    /// Shadow weights are currently written into the live parameters
    Evaluating,
}

/// EMA shadow copy of a parameter set
///
/// The key set is fixed at construction; every later call must present a
/// parameter set with exactly those keys and shapes.
///
/// # Example
/// ```ignore
/// let mut averager = ShadowAverager::new(&params, 0.999, true)?;
///
/// // Training loop, after each optimizer step:
/// averager.update(step, &params)?;
///
/// // Around evaluation:
/// averager.apply(&params)?;
/// let metrics = evaluate(&model)?;
/// averager.restore(&params)?;
/// ```
pub struct ShadowAverager {
    /// Shadow value per parameter name, exclusively owned
    shadow: HashMap<String, Tensor>,
    /// Live values cached by `apply`, written back by `restore`
    backup: HashMap<String, Tensor>,
    /// Decay rate in (0, 1)
    decay: f64,
    /// Whether to warm the effective decay up over early steps
    bias_correction: bool,
    mode: AveragerMode,
}

impl ShadowAverager {
    /// Create an averager, snapshotting the initial values as the shadow
    ///
    /// Fails when `decay` lies outside `(0, 1)` or the set is empty. The
    /// snapshot is a deep copy: later training steps do not disturb it.
    pub fn new(initial: &ParameterSet, decay: f64, bias_correction: bool) -> Result<Self> {
        if !(0.0 < decay && decay < 1.0) {
            return Err(Error::config(format!(
                "EMA decay must lie in (0, 1), got {decay}"
            )));
        }
        if initial.is_empty() {
            return Err(Error::config("cannot average an empty parameter set"));
        }

        let mut shadow = HashMap::with_capacity(initial.len());
        for (name, var) in initial.iter() {
            shadow.insert(name.clone(), var.as_tensor().copy()?);
        }

        info!(
            params = shadow.len(),
            decay, bias_correction, "shadow averager initialized"
        );
        Ok(Self {
            shadow,
            backup: HashMap::new(),
            decay,
            bias_correction,
            mode: AveragerMode::Training,
        })
    }

    /// Decay actually used at the given step
    ///
    /// With bias correction on, early steps use
    /// `min(decay, (1 + step) / (10 + step))` so the shadow is not dominated
    /// by its initial value before enough observations have accumulated.
    pub fn effective_decay(&self, step: usize) -> f64 {
        if self.bias_correction {
            self.decay
                .min((1.0 + step as f64) / (10.0 + step as f64))
        } else {
            self.decay
        }
    }

    /// Blend the live values into the shadow: `s = d * s + (1 - d) * live`
    ///
    /// Steps must be supplied in non-decreasing order for the bias-corrected
    /// decay to be meaningful; the caller owns that ordering. Only valid
    /// while training.
    pub fn update(&mut self, step: usize, live: &ParameterSet) -> Result<()> {
        if self.mode != AveragerMode::Training {
            return Err(Error::state(
                "update while evaluating would average untrained values; call restore first",
            ));
        }
        self.check_consistent(live)?;

        let d = self.effective_decay(step);
        for (name, shadow) in self.shadow.iter_mut() {
            let live_var = live
                .get(name)
                .ok_or_else(|| Error::key_mismatch(format!("missing parameter '{name}'")))?;
            let scaled_shadow = shadow.affine(d, 0.0)?;
            let scaled_live = live_var.as_tensor().affine(1.0 - d, 0.0)?;
            *shadow = (&scaled_shadow + &scaled_live)?;
        }
        Ok(())
    }

    /// Write the shadow values into the live parameters for evaluation
    ///
    /// The pre-overwrite live values are cached so [`restore`] can put them
    /// back. Fails when already evaluating.
    ///
    /// [`restore`]: ShadowAverager::restore
    pub fn apply(&mut self, live: &ParameterSet) -> Result<()> {
        if self.mode == AveragerMode::Evaluating {
            return Err(Error::state(
                "apply called twice without an intervening restore",
            ));
        }
        self.check_consistent(live)?;

        // Cache everything before touching any live value, so a failed copy
        // cannot leave the set half-overwritten with no full backup.
        let mut backup = HashMap::with_capacity(live.len());
        for name in self.shadow.keys() {
            let live_var = live
                .get(name)
                .ok_or_else(|| Error::key_mismatch(format!("missing parameter '{name}'")))?;
            backup.insert(name.clone(), live_var.as_tensor().copy()?);
        }
        for (name, shadow) in &self.shadow {
            let live_var = live
                .get(name)
                .ok_or_else(|| Error::key_mismatch(format!("missing parameter '{name}'")))?;
            live_var.set(shadow)?;
        }

        self.backup = backup;
        self.mode = AveragerMode::Evaluating;
        debug!("shadow weights applied, live weights cached");
        Ok(())
    }

    /// Write the cached pre-`apply` values back into the live parameters
    ///
    /// Discards the cache and returns to training mode. Fails when not
    /// currently evaluating.
    pub fn restore(&mut self, live: &ParameterSet) -> Result<()> {
        if self.mode != AveragerMode::Evaluating {
            return Err(Error::state("restore without a preceding apply"));
        }
        self.check_consistent(live)?;

        for (name, cached) in &self.backup {
            let live_var = live
                .get(name)
                .ok_or_else(|| Error::key_mismatch(format!("missing parameter '{name}'")))?;
            live_var.set(cached)?;
        }

        self.backup = HashMap::new();
        self.mode = AveragerMode::Training;
        debug!("live weights restored");
        Ok(())
    }

    /// Current shadow value for a parameter
    pub fn shadow(&self, name: &str) -> Option<&Tensor> {
        self.shadow.get(name)
    }

    /// All current shadow values, for the host loop to checkpoint
    pub fn shadow_values(&self) -> &HashMap<String, Tensor> {
        &self.shadow
    }

    /// Configured decay rate
    pub fn decay(&self) -> f64 {
        self.decay
    }

    /// Current mode
    pub fn mode(&self) -> AveragerMode {
        self.mode
    }

    /// Verify the given set matches the fixed key set and shapes
    fn check_consistent(&self, live: &ParameterSet) -> Result<()> {
        let mut missing: Vec<&str> = self
            .shadow
            .keys()
            .filter(|name| !live.contains(name))
            .map(String::as_str)
            .collect();
        let mut unexpected: Vec<&str> = live
            .iter()
            .filter(|(name, _)| !self.shadow.contains_key(*name))
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            missing.sort_unstable();
            unexpected.sort_unstable();
            return Err(Error::key_mismatch(format!(
                "missing {missing:?}, unexpected {unexpected:?}"
            )));
        }

        for (name, shadow) in &self.shadow {
            let live_var = live
                .get(name)
                .ok_or_else(|| Error::key_mismatch(format!("missing parameter '{name}'")))?;
            if live_var.dims() != shadow.dims() {
                return Err(Error::shape_mismatch(format!(
                    "parameter '{name}': expected {:?}, got {:?}",
                    shadow.dims(),
                    live_var.dims()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::{Device, Var};

    fn param_set(entries: &[(&str, &[f32])]) -> ParameterSet {
        let mut set = ParameterSet::new();
        for (name, data) in entries {
            let t = Tensor::from_vec(data.to_vec(), data.len(), &Device::Cpu).unwrap();
            set.insert(*name, Var::from_tensor(&t).unwrap());
        }
        set
    }

    fn set_values(set: &ParameterSet, name: &str, data: &[f32]) {
        let t = Tensor::from_vec(data.to_vec(), data.len(), &Device::Cpu).unwrap();
        set.get(name).unwrap().set(&t).unwrap();
    }

    fn values(set: &ParameterSet, name: &str) -> Vec<f32> {
        set.get(name).unwrap().as_tensor().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_rejects_bad_decay() {
        let params = param_set(&[("w", &[1.0])]);
        for decay in [0.0, 1.0, -0.5, 1.5] {
            assert!(matches!(
                ShadowAverager::new(&params, decay, false),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn test_rejects_empty_set() {
        let params = ParameterSet::new();
        assert!(matches!(
            ShadowAverager::new(&params, 0.9, false),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_snapshot_is_independent_of_live_values() {
        let params = param_set(&[("w", &[1.0, 2.0])]);
        let averager = ShadowAverager::new(&params, 0.9, false).unwrap();

        set_values(&params, "w", &[5.0, 5.0]);
        let shadow = averager.shadow("w").unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(shadow, vec![1.0, 2.0]);
    }

    #[test]
    fn test_ema_converges_to_constant_input() {
        let params = param_set(&[("w", &[0.0])]);
        let mut averager = ShadowAverager::new(&params, 0.95, false).unwrap();

        set_values(&params, "w", &[3.0]);
        for step in 0..500 {
            averager.update(step, &params).unwrap();
        }

        let shadow = averager.shadow("w").unwrap().to_vec1::<f32>().unwrap();
        assert_relative_eq!(shadow[0], 3.0, epsilon = 1e-4);
    }

    #[test]
    fn test_bias_corrected_decay_warmup() {
        let params = param_set(&[("w", &[1.0])]);
        let mut averager = ShadowAverager::new(&params, 0.9, true).unwrap();

        assert_relative_eq!(averager.effective_decay(0), 0.1);
        assert_relative_eq!(averager.effective_decay(1), 2.0 / 11.0);
        // Far enough in, the configured decay wins.
        assert_relative_eq!(averager.effective_decay(100_000), 0.9);

        set_values(&params, "w", &[2.0]);
        averager.update(0, &params).unwrap();
        let shadow = averager.shadow("w").unwrap().to_vec1::<f32>().unwrap();
        assert_relative_eq!(shadow[0], 1.9, epsilon = 1e-6);

        averager.update(1, &params).unwrap();
        let shadow = averager.shadow("w").unwrap().to_vec1::<f32>().unwrap();
        assert_relative_eq!(shadow[0], 1.981_818_2, epsilon = 1e-5);
    }

    #[test]
    fn test_apply_restore_round_trip_is_identity() {
        let params = param_set(&[("w", &[1.5, -2.5]), ("b", &[0.25])]);
        let mut averager = ShadowAverager::new(&params, 0.5, false).unwrap();

        set_values(&params, "w", &[4.0, 4.0]);
        set_values(&params, "b", &[-1.0]);
        averager.update(0, &params).unwrap();

        let live_w = values(&params, "w");
        let live_b = values(&params, "b");

        averager.apply(&params).unwrap();
        assert_eq!(averager.mode(), AveragerMode::Evaluating);
        // Live parameters now hold the shadow values.
        assert_relative_eq!(values(&params, "w")[0], 2.75, epsilon = 1e-6);

        averager.restore(&params).unwrap();
        assert_eq!(averager.mode(), AveragerMode::Training);
        assert_eq!(values(&params, "w"), live_w);
        assert_eq!(values(&params, "b"), live_b);
    }

    #[test]
    fn test_state_machine_violations() {
        let params = param_set(&[("w", &[1.0])]);
        let mut averager = ShadowAverager::new(&params, 0.9, false).unwrap();

        assert!(matches!(averager.restore(&params), Err(Error::State(_))));

        averager.apply(&params).unwrap();
        assert!(matches!(averager.apply(&params), Err(Error::State(_))));
        assert!(matches!(averager.update(0, &params), Err(Error::State(_))));

        averager.restore(&params).unwrap();
        averager.update(0, &params).unwrap();
    }

    #[test]
    fn test_key_mismatch_is_rejected() {
        let params = param_set(&[("w", &[1.0]), ("b", &[2.0])]);
        let mut averager = ShadowAverager::new(&params, 0.9, false).unwrap();

        let renamed = param_set(&[("w", &[1.0]), ("bias", &[2.0])]);
        assert!(matches!(
            averager.update(0, &renamed),
            Err(Error::KeyMismatch(_))
        ));

        let subset = param_set(&[("w", &[1.0])]);
        assert!(matches!(
            averager.update(0, &subset),
            Err(Error::KeyMismatch(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let params = param_set(&[("w", &[1.0, 2.0])]);
        let mut averager = ShadowAverager::new(&params, 0.9, false).unwrap();

        let reshaped = param_set(&[("w", &[1.0, 2.0, 3.0])]);
        assert!(matches!(
            averager.update(0, &reshaped),
            Err(Error::ShapeMismatch(_))
        ));
    }
}
