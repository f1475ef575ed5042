//! Configuration structures for the trainbox utilities
//!
//! All configs are serde-serializable so hosts can keep them next to the
//! rest of their training configuration, and each carries a `validate()`
//! that fails eagerly at construction time rather than mid-run.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use crate::schedule::{ChainStageConfig, ScheduleConfig};

/// Top-level configuration for the toolbox components a run uses
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Learning rate schedule
    pub schedule: Option<ScheduleConfig>,

    /// EMA weight shadowing
    pub ema: Option<EmaConfig>,

    /// Batch mixing augmentation
    pub mixing: Option<MixingConfig>,
}

impl Config {
    /// Parse a configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate every present section
    pub fn validate(&self) -> Result<()> {
        if let Some(ema) = &self.ema {
            ema.validate()?;
        }
        if let Some(mixing) = &self.mixing {
            mixing.validate()?;
        }
        Ok(())
    }
}

/// EMA shadow averager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaConfig {
    /// Decay rate in (0, 1); closer to 1 means more smoothing
    pub decay: f64,

    /// Warm the effective decay up over early steps
    pub bias_correction: bool,
}

impl Default for EmaConfig {
    fn default() -> Self {
        Self {
            decay: 0.999,
            bias_correction: true,
        }
    }
}

impl EmaConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(0.0 < self.decay && self.decay < 1.0) {
            return Err(Error::config(format!(
                "EMA decay must lie in (0, 1), got {}",
                self.decay
            )));
        }
        Ok(())
    }
}

/// Batch mixing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixingConfig {
    /// Probability of applying mixup to a batch
    pub mixup_prob: f64,

    /// Probability of applying cutmix to a batch
    pub cutmix_prob: f64,

    /// Beta distribution parameter for mixup
    pub mixup_alpha: f64,

    /// Beta distribution parameter for cutmix
    pub cutmix_alpha: f64,

    /// Non-batch axes the cutmix box spans (e.g. `[2, 3]` for NCHW images)
    pub cutmix_axes: Vec<usize>,
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            mixup_prob: 0.5,
            cutmix_prob: 0.5,
            mixup_alpha: 0.2,
            cutmix_alpha: 0.2,
            cutmix_axes: vec![2, 3],
        }
    }
}

impl MixingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, prob) in [("mixup_prob", self.mixup_prob), ("cutmix_prob", self.cutmix_prob)] {
            if !(0.0..=1.0).contains(&prob) {
                return Err(Error::config(format!(
                    "{name} must lie in [0, 1], got {prob}"
                )));
            }
        }
        if self.mixup_prob + self.cutmix_prob > 1.0 {
            return Err(Error::config(format!(
                "mixup_prob + cutmix_prob must not exceed 1, got {}",
                self.mixup_prob + self.cutmix_prob
            )));
        }
        if self.mixup_prob > 0.0 && self.mixup_alpha <= 0.0 {
            return Err(Error::config(format!(
                "mixup_alpha must be positive, got {}",
                self.mixup_alpha
            )));
        }
        if self.cutmix_prob > 0.0 {
            if self.cutmix_alpha <= 0.0 {
                return Err(Error::config(format!(
                    "cutmix_alpha must be positive, got {}",
                    self.cutmix_alpha
                )));
            }
            if self.cutmix_axes.is_empty() {
                return Err(Error::config("cutmix_axes must name at least one axis"));
            }
            if self.cutmix_axes.contains(&0) {
                return Err(Error::config("cutmix_axes must not include the batch axis"));
            }
        }
        Ok(())
    }
}
