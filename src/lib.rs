//! trainbox - commonly needed training-time utilities for candle
//!
//! This crate supplies the small pieces a training loop tends to need next
//! to the framework itself: composable learning-rate schedules, EMA weight
//! shadowing with swap-in/swap-back around evaluation, and mixup/cutmix
//! batch augmentation. Every component is driven per-step by the host loop
//! and owns no step counter of its own, so runs resume cleanly from the
//! host's checkpointed step index alone.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod ema;
pub mod error;
pub mod mixing;
pub mod params;
pub mod schedule;

// Re-exports
pub use config::{Config, EmaConfig, MixingConfig};
pub use ema::{AveragerMode, ShadowAverager};
pub use error::{Error, Result};
pub use mixing::{cutmix, mix_criterion, mix_metric, mixup, MixedBatch, MixingController};
pub use params::ParameterSet;
pub use schedule::{
    build_schedule, Chain, Constant, CosineDecay, LinearWarmup, Schedule, ScheduleConfig,
};
