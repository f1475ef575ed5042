//! Batch mixing augmentation: mixup, cutmix, and a probability controller
//!
//! Both strategies blend each training batch with a shuffled copy of itself
//! and return two views of the targets plus the mixing coefficient `lam`,
//! so the host can blend its loss the same way:
//! `lam * loss(pred, a) + (1 - lam) * loss(pred, b)`.

use candle_core::{DType, Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use tracing::debug;

use crate::config::MixingConfig;
use crate::error::{Error, Result};

/// Result of mixing one batch
///
/// `inputs` has the same shape and dtype as the original batch. `targets_a`
/// is the original target view, `targets_b` the permuted one; an unmixed
/// batch carries `lam == 1.0` with both views identical.
pub struct MixedBatch {
    /// Mixed input batch
    pub inputs: Tensor,
    /// Targets aligned with the original batch order
    pub targets_a: Tensor,
    /// Targets aligned with the permuted batch order
    pub targets_b: Tensor,
    /// Mixing coefficient in [0, 1]; fraction attributed to `targets_a`
    pub lam: f64,
}

/// Mix a batch with a shuffled copy of itself, elementwise
///
/// Samples `lam ~ Beta(alpha, alpha)` and returns
/// `lam * x + (1 - lam) * x[perm]`.
pub fn mixup<R: Rng + ?Sized>(
    inputs: &Tensor,
    targets: &Tensor,
    alpha: f64,
    rng: &mut R,
) -> Result<MixedBatch> {
    let batch_size = batch_size_of(inputs, targets)?;
    let lam = sample_lambda(alpha, rng)?;
    let perm = permutation(batch_size, inputs.device(), rng)?;

    let shuffled = inputs.index_select(&perm, 0)?;
    let weighted_original = inputs.affine(lam, 0.0)?;
    let weighted_shuffled = shuffled.affine(1.0 - lam, 0.0)?;
    let mixed = (&weighted_original + &weighted_shuffled)?;

    debug!(lam, "mixup applied");
    Ok(MixedBatch {
        inputs: mixed,
        targets_a: targets.clone(),
        targets_b: targets.index_select(&perm, 0)?,
        lam,
    })
}

/// Paste a random box from a shuffled copy of the batch into each sample
///
/// The box spans the given non-batch axes; its side fraction per axis is
/// `(1 - lam)^(1 / n_axes)`. The returned `lam` is adjusted to the exact
/// fraction of elements kept from the original batch, so the kept fraction
/// is always >= `lam`.
pub fn cutmix<R: Rng + ?Sized>(
    inputs: &Tensor,
    targets: &Tensor,
    alpha: f64,
    axes: &[usize],
    rng: &mut R,
) -> Result<MixedBatch> {
    let batch_size = batch_size_of(inputs, targets)?;
    let dims = inputs.dims();
    validate_axes(axes, dims.len())?;

    let lam = sample_lambda(alpha, rng)?;
    let side_fraction = (1.0 - lam).powf(1.0 / axes.len() as f64);

    // Pick the cut extent per axis and track the exact cut volume fraction.
    let mut cuts = Vec::with_capacity(axes.len());
    let mut cut_fraction = 1.0;
    for &axis in axes {
        let dim = dims[axis];
        let cut_len = ((dim as f64 * side_fraction).round() as usize).min(dim);
        let start = if cut_len == dim {
            0
        } else {
            rng.random_range(0..=dim - cut_len)
        };
        cut_fraction *= cut_len as f64 / dim as f64;
        cuts.push((axis, start, cut_len));
    }
    let adjusted_lam = 1.0 - cut_fraction;

    let perm = permutation(batch_size, inputs.device(), rng)?;
    let shuffled = inputs.index_select(&perm, 0)?;

    let keep_mask = box_mask(dims, &cuts, inputs.dtype(), inputs.device())?;
    let paste_mask = keep_mask.affine(-1.0, 1.0)?;
    let kept = inputs.broadcast_mul(&keep_mask)?;
    let pasted = shuffled.broadcast_mul(&paste_mask)?;
    let mixed = (&kept + &pasted)?;

    debug!(lam = adjusted_lam, ?axes, "cutmix applied");
    Ok(MixedBatch {
        inputs: mixed,
        targets_a: targets.clone(),
        targets_b: targets.index_select(&perm, 0)?,
        lam: adjusted_lam,
    })
}

/// Blend a loss over both target views: `lam * f(pred, a) + (1 - lam) * f(pred, b)`
pub fn mix_criterion<F>(loss_fn: F, predictions: &Tensor, batch: &MixedBatch) -> Result<Tensor>
where
    F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
{
    let loss_a = loss_fn(predictions, &batch.targets_a)?;
    let loss_b = loss_fn(predictions, &batch.targets_b)?;
    blend(&loss_a, &loss_b, batch.lam)
}

/// Blend a metric over both target views, same weighting as [`mix_criterion`]
pub fn mix_metric<F>(metric_fn: F, predictions: &Tensor, batch: &MixedBatch) -> Result<Tensor>
where
    F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
{
    let metric_a = metric_fn(predictions, &batch.targets_a)?;
    let metric_b = metric_fn(predictions, &batch.targets_b)?;
    blend(&metric_a, &metric_b, batch.lam)
}

/// Probability-driven choice between mixup, cutmix, and no mixing
///
/// Each call to [`mix`] rolls once: mixup with probability `mixup_prob`,
/// cutmix with probability `cutmix_prob`, otherwise the batch passes through
/// unchanged.
///
/// [`mix`]: MixingController::mix
pub struct MixingController {
    config: MixingConfig,
}

impl MixingController {
    /// Create a controller from a validated configuration
    pub fn new(config: MixingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Mix one batch according to the configured probabilities
    pub fn mix<R: Rng + ?Sized>(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        rng: &mut R,
    ) -> Result<MixedBatch> {
        let roll: f64 = rng.random();
        if roll < self.config.mixup_prob {
            mixup(inputs, targets, self.config.mixup_alpha, rng)
        } else if roll < self.config.mixup_prob + self.config.cutmix_prob {
            cutmix(
                inputs,
                targets,
                self.config.cutmix_alpha,
                &self.config.cutmix_axes,
                rng,
            )
        } else {
            Ok(MixedBatch {
                inputs: inputs.clone(),
                targets_a: targets.clone(),
                targets_b: targets.clone(),
                lam: 1.0,
            })
        }
    }

    /// Blended loss for a batch produced by this controller
    pub fn loss<F>(&self, loss_fn: F, predictions: &Tensor, batch: &MixedBatch) -> Result<Tensor>
    where
        F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
    {
        mix_criterion(loss_fn, predictions, batch)
    }

    /// Blended metric for a batch produced by this controller
    pub fn metric<F>(&self, metric_fn: F, predictions: &Tensor, batch: &MixedBatch) -> Result<Tensor>
    where
        F: Fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>,
    {
        mix_metric(metric_fn, predictions, batch)
    }

    /// Controller configuration
    pub fn config(&self) -> &MixingConfig {
        &self.config
    }
}

fn blend(a: &Tensor, b: &Tensor, lam: f64) -> Result<Tensor> {
    let weighted_a = a.affine(lam, 0.0)?;
    let weighted_b = b.affine(1.0 - lam, 0.0)?;
    Ok((&weighted_a + &weighted_b)?)
}

fn sample_lambda<R: Rng + ?Sized>(alpha: f64, rng: &mut R) -> Result<f64> {
    let beta = Beta::new(alpha, alpha)
        .map_err(|_| Error::config(format!("mixing alpha must be positive, got {alpha}")))?;
    Ok(beta.sample(rng))
}

fn batch_size_of(inputs: &Tensor, targets: &Tensor) -> Result<usize> {
    let batch_size = inputs.dim(0)?;
    if targets.dim(0)? != batch_size {
        return Err(Error::shape_mismatch(format!(
            "inputs have batch size {batch_size} but targets have {}",
            targets.dim(0)?
        )));
    }
    Ok(batch_size)
}

fn validate_axes(axes: &[usize], rank: usize) -> Result<()> {
    if axes.is_empty() {
        return Err(Error::config("cutmix requires at least one mix axis"));
    }
    for &axis in axes {
        if axis == 0 || axis >= rank {
            return Err(Error::config(format!(
                "cutmix axis {axis} invalid for rank-{rank} inputs (batch axis 0 excluded)"
            )));
        }
    }
    Ok(())
}

fn permutation<R: Rng + ?Sized>(n: usize, device: &Device, rng: &mut R) -> Result<Tensor> {
    let mut indices: Vec<u32> = (0..n as u32).collect();
    indices.shuffle(rng);
    Ok(Tensor::from_vec(indices, n, device)?)
}

/// Mask of shape `[1, d1, .., dn]`: 1 outside the cut box, 0 inside
fn box_mask(
    dims: &[usize],
    cuts: &[(usize, usize, usize)],
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let sample_dims = &dims[1..];
    let volume: usize = sample_dims.iter().product();
    let mut mask = vec![1.0f32; volume];

    for (flat, value) in mask.iter_mut().enumerate() {
        let mut remainder = flat;
        let mut inside = true;
        for (offset, &dim) in sample_dims.iter().enumerate().rev() {
            let coord = remainder % dim;
            remainder /= dim;
            let axis = offset + 1;
            if let Some(&(_, start, len)) = cuts.iter().find(|(a, _, _)| *a == axis) {
                if coord < start || coord >= start + len {
                    inside = false;
                }
            }
        }
        if inside {
            *value = 0.0;
        }
    }

    let mut shape = vec![1usize];
    shape.extend_from_slice(sample_dims);
    Ok(Tensor::from_vec(mask, shape, device)?.to_dtype(dtype)?)
}
