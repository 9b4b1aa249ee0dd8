use ndarray::{Array1, ArrayView1};

use crate::Result;

/// What a loss may compare the network output against, for one batch.
#[derive(Clone, Copy, Debug)]
pub struct Targets<'a> {
    /// The class labels, 0 for the numerator hypothesis and 1 for the denominator.
    pub y: ArrayView1<'a, f32>,
    /// The joint likelihood ratio `r(x, z)`, when the dataset carries it.
    pub r_xz: Option<ArrayView1<'a, f32>>,
}

/// A per sample loss on `log r_hat`.
pub trait LossFn {
    fn name(&self) -> &'static str;

    /// Checks the loss can be evaluated on a dataset before training starts.
    ///
    /// # Arguments
    /// * `has_r_xz` - Whether the dataset provides the joint likelihood ratio.
    fn validate(&self, _has_r_xz: bool) -> Result<()> {
        Ok(())
    }

    /// Computes the loss of every sample and it's derivative with respect to `log r_hat`.
    ///
    /// # Arguments
    /// * `log_r` - The network output for the batch.
    /// * `targets` - The batch targets.
    ///
    /// # Returns
    /// A tuple of `(losses, derivatives)`, both with one entry per sample.
    fn per_sample(
        &self,
        log_r: ArrayView1<f32>,
        targets: &Targets,
    ) -> Result<(Array1<f32>, Array1<f32>)>;
}

/// `ln(1 + e^x)` without overflow.
pub(super) fn softplus(x: f32) -> f32 {
    x.max(0.) + (-x.abs()).exp().ln_1p()
}

/// `1 / (1 + e^-x)` without overflow.
pub(super) fn sigmoid(x: f32) -> f32 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}
