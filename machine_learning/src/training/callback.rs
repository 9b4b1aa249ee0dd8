use ndarray::{Array1, ArrayView2};

use crate::{Result, arch::RatioModel};

/// Hooks into whatever owns the model being trained, for the work the trainer can't do alone:
/// the model only sees preprocessed inputs, while checkpoints and intermediate evaluations need
/// the owner's preprocessing and persistence.
pub trait EpochCallback {
    /// Saves the model as it is after `epoch` epochs.
    fn save_checkpoint(&mut self, epoch: usize, model: &RatioModel) -> Result<()>;

    /// Evaluates `(r_hat, s_hat)` on raw observables with the given model.
    fn evaluate_ratio(
        &mut self,
        model: &RatioModel,
        x: ArrayView2<f32>,
    ) -> Result<(Array1<f32>, Array1<f32>)>;
}
