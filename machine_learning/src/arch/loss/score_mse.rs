use ndarray::{Array1, ArrayView1};

use super::{LossFn, Targets};
use crate::{MlErr, Result};

/// Squared error on the score `∇_θ log r`, it needs a network conditioned on the parameters so
/// it's resolved by the factory but refused before training starts.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScoreMse;

impl LossFn for ScoreMse {
    fn name(&self) -> &'static str {
        "mse_score"
    }

    fn validate(&self, _has_r_xz: bool) -> Result<()> {
        Err(MlErr::UnsupportedLoss(self.name()))
    }

    fn per_sample(
        &self,
        _log_r: ArrayView1<f32>,
        _targets: &Targets,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        Err(MlErr::UnsupportedLoss(self.name()))
    }
}
