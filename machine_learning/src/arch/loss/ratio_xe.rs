use ndarray::{Array1, ArrayView1, Zip};

use super::{LossFn, Targets, loss_fn::softplus, loss_fn::sigmoid};
use crate::Result;

/// Binary cross entropy of the calibrated score `s = 1 / (1 + r_hat)` against the class label.
///
/// With `l = log r_hat` the loss is `y · softplus(l) + (1 - y) · softplus(-l)` and it's derivative
/// `y - s`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RatioXe;

impl LossFn for RatioXe {
    fn name(&self) -> &'static str {
        "xe"
    }

    fn per_sample(
        &self,
        log_r: ArrayView1<f32>,
        targets: &Targets,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        let losses = Zip::from(&log_r)
            .and(&targets.y)
            .map_collect(|&l, &y| y * softplus(l) + (1. - y) * softplus(-l));
        let grads = Zip::from(&log_r)
            .and(&targets.y)
            .map_collect(|&l, &y| y - sigmoid(-l));

        Ok((losses, grads))
    }
}
