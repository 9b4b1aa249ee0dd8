use ndarray::{Array1, ArrayView1, Zip};

use super::{LossFn, Targets, loss_fn::sigmoid, loss_fn::softplus};
use crate::{MlErr, Result};

/// Cross entropy against the score implied by the joint likelihood ratio, `1 / (1 + r(x, z))`,
/// instead of the hard class label.
#[derive(Clone, Copy, Debug, Default)]
pub struct AugmentedXe;

impl LossFn for AugmentedXe {
    fn name(&self) -> &'static str {
        "improved_xe"
    }

    fn validate(&self, has_r_xz: bool) -> Result<()> {
        if !has_r_xz {
            return Err(MlErr::MissingTarget {
                loss: self.name(),
                target: "r_xz",
            });
        }

        Ok(())
    }

    fn per_sample(
        &self,
        log_r: ArrayView1<f32>,
        targets: &Targets,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        let r_xz = targets.r_xz.ok_or(MlErr::MissingTarget {
            loss: self.name(),
            target: "r_xz",
        })?;
        let s_xz = r_xz.mapv(|r| 1. / (1. + r));

        let losses = Zip::from(&log_r)
            .and(&s_xz)
            .map_collect(|&l, &s| s * softplus(l) + (1. - s) * softplus(-l));
        let grads = Zip::from(&log_r)
            .and(&s_xz)
            .map_collect(|&l, &s| s - sigmoid(-l));

        Ok((losses, grads))
    }
}
