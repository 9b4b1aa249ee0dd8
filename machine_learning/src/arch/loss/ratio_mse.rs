use ndarray::{Array1, ArrayView1, Zip};

use super::{LossFn, Targets};
use crate::{MlErr, Result};

/// Squared error regression on the joint likelihood ratio: numerator samples compare `r_hat`
/// against `r(x, z)` and denominator samples compare the inverses.
#[derive(Clone, Copy, Debug, Default)]
pub struct RatioMse;

impl LossFn for RatioMse {
    fn name(&self) -> &'static str {
        "mse_r"
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

        let losses = Zip::from(&log_r)
            .and(&targets.y)
            .and(&r_xz)
            .map_collect(|&l, &y, &r_xz| {
                let r = l.exp();
                (1. - y) * (r - r_xz).powi(2) + y * (1. / r - 1. / r_xz).powi(2)
            });
        let grads = Zip::from(&log_r)
            .and(&targets.y)
            .and(&r_xz)
            .map_collect(|&l, &y, &r_xz| {
                let r = l.exp();
                (1. - y) * 2. * (r - r_xz) * r - y * 2. * (1. / r - 1. / r_xz) / r
            });

        Ok((losses, grads))
    }
}
