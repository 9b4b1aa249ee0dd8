use std::{fmt, str::FromStr};

use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

use super::{LossFn, Targets};
use crate::{MlErr, Result};

/// How the per sample event weights enter a loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    /// Event weights are ignored, only the class weight rescales samples.
    #[default]
    Regular,
    /// Samples are scaled by their event weight.
    Weighted,
    /// Samples are scaled by the absolute value of their event weight.
    AbsWeight,
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LossType::Regular => "regular",
            LossType::Weighted => "weighted",
            LossType::AbsWeight => "abs_weight",
        })
    }
}

impl FromStr for LossType {
    type Err = MlErr;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular" => Ok(LossType::Regular),
            "weighted" => Ok(LossType::Weighted),
            "abs_weight" => Ok(LossType::AbsWeight),
            _ => Err(MlErr::UnknownLossType(s.to_string())),
        }
    }
}

/// A loss function together with how it weighs each sample.
pub struct LossComponent {
    loss: Box<dyn LossFn + Send + Sync>,
    class_weight: f32,
    loss_type: LossType,
}

impl fmt::Debug for LossComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LossComponent")
            .field("loss", &self.loss.name())
            .field("class_weight", &self.class_weight)
            .field("loss_type", &self.loss_type)
            .finish()
    }
}

impl LossComponent {
    /// Creates a new `LossComponent`.
    ///
    /// # Arguments
    /// * `loss` - The per sample loss.
    /// * `class_weight` - The factor applied to denominator (`y = 1`) samples.
    /// * `loss_type` - How event weights are used.
    pub fn new(loss: Box<dyn LossFn + Send + Sync>, class_weight: f32, loss_type: LossType) -> Self {
        Self {
            loss,
            class_weight,
            loss_type,
        }
    }

    pub fn name(&self) -> &'static str {
        self.loss.name()
    }

    pub fn validate(&self, has_r_xz: bool) -> Result<()> {
        self.loss.validate(has_r_xz)
    }

    /// Computes the weighted mean loss of a batch.
    ///
    /// # Arguments
    /// * `log_r` - The network output for the batch.
    /// * `targets` - The batch targets.
    /// * `w` - The event weights of the batch.
    ///
    /// # Returns
    /// The batch loss and it's derivative with respect to every entry of `log_r`.
    pub fn evaluate(
        &self,
        log_r: ArrayView1<f32>,
        targets: &Targets,
        w: ArrayView1<f32>,
    ) -> Result<(f32, Array1<f32>)> {
        let (losses, grads) = self.loss.per_sample(log_r, targets)?;

        let class_weight = self.class_weight;
        let loss_type = self.loss_type;
        let factors = Zip::from(&targets.y).and(&w).map_collect(|&y, &w| {
            let class = if y > 0.5 { class_weight } else { 1. };
            let event = match loss_type {
                LossType::Regular => 1.,
                LossType::Weighted => w,
                LossType::AbsWeight => w.abs(),
            };
            class * event
        });

        let norm = match loss_type {
            LossType::Regular => log_r.len() as f32,
            LossType::Weighted => w.sum(),
            LossType::AbsWeight => w.mapv(f32::abs).sum(),
        };
        let norm = if norm.abs() > f32::EPSILON {
            norm
        } else {
            log_r.len().max(1) as f32
        };

        let loss = (&factors * &losses).sum() / norm;
        let grad = &factors * &grads / norm;
        Ok((loss, grad))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;
    use crate::arch::loss::RatioXe;

    #[test]
    fn class_weight_scales_denominator_samples() {
        let log_r = array![0.0f32, 0.0];
        let y = array![0.0f32, 1.0];
        let w = array![1.0f32, 1.0];
        let targets = Targets {
            y: y.view(),
            r_xz: None,
        };

        let plain = LossComponent::new(Box::new(RatioXe), 1.0, LossType::Regular);
        let heavy = LossComponent::new(Box::new(RatioXe), 3.0, LossType::Regular);

        let (_, g_plain) = plain.evaluate(log_r.view(), &targets, w.view()).unwrap();
        let (_, g_heavy) = heavy.evaluate(log_r.view(), &targets, w.view()).unwrap();

        assert_abs_diff_eq!(g_plain[0], g_heavy[0]);
        assert_abs_diff_eq!(g_heavy[1], 3.0 * g_plain[1], epsilon = 1e-6);
    }

    #[test]
    fn regular_ignores_event_weights() {
        let log_r = array![0.4f32, -0.1, 0.2];
        let y = array![0.0f32, 1.0, 1.0];
        let targets = Targets {
            y: y.view(),
            r_xz: None,
        };
        let component = LossComponent::new(Box::new(RatioXe), 1.0, LossType::Regular);

        let (a, _) = component
            .evaluate(log_r.view(), &targets, array![1.0f32, 1.0, 1.0].view())
            .unwrap();
        let (b, _) = component
            .evaluate(log_r.view(), &targets, array![5.0f32, 0.1, 2.0].view())
            .unwrap();

        assert_abs_diff_eq!(a, b);
    }

    #[test]
    fn weighted_uses_the_weighted_mean() {
        let log_r = array![0.0f32, 0.0];
        let y = array![0.0f32, 0.0];
        let w = array![3.0f32, 1.0];
        let targets = Targets {
            y: y.view(),
            r_xz: None,
        };
        let component = LossComponent::new(Box::new(RatioXe), 1.0, LossType::Weighted);

        let (loss, grad) = component.evaluate(log_r.view(), &targets, w.view()).unwrap();

        assert_abs_diff_eq!(loss, 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(grad[0], 3.0 * grad[1], epsilon = 1e-6);
    }

    #[test]
    fn parses_loss_types() {
        assert_eq!("abs_weight".parse::<LossType>().unwrap(), LossType::AbsWeight);
        assert!("squared".parse::<LossType>().is_err());
    }
}
