use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::{AugmentedXe, LossComponent, LossFn, LossType, RatioMse, RatioXe, ScoreMse};
use crate::{MlErr, Result};

/// The likelihood ratio inference technique a model is trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Alice,
    Alices,
    Carl,
    Cascal,
    Rascal,
    Rolr,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Alice => "alice",
            Method::Alices => "alices",
            Method::Carl => "carl",
            Method::Cascal => "cascal",
            Method::Rascal => "rascal",
            Method::Rolr => "rolr",
        }
    }

    /// Whether the method regresses on the joint likelihood ratio `r(x, z)`.
    pub fn needs_joint_ratio(&self) -> bool {
        matches!(
            self,
            Method::Alice | Method::Alices | Method::Rascal | Method::Rolr
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = MlErr;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alice" => Ok(Method::Alice),
            "alices" => Ok(Method::Alices),
            "carl" => Ok(Method::Carl),
            "cascal" => Ok(Method::Cascal),
            "rascal" => Ok(Method::Rascal),
            "rolr" => Ok(Method::Rolr),
            _ => Err(MlErr::UnknownMethod(s.to_string())),
        }
    }
}

/// The losses a method trains on.
pub type ResolvedLoss = (Vec<LossComponent>, Vec<&'static str>, Vec<f32>);

/// Resolves a method into it's loss components, their labels and their weights.
///
/// # Arguments
/// * `method` - The inference technique.
/// * `alpha` - The weight of the score term for the methods that have one.
/// * `class_weight` - The factor applied to denominator samples.
/// * `loss_type` - How event weights enter the losses.
///
/// # Returns
/// A tuple of `(components, labels, weights)`, all of the same length.
pub fn get_loss(method: Method, alpha: f32, class_weight: f32, loss_type: LossType) -> ResolvedLoss {
    let ratio: Box<dyn LossFn + Send + Sync> = match method {
        Method::Carl | Method::Cascal => Box::new(RatioXe),
        Method::Alice | Method::Alices => Box::new(AugmentedXe),
        Method::Rolr | Method::Rascal => Box::new(RatioMse),
    };

    let mut components = vec![LossComponent::new(ratio, class_weight, loss_type)];
    let mut weights = vec![1.0];

    if matches!(method, Method::Alices | Method::Cascal | Method::Rascal) {
        components.push(LossComponent::new(
            Box::new(ScoreMse),
            class_weight,
            loss_type,
        ));
        weights.push(alpha);
    }

    let labels = components.iter().map(LossComponent::name).collect();
    (components, labels, weights)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carl_is_a_single_cross_entropy() {
        let (components, labels, weights) = get_loss(Method::Carl, 1.0, 1.0, LossType::Regular);

        assert_eq!(components.len(), 1);
        assert_eq!(labels, ["xe"]);
        assert_eq!(weights, [1.0]);
    }

    #[test]
    fn score_methods_carry_alpha() {
        let (_, labels, weights) = get_loss(Method::Rascal, 0.3, 1.0, LossType::Regular);

        assert_eq!(labels, ["mse_r", "mse_score"]);
        assert_eq!(weights, [1.0, 0.3]);

        let (_, labels, _) = get_loss(Method::Alices, 1.0, 1.0, LossType::Regular);
        assert_eq!(labels, ["improved_xe", "mse_score"]);
    }

    #[test]
    fn unknown_methods_are_rejected() {
        assert_eq!("CARL".parse::<Method>().unwrap(), Method::Carl);
        assert!(matches!(
            "sally".parse::<Method>(),
            Err(MlErr::UnknownMethod(name)) if name == "sally"
        ));
    }
}
