use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::{Adam, GradientDescent, Optimizer};
use crate::{MlErr, Result};

/// The optimization algorithms a model can be trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    AmsGrad,
    Sgd,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::AmsGrad => "amsgrad",
            OptimizerKind::Sgd => "sgd",
        })
    }
}

impl FromStr for OptimizerKind {
    type Err = MlErr;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "amsgrad" => Ok(OptimizerKind::AmsGrad),
            "sgd" => Ok(OptimizerKind::Sgd),
            _ => Err(MlErr::UnknownOptimizer(s.to_string())),
        }
    }
}

/// Optional optimizer hyperparameters, unset fields fall back to the algorithm's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerKwargs {
    pub beta1: Option<f32>,
    pub beta2: Option<f32>,
    pub epsilon: Option<f32>,
    pub weight_decay: Option<f32>,
    pub momentum: Option<f32>,
    pub nesterov: Option<bool>,
}

impl OptimizerKwargs {
    /// Returns these kwargs with every field set in `overrides` replaced.
    pub fn merge(self, overrides: &OptimizerKwargs) -> Self {
        Self {
            beta1: overrides.beta1.or(self.beta1),
            beta2: overrides.beta2.or(self.beta2),
            epsilon: overrides.epsilon.or(self.epsilon),
            weight_decay: overrides.weight_decay.or(self.weight_decay),
            momentum: overrides.momentum.or(self.momentum),
            nesterov: overrides.nesterov.or(self.nesterov),
        }
    }
}

impl OptimizerKind {
    /// Builds the optimizer for a model of `len` parameters.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters to optimize.
    /// * `learning_rate` - The initial learning rate.
    /// * `kwargs` - The hyperparameters.
    ///
    /// # Returns
    /// The optimizer or an error if a hyperparameter is out of range.
    pub fn build(
        &self,
        len: usize,
        learning_rate: f32,
        kwargs: &OptimizerKwargs,
    ) -> Result<Box<dyn Optimizer + Send>> {
        if !(learning_rate.is_finite() && learning_rate > 0.) {
            return Err(MlErr::InvalidHyperparameter(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }

        let weight_decay = kwargs.weight_decay.unwrap_or(0.);

        let optimizer: Box<dyn Optimizer + Send> = match self {
            OptimizerKind::Adam | OptimizerKind::AmsGrad => {
                let beta1 = kwargs.beta1.unwrap_or(0.9);
                let beta2 = kwargs.beta2.unwrap_or(0.999);
                for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
                    if !(0.0..1.0).contains(&beta) {
                        return Err(MlErr::InvalidHyperparameter(format!(
                            "{name} must be in [0, 1), got {beta}"
                        )));
                    }
                }

                let adam = Adam::new(len, learning_rate, beta1, beta2, kwargs.epsilon.unwrap_or(1e-8))
                    .with_weight_decay(weight_decay);

                match self {
                    OptimizerKind::AmsGrad => Box::new(adam.with_amsgrad()),
                    _ => Box::new(adam),
                }
            }
            OptimizerKind::Sgd => {
                let momentum = kwargs.momentum.unwrap_or(0.);
                let nesterov = kwargs.nesterov.unwrap_or(false);
                if nesterov && momentum <= 0. {
                    return Err(MlErr::InvalidHyperparameter(
                        "nesterov momentum needs a positive momentum".to_string(),
                    ));
                }

                Box::new(
                    GradientDescent::new(len, learning_rate)
                        .with_momentum(momentum, nesterov)
                        .with_weight_decay(weight_decay),
                )
            }
        };

        Ok(optimizer)
    }
}

/// Resolves an optimizer name into it's kind and default hyperparameters.
///
/// # Arguments
/// * `name` - One of `adam`, `amsgrad` or `sgd`.
/// * `nesterov_momentum` - When set and the optimizer is `sgd`, enables Nesterov momentum with
///   this coefficient.
pub fn get_optimizer(
    name: &str,
    nesterov_momentum: Option<f32>,
) -> Result<(OptimizerKind, OptimizerKwargs)> {
    let kind = name.parse()?;
    let mut kwargs = OptimizerKwargs::default();

    if let (OptimizerKind::Sgd, Some(momentum)) = (kind, nesterov_momentum) {
        kwargs.momentum = Some(momentum);
        kwargs.nesterov = Some(true);
    }

    Ok((kind, kwargs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesterov_only_applies_to_sgd() {
        let (kind, kwargs) = get_optimizer("sgd", Some(0.9)).unwrap();
        assert_eq!(kind, OptimizerKind::Sgd);
        assert_eq!(kwargs.momentum, Some(0.9));
        assert_eq!(kwargs.nesterov, Some(true));

        let (kind, kwargs) = get_optimizer("amsgrad", Some(0.9)).unwrap();
        assert_eq!(kind, OptimizerKind::AmsGrad);
        assert_eq!(kwargs, OptimizerKwargs::default());
    }

    #[test]
    fn unknown_optimizer() {
        assert!(matches!(
            get_optimizer("rmsprop", None),
            Err(MlErr::UnknownOptimizer(_))
        ));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let defaults = OptimizerKwargs {
            momentum: Some(0.9),
            nesterov: Some(true),
            ..Default::default()
        };
        let overrides = OptimizerKwargs {
            momentum: Some(0.5),
            weight_decay: Some(1e-4),
            ..Default::default()
        };

        let merged = defaults.merge(&overrides);

        assert_eq!(merged.momentum, Some(0.5));
        assert_eq!(merged.nesterov, Some(true));
        assert_eq!(merged.weight_decay, Some(1e-4));
    }

    #[test]
    fn invalid_hyperparameters_fail_to_build() {
        let kwargs = OptimizerKwargs {
            beta1: Some(1.5),
            ..Default::default()
        };

        assert!(OptimizerKind::Adam.build(4, 1e-3, &kwargs).is_err());
        assert!(OptimizerKind::Sgd.build(4, 0.0, &OptimizerKwargs::default()).is_err());
    }
}
