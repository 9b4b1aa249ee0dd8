//! Neural likelihood ratio estimators: input standardization, persistence of the trained
//! estimator and the ratio estimator between a numerator and a denominator hypothesis.

pub mod conditional;
pub mod diagnostics;
pub mod error;
pub mod estimator;
pub mod persistence;
pub mod ratio;
pub mod scaling;
pub mod settings;

pub use conditional::ConditionalEstimator;
pub use error::{ConfigErr, EstimatorErr, Result};
pub use estimator::{Estimator, EstimatorState};
pub use ratio::{InputData, RatioEstimator, TrainingOptions};
pub use scaling::{InputScaler, ParameterScaler, ScalingStats};
pub use settings::EstimatorConfig;
