mod checkpoint;
mod estimator;
mod input;
mod options;

pub use estimator::RatioEstimator;
pub use input::{
    DIAGNOSTIC_KEYS, InputData, R_XZ_TRAIN, R_XZ_VAL, REQUIRED_KEYS, W_TRAIN, W_VAL, W0_TRAIN,
    W1_TRAIN, X_TRAIN, X_VAL, X0_TRAIN, X1_TRAIN, Y_TRAIN, Y_VAL,
};
pub use options::TrainingOptions;

/// The settings tag of `RatioEstimator`.
pub const DOUBLE_PARAMETERIZED_RATIO: &str = "double_parameterized_ratio";
