use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use ndarray::ShapeError;
use safetensors::tensor::SafeTensorError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidHyperparameter(String),
    UnknownMethod(String),
    UnknownOptimizer(String),
    UnknownLossType(String),
    UnknownActivation(String),
    UnknownStatsMethod(String),
    UnknownVerbosity(String),
    MissingTarget {
        loss: &'static str,
        target: &'static str,
    },
    UnsupportedLoss(&'static str),
    InvalidArray {
        name: String,
        reason: String,
    },
    TensorShape {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    EmptyDataset,
    NonFiniteLoss {
        epoch: usize,
    },
    Io {
        path: PathBuf,
        source: io::Error,
    },
    SafeTensors(SafeTensorError),
    Shape(ShapeError),
    Json(serde_json::Error),
    Callback(Box<dyn Error + Send + Sync>),
}

impl MlErr {
    /// Wraps an io error together with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::InvalidHyperparameter(msg) => write!(f, "invalid hyperparameter: {msg}"),
            MlErr::UnknownMethod(name) => write!(
                f,
                "unknown inference method '{name}', expected one of alice, alices, carl, cascal, rascal, rolr"
            ),
            MlErr::UnknownOptimizer(name) => write!(
                f,
                "unknown optimizer '{name}', expected one of adam, amsgrad, sgd"
            ),
            MlErr::UnknownLossType(name) => write!(f, "unknown loss type '{name}'"),
            MlErr::UnknownActivation(name) => write!(
                f,
                "unknown activation '{name}', expected one of tanh, sigmoid, relu"
            ),
            MlErr::UnknownStatsMethod(name) => write!(f, "unknown statistics method '{name}'"),
            MlErr::UnknownVerbosity(name) => write!(f, "unknown verbosity level '{name}'"),
            MlErr::MissingTarget { loss, target } => write!(
                f,
                "the {loss} loss needs the '{target}' target, which is not part of the training data"
            ),
            MlErr::UnsupportedLoss(loss) => write!(
                f,
                "the {loss} loss needs a parameter conditioned model and can't be used here"
            ),
            MlErr::InvalidArray { name, reason } => write!(f, "invalid array '{name}': {reason}"),
            MlErr::TensorShape {
                name,
                got,
                expected,
            } => write!(
                f,
                "tensor '{name}' has shape {got:?}, the model expects {expected:?}"
            ),
            MlErr::EmptyDataset => write!(f, "the dataset has no samples"),
            MlErr::NonFiniteLoss { epoch } => {
                write!(f, "the training loss stopped being finite at epoch {epoch}")
            }
            MlErr::Io { path, source } => write!(f, "io error on {}: {source}", path.display()),
            MlErr::SafeTensors(e) => write!(f, "safetensors error: {e}"),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::Json(e) => write!(f, "json error: {e}"),
            MlErr::Callback(e) => write!(f, "training callback failed: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io { source, .. } => Some(source),
            MlErr::SafeTensors(e) => Some(e),
            MlErr::Shape(e) => Some(e),
            MlErr::Json(e) => Some(e),
            MlErr::Callback(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::SafeTensors(value)
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
