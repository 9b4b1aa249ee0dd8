use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use machine_learning::MlErr;
use safetensors::tensor::SafeTensorError;

/// The result type used in the entire estimator crate.
pub type Result<T> = std::result::Result<T, EstimatorErr>;

/// Malformed or incomplete estimator hyperparameters or settings.
#[derive(Debug)]
pub enum ConfigErr {
    /// The settings record has no `estimator_type`, it predates type tagging.
    MissingEstimatorType,
    EstimatorTypeMismatch {
        expected: &'static str,
        got: String,
    },
    InvalidField {
        field: &'static str,
        reason: String,
    },
    InvalidHyperparameter(String),
}

impl Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::MissingEstimatorType => write!(
                f,
                "the settings have no estimator type, they were probably written by an incompatible older version"
            ),
            ConfigErr::EstimatorTypeMismatch { expected, got } => write!(
                f,
                "the saved model is an incompatible estimator type, expected {expected} and got {got}"
            ),
            ConfigErr::InvalidField { field, reason } => {
                write!(f, "invalid settings field '{field}': {reason}")
            }
            ConfigErr::InvalidHyperparameter(msg) => write!(f, "invalid hyperparameter: {msg}"),
        }
    }
}

/// The estimator's error type.
#[derive(Debug)]
pub enum EstimatorErr {
    Configuration(ConfigErr),
    /// The operation needs a model and there is none yet.
    State(&'static str),
    /// The training bundle lacks required entries.
    Validation {
        missing: Vec<String>,
    },
    InvalidData(String),
    ShapeMismatch {
        what: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    Io {
        path: PathBuf,
        source: io::Error,
    },
    Json(serde_json::Error),
    SafeTensors(SafeTensorError),
    Ml(MlErr),
}

impl EstimatorErr {
    /// Wraps an io error together with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn shape(what: impl Into<String>, got: Vec<usize>, expected: Vec<usize>) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            got,
            expected,
        }
    }

    /// Whether this is a missing file, which optional artifacts tolerate.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EstimatorErr::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

impl Display for EstimatorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimatorErr::Configuration(e) => write!(f, "configuration error: {e}"),
            EstimatorErr::State(msg) => write!(f, "state error: {msg}"),
            EstimatorErr::Validation { missing } => write!(
                f,
                "the training data is missing the required entries {}",
                missing.join(", ")
            ),
            EstimatorErr::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            EstimatorErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            EstimatorErr::Io { path, source } => {
                write!(f, "io error on {}: {source}", path.display())
            }
            EstimatorErr::Json(e) => write!(f, "json error: {e}"),
            EstimatorErr::SafeTensors(e) => write!(f, "safetensors error: {e}"),
            EstimatorErr::Ml(e) => write!(f, "{e}"),
        }
    }
}

impl Error for EstimatorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EstimatorErr::Io { source, .. } => Some(source),
            EstimatorErr::Json(e) => Some(e),
            EstimatorErr::SafeTensors(e) => Some(e),
            EstimatorErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigErr> for EstimatorErr {
    fn from(value: ConfigErr) -> Self {
        Self::Configuration(value)
    }
}

impl From<serde_json::Error> for EstimatorErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<MlErr> for EstimatorErr {
    fn from(value: MlErr) -> Self {
        match value {
            MlErr::TensorShape {
                name,
                got,
                expected,
            } => Self::ShapeMismatch {
                what: format!("state dict tensor '{name}'"),
                got,
                expected,
            },
            MlErr::Io { path, source } => Self::Io { path, source },
            MlErr::SafeTensors(e) => Self::SafeTensors(e),
            other => Self::Ml(other),
        }
    }
}
