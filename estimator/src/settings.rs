//! The settings file: an estimator's configuration and dimensions as a versioned JSON record.

use machine_learning::arch::activations::Activation;
use serde::{Deserialize, Serialize};

use crate::{ConfigErr, Result};

/// The version written by `encode`, records without one are version 0.
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Older records write "use every observable" as this string instead of `null`.
const LEGACY_ALL_FEATURES: &str = "None";

/// An estimator's hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    features: Option<Vec<usize>>,
    n_hidden: Vec<usize>,
    activation: Activation,
    dropout_prob: f64,
}

impl EstimatorConfig {
    /// Creates a new `EstimatorConfig`.
    ///
    /// # Arguments
    /// * `features` - The observable columns fed to the model, `None` uses all of them.
    /// * `n_hidden` - The width of every hidden layer.
    /// * `activation` - The activation of the hidden layers.
    /// * `dropout_prob` - The dropout probability after each hidden layer.
    ///
    /// # Returns
    /// The configuration or an error if a width is zero or `dropout_prob` isn't in `[0, 1)`.
    pub fn new(
        features: Option<Vec<usize>>,
        n_hidden: Vec<usize>,
        activation: Activation,
        dropout_prob: f64,
    ) -> Result<Self> {
        if n_hidden.contains(&0) {
            return Err(ConfigErr::InvalidHyperparameter(format!(
                "hidden layer widths must be positive, got {n_hidden:?}"
            ))
            .into());
        }

        if !(0.0..1.0).contains(&dropout_prob) {
            return Err(ConfigErr::InvalidHyperparameter(format!(
                "dropout probability must be in [0, 1), got {dropout_prob}"
            ))
            .into());
        }

        Ok(Self {
            features,
            n_hidden,
            activation,
            dropout_prob,
        })
    }

    pub fn features(&self) -> Option<&[usize]> {
        self.features.as_deref()
    }

    pub fn n_hidden(&self) -> &[usize] {
        &self.n_hidden
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn dropout_prob(&self) -> f64 {
        self.dropout_prob
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            features: None,
            n_hidden: vec![100],
            activation: Activation::Tanh,
            dropout_prob: 0.0,
        }
    }
}

/// An integer as older settings files may hold it: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LenientInt {
    Int(i64),
    Float(f64),
    Text(String),
}

impl LenientInt {
    /// The largest count accepted, anything above is a corrupted record.
    const MAX_COUNT: u64 = u32::MAX as u64;

    fn to_usize(&self, field: &'static str) -> Result<usize> {
        let invalid = |reason: String| ConfigErr::InvalidField { field, reason };

        let count = match self {
            LenientInt::Int(n) => {
                u64::try_from(*n).map_err(|_| invalid(format!("{n} is negative")))?
            }
            LenientInt::Float(f)
                if f.fract() == 0.0 && (0.0..=Self::MAX_COUNT as f64).contains(f) =>
            {
                *f as u64
            }
            LenientInt::Float(f) => return Err(invalid(format!("{f} is not a count")).into()),
            LenientInt::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(format!("'{s}' is not an integer")))?,
        };

        if count > Self::MAX_COUNT {
            return Err(invalid(format!("{count} is larger than {}", Self::MAX_COUNT)).into());
        }

        usize::try_from(count).map_err(|_| invalid(format!("{count} doesn't fit a usize")).into())
    }
}

impl From<usize> for LenientInt {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

/// The `features` entry, either an index list or the legacy "use all" marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureList {
    Indices(Vec<LenientInt>),
    Marker(String),
}

/// The settings file as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    #[serde(default)]
    pub format_version: u32,
    #[serde(default)]
    pub estimator_type: Option<String>,
    #[serde(default)]
    pub n_observables: Option<LenientInt>,
    #[serde(default)]
    pub n_parameters: Option<LenientInt>,
    #[serde(default)]
    pub features: Option<FeatureList>,
    #[serde(default)]
    pub n_hidden: Option<Vec<LenientInt>>,
    #[serde(default)]
    pub activation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropout_prob: Option<f64>,
}

/// A settings record checked and converted to typed values.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSettings {
    pub config: EstimatorConfig,
    pub n_observables: Option<usize>,
    pub n_parameters: Option<usize>,
    pub format_version: u32,
}

/// Builds the settings record of an estimator.
///
/// # Arguments
/// * `config` - The estimator's hyperparameters.
/// * `estimator_type` - The tag of the concrete estimator.
/// * `n_observables` - The model's input width, once known.
/// * `n_parameters` - The width of the parameter vectors of conditional estimators.
pub fn encode(
    config: &EstimatorConfig,
    estimator_type: &str,
    n_observables: Option<usize>,
    n_parameters: Option<usize>,
) -> SettingsRecord {
    SettingsRecord {
        format_version: SETTINGS_FORMAT_VERSION,
        estimator_type: Some(estimator_type.to_string()),
        n_observables: n_observables.map(LenientInt::from),
        n_parameters: n_parameters.map(LenientInt::from),
        features: config
            .features
            .as_ref()
            .map(|f| FeatureList::Indices(f.iter().copied().map(LenientInt::from).collect())),
        n_hidden: Some(config.n_hidden.iter().copied().map(LenientInt::from).collect()),
        activation: Some(config.activation.to_string()),
        dropout_prob: Some(config.dropout_prob),
    }
}

/// Checks and converts a settings record, nothing is applied to an estimator here.
///
/// # Arguments
/// * `record` - The record as read from disk.
/// * `expected_type` - The tag of the estimator being loaded.
///
/// # Returns
/// The decoded settings or a configuration error if the record has no or a foreign type tag or
/// a field can't be converted.
pub fn decode(record: &SettingsRecord, expected_type: &'static str) -> Result<DecodedSettings> {
    let estimator_type = record
        .estimator_type
        .as_deref()
        .ok_or(ConfigErr::MissingEstimatorType)?;

    if estimator_type != expected_type {
        return Err(ConfigErr::EstimatorTypeMismatch {
            expected: expected_type,
            got: estimator_type.to_string(),
        }
        .into());
    }

    if record.format_version > SETTINGS_FORMAT_VERSION {
        log::warn!(
            "settings format version {} is newer than {SETTINGS_FORMAT_VERSION}, reading it anyway",
            record.format_version
        );
    }

    let n_observables = record
        .n_observables
        .as_ref()
        .map(|n| n.to_usize("n_observables"))
        .transpose()?;
    let n_parameters = record
        .n_parameters
        .as_ref()
        .map(|n| n.to_usize("n_parameters"))
        .transpose()?;

    let n_hidden = record
        .n_hidden
        .as_ref()
        .ok_or(ConfigErr::InvalidField {
            field: "n_hidden",
            reason: "missing".to_string(),
        })?
        .iter()
        .map(|n| n.to_usize("n_hidden"))
        .collect::<Result<Vec<_>>>()?;

    let features = match &record.features {
        None => None,
        Some(FeatureList::Marker(marker)) if marker == LEGACY_ALL_FEATURES => None,
        Some(FeatureList::Marker(other)) => {
            return Err(ConfigErr::InvalidField {
                field: "features",
                reason: format!("expected a list of indices or null, got '{other}'"),
            }
            .into());
        }
        Some(FeatureList::Indices(indices)) => Some(
            indices
                .iter()
                .map(|i| i.to_usize("features"))
                .collect::<Result<Vec<_>>>()?,
        ),
    };

    let activation = record
        .activation
        .as_deref()
        .ok_or(ConfigErr::InvalidField {
            field: "activation",
            reason: "missing".to_string(),
        })?
        .parse::<Activation>()
        .map_err(|e| ConfigErr::InvalidField {
            field: "activation",
            reason: e.to_string(),
        })?;

    let dropout_prob = record.dropout_prob.unwrap_or_else(|| {
        log::warn!(
            "no dropout probability in the settings, they were probably written by an older version; using 0"
        );
        0.0
    });

    let config = EstimatorConfig::new(features, n_hidden, activation, dropout_prob)?;

    Ok(DecodedSettings {
        config,
        n_observables,
        n_parameters,
        format_version: record.format_version,
    })
}
