//! Writes and reads the files a saved estimator is made of, all named `<prefix><suffix>`.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use machine_learning::{
    arch::PersistentModel,
    tensors::{self, NamedTensor},
};
use ndarray::Array1;

use crate::{
    ConfigErr, EstimatorErr, Result,
    scaling::{STD_FLOOR, ScalingStats},
    settings::SettingsRecord,
};

pub const SETTINGS_SUFFIX: &str = "_settings.json";
pub const STATE_DICT_SUFFIX: &str = "_state_dict.safetensors";
pub const MODEL_SUFFIX: &str = "_model.json";

/// Which scaling statistics a pair of vector files holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingKind {
    Observables,
    Parameters,
}

impl ScalingKind {
    fn stem(&self) -> &'static str {
        match self {
            ScalingKind::Observables => "x",
            ScalingKind::Parameters => "theta",
        }
    }

    /// The tensor names of the means and stds vectors, such as `x_means`.
    fn names(&self) -> (String, String) {
        (format!("{}_means", self.stem()), format!("{}_stds", self.stem()))
    }

    fn field(&self, stds: bool) -> &'static str {
        match (self, stds) {
            (ScalingKind::Observables, false) => "x_means",
            (ScalingKind::Observables, true) => "x_stds",
            (ScalingKind::Parameters, false) => "theta_means",
            (ScalingKind::Parameters, true) => "theta_stds",
        }
    }
}

/// Everything `save_artifacts` writes.
pub struct Artifacts<'a, M> {
    pub settings: &'a SettingsRecord,
    pub x_scaling: Option<&'a ScalingStats>,
    pub theta_scaling: Option<&'a ScalingStats>,
    pub model: &'a M,
}

/// Appends `suffix` to the file name of `prefix`.
pub fn artifact_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(prefix.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

fn scaling_paths(prefix: &Path, kind: ScalingKind) -> (PathBuf, PathBuf) {
    let (means, stds) = kind.names();
    (
        artifact_path(prefix, &format!("_{means}.safetensors")),
        artifact_path(prefix, &format!("_{stds}.safetensors")),
    )
}

/// Writes the settings, the scaling statistics that exist, the state dict and, if asked for, a
/// readable dump of the whole model.
///
/// # Arguments
/// * `prefix` - The common path of every file, missing directories are created.
/// * `artifacts` - What to write.
/// * `include_full_model` - Also write `<prefix>_model.json`, which is never read back.
pub fn save_artifacts<M: PersistentModel>(
    prefix: &Path,
    artifacts: &Artifacts<M>,
    include_full_model: bool,
) -> Result<()> {
    log::info!("saving model to {}", prefix.display());

    if let Some(dir) = prefix.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| EstimatorErr::io(dir, e))?;
    }

    let path = artifact_path(prefix, SETTINGS_SUFFIX);
    log::debug!("saving settings to {}", path.display());
    let json = serde_json::to_string_pretty(artifacts.settings)?;
    fs::write(&path, json).map_err(|e| EstimatorErr::io(&path, e))?;

    if let Some(stats) = artifacts.x_scaling {
        write_scaling(prefix, ScalingKind::Observables, stats)?;
    }
    if let Some(stats) = artifacts.theta_scaling {
        write_scaling(prefix, ScalingKind::Parameters, stats)?;
    }

    let path = artifact_path(prefix, STATE_DICT_SUFFIX);
    log::debug!("saving state dict to {}", path.display());
    tensors::write_tensors(&path, &artifacts.model.state_dict())?;

    if include_full_model {
        let path = artifact_path(prefix, MODEL_SUFFIX);
        log::debug!("saving model dump to {}", path.display());
        let json = serde_json::to_string_pretty(&artifacts.model.describe())?;
        fs::write(&path, json).map_err(|e| EstimatorErr::io(&path, e))?;
    }

    Ok(())
}

pub fn read_settings(prefix: &Path) -> Result<SettingsRecord> {
    let path = artifact_path(prefix, SETTINGS_SUFFIX);
    log::debug!("loading settings from {}", path.display());

    let json = fs::read_to_string(&path).map_err(|e| EstimatorErr::io(&path, e))?;
    Ok(serde_json::from_str(&json)?)
}

fn write_scaling(prefix: &Path, kind: ScalingKind, stats: &ScalingStats) -> Result<()> {
    let (means_name, stds_name) = kind.names();
    let (means_path, stds_path) = scaling_paths(prefix, kind);
    log::debug!(
        "saving scaling information to {} and {}",
        means_path.display(),
        stds_path.display()
    );

    for (path, name, values) in [
        (&means_path, means_name, &stats.means),
        (&stds_path, stds_name, &stats.stds),
    ] {
        let tensor = NamedTensor::f64(name, vec![values.len()], values.to_vec());
        tensors::write_tensors(path, &[tensor])?;
    }

    Ok(())
}

/// Reads a pair of scaling vectors.
///
/// # Returns
/// The statistics, `None` with a warning when either file doesn't exist, or an error if they
/// exist and can't be read, disagree in length or hold non finite values or stds below
/// `STD_FLOOR`.
pub fn read_scaling(prefix: &Path, kind: ScalingKind) -> Result<Option<ScalingStats>> {
    let (means_path, stds_path) = scaling_paths(prefix, kind);

    let read = |path: &Path| -> Result<Option<Array1<f64>>> {
        match tensors::read_single_tensor(path).map_err(EstimatorErr::from) {
            Ok(tensor) => Ok(Some(Array1::from(tensor.data.to_f64()))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    };

    let (Some(means), Some(stds)) = (read(&means_path)?, read(&stds_path)?) else {
        log::warn!(
            "{} scaling information not found in {}",
            kind.stem(),
            prefix.display()
        );
        return Ok(None);
    };

    if means.len() != stds.len() {
        return Err(EstimatorErr::shape(
            format!("{} scaling stds", kind.stem()),
            vec![stds.len()],
            vec![means.len()],
        ));
    }

    if let Some(i) = means.iter().position(|m| !m.is_finite()) {
        return Err(ConfigErr::InvalidField {
            field: kind.field(false),
            reason: format!("mean {i} is {}", means[i]),
        }
        .into());
    }

    if let Some(i) = stds.iter().position(|&s| !(s.is_finite() && s >= STD_FLOOR)) {
        return Err(ConfigErr::InvalidField {
            field: kind.field(true),
            reason: format!("std {i} is {}, stds must be finite and at least {STD_FLOOR}", stds[i]),
        }
        .into());
    }

    log::debug!("found {} scaling information: means {means}, stds {stds}", kind.stem());
    Ok(Some(ScalingStats { means, stds }))
}

pub fn read_state_dict(prefix: &Path) -> Result<Vec<NamedTensor>> {
    let path = artifact_path(prefix, STATE_DICT_SUFFIX);
    log::debug!("loading state dict from {}", path.display());

    Ok(tensors::read_tensor_file(&path, None)?)
}
