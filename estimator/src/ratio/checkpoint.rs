use std::path::PathBuf;

use machine_learning::{MlErr, arch::RatioModel, evaluation, training::EpochCallback};
use ndarray::{Array1, ArrayView2};

use super::{DOUBLE_PARAMETERIZED_RATIO, input::restrict_features};
use crate::{
    EstimatorErr,
    persistence::{self, Artifacts},
    scaling::InputScaler,
    settings::{self, EstimatorConfig},
};

/// A copy of the estimator's configuration and scaling taken before training, so the trainer can
/// save checkpoints and evaluate raw observables while it owns the model.
pub(crate) struct EstimatorSnapshot {
    config: EstimatorConfig,
    n_observables: usize,
    input_scaler: InputScaler,
    checkpoint_prefix: Option<PathBuf>,
}

impl EstimatorSnapshot {
    pub fn new(
        config: EstimatorConfig,
        n_observables: usize,
        input_scaler: InputScaler,
        checkpoint_prefix: Option<PathBuf>,
    ) -> Self {
        Self {
            config,
            n_observables,
            input_scaler,
            checkpoint_prefix,
        }
    }
}

impl EpochCallback for EstimatorSnapshot {
    fn save_checkpoint(&mut self, epoch: usize, model: &RatioModel) -> machine_learning::Result<()> {
        let Some(prefix) = &self.checkpoint_prefix else {
            log::debug!("no checkpoint prefix, skipping the checkpoint of epoch {epoch}");
            return Ok(());
        };

        let prefix = persistence::artifact_path(prefix, &format!("_epoch_{epoch}"));
        let settings = settings::encode(
            &self.config,
            DOUBLE_PARAMETERIZED_RATIO,
            Some(self.n_observables),
            None,
        );
        let artifacts = Artifacts {
            settings: &settings,
            x_scaling: self.input_scaler.stats(),
            theta_scaling: None,
            model,
        };

        persistence::save_artifacts(&prefix, &artifacts, false).map_err(callback_err)?;
        log::info!("saved the checkpoint of epoch {epoch} to {}", prefix.display());
        Ok(())
    }

    fn evaluate_ratio(
        &mut self,
        model: &RatioModel,
        x: ArrayView2<f32>,
    ) -> machine_learning::Result<(Array1<f32>, Array1<f32>)> {
        let x = self.input_scaler.apply(x).map_err(callback_err)?;
        let x = restrict_features(x, self.config.features()).map_err(callback_err)?;
        evaluation::evaluate_ratio_model(model, x.view())
    }
}

fn callback_err(e: EstimatorErr) -> MlErr {
    MlErr::Callback(Box::new(e))
}
