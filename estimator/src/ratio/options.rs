use std::path::PathBuf;

use machine_learning::{
    arch::loss::LossType, optimization::OptimizerKwargs, stats::StatsMethod, training::Verbosity,
};
use serde::{Deserialize, Serialize};

use crate::{ConfigErr, Result};

/// The hyperparameters of a `RatioEstimator` training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    pub alpha: f32,
    /// One of adam, amsgrad or sgd.
    pub optimizer: String,
    /// Merged over the optimizer's defaults.
    pub optimizer_kwargs: Option<OptimizerKwargs>,
    pub n_epochs: usize,
    pub batch_size: usize,
    /// The learning rate of the first epoch, it decays exponentially to `final_lr`.
    pub initial_lr: f32,
    pub final_lr: f32,
    /// Nesterov momentum, only used by sgd.
    pub nesterov_momentum: Option<f32>,
    /// The share of the training samples used for validation when there's no external split,
    /// `None` trains on every sample and disables early stopping.
    pub validation_split: Option<f64>,
    pub early_stopping: bool,
    pub early_stopping_patience: Option<usize>,
    pub scale_inputs: bool,
    /// Only train on the first this many samples.
    pub limit_samplesize: Option<usize>,
    /// Memory map input files larger than 1 GB.
    pub memmap: bool,
    pub verbose: Verbosity,
    pub scale_parameters: bool,
    pub n_workers: usize,
    pub clip_gradient: Option<f32>,
    pub intermediate_train_plot: Option<usize>,
    pub intermediate_save: Option<usize>,
    /// Checkpoints are saved as `<checkpoint_prefix>_epoch_<n>`.
    pub checkpoint_prefix: Option<PathBuf>,
    pub intermediate_stats_dist: bool,
    pub stats_methods: Vec<StatsMethod>,
    /// The dataset name, used to find its metadata and to name the plot directory.
    pub global_name: String,
    pub plot_inputs: bool,
    pub plot_dir: PathBuf,
    /// The sample count tag of the dataset's metadata file.
    pub nentries: i64,
    pub loss_type: LossType,
    /// Seeds the validation split and the shuffling.
    pub seed: Option<u64>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            optimizer: "amsgrad".to_string(),
            optimizer_kwargs: None,
            n_epochs: 50,
            batch_size: 128,
            initial_lr: 1e-3,
            final_lr: 1e-4,
            nesterov_momentum: None,
            validation_split: Some(0.25),
            early_stopping: true,
            early_stopping_patience: None,
            scale_inputs: true,
            limit_samplesize: None,
            memmap: false,
            verbose: Verbosity::Some,
            scale_parameters: false,
            n_workers: 8,
            clip_gradient: None,
            intermediate_train_plot: None,
            intermediate_save: None,
            checkpoint_prefix: None,
            intermediate_stats_dist: false,
            stats_methods: Vec::new(),
            global_name: String::new(),
            plot_inputs: false,
            plot_dir: PathBuf::from("plots"),
            nentries: -1,
            loss_type: LossType::Regular,
            seed: None,
        }
    }
}

impl TrainingOptions {
    /// Checks the ranges the trainer can't recover from.
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |msg: String| -> Result<()> { Err(ConfigErr::InvalidHyperparameter(msg).into()) };

        if self.n_epochs == 0 || self.batch_size == 0 || self.n_workers == 0 {
            return invalid(format!(
                "epochs, batch size and workers must be positive, got {}, {} and {}",
                self.n_epochs, self.batch_size, self.n_workers
            ));
        }

        if !(self.initial_lr > 0.0 && self.final_lr > 0.0) {
            return invalid(format!(
                "learning rates must be positive, got {} and {}",
                self.initial_lr, self.final_lr
            ));
        }

        if let Some(split) = self.validation_split
            && !(0.0..1.0).contains(&split)
        {
            return invalid(format!("validation split must be in [0, 1), got {split}"));
        }

        if self.intermediate_save.is_some() && self.checkpoint_prefix.is_none() {
            log::warn!("intermediate saves were requested without a checkpoint prefix, none will be written");
        }

        Ok(())
    }
}
