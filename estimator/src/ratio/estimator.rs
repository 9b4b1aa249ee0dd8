use machine_learning::{
    arch::{
        RatioModel,
        loss::{Method, get_loss},
    },
    dataset::{ArraySource, DEFAULT_MEMMAP_THRESHOLD_GB, into_matrix, into_vector, load_and_check},
    evaluation,
    optimization::get_optimizer,
    plotting::JsonHistogramPlotter,
    training::{FeatureData, RatioTrainer, TrainerRequest, TrainingData, TrainingResult},
};
use ndarray::{Array1, Array2};

use super::{
    DOUBLE_PARAMETERIZED_RATIO,
    checkpoint::EstimatorSnapshot,
    input::{DIAGNOSTIC_KEYS, InputData, restrict_features},
    options::TrainingOptions,
};
use crate::{
    EstimatorErr, Result,
    diagnostics::{self, MetaData},
    estimator::{Estimator, EstimatorState, NO_MODEL},
    settings::EstimatorConfig,
};

/// Learns the likelihood ratio `r(x) = p0(x) / p1(x)` between the numerator (label 0) and
/// denominator (label 1) hypotheses.
#[derive(Debug, Clone)]
pub struct RatioEstimator {
    state: EstimatorState<RatioModel>,
    seed: Option<u64>,
}

impl RatioEstimator {
    /// Creates an untrained estimator, the model is built by the first `train` or `load`.
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            state: EstimatorState::new(config),
            seed: None,
        }
    }

    /// Same as `new` but the model's initial weights derive from `seed`.
    pub fn with_seed(config: EstimatorConfig, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::new(config)
        }
    }

    /// Evaluates the ratio on raw observables.
    ///
    /// # Arguments
    /// * `x` - The observables, one row per sample, as the estimator was trained on them.
    ///
    /// # Returns
    /// The estimated ratio `r_hat` and the calibrated score `s_hat = 1 / (1 + r_hat)` of every
    /// sample, or a state error if there is no model yet.
    pub fn evaluate_ratio(&self, x: &ArraySource) -> Result<(Array1<f32>, Array1<f32>)> {
        let model = self.model()?;

        log::debug!("loading evaluation data");
        let x = self.prepare_observables(x)?;

        log::debug!("starting ratio evaluation");
        let evaluation = evaluation::evaluate_ratio_model(model, x.view())?;
        log::debug!("evaluation done");

        Ok(evaluation)
    }

    /// Logs how well the calibrated score classifies the labels `y`.
    pub fn evaluate_performance(&self, x: &ArraySource, y: &ArraySource) -> Result<()> {
        let model = self.model()?;

        log::debug!("loading evaluation data");
        let x = self.prepare_observables(x)?;
        let y = into_vector(load_and_check(y, None, "y")?, "y")?;

        evaluation::evaluate_performance_model(model, x.view(), y.view())?;
        log::debug!("evaluation done");
        Ok(())
    }

    /// Loads, scales and restricts observables the way the model expects them.
    fn prepare_observables(&self, x: &ArraySource) -> Result<Array2<f32>> {
        let x = into_matrix(load_and_check(x, None, "x")?, "x")?;
        let x = self.transform_inputs(x.view())?;
        let x = restrict_features(x, self.state.config.features())?;

        if let Some(expected) = self.state.n_observables
            && x.ncols() != expected
        {
            return Err(EstimatorErr::shape(
                "evaluated observables",
                vec![x.ncols()],
                vec![expected],
            ));
        }

        Ok(x)
    }
}

impl Estimator for RatioEstimator {
    type Model = RatioModel;
    type Input = InputData;
    type Options = TrainingOptions;
    type Evaluation = (Array1<f32>, Array1<f32>);

    const ESTIMATOR_TYPE: &'static str = DOUBLE_PARAMETERIZED_RATIO;

    fn state(&self) -> &EstimatorState<RatioModel> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EstimatorState<RatioModel> {
        &mut self.state
    }

    /// Trains the network.
    ///
    /// # Arguments
    /// * `method` - The inference method.
    /// * `input` - The training arrays, at least `X_train`, `y_train` and `w_train`.
    /// * `options` - The training hyperparameters.
    ///
    /// # Returns
    /// The trainer's loss history. Configuration and validation errors are returned before the
    /// estimator is modified.
    fn train(
        &mut self,
        method: Method,
        input: InputData,
        options: TrainingOptions,
    ) -> Result<TrainingResult> {
        log_training_setup(method, &options, &self.state.config);

        let missing = input.missing_required();
        if !missing.is_empty() {
            return Err(EstimatorErr::Validation { missing });
        }

        let missing_diagnostic = input.missing_diagnostic();
        if !missing_diagnostic.is_empty() {
            log::warn!(
                "can't find the optional entries {missing_diagnostic:?}, input plots and intermediate statistics can't be enabled"
            );
        }

        options.validate()?;

        // w_train is required, so the loss never needs an imbalance correction
        let loss = get_loss(method, options.alpha, 1.0, options.loss_type);
        let (optimizer, default_kwargs) =
            get_optimizer(&options.optimizer, options.nesterov_momentum)?;
        let optimizer_kwargs = match &options.optimizer_kwargs {
            Some(overrides) => default_kwargs.merge(overrides),
            None => default_kwargs,
        };

        log::info!("loading training data");
        let memmap_threshold = options.memmap.then_some(DEFAULT_MEMMAP_THRESHOLD_GB);
        let mut inputs = input.load(memmap_threshold)?;
        if let Some(limit) = options.limit_samplesize {
            inputs.truncate(limit);
        }

        let (n_samples, n_observables) = inputs.x.dim();
        log::info!("found {n_samples} samples with {n_observables} observables");
        if let Some(validation) = &inputs.validation {
            log::info!("found {} separate validation samples", validation.x.nrows());
        }

        let has_r_xz = inputs.r_xz.is_some()
            && inputs
                .validation
                .as_ref()
                .is_none_or(|validation| validation.r_xz.is_some());
        for component in &loss.0 {
            component.validate(has_r_xz)?;
        }

        let meta_data = input.meta_data().cloned().or_else(|| {
            diagnostics::read_metadata(&diagnostics::metadata_path(
                &options.global_name,
                options.nentries,
            ))
        });
        let feature_names = meta_data
            .map(|meta_data: MetaData| meta_data.into_values().collect::<Vec<_>>())
            .filter(|names| {
                let matches = names.len() == n_observables;
                if !matches {
                    log::warn!(
                        "the metadata names {} observables and the data has {n_observables}, ignoring it",
                        names.len()
                    );
                }
                matches
            });

        let feature_data = match (&feature_names, &inputs.diagnostic) {
            (Some(names), Some(samples))
                if options.intermediate_stats_dist || options.intermediate_train_plot.is_some() =>
            {
                Some(FeatureData {
                    feature_names: names.clone(),
                    x0: samples.x0.clone(),
                    w0: samples.w0.clone(),
                    x1: samples.x1.clone(),
                    w1: samples.w1.clone(),
                })
            }
            _ if options.intermediate_stats_dist => {
                let mut missing = input.missing_diagnostic();
                if feature_names.is_none() {
                    missing.push("metaData".to_string());
                }
                return Err(EstimatorErr::Validation { missing });
            }
            _ => {
                if options.intermediate_train_plot.is_some() {
                    log::warn!(
                        "intermediate plots need the metadata and every one of {DIAGNOSTIC_KEYS:?}, skipping them"
                    );
                }
                None
            }
        };

        // the scaling is set up on a copy and only kept once every check passed
        let mut input_scaler = self.state.input_scaler.clone();
        input_scaler.initialize(inputs.x.view(), options.scale_inputs, false)?;
        let x = input_scaler.apply(inputs.x.view())?;
        let x_val = inputs
            .validation
            .as_ref()
            .map(|validation| input_scaler.apply(validation.x.view()))
            .transpose()?;

        let plotter = JsonHistogramPlotter::new(&options.plot_dir);
        if options.scale_inputs && options.plot_inputs {
            match (&feature_names, &inputs.diagnostic) {
                (Some(names), Some(samples)) => {
                    let transformed = FeatureData {
                        feature_names: names.clone(),
                        x0: input_scaler.apply(samples.x0.view())?,
                        w0: samples.w0.clone(),
                        x1: input_scaler.apply(samples.x1.view())?,
                        w1: samples.w1.clone(),
                    };
                    diagnostics::plot_inputs(&plotter, &transformed, &options.global_name);
                }
                _ => log::warn!("plotting the inputs needs the metadata and the per hypothesis samples"),
            }
        }

        let features = self.state.config.features();
        let x = restrict_features(x, features)?;
        let x_val = x_val.map(|x| restrict_features(x, features)).transpose()?;
        if features.is_some() {
            log::info!("only using {} of {n_observables} observables", x.ncols());
        }

        let n_observables = x.ncols();
        if let Some(expected) = self.state.n_observables
            && n_observables != expected
        {
            return Err(EstimatorErr::shape(
                "number of observables of the model",
                vec![n_observables],
                vec![expected],
            ));
        }

        let data = TrainingData::new(x, inputs.y, inputs.w, inputs.r_xz)?;
        let data_val = match (x_val, inputs.validation) {
            (Some(x_val), Some(validation)) => Some(TrainingData::new(
                x_val,
                validation.y,
                validation.w,
                validation.r_xz,
            )?),
            _ => None,
        };

        let new_model = match self.state.model {
            Some(_) => None,
            None => {
                log::info!("creating model");
                Some(self.create_model(&self.state.config, n_observables)?)
            }
        };

        self.state.input_scaler = input_scaler;
        self.state.n_observables = Some(n_observables);
        if new_model.is_some() {
            self.state.model = new_model;
        }

        let validation_split = options.validation_split.unwrap_or(0.0);
        let early_stopping =
            options.early_stopping && (data_val.is_some() || validation_split > 0.0);

        let mut snapshot = EstimatorSnapshot::new(
            self.state.config.clone(),
            n_observables,
            self.state.input_scaler.clone(),
            options.checkpoint_prefix.clone(),
        );

        let mut request = TrainerRequest::new(data, loss);
        request.data_val = data_val;
        request.epochs = options.n_epochs;
        request.batch_size = options.batch_size;
        request.optimizer = optimizer;
        request.optimizer_kwargs = optimizer_kwargs;
        request.initial_lr = options.initial_lr;
        request.final_lr = options.final_lr;
        request.validation_split = validation_split;
        request.early_stopping = early_stopping;
        request.early_stopping_patience = options.early_stopping_patience;
        request.clip_gradient = options.clip_gradient;
        request.verbose = options.verbose;
        request.intermediate_train_plot = options.intermediate_train_plot;
        request.intermediate_save = options.intermediate_save;
        request.intermediate_stats_dist = options.intermediate_stats_dist;
        request.stats_methods = options.stats_methods.clone();
        request.feature_data = feature_data;
        request.plotter = Some(&plotter);
        request.plot_name = options.global_name.clone();
        request.seed = options.seed.or(self.seed).unwrap_or_default();

        let model = self
            .state
            .model
            .as_mut()
            .ok_or(EstimatorErr::State(NO_MODEL))?;

        log::info!("training model");
        let result = RatioTrainer::new(model, options.n_workers).train(request, Some(&mut snapshot))?;
        Ok(result)
    }

    fn evaluate(&self, x: &ArraySource) -> Result<Self::Evaluation> {
        self.evaluate_ratio(x)
    }

    fn create_model(&self, config: &EstimatorConfig, n_observables: usize) -> Result<RatioModel> {
        let model = match self.seed {
            Some(seed) => RatioModel::with_seed(
                n_observables,
                config.n_hidden(),
                config.activation(),
                config.dropout_prob(),
                seed,
            ),
            None => RatioModel::new(
                n_observables,
                config.n_hidden(),
                config.activation(),
                config.dropout_prob(),
            ),
        }?;

        Ok(model)
    }
}

fn log_training_setup(method: Method, options: &TrainingOptions, config: &EstimatorConfig) {
    log::info!("starting training");
    log::info!("  method:                  {method}");
    log::info!("  batch size:              {}", options.batch_size);
    log::info!("  optimizer:               {}", options.optimizer);
    log::info!("  optimizer kwargs:        {:?}", options.optimizer_kwargs);
    log::info!("  epochs:                  {}", options.n_epochs);
    log::info!(
        "  learning rate:           {} initially, decaying to {}",
        options.initial_lr,
        options.final_lr
    );
    if options.optimizer == "sgd" {
        log::info!("  nesterov momentum:       {:?}", options.nesterov_momentum);
    }
    log::info!("  validation split:        {:?}", options.validation_split);
    log::info!("  early stopping:          {}", options.early_stopping);
    log::info!("  early stopping patience: {:?}", options.early_stopping_patience);
    log::info!("  scale inputs:            {}", options.scale_inputs);
    match options.limit_samplesize {
        Some(limit) => log::info!("  samples:                 {limit}"),
        None => log::info!("  samples:                 all"),
    }
    log::info!("  hidden layers:           {:?}", config.n_hidden());
    log::info!("  loss type:               {}", options.loss_type);
    if options.scale_parameters {
        log::warn!("the ratio estimator isn't conditioned on parameters, ignoring scale_parameters");
    }
}
