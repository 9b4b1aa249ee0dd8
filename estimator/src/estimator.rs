use std::path::Path;

use machine_learning::{
    arch::{PersistentModel, loss::Method},
    dataset::ArraySource,
    training::TrainingResult,
};
use ndarray::{Array2, ArrayView2};

use crate::{
    ConfigErr, EstimatorErr, Result,
    persistence::{self, Artifacts, ScalingKind},
    scaling::{InputScaler, ParameterScaler, ScalarElement, ScalingStats},
    settings::{self, DecodedSettings, EstimatorConfig, SettingsRecord},
};

/// Returned by every operation that needs a model before there is one.
pub const NO_MODEL: &str = "no model, train or load a model first";

/// What every estimator holds: its configuration, dimensions, scaling and model.
///
/// The model is `None` until the first successful `train` or `load`.
#[derive(Debug, Clone)]
pub struct EstimatorState<M> {
    pub(crate) config: EstimatorConfig,
    pub(crate) n_observables: Option<usize>,
    pub(crate) n_parameters: Option<usize>,
    pub(crate) input_scaler: InputScaler,
    pub(crate) parameter_scaler: Option<ParameterScaler>,
    pub(crate) model: Option<M>,
}

impl<M> EstimatorState<M> {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            n_observables: None,
            n_parameters: None,
            input_scaler: InputScaler::default(),
            parameter_scaler: None,
            model: None,
        }
    }

    /// Creates the state of an estimator conditioned on parameter vectors, which carries a
    /// `ParameterScaler` as well.
    pub fn conditional(config: EstimatorConfig) -> Self {
        Self {
            parameter_scaler: Some(ParameterScaler::default()),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn n_observables(&self) -> Option<usize> {
        self.n_observables
    }

    pub fn n_parameters(&self) -> Option<usize> {
        self.n_parameters
    }

    pub fn x_scaling(&self) -> Option<&ScalingStats> {
        self.input_scaler.stats()
    }

    pub fn theta_scaling(&self) -> Option<&ScalingStats> {
        self.parameter_scaler.as_ref().and_then(ParameterScaler::stats)
    }

    pub fn is_conditional(&self) -> bool {
        self.parameter_scaler.is_some()
    }

    pub fn model(&self) -> Option<&M> {
        self.model.as_ref()
    }

    /// Installs a freshly built model together with the input width it was built for.
    ///
    /// # Arguments
    /// * `model` - The model, replacing the current one.
    /// * `n_observables` - The model's input width.
    /// * `n_parameters` - The parameter width of conditional estimators.
    pub fn set_model(&mut self, model: M, n_observables: usize, n_parameters: Option<usize>) {
        self.model = Some(model);
        self.n_observables = Some(n_observables);
        self.n_parameters = n_parameters;
    }
}

/// A neural estimator that can be trained, evaluated, saved and loaded.
///
/// Implementors supply the training and evaluation logic and how to build their model, `save`,
/// `load` and the input transformation come for free.
pub trait Estimator {
    type Model: PersistentModel;
    /// The data `train` reads.
    type Input;
    /// The training hyperparameters.
    type Options;
    /// What `evaluate` returns.
    type Evaluation;

    /// The tag written to and expected in the settings file.
    const ESTIMATOR_TYPE: &'static str;

    fn state(&self) -> &EstimatorState<Self::Model>;

    fn state_mut(&mut self) -> &mut EstimatorState<Self::Model>;

    /// Trains the estimator, creating the model on first use.
    fn train(
        &mut self,
        method: Method,
        input: Self::Input,
        options: Self::Options,
    ) -> Result<TrainingResult>;

    fn evaluate(&self, x: &ArraySource) -> Result<Self::Evaluation>;

    /// Builds a fresh, untrained model for `n_observables` inputs.
    fn create_model(&self, config: &EstimatorConfig, n_observables: usize) -> Result<Self::Model>;

    fn wrap_settings(&self) -> SettingsRecord {
        let state = self.state();
        settings::encode(
            &state.config,
            Self::ESTIMATOR_TYPE,
            state.n_observables,
            state.n_parameters,
        )
    }

    fn unwrap_settings(&self, record: &SettingsRecord) -> Result<DecodedSettings> {
        settings::decode(record, Self::ESTIMATOR_TYPE)
    }

    /// Returns the model or a state error if there is none.
    fn model(&self) -> Result<&Self::Model> {
        self.state().model.as_ref().ok_or(EstimatorErr::State(NO_MODEL))
    }

    /// Saves the estimator to `<prefix>_settings.json`, `<prefix>_state_dict.safetensors` and the
    /// scaling files of the statistics that exist.
    ///
    /// # Arguments
    /// * `prefix` - The common path of every file, missing directories are created.
    /// * `include_full_model` - Also write a readable dump of the model to `<prefix>_model.json`.
    fn save(&self, prefix: impl AsRef<Path>, include_full_model: bool) -> Result<()> {
        let model = self.model()?;
        let state = self.state();
        let settings = self.wrap_settings();

        let artifacts = Artifacts {
            settings: &settings,
            x_scaling: state.x_scaling(),
            theta_scaling: state.theta_scaling(),
            model,
        };

        persistence::save_artifacts(prefix.as_ref(), &artifacts, include_full_model)
    }

    /// Loads an estimator saved with `save`.
    ///
    /// Missing scaling files only produce a warning and leave the scaling absent. Everything is
    /// read and checked before the estimator is touched, so on error it's left as it was.
    fn load(&mut self, prefix: impl AsRef<Path>) -> Result<()> {
        let prefix = prefix.as_ref();
        log::info!("loading model from {}", prefix.display());

        let record = persistence::read_settings(prefix)?;
        let decoded = self.unwrap_settings(&record)?;

        let n_observables = decoded.n_observables.ok_or(ConfigErr::InvalidField {
            field: "n_observables",
            reason: "a saved model needs its input width".to_string(),
        })?;
        let mut model = self.create_model(&decoded.config, n_observables)?;

        let x_scaling = persistence::read_scaling(prefix, ScalingKind::Observables)?;
        let theta_scaling = if self.state().is_conditional() {
            persistence::read_scaling(prefix, ScalingKind::Parameters)?
        } else {
            None
        };

        if let Some(stats) = &x_scaling {
            check_observable_scaling(stats, decoded.config.features(), n_observables)?;
        }
        if let (Some(stats), Some(n_parameters)) = (&theta_scaling, decoded.n_parameters)
            && stats.len() != n_parameters
        {
            return Err(EstimatorErr::shape(
                "theta scaling",
                vec![stats.len()],
                vec![n_parameters],
            ));
        }

        model.load_state_dict(persistence::read_state_dict(prefix)?)?;

        let state = self.state_mut();
        state.config = decoded.config;
        state.n_observables = Some(n_observables);
        state.n_parameters = decoded.n_parameters;
        state.input_scaler.set_stats(x_scaling);
        if let Some(scaler) = state.parameter_scaler.as_mut() {
            scaler.set_stats(theta_scaling);
        }
        state.model = Some(model);

        Ok(())
    }

    /// Sets up the observable scaling, see `InputScaler::initialize`.
    fn initialize_input_transform<A: ScalarElement>(
        &mut self,
        x: ArrayView2<A>,
        transform: bool,
        overwrite: bool,
    ) -> Result<()> {
        self.state_mut()
            .input_scaler
            .initialize(x, transform, overwrite)
    }

    /// Standardizes observables with the current scaling, the identity if there is none.
    fn transform_inputs<A: ScalarElement>(&self, x: ArrayView2<A>) -> Result<Array2<A>> {
        self.state().input_scaler.apply(x)
    }
}

/// Checks that saved observable scaling fits the saved settings. The scaling covers every
/// observable, so with a feature subset it only has to reach the largest selected index.
fn check_observable_scaling(
    stats: &ScalingStats,
    features: Option<&[usize]>,
    n_observables: usize,
) -> Result<()> {
    let min_width = match features {
        None if stats.len() != n_observables => {
            return Err(EstimatorErr::shape(
                "x scaling",
                vec![stats.len()],
                vec![n_observables],
            ));
        }
        None => return Ok(()),
        Some(features) => features.iter().max().map_or(0, |&max| max + 1),
    };

    if stats.len() < min_width {
        return Err(ConfigErr::InvalidField {
            field: "features",
            reason: format!(
                "selects observable {} but the saved scaling only covers {}",
                min_width - 1,
                stats.len()
            ),
        }
        .into());
    }

    Ok(())
}
