use std::{fmt, str::FromStr};

use ndarray::{Array1, Axis};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use super::{EpochCallback, FeatureData, LearningRateSchedule, TrainingData};
use crate::{
    MlErr, Result,
    arch::{
        RatioModel,
        loss::{LossComponent, ResolvedLoss},
    },
    evaluation,
    optimization::{Optimizer, OptimizerKind, OptimizerKwargs},
    plotting::{DistributionPlot, DistributionPlotter},
    stats::{self, StatsMethod},
};

/// How often the training progress is logged at info level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    All,
    Many,
    #[default]
    Some,
    Few,
    None,
}

impl Verbosity {
    /// Returns every how many epochs progress is logged, `None` when it isn't.
    fn log_every(&self, epochs: usize) -> Option<usize> {
        match self {
            Verbosity::All => Some(1),
            Verbosity::Many => Some((epochs / 20).max(1)),
            Verbosity::Some => Some((epochs / 10).max(1)),
            Verbosity::Few => Some((epochs / 5).max(1)),
            Verbosity::None => None,
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verbosity::All => "all",
            Verbosity::Many => "many",
            Verbosity::Some => "some",
            Verbosity::Few => "few",
            Verbosity::None => "none",
        })
    }
}

impl FromStr for Verbosity {
    type Err = MlErr;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Verbosity::All),
            "many" => Ok(Verbosity::Many),
            "some" => Ok(Verbosity::Some),
            "few" => Ok(Verbosity::Few),
            "none" => Ok(Verbosity::None),
            _ => Err(MlErr::UnknownVerbosity(s.to_string())),
        }
    }
}

/// The distance between the reweighted numerator and the denominator distribution of one
/// feature after an epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDistance {
    pub epoch: usize,
    pub method: StatsMethod,
    pub feature: String,
    pub value: f64,
}

/// What a training run went through.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingResult {
    pub loss_labels: Vec<String>,
    /// The weighted total training loss of every epoch.
    pub train_losses: Vec<f32>,
    /// The weighted total validation loss of every epoch, empty without validation data.
    pub val_losses: Vec<f32>,
    /// The training loss of every component, by epoch.
    pub train_loss_components: Vec<Vec<f32>>,
    pub val_loss_components: Vec<Vec<f32>>,
    /// The one based epoch whose parameters the model ends with when early stopping.
    pub best_epoch: usize,
    pub epochs_trained: usize,
    pub stopped_early: bool,
    pub intermediate_stats: Vec<FeatureDistance>,
}

/// Everything a training run needs besides the model.
pub struct TrainerRequest<'a> {
    pub data: TrainingData,
    /// An external validation set, when `None` one is carved out of `data`.
    pub data_val: Option<TrainingData>,
    pub losses: Vec<LossComponent>,
    pub loss_labels: Vec<&'static str>,
    pub loss_weights: Vec<f32>,
    pub epochs: usize,
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
    pub optimizer_kwargs: OptimizerKwargs,
    pub initial_lr: f32,
    pub final_lr: f32,
    /// The share of `data` used for validation when there's no external validation set.
    pub validation_split: f64,
    pub early_stopping: bool,
    /// Epochs without improvement before stopping, `None` trains every epoch.
    pub early_stopping_patience: Option<usize>,
    /// The maximum L2 norm of the gradient.
    pub clip_gradient: Option<f32>,
    pub verbose: Verbosity,
    /// Draw the reweighted distributions every this many epochs.
    pub intermediate_train_plot: Option<usize>,
    /// Save a checkpoint every this many epochs.
    pub intermediate_save: Option<usize>,
    /// Compute the distances between the reweighted distributions after every epoch.
    pub intermediate_stats_dist: bool,
    pub stats_methods: Vec<StatsMethod>,
    pub feature_data: Option<FeatureData>,
    pub plotter: Option<&'a dyn DistributionPlotter>,
    pub plot_name: String,
    pub seed: u64,
}

impl<'a> TrainerRequest<'a> {
    /// Creates a request with the default hyperparameters.
    ///
    /// # Arguments
    /// * `data` - The training data.
    /// * `loss` - The losses as resolved by `get_loss`.
    pub fn new(data: TrainingData, loss: ResolvedLoss) -> Self {
        let (losses, loss_labels, loss_weights) = loss;

        Self {
            data,
            data_val: None,
            losses,
            loss_labels,
            loss_weights,
            epochs: 50,
            batch_size: 128,
            optimizer: OptimizerKind::AmsGrad,
            optimizer_kwargs: OptimizerKwargs::default(),
            initial_lr: 1e-3,
            final_lr: 1e-4,
            validation_split: 0.25,
            early_stopping: true,
            early_stopping_patience: None,
            clip_gradient: None,
            verbose: Verbosity::default(),
            intermediate_train_plot: None,
            intermediate_save: None,
            intermediate_stats_dist: false,
            stats_methods: Vec::new(),
            feature_data: None,
            plotter: None,
            plot_name: String::new(),
            seed: 0,
        }
    }
}

/// Fits a `RatioModel` with minibatch gradient descent.
pub struct RatioTrainer<'m> {
    model: &'m mut RatioModel,
    n_workers: usize,
}

impl<'m> RatioTrainer<'m> {
    /// Creates a new `RatioTrainer`.
    ///
    /// # Arguments
    /// * `model` - The model to train, modified in place.
    /// * `n_workers` - The threads used to evaluate the model on whole datasets.
    pub fn new(model: &'m mut RatioModel, n_workers: usize) -> Self {
        Self { model, n_workers }
    }

    /// Trains the model.
    ///
    /// # Arguments
    /// * `request` - The data and hyperparameters.
    /// * `callback` - The owner of the model, needed for checkpoints and intermediate
    ///   evaluations.
    ///
    /// # Returns
    /// The loss history or an error, in which case the model may be partially trained.
    pub fn train(
        &mut self,
        request: TrainerRequest,
        mut callback: Option<&mut dyn EpochCallback>,
    ) -> Result<TrainingResult> {
        self.check(&request)?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.n_workers.max(1))
            .build()
            .map_err(|e| MlErr::InvalidHyperparameter(e.to_string()))?;

        let TrainerRequest {
            data,
            data_val,
            losses,
            loss_labels,
            loss_weights,
            epochs,
            batch_size,
            optimizer,
            optimizer_kwargs,
            initial_lr,
            final_lr,
            validation_split,
            early_stopping,
            early_stopping_patience,
            clip_gradient,
            verbose,
            intermediate_train_plot,
            intermediate_save,
            intermediate_stats_dist,
            stats_methods,
            feature_data,
            plotter,
            plot_name,
            seed,
        } = request;

        let mut rng = StdRng::seed_from_u64(seed);
        let (train, val) = match data_val {
            Some(val) => (data, Some(val)),
            None => data.split(validation_split, &mut rng)?,
        };
        log::info!(
            "training on {} samples, validating on {}",
            train.len(),
            val.as_ref().map_or(0, TrainingData::len)
        );

        let mut optimizer = optimizer.build(self.model.size(), initial_lr, &optimizer_kwargs)?;
        let schedule = LearningRateSchedule::new(initial_lr, final_lr, epochs);
        let log_every = verbose.log_every(epochs);
        let binnings = feature_data.as_ref().map(feature_binnings);

        let mut result = TrainingResult {
            loss_labels: loss_labels.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        };
        let mut best: Option<(f32, usize, Vec<f32>)> = None;
        let mut indices: Vec<usize> = (0..train.len()).collect();

        for epoch in 0..epochs {
            let n = epoch + 1;
            let lr = schedule.learning_rate(epoch);
            optimizer.set_learning_rate(lr);
            indices.shuffle(&mut rng);

            let mut totals = vec![0f64; losses.len()];
            for batch in indices.chunks(batch_size) {
                let batch = train.select(batch);
                let values =
                    self.step(&batch, &losses, &loss_weights, clip_gradient, optimizer.as_mut())?;

                for (total, value) in totals.iter_mut().zip(values) {
                    *total += value as f64 * batch.len() as f64;
                }
            }

            let train_components: Vec<f32> = totals
                .iter()
                .map(|total| (total / train.len() as f64) as f32)
                .collect();
            let train_loss = weighted_sum(&train_components, &loss_weights);
            if !train_loss.is_finite() {
                return Err(MlErr::NonFiniteLoss { epoch: n });
            }

            let val_components = val
                .as_ref()
                .map(|val| self.loss_components(&pool, val, &losses))
                .transpose()?;
            let val_loss = val_components
                .as_ref()
                .map(|components| weighted_sum(components, &loss_weights));

            result.train_losses.push(train_loss);
            result.train_loss_components.push(train_components);
            if let (Some(loss), Some(components)) = (val_loss, val_components) {
                result.val_losses.push(loss);
                result.val_loss_components.push(components);
            }
            result.epochs_trained = n;

            let monitored = val_loss.unwrap_or(train_loss);
            if best.as_ref().is_none_or(|(loss, ..)| monitored < *loss) {
                best = Some((monitored, epoch, self.model.params().to_vec()));
            }

            let message = match val_loss {
                Some(val_loss) => format!(
                    "epoch {n:>3}: train loss {train_loss:>8.5}, val loss {val_loss:>8.5}, lr {lr:.2e}"
                ),
                None => format!("epoch {n:>3}: train loss {train_loss:>8.5}, lr {lr:.2e}"),
            };
            match log_every {
                Some(k) if n % k == 0 || n == epochs || n == 1 => log::info!("{message}"),
                _ => log::debug!("{message}"),
            }

            if let Some(callback) = callback.as_deref_mut() {
                if intermediate_save.is_some_and(|k| n % k == 0) {
                    callback.save_checkpoint(n, &*self.model)?;
                }

                let plot_now = intermediate_train_plot.is_some_and(|k| n % k == 0);
                if let (Some(features), Some(binnings)) = (&feature_data, &binnings) {
                    if plot_now || intermediate_stats_dist {
                        let (r_hat, _) = callback.evaluate_ratio(&*self.model, features.x0.view())?;
                        let reweight = r_hat.mapv(|r| 1. / r);

                        if plot_now && let Some(plotter) = plotter {
                            let plot = DistributionPlot {
                                x0: features.x0.view(),
                                w0: features.w0.view(),
                                x1: features.x1.view(),
                                w1: features.w1.view(),
                                reweight: Some(reweight.view()),
                                feature_names: &features.feature_names,
                                binning: binnings,
                                label: &format!("epoch_{n}"),
                                name: &plot_name,
                                max_entries: None,
                            };

                            if let Err(e) = plotter.draw_weighted_distributions(&plot) {
                                log::warn!("couldn't draw the distributions of epoch {n}: {e}");
                            }
                        }

                        if intermediate_stats_dist {
                            let distances =
                                feature_distances(n, features, binnings, &reweight, &stats_methods);
                            result.intermediate_stats.extend(distances);
                        }
                    }
                }
            }

            if let (true, Some(patience), Some((_, best_epoch, _))) =
                (early_stopping, early_stopping_patience, &best)
                && epoch - best_epoch > patience
            {
                log::info!(
                    "no improvement in {patience} epochs, stopping after epoch {n}"
                );
                result.stopped_early = true;
                break;
            }
        }

        if let Some((loss, epoch, params)) = best {
            result.best_epoch = epoch + 1;

            if early_stopping && result.best_epoch < result.epochs_trained {
                log::info!(
                    "early stopping: restoring the parameters of epoch {} (loss {loss:.5})",
                    result.best_epoch
                );
                self.model.set_params(&params)?;
            } else if !early_stopping {
                result.best_epoch = result.epochs_trained;
            }
        }

        Ok(result)
    }

    /// Runs one minibatch: forward, loss, backward, clipping and optimizer step.
    ///
    /// # Returns
    /// The value of every loss component on the batch.
    fn step(
        &mut self,
        batch: &TrainingData,
        losses: &[LossComponent],
        weights: &[f32],
        clip_gradient: Option<f32>,
        optimizer: &mut (dyn Optimizer + Send),
    ) -> Result<Vec<f32>> {
        let log_r = self.model.forward(batch.x())?;
        let targets = batch.targets();

        let mut d = Array1::zeros(batch.len());
        let mut values = Vec::with_capacity(losses.len());
        for (loss, &weight) in losses.iter().zip(weights) {
            let (value, grad) = loss.evaluate(log_r.view(), &targets, batch.w().view())?;
            d.scaled_add(weight, &grad);
            values.push(value);
        }

        self.model.backward(d.view())?;

        let (params, grad) = self.model.params_and_grad_mut();
        if let Some(max_norm) = clip_gradient {
            clip_grad_norm(grad, max_norm);
        }
        optimizer.update_params(grad, params)?;

        Ok(values)
    }

    /// Computes every loss component on a whole dataset, without touching the gradient.
    fn loss_components(
        &self,
        pool: &ThreadPool,
        data: &TrainingData,
        losses: &[LossComponent],
    ) -> Result<Vec<f32>> {
        let model: &RatioModel = &*self.model;
        let x = data.x();
        let log_r = pool.install(|| evaluation::log_r_hat(model, x))?;
        let targets = data.targets();

        losses
            .iter()
            .map(|loss| {
                loss.evaluate(log_r.view(), &targets, data.w().view())
                    .map(|(value, _)| value)
            })
            .collect()
    }

    fn check(&self, request: &TrainerRequest) -> Result<()> {
        let n_losses = request.losses.len();
        if n_losses == 0
            || request.loss_labels.len() != n_losses
            || request.loss_weights.len() != n_losses
        {
            return Err(MlErr::InvalidHyperparameter(format!(
                "{} losses, {} labels and {} weights were given",
                n_losses,
                request.loss_labels.len(),
                request.loss_weights.len()
            )));
        }

        if request.epochs == 0 || request.batch_size == 0 {
            return Err(MlErr::InvalidHyperparameter(
                "epochs and batch size must be positive".to_string(),
            ));
        }

        let expected = self.model.n_observables();
        let widths = std::iter::once(&request.data)
            .chain(request.data_val.as_ref())
            .map(TrainingData::n_features);
        for got in widths {
            if got != expected {
                return Err(MlErr::SizeMismatch {
                    what: "training data width",
                    got,
                    expected,
                });
            }
        }

        let has_r_xz = request.data.r_xz().is_some()
            && request
                .data_val
                .as_ref()
                .is_none_or(|val| val.r_xz().is_some());
        for loss in &request.losses {
            loss.validate(has_r_xz)?;
        }

        if let Some(features) = &request.feature_data {
            let n_features = features.feature_names.len();
            for (what, got, expected) in [
                ("x0 feature columns", features.x0.ncols(), n_features),
                ("x1 feature columns", features.x1.ncols(), n_features),
                ("w0 length", features.w0.len(), features.x0.nrows()),
                ("w1 length", features.w1.len(), features.x1.nrows()),
            ] {
                if got != expected {
                    return Err(MlErr::SizeMismatch {
                        what,
                        got,
                        expected,
                    });
                }
            }
        }

        if request.intermediate_stats_dist && request.stats_methods.is_empty() {
            log::warn!("intermediate statistics were requested without any statistics method");
        }

        Ok(())
    }
}

fn weighted_sum(values: &[f32], weights: &[f32]) -> f32 {
    values.iter().zip(weights).map(|(v, w)| v * w).sum()
}

/// Scales `grad` down so it's L2 norm is at most `max_norm`.
fn clip_grad_norm(grad: &mut [f32], max_norm: f32) {
    let norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();

    if norm > max_norm && norm > 0. {
        let scale = max_norm / norm;
        grad.iter_mut().for_each(|g| *g *= scale);
    }
}

fn feature_binnings(features: &FeatureData) -> Vec<Vec<f64>> {
    (0..features.feature_names.len())
        .map(|i| stats::binning(features.x0.column(i)).unwrap_or_default())
        .collect()
}

fn feature_distances(
    epoch: usize,
    features: &FeatureData,
    binnings: &[Vec<f64>],
    reweight: &Array1<f32>,
    methods: &[StatsMethod],
) -> Vec<FeatureDistance> {
    let w0 = &features.w0 * reweight;
    let mut distances = Vec::with_capacity(methods.len() * features.feature_names.len());

    for &method in methods {
        for (i, feature) in features.feature_names.iter().enumerate() {
            let value = method.distance(
                features.x0.index_axis(Axis(1), i),
                w0.view(),
                features.x1.index_axis(Axis(1), i),
                features.w1.view(),
                &binnings[i],
            );
            log::debug!("epoch {epoch}: {method} distance of {feature} is {value:.5}");

            distances.push(FeatureDistance {
                epoch,
                method,
                feature: feature.clone(),
                value,
            });
        }
    }

    distances
}
