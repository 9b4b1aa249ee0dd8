use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use estimator::{
    Estimator, EstimatorConfig, InputData, RatioEstimator, TrainingOptions,
    ratio::{W_TRAIN, X_TRAIN, Y_TRAIN},
};
use machine_learning::{
    arch::{activations::Activation, loss::Method},
    dataset::{ArraySource, load_and_check},
};
use ndarray::Array1;

/// Trains a carl likelihood ratio estimator between a nominal sample and one of it's
/// variations.
#[derive(Parser, Debug)]
#[command(name = "train", version)]
struct Cli {
    /// The samples to derive weights for.
    #[arg(short, long, default_value = "dilepton")]
    samples: String,
    /// The variation to derive weights for.
    #[arg(short, long, default_value = "qsf")]
    variation: String,
    /// The sample count tag of the dataset files, 0 is the full sample.
    #[arg(short, long, default_value_t = 0)]
    nentries: i64,
    /// A JSON file with training options, overriding the defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let data_dir = PathBuf::from("data").join(&cli.samples).join(&cli.variation);
    let file = |key: &str| data_dir.join(format!("{key}_{}.safetensors", cli.nentries));

    let x = file("X_train");
    let y = file("y_train");
    anyhow::ensure!(
        x.exists() && y.exists(),
        "no training data in {}, expected {} and {}",
        data_dir.display(),
        x.display(),
        y.display()
    );
    log::info!("loading existing datasets {} {}", x.display(), y.display());

    let w: ArraySource = match file("w_train") {
        path if path.exists() => path.into(),
        _ => {
            log::warn!("no event weights in {}, weighting every sample by 1", data_dir.display());
            let n = load_and_check(&y.as_path().into(), None, Y_TRAIN)?.len();
            Array1::<f32>::ones(n).into()
        }
    };

    let mut options = match &cli.config {
        Some(path) => {
            let json = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_slice::<TrainingOptions>(&json)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => TrainingOptions::default(),
    };
    options.global_name = cli.samples.clone();
    options.nentries = cli.nentries;

    let config = EstimatorConfig::new(None, vec![8, 4, 2], Activation::Relu, 0.0)?;
    let mut estimator = RatioEstimator::new(config);

    let input = InputData::new()
        .with(X_TRAIN, x)
        .with(Y_TRAIN, y)
        .with(W_TRAIN, w);
    let result = estimator.train(Method::Carl, input, options)?;
    log::info!(
        "trained {} epochs, best epoch {}",
        result.epochs_trained,
        result.best_epoch
    );

    let prefix = PathBuf::from("models")
        .join(&cli.samples)
        .join(format!("{}_carl_{}", cli.variation, cli.nentries));
    estimator.save(&prefix, true)?;
    log::info!("saved the estimator to {}", prefix.display());

    Ok(())
}
