use std::{collections::BTreeMap, fs, path::Path};

use approx::assert_abs_diff_eq;
use estimator::{
    ConfigErr, Estimator, EstimatorConfig, EstimatorErr, InputData, RatioEstimator,
    TrainingOptions,
    ratio::{R_XZ_TRAIN, W_TRAIN, W0_TRAIN, W1_TRAIN, X_TRAIN, X0_TRAIN, X1_TRAIN, Y_TRAIN},
};
use machine_learning::{
    MlErr,
    arch::{activations::Activation, loss::Method},
    dataset::ArraySource,
    stats::StatsMethod,
    tensors::{NamedTensor, write_tensors},
    training::Verbosity,
};
use ndarray::{Array1, Array2};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two interleaved classes, the odd rows are shifted by `shift` in every column.
fn samples(n: usize, n_observables: usize, shift: f32) -> (Array2<f32>, Array1<f32>) {
    let y = Array1::from_shape_fn(n, |i| (i % 2) as f32);
    let x = Array2::from_shape_fn((n, n_observables), |(i, j)| {
        let noise = ((i * 7 + j * 13) % 17) as f32 / 17. - 0.5;
        10. * j as f32 + shift * y[i] + noise
    });
    (x, y)
}

fn input(x: Array2<f32>, y: Array1<f32>) -> InputData {
    let n = y.len();
    InputData::new()
        .with(X_TRAIN, x)
        .with(Y_TRAIN, y)
        .with(W_TRAIN, Array1::<f32>::ones(n))
}

fn config() -> EstimatorConfig {
    EstimatorConfig::new(None, vec![8, 4], Activation::Tanh, 0.0).unwrap()
}

fn options() -> TrainingOptions {
    TrainingOptions {
        n_epochs: 5,
        batch_size: 32,
        n_workers: 2,
        verbose: Verbosity::None,
        seed: Some(3),
        ..Default::default()
    }
}

fn settings_json(prefix: &Path) -> serde_json::Value {
    let path = prefix.with_file_name(format!(
        "{}_settings.json",
        prefix.file_name().unwrap().to_string_lossy()
    ));
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[test]
fn carl_on_five_observables_records_the_input_scaling() {
    init_logger();
    let (x, y) = samples(1000, 5, 2.);
    let mut estimator = RatioEstimator::with_seed(config(), 0);

    let result = estimator
        .train(Method::Carl, input(x.clone(), y), options())
        .unwrap();

    assert_eq!(result.epochs_trained, 5);
    assert_eq!(result.train_losses.len(), 5);
    assert_eq!(estimator.state().n_observables(), Some(5));

    let scaling = estimator.state().x_scaling().unwrap();
    assert_eq!(scaling.means.len(), 5);
    for (j, mean) in scaling.means.iter().enumerate() {
        let expected = x.column(j).iter().map(|&v| v as f64).sum::<f64>() / 1000.;
        assert_abs_diff_eq!(*mean, expected, epsilon = 1e-3);
    }

    let (r_hat, s_hat) = estimator.evaluate_ratio(&x.into()).unwrap();
    assert_eq!(r_hat.len(), 1000);
    for (r, s) in r_hat.iter().zip(&s_hat) {
        assert!(*r > 0.);
        assert_abs_diff_eq!(*s, 1. / (1. + r), epsilon = 1e-5);
    }
}

#[test]
fn saved_estimators_load_back_identically() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("models").join("carl");

    let (x, y) = samples(200, 3, 1.5);
    let mut trained = RatioEstimator::with_seed(config(), 1);
    trained
        .train(Method::Carl, input(x.clone(), y), options())
        .unwrap();
    trained.save(&prefix, true).unwrap();

    assert!(dir.path().join("models/carl_x_means.safetensors").exists());
    assert!(dir.path().join("models/carl_model.json").exists());
    assert!(!dir.path().join("models/carl_theta_means.safetensors").exists());

    let mut loaded = RatioEstimator::new(EstimatorConfig::default());
    loaded.load(&prefix).unwrap();

    assert_eq!(loaded.wrap_settings(), trained.wrap_settings());
    assert_eq!(loaded.state().config(), trained.state().config());
    assert_eq!(loaded.state().x_scaling(), trained.state().x_scaling());

    let source: ArraySource = x.into();
    let (r_trained, _) = trained.evaluate_ratio(&source).unwrap();
    let (r_loaded, _) = loaded.evaluate_ratio(&source).unwrap();
    for (a, b) in r_trained.iter().zip(&r_loaded) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn evaluating_before_training_is_a_state_error() {
    let estimator = RatioEstimator::new(config());
    let x: ArraySource = Array2::<f32>::zeros((2, 3)).into();

    assert!(matches!(estimator.evaluate_ratio(&x), Err(EstimatorErr::State(_))));
    assert!(matches!(
        estimator.save("unused_prefix", false),
        Err(EstimatorErr::State(_))
    ));
}

#[test]
fn missing_weights_fail_before_anything_changes() {
    let (x, y) = samples(50, 2, 1.);
    let bundle = InputData::new().with(X_TRAIN, x).with(Y_TRAIN, y);
    let mut estimator = RatioEstimator::new(config());

    let err = estimator.train(Method::Carl, bundle, options()).unwrap_err();

    assert!(matches!(err, EstimatorErr::Validation { missing } if missing == [W_TRAIN]));
    assert!(estimator.state().model().is_none());
    assert_eq!(estimator.state().n_observables(), None);
}

#[test]
fn the_observable_count_is_locked_after_training() {
    init_logger();
    let (x, y) = samples(100, 3, 1.);
    let mut estimator = RatioEstimator::with_seed(config(), 2);
    estimator.train(Method::Carl, input(x, y), options()).unwrap();
    let scaling = estimator.state().x_scaling().cloned();

    let (wider, y) = samples(100, 4, 1.);
    let err = estimator
        .train(Method::Carl, input(wider.clone(), y), options())
        .unwrap_err();
    assert!(matches!(err, EstimatorErr::ShapeMismatch { .. }));
    assert_eq!(estimator.state().n_observables(), Some(3));
    assert_eq!(estimator.state().x_scaling().cloned(), scaling);

    assert!(matches!(
        estimator.evaluate_ratio(&wider.into()),
        Err(EstimatorErr::ShapeMismatch { .. })
    ));
}

#[test]
fn missing_scaling_files_are_tolerated() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("carl");

    let (x, y) = samples(100, 2, 1.);
    let mut trained = RatioEstimator::with_seed(config(), 4);
    trained.train(Method::Carl, input(x.clone(), y), options()).unwrap();
    trained.save(&prefix, false).unwrap();
    fs::remove_file(dir.path().join("carl_x_stds.safetensors")).unwrap();

    let mut loaded = RatioEstimator::new(config());
    loaded.load(&prefix).unwrap();

    assert_eq!(loaded.state().x_scaling(), None);
    let (r_hat, _) = loaded.evaluate_ratio(&x.into()).unwrap();
    assert_eq!(r_hat.len(), 100);
}

#[test]
fn foreign_or_untagged_settings_are_refused() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("carl");
    let settings_path = dir.path().join("carl_settings.json");

    let (x, y) = samples(60, 2, 1.);
    let mut trained = RatioEstimator::with_seed(config(), 5);
    trained.train(Method::Carl, input(x, y), options()).unwrap();
    trained.save(&prefix, false).unwrap();

    let mut settings = settings_json(&prefix);
    assert_eq!(settings["estimator_type"], "double_parameterized_ratio");

    settings["estimator_type"] = "score".into();
    fs::write(&settings_path, settings.to_string()).unwrap();
    let mut loaded = RatioEstimator::new(config());
    let err = loaded.load(&prefix).unwrap_err();
    assert!(matches!(
        err,
        EstimatorErr::Configuration(ConfigErr::EstimatorTypeMismatch { got, .. }) if got == "score"
    ));

    settings.as_object_mut().unwrap().remove("estimator_type");
    fs::write(&settings_path, settings.to_string()).unwrap();
    let err = loaded.load(&prefix).unwrap_err();
    assert!(matches!(
        err,
        EstimatorErr::Configuration(ConfigErr::MissingEstimatorType)
    ));

    // a failed load leaves the estimator untouched
    assert!(loaded.state().model().is_none());
}

#[test]
fn legacy_settings_use_every_feature() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("carl");

    let (x, y) = samples(60, 2, 1.);
    let mut trained = RatioEstimator::with_seed(config(), 6);
    trained.train(Method::Carl, input(x, y), options()).unwrap();
    trained.save(&prefix, false).unwrap();

    let mut settings = settings_json(&prefix);
    settings["features"] = "None".into();
    settings["n_observables"] = "2".into();
    settings.as_object_mut().unwrap().remove("dropout_prob");
    fs::write(dir.path().join("carl_settings.json"), settings.to_string()).unwrap();

    let mut loaded = RatioEstimator::new(config());
    loaded.load(&prefix).unwrap();

    assert_eq!(loaded.state().config().features(), None);
    assert_eq!(loaded.state().config().dropout_prob(), 0.0);
    assert_eq!(loaded.state().n_observables(), Some(2));
}

#[test]
fn feature_subsets_shrink_the_model_input() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("subset");

    let config = EstimatorConfig::new(Some(vec![2, 0]), vec![4], Activation::Relu, 0.0).unwrap();
    let (x, y) = samples(80, 3, 1.);
    let mut estimator = RatioEstimator::with_seed(config, 7);
    estimator
        .train(Method::Carl, input(x.clone(), y), options())
        .unwrap();

    assert_eq!(estimator.state().n_observables(), Some(2));
    // the scaling covers the raw observables
    assert_eq!(estimator.state().x_scaling().unwrap().len(), 3);

    estimator.save(&prefix, false).unwrap();
    let mut loaded = RatioEstimator::new(EstimatorConfig::default());
    loaded.load(&prefix).unwrap();
    assert_eq!(loaded.state().config().features(), Some(&[2, 0][..]));

    let (r_hat, _) = loaded.evaluate_ratio(&x.into()).unwrap();
    assert_eq!(r_hat.len(), 80);
}

#[test]
fn checkpoints_and_statistics_follow_the_schedule() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();

    let (x, y) = samples(120, 2, 2.);
    let n0 = 60;
    let x0 = Array2::from_shape_fn((n0, 2), |(i, j)| x[[2 * i, j]]);
    let x1 = Array2::from_shape_fn((n0, 2), |(i, j)| x[[2 * i + 1, j]]);
    let meta_data = BTreeMap::from([(0, "met".to_string()), (1, "lep_pt".to_string())]);

    let bundle = input(x, y)
        .with(X0_TRAIN, x0)
        .with(W0_TRAIN, Array1::<f32>::ones(n0))
        .with(X1_TRAIN, x1)
        .with(W1_TRAIN, Array1::<f32>::ones(n0))
        .with_meta_data(meta_data);

    let options = TrainingOptions {
        n_epochs: 4,
        intermediate_save: Some(2),
        checkpoint_prefix: Some(dir.path().join("ckpt")),
        intermediate_stats_dist: true,
        stats_methods: vec![StatsMethod::Ks],
        plot_dir: dir.path().join("plots"),
        ..options()
    };

    let mut estimator = RatioEstimator::with_seed(config(), 8);
    let result = estimator.train(Method::Carl, bundle, options).unwrap();

    assert!(dir.path().join("ckpt_epoch_2_settings.json").exists());
    assert!(dir.path().join("ckpt_epoch_4_state_dict.safetensors").exists());
    assert!(!dir.path().join("ckpt_epoch_1_settings.json").exists());

    assert!(!result.intermediate_stats.is_empty());
    assert!(
        result
            .intermediate_stats
            .iter()
            .all(|d| d.feature == "met" || d.feature == "lep_pt")
    );
}

#[test]
fn statistics_need_the_per_hypothesis_samples() {
    let (x, y) = samples(40, 2, 1.);
    let options = TrainingOptions {
        intermediate_stats_dist: true,
        stats_methods: vec![StatsMethod::Ks],
        ..options()
    };

    let mut estimator = RatioEstimator::new(config());
    let err = estimator.train(Method::Carl, input(x, y), options).unwrap_err();

    assert!(matches!(err, EstimatorErr::Validation { missing } if missing.contains(&X0_TRAIN.to_string())));
    assert!(estimator.state().model().is_none());
}

#[test]
fn score_methods_are_not_trainable_here() {
    let (x, y) = samples(40, 2, 1.);
    let mut estimator = RatioEstimator::new(config());

    let err = estimator.train(Method::Cascal, input(x, y), options()).unwrap_err();

    assert!(matches!(err, EstimatorErr::Ml(_)));
    assert!(estimator.state().model().is_none());
}

/// Overwrites the observable scaling saved as `<dir>/<stem>` with the given vectors.
fn write_x_scaling(dir: &Path, stem: &str, means: Vec<f64>, stds: Vec<f64>) {
    for (name, values) in [("x_means", means), ("x_stds", stds)] {
        let tensor = NamedTensor::f64(name, vec![values.len()], values);
        write_tensors(&dir.join(format!("{stem}_{name}.safetensors")), &[tensor]).unwrap();
    }
}

/// The per hypothesis samples and observable names of `samples(n, 2, shift)`.
fn with_diagnostics(bundle: InputData, x: &Array2<f32>) -> InputData {
    let n0 = x.nrows() / 2;
    let x0 = Array2::from_shape_fn((n0, 2), |(i, j)| x[[2 * i, j]]);
    let x1 = Array2::from_shape_fn((n0, 2), |(i, j)| x[[2 * i + 1, j]]);
    let meta_data = BTreeMap::from([(0, "met".to_string()), (1, "lep_pt".to_string())]);

    bundle
        .with(X0_TRAIN, x0)
        .with(W0_TRAIN, Array1::<f32>::ones(n0))
        .with(X1_TRAIN, x1)
        .with(W1_TRAIN, Array1::<f32>::ones(n0))
        .with_meta_data(meta_data)
}

#[test]
fn stds_below_the_floor_fail_the_load() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("carl");

    let (x, y) = samples(60, 2, 1.);
    let mut trained = RatioEstimator::with_seed(config(), 9);
    trained.train(Method::Carl, input(x, y), options()).unwrap();
    trained.save(&prefix, false).unwrap();

    write_x_scaling(dir.path(), "carl", vec![0.0, 1.0], vec![0.0, 1.0]);

    let mut loaded = RatioEstimator::new(config());
    let err = loaded.load(&prefix).unwrap_err();
    assert!(matches!(
        err,
        EstimatorErr::Configuration(ConfigErr::InvalidField { field: "x_stds", .. })
    ));
    assert!(loaded.state().model().is_none());
    assert_eq!(loaded.state().x_scaling(), None);
}

#[test]
fn scaling_wider_than_the_model_fails_the_load() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("carl");

    let (x, y) = samples(60, 2, 1.);
    let mut trained = RatioEstimator::with_seed(config(), 10);
    trained.train(Method::Carl, input(x, y), options()).unwrap();
    trained.save(&prefix, false).unwrap();

    write_x_scaling(dir.path(), "carl", vec![0.0; 3], vec![1.0; 3]);

    // an estimator that was already trained keeps its own state
    let (x, y) = samples(60, 2, 1.);
    let mut loaded = RatioEstimator::with_seed(config(), 11);
    loaded.train(Method::Carl, input(x, y), options()).unwrap();
    let scaling = loaded.state().x_scaling().cloned();

    assert!(matches!(
        loaded.load(&prefix),
        Err(EstimatorErr::ShapeMismatch { got, expected, .. }) if got == [3] && expected == [2]
    ));
    assert_eq!(loaded.state().x_scaling().cloned(), scaling);
}

#[test]
fn scaling_must_cover_the_selected_features() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("subset");

    let config = EstimatorConfig::new(Some(vec![2, 0]), vec![4], Activation::Tanh, 0.0).unwrap();
    let (x, y) = samples(60, 3, 1.);
    let mut trained = RatioEstimator::with_seed(config, 12);
    trained.train(Method::Carl, input(x, y), options()).unwrap();
    trained.save(&prefix, false).unwrap();

    write_x_scaling(dir.path(), "subset", vec![0.0; 2], vec![1.0; 2]);

    let mut loaded = RatioEstimator::new(EstimatorConfig::default());
    assert!(matches!(
        loaded.load(&prefix),
        Err(EstimatorErr::Configuration(ConfigErr::InvalidField { field: "features", .. }))
    ));
    assert!(loaded.state().model().is_none());
}

#[test]
fn performance_needs_a_model_and_matching_labels() {
    init_logger();
    let (x, y) = samples(100, 2, 2.);
    let mut estimator = RatioEstimator::with_seed(config(), 13);
    let xs: ArraySource = x.clone().into();
    let ys: ArraySource = y.clone().into();

    assert!(matches!(
        estimator.evaluate_performance(&xs, &ys),
        Err(EstimatorErr::State(_))
    ));

    estimator.train(Method::Carl, input(x, y), options()).unwrap();
    estimator.evaluate_performance(&xs, &ys).unwrap();

    let short: ArraySource = Array1::<f32>::zeros(99).into();
    assert!(matches!(
        estimator.evaluate_performance(&xs, &short),
        Err(EstimatorErr::Ml(MlErr::SizeMismatch { got: 99, expected: 100, .. }))
    ));
}

#[test]
fn trains_from_safetensors_files() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let (x, y) = samples(120, 3, 1.5);
    let n = y.len();

    let x_path = dir.path().join("X_train_120.safetensors");
    let y_path = dir.path().join("y_train_120.safetensors");
    let w_path = dir.path().join("w_train_120.safetensors");
    write_tensors(
        &x_path,
        &[NamedTensor::f32("X_train", vec![n, 3], x.iter().copied().collect())],
    )
    .unwrap();
    // labels stored as f64 under an unrelated name, the only tensor of the file
    write_tensors(
        &y_path,
        &[NamedTensor::f64("labels", vec![n], y.iter().map(|&v| v as f64).collect())],
    )
    .unwrap();
    write_tensors(&w_path, &[NamedTensor::f32("w_train", vec![n], vec![1.0; n])]).unwrap();

    let bundle = InputData::new()
        .with(X_TRAIN, x_path.as_path())
        .with(Y_TRAIN, y_path.as_path())
        .with(W_TRAIN, w_path.as_path());
    let memmap_options = TrainingOptions {
        memmap: true,
        ..options()
    };

    let mut from_files = RatioEstimator::with_seed(config(), 14);
    let result = from_files.train(Method::Carl, bundle, memmap_options).unwrap();
    assert_eq!(result.epochs_trained, 5);

    let mut in_memory = RatioEstimator::with_seed(config(), 14);
    in_memory.train(Method::Carl, input(x.clone(), y), options()).unwrap();
    assert_eq!(from_files.state().x_scaling(), in_memory.state().x_scaling());

    let (r_hat, _) = from_files.evaluate_ratio(&x_path.as_path().into()).unwrap();
    assert_eq!(r_hat.len(), n);
}

#[test]
fn joint_ratio_methods_train_with_r_xz() {
    init_logger();

    for method in [Method::Alice, Method::Rolr] {
        let (x, y) = samples(100, 2, 1.);
        let r_xz = Array1::from_shape_fn(100, |i| if i % 2 == 0 { 1.5f32 } else { 0.75 });
        let bundle = input(x.clone(), y).with(R_XZ_TRAIN, r_xz);

        let mut estimator = RatioEstimator::with_seed(config(), 15);
        let result = estimator.train(method, bundle, options()).unwrap();

        assert_eq!(result.epochs_trained, 5);
        assert!(result.train_losses.iter().all(|loss| loss.is_finite()));
        let (r_hat, _) = estimator.evaluate_ratio(&x.into()).unwrap();
        assert!(r_hat.iter().all(|&r| r > 0.));
    }
}

#[test]
fn joint_ratio_methods_need_r_xz() {
    for method in [Method::Alice, Method::Rolr] {
        let (x, y) = samples(40, 2, 1.);
        let mut estimator = RatioEstimator::new(config());

        let err = estimator.train(method, input(x, y), options()).unwrap_err();

        assert!(matches!(
            err,
            EstimatorErr::Ml(MlErr::MissingTarget { target: "r_xz", .. })
        ));
        assert!(estimator.state().model().is_none());
        assert_eq!(estimator.state().x_scaling(), None);
    }
}

#[test]
fn input_plots_land_under_the_plot_dir() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let (x, y) = samples(80, 2, 1.);
    let bundle = with_diagnostics(input(x.clone(), y), &x);

    let options = TrainingOptions {
        n_epochs: 1,
        plot_inputs: true,
        global_name: "ttbar".to_string(),
        plot_dir: dir.path().join("plots"),
        ..options()
    };

    let mut estimator = RatioEstimator::with_seed(config(), 16);
    estimator.train(Method::Carl, bundle, options).unwrap();

    for feature in ["met", "lep_pt"] {
        let path = dir.path().join(format!("plots/ttbar/train-input_{feature}.json"));
        assert!(path.exists(), "{} is missing", path.display());
    }
}

#[test]
fn limited_samples_set_the_scaling() {
    init_logger();
    let (x, y) = samples(100, 2, 3.);
    let options = TrainingOptions {
        limit_samplesize: Some(40),
        ..options()
    };

    let mut estimator = RatioEstimator::with_seed(config(), 17);
    estimator.train(Method::Carl, input(x.clone(), y), options).unwrap();

    let scaling = estimator.state().x_scaling().unwrap();
    for j in 0..2 {
        let expected = x.column(j).iter().take(40).map(|&v| v as f64).sum::<f64>() / 40.;
        assert_abs_diff_eq!(scaling.means[j], expected, epsilon = 1e-6);
    }
}
