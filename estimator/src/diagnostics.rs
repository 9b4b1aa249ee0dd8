//! Best effort helpers for looking at the training inputs, nothing here can fail a training run.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use machine_learning::{
    plotting::{DistributionPlot, DistributionPlotter},
    stats,
    training::FeatureData,
};
use ndarray::{ArrayView2, Axis};

/// Observable display names by column index.
pub type MetaData = BTreeMap<usize, String>;

/// Where a dataset's metadata is looked up when none is given inline:
/// `data/<global_name>/metaData_<nentries>.json`.
pub fn metadata_path(global_name: &str, nentries: i64) -> PathBuf {
    Path::new("data")
        .join(global_name)
        .join(format!("metaData_{nentries}.json"))
}

/// Reads a metadata file, a JSON object from column index to observable name.
///
/// # Returns
/// The metadata, or `None` if the file doesn't exist or can't be parsed.
pub fn read_metadata(path: &Path) -> Option<MetaData> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("no metadata at {}", path.display());
            return None;
        }
        Err(e) => {
            log::warn!("couldn't read metadata from {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_str::<MetaData>(&json) {
        Ok(meta) => {
            log::info!(
                "found the names of {} observables in {}",
                meta.len(),
                path.display()
            );
            Some(meta)
        }
        Err(e) => {
            log::warn!("couldn't parse metadata {}: {e}", path.display());
            None
        }
    }
}

/// The binning of every column of `x0`, see `stats::binning`.
pub fn input_binning(x0: ArrayView2<f32>, names: &[String]) -> Vec<Vec<f64>> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let edges = stats::binning(x0.index_axis(Axis(1), i)).unwrap_or_default();
            if let (Some(min), Some(max)) = (edges.first(), edges.last()) {
                log::info!("column {name}: min = {min}, max = {max}");
            }
            edges
        })
        .collect()
}

/// Draws the standardized inputs of both hypotheses under the `train-input` label.
///
/// Failures are logged and swallowed.
pub fn plot_inputs(plotter: &dyn DistributionPlotter, samples: &FeatureData, name: &str) {
    log::info!("plotting transformed input features for {name}");

    let binning = input_binning(samples.x0.view(), &samples.feature_names);
    let plot = DistributionPlot {
        x0: samples.x0.view(),
        w0: samples.w0.view(),
        x1: samples.x1.view(),
        w1: samples.w1.view(),
        reweight: None,
        feature_names: &samples.feature_names,
        binning: &binning,
        label: "train-input",
        name,
        max_entries: Some(samples.w0.len().min(samples.w1.len())),
    };

    match plotter.draw_weighted_distributions(&plot) {
        Ok(files) => log::debug!("drew {} input distributions", files.len()),
        Err(e) => log::warn!("couldn't draw the input distributions: {e}"),
    }
}
