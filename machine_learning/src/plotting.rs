use std::{
    fs,
    path::{Path, PathBuf},
};

use ndarray::{ArrayView1, ArrayView2, Axis, s};
use serde::Serialize;

use crate::{MlErr, Result, stats};

/// Everything needed to compare the numerator and denominator distribution of each observable.
#[derive(Debug, Clone)]
pub struct DistributionPlot<'a> {
    pub x0: ArrayView2<'a, f32>,
    pub w0: ArrayView1<'a, f32>,
    pub x1: ArrayView2<'a, f32>,
    pub w1: ArrayView1<'a, f32>,
    /// Extra per sample factors for the numerator sample, `1 / r_hat` to check a reweighting.
    pub reweight: Option<ArrayView1<'a, f32>>,
    pub feature_names: &'a [String],
    /// The bin edges of each feature, by column.
    pub binning: &'a [Vec<f64>],
    /// What's being drawn, such as `train-input` or `epoch_10`.
    pub label: &'a str,
    /// The dataset name, plots go in a directory of this name.
    pub name: &'a str,
    /// Only the first `max_entries` rows of each sample are drawn.
    pub max_entries: Option<usize>,
}

/// Something that can draw weighted distributions, drawing is always best effort.
pub trait DistributionPlotter {
    /// Draws one figure per feature.
    ///
    /// # Returns
    /// The files written.
    fn draw_weighted_distributions(&self, plot: &DistributionPlot) -> Result<Vec<PathBuf>>;
}

#[derive(Serialize)]
struct HistogramRecord<'a> {
    feature: &'a str,
    label: &'a str,
    edges: &'a [f64],
    numerator: Vec<f64>,
    denominator: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    numerator_reweighted: Option<Vec<f64>>,
}

/// Writes each figure as a JSON document holding the histograms, to be rendered by any plotting
/// front end.
#[derive(Debug, Clone)]
pub struct JsonHistogramPlotter {
    root: PathBuf,
}

impl Default for JsonHistogramPlotter {
    fn default() -> Self {
        Self::new("plots")
    }
}

impl JsonHistogramPlotter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DistributionPlotter for JsonHistogramPlotter {
    fn draw_weighted_distributions(&self, plot: &DistributionPlot) -> Result<Vec<PathBuf>> {
        let n_features = plot.feature_names.len();
        for (what, got) in [
            ("x0 columns", plot.x0.ncols()),
            ("x1 columns", plot.x1.ncols()),
            ("binnings", plot.binning.len()),
        ] {
            if got != n_features {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected: n_features,
                });
            }
        }

        let n0 = plot.max_entries.map_or(plot.x0.nrows(), |n| n.min(plot.x0.nrows()));
        let n1 = plot.max_entries.map_or(plot.x1.nrows(), |n| n.min(plot.x1.nrows()));
        let (x0, w0) = (plot.x0.slice(s![..n0, ..]), plot.w0.slice(s![..n0]));
        let (x1, w1) = (plot.x1.slice(s![..n1, ..]), plot.w1.slice(s![..n1]));
        let reweighted_w0 = plot.reweight.map(|r| &w0 * &r.slice(s![..n0]));

        let dir = self.root.join(plot.name);
        fs::create_dir_all(&dir).map_err(|e| MlErr::io(&dir, e))?;

        let mut written = Vec::with_capacity(n_features);
        for (i, feature) in plot.feature_names.iter().enumerate() {
            let edges = &plot.binning[i];
            let col0 = x0.index_axis(Axis(1), i);
            let col1 = x1.index_axis(Axis(1), i);

            let record = HistogramRecord {
                feature,
                label: plot.label,
                edges,
                numerator: stats::histogram(col0, w0, edges),
                denominator: stats::histogram(col1, w1, edges),
                numerator_reweighted: reweighted_w0
                    .as_ref()
                    .map(|w| stats::histogram(col0, w.view(), edges)),
            };

            let path = dir.join(format!("{}_{}.json", plot.label, file_stem(feature)));
            let json = serde_json::to_vec_pretty(&record)?;
            fs::write(&path, json).map_err(|e| MlErr::io(&path, e))?;
            written.push(path);
        }

        log::debug!("drew {} distributions in {}", written.len(), dir.display());
        Ok(written)
    }
}

fn file_stem(feature: &str) -> String {
    feature
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
