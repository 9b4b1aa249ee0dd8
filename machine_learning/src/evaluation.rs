use ndarray::{Array1, ArrayView1, ArrayView2, Axis, Zip};
use rayon::prelude::*;
use serde::Serialize;

use crate::{MlErr, Result, arch::RatioModel};

/// Rows evaluated by a single task.
const CHUNK_ROWS: usize = 4096;

/// Computes `log r_hat` of every row, splitting the rows in chunks evaluated in parallel on the
/// current rayon pool.
pub fn log_r_hat(model: &RatioModel, xs: ArrayView2<f32>) -> Result<Array1<f32>> {
    let chunks = xs
        .axis_chunks_iter(Axis(0), CHUNK_ROWS)
        .into_par_iter()
        .map(|chunk| model.log_r_hat(chunk))
        .collect::<Result<Vec<_>>>()?;

    Ok(chunks.into_iter().flatten().collect())
}

/// Evaluates the ratio model on already preprocessed observables.
///
/// # Returns
/// A tuple `(r_hat, s_hat)` with one entry per row of `xs`.
pub fn evaluate_ratio_model(
    model: &RatioModel,
    xs: ArrayView2<f32>,
) -> Result<(Array1<f32>, Array1<f32>)> {
    let log_r = log_r_hat(model, xs)?;
    let r_hat = log_r.mapv(f32::exp);
    let s_hat = log_r.mapv(|l| 1. / (1. + l.exp()));
    Ok((r_hat, s_hat))
}

/// How well the calibrated score separates the two hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub n_samples: usize,
    /// Share of samples on the right side of `s_hat = 0.5`.
    pub accuracy: f64,
    /// Mean binary cross entropy of `s_hat` against the labels.
    pub cross_entropy: f64,
    /// Area under the ROC curve of `s_hat` as a denominator classifier.
    pub roc_auc: f64,
}

/// Evaluates the model as a classifier of the labels `ys` and logs the result.
pub fn evaluate_performance_model(
    model: &RatioModel,
    xs: ArrayView2<f32>,
    ys: ArrayView1<f32>,
) -> Result<PerformanceReport> {
    if xs.nrows() != ys.len() {
        return Err(MlErr::SizeMismatch {
            what: "performance labels",
            got: ys.len(),
            expected: xs.nrows(),
        });
    }
    if ys.is_empty() {
        return Err(MlErr::EmptyDataset);
    }

    let (_, s_hat) = evaluate_ratio_model(model, xs)?;
    let n = ys.len() as f64;

    let correct = Zip::from(&s_hat)
        .and(&ys)
        .fold(0usize, |acc, &s, &y| acc + usize::from((s > 0.5) == (y > 0.5)));

    let eps = 1e-7;
    let cross_entropy = Zip::from(&s_hat).and(&ys).fold(0., |acc, &s, &y| {
        let s = (s as f64).clamp(eps, 1. - eps);
        let y = y as f64;
        acc - (y * s.ln() + (1. - y) * (1. - s).ln())
    }) / n;

    let report = PerformanceReport {
        n_samples: ys.len(),
        accuracy: correct as f64 / n,
        cross_entropy,
        roc_auc: roc_auc(s_hat.view(), ys),
    };

    log::info!(
        "performance on {} samples: accuracy {:.4}, cross entropy {:.4}, roc auc {:.4}",
        report.n_samples,
        report.accuracy,
        report.cross_entropy,
        report.roc_auc
    );

    Ok(report)
}

/// Area under the ROC curve through the Mann-Whitney statistic, ties count as half.
fn roc_auc(scores: ArrayView1<f32>, labels: ArrayView1<f32>) -> f64 {
    let mut pairs: Vec<(f32, bool)> = scores
        .iter()
        .zip(&labels)
        .map(|(&s, &y)| (s, y > 0.5))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n_pos = pairs.iter().filter(|p| p.1).count() as f64;
    let n_neg = pairs.len() as f64 - n_pos;
    if n_pos == 0. || n_neg == 0. {
        return 0.5;
    }

    // average ranks, one based
    let mut rank_sum = 0.;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j + 1 < pairs.len() && pairs[j + 1].0 == pairs[i].0 {
            j += 1;
        }

        let rank = (i + j) as f64 / 2. + 1.;
        rank_sum += rank * pairs[i..=j].iter().filter(|p| p.1).count() as f64;
        i = j + 1;
    }

    (rank_sum - n_pos * (n_pos + 1.) / 2.) / (n_pos * n_neg)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    use super::*;
    use crate::arch::activations::Activation;

    #[test]
    fn parallel_evaluation_matches_the_model() {
        let model = RatioModel::with_seed(3, &[5], Activation::Tanh, 0.0, 11).unwrap();
        let xs = Array2::from_shape_fn((CHUNK_ROWS * 2 + 17, 3), |(i, j)| {
            ((i * 3 + j) % 13) as f32 / 13.
        });

        let (r_hat, s_hat) = evaluate_ratio_model(&model, xs.view()).unwrap();
        let (r_ref, s_ref) = model.evaluate(xs.view()).unwrap();

        assert_eq!(r_hat.len(), xs.nrows());
        for i in 0..r_hat.len() {
            assert_abs_diff_eq!(r_hat[i], r_ref[i], epsilon = 1e-6);
            assert_abs_diff_eq!(s_hat[i], s_ref[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn auc_of_perfect_and_inverted_scores() {
        let labels = array![0.0f32, 0.0, 1.0, 1.0];

        assert_abs_diff_eq!(roc_auc(array![0.1f32, 0.2, 0.8, 0.9].view(), labels.view()), 1.);
        assert_abs_diff_eq!(roc_auc(array![0.9f32, 0.8, 0.2, 0.1].view(), labels.view()), 0.);
        assert_abs_diff_eq!(roc_auc(array![0.5f32, 0.5, 0.5, 0.5].view(), labels.view()), 0.5);
    }

    #[test]
    fn performance_needs_matching_labels() {
        let model = RatioModel::with_seed(1, &[2], Activation::Tanh, 0.0, 0).unwrap();
        let xs = array![[0.0f32], [1.0]];

        assert!(evaluate_performance_model(&model, xs.view(), array![1.0f32].view()).is_err());

        let report = evaluate_performance_model(&model, xs.view(), array![0.0f32, 1.0].view())
            .unwrap();
        assert_eq!(report.n_samples, 2);
        assert!((0.0..=1.0).contains(&report.accuracy));
    }
}
