//! Distances between weighted one dimensional distributions, used to follow how well a
//! reweighted numerator sample matches the denominator sample during training.

use std::{cmp::Ordering, fmt, str::FromStr};

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::MlErr;

/// The number of bin edges of every observable's binning.
pub const DIVISIONS: usize = 100;

/// A distance between two weighted samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsMethod {
    /// The Kolmogorov-Smirnov distance, the largest gap between the two empirical CDFs.
    Ks,
    /// A symmetric chi-squared distance between the two normalized histograms.
    Chi2,
}

impl StatsMethod {
    /// Computes the distance between `(a, wa)` and `(b, wb)`.
    ///
    /// # Arguments
    /// * `edges` - The bin edges, only used by the histogram based methods.
    pub fn distance(
        &self,
        a: ArrayView1<f32>,
        wa: ArrayView1<f32>,
        b: ArrayView1<f32>,
        wb: ArrayView1<f32>,
        edges: &[f64],
    ) -> f64 {
        match self {
            StatsMethod::Ks => weighted_ks(a, wa, b, wb),
            StatsMethod::Chi2 => weighted_chi2(a, wa, b, wb, edges),
        }
    }
}

impl fmt::Display for StatsMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatsMethod::Ks => "ks",
            StatsMethod::Chi2 => "chi2",
        })
    }
}

impl FromStr for StatsMethod {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ks" | "kolmogorov_smirnov" => Ok(StatsMethod::Ks),
            "chi2" | "chisquare" => Ok(StatsMethod::Chi2),
            _ => Err(MlErr::UnknownStatsMethod(s.to_string())),
        }
    }
}

/// Weighted two sample Kolmogorov-Smirnov distance.
pub fn weighted_ks(
    a: ArrayView1<f32>,
    wa: ArrayView1<f32>,
    b: ArrayView1<f32>,
    wb: ArrayView1<f32>,
) -> f64 {
    let sorted = |x: ArrayView1<f32>, w: ArrayView1<f32>| {
        let mut pairs: Vec<(f64, f64)> = x
            .iter()
            .zip(&w)
            .map(|(&x, &w)| (x as f64, w as f64))
            .collect();
        pairs.sort_by(|l, r| l.0.partial_cmp(&r.0).unwrap_or(Ordering::Equal));
        let total: f64 = pairs.iter().map(|p| p.1).sum();
        (pairs, total)
    };

    let (a, total_a) = sorted(a, wa);
    let (b, total_b) = sorted(b, wb);
    if a.is_empty() || b.is_empty() || total_a == 0. || total_b == 0. {
        return 0.;
    }

    let (mut i, mut j) = (0, 0);
    let (mut cdf_a, mut cdf_b) = (0., 0.);
    let mut distance: f64 = 0.;

    while i < a.len() || j < b.len() {
        let next = match (a.get(i), b.get(j)) {
            (Some(x), Some(y)) => x.0.min(y.0),
            (Some(x), None) => x.0,
            (None, Some(y)) => y.0,
            (None, None) => break,
        };

        while i < a.len() && a[i].0 <= next {
            cdf_a += a[i].1 / total_a;
            i += 1;
        }
        while j < b.len() && b[j].0 <= next {
            cdf_b += b[j].1 / total_b;
            j += 1;
        }

        distance = distance.max((cdf_a - cdf_b).abs());
    }

    distance
}

/// Symmetric chi-squared distance `Σ (p - q)² / (p + q)` between the normalized weighted
/// histograms of the two samples.
pub fn weighted_chi2(
    a: ArrayView1<f32>,
    wa: ArrayView1<f32>,
    b: ArrayView1<f32>,
    wb: ArrayView1<f32>,
    edges: &[f64],
) -> f64 {
    let normalize = |counts: Vec<f64>| {
        let total: f64 = counts.iter().sum();
        if total == 0. {
            counts
        } else {
            counts.into_iter().map(|c| c / total).collect()
        }
    };

    let p = normalize(histogram(a, wa, edges));
    let q = normalize(histogram(b, wb, edges));

    p.iter()
        .zip(&q)
        .filter(|(p, q)| *p + *q > 0.)
        .map(|(p, q)| (p - q).powi(2) / (p + q))
        .sum()
}

/// Sums the weights falling in each bin, the last bin includes it's upper edge and values
/// outside the edges are dropped.
pub fn histogram(values: ArrayView1<f32>, weights: ArrayView1<f32>, edges: &[f64]) -> Vec<f64> {
    let n_bins = edges.len().saturating_sub(1);
    let mut counts = vec![0.; n_bins];
    if n_bins == 0 {
        return counts;
    }

    let (lo, hi) = (edges[0], edges[n_bins]);
    for (&v, &w) in values.iter().zip(&weights) {
        let v = v as f64;
        if !(lo..=hi).contains(&v) {
            continue;
        }

        // first edge strictly greater than v, minus one
        let bin = edges.partition_point(|&e| e <= v).saturating_sub(1).min(n_bins - 1);
        counts[bin] += w as f64;
    }

    counts
}

/// The `q`-th percentile of `values` with linear interpolation between the closest ranks.
pub fn percentile(values: ArrayView1<f32>, q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    if sorted.is_empty() {
        return None;
    }

    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let rank = q.clamp(0., 100.) / 100. * (sorted.len() - 1) as f64;
    let (low, high) = (rank.floor() as usize, rank.ceil() as usize);
    let frac = rank - low as f64;
    Some(sorted[low] + (sorted[high] - sorted[low]) * frac)
}

/// `n` evenly spaced values from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// The binning used to draw one observable.
///
/// Integer valued observables are usually well bounded so they span their whole range, the rest
/// are cut at the 98th percentile to keep long tails from flattening the histogram.
pub fn binning(column: ArrayView1<f32>) -> Option<Vec<f64>> {
    let integer_valued = column.iter().all(|v| v.fract() == 0.);
    let upper = if integer_valued { 100. } else { 98. };

    let min = percentile(column, 0.)?;
    let max = percentile(column, upper)?;
    Some(linspace(min, max, DIVISIONS))
}
