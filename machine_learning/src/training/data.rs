use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result, arch::loss::Targets};

/// Labeled samples ready to train on.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingData {
    x: Array2<f32>,
    y: Array1<f32>,
    w: Array1<f32>,
    r_xz: Option<Array1<f32>>,
}

impl TrainingData {
    /// Creates a new `TrainingData`.
    ///
    /// # Arguments
    /// * `x` - The observables, one row per sample.
    /// * `y` - The labels, 0 for the numerator hypothesis and 1 for the denominator.
    /// * `w` - The event weights.
    /// * `r_xz` - The joint likelihood ratio of every sample, when available.
    ///
    /// # Returns
    /// An error if the lengths differ, there are no samples or a label isn't 0 or 1.
    pub fn new(
        x: Array2<f32>,
        y: Array1<f32>,
        w: Array1<f32>,
        r_xz: Option<Array1<f32>>,
    ) -> Result<Self> {
        let n = x.nrows();
        if n == 0 {
            return Err(MlErr::EmptyDataset);
        }

        let lengths = [
            ("labels", Some(y.len())),
            ("weights", Some(w.len())),
            ("joint ratios", r_xz.as_ref().map(Array1::len)),
        ];
        for (what, len) in lengths {
            if let Some(got) = len.filter(|&len| len != n) {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected: n,
                });
            }
        }

        if let Some(label) = y.iter().find(|&&y| y != 0. && y != 1.) {
            return Err(MlErr::InvalidArray {
                name: "y".to_string(),
                reason: format!("labels must be 0 or 1, found {label}"),
            });
        }

        Ok(Self { x, y, w, r_xz })
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn y(&self) -> &Array1<f32> {
        &self.y
    }

    pub fn w(&self) -> &Array1<f32> {
        &self.w
    }

    pub fn r_xz(&self) -> Option<&Array1<f32>> {
        self.r_xz.as_ref()
    }

    pub fn targets(&self) -> Targets<'_> {
        Targets {
            y: self.y.view(),
            r_xz: self.r_xz.as_ref().map(|r| r.view()),
        }
    }

    /// Copies the given rows, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(0), indices),
            y: self.y.select(Axis(0), indices),
            w: self.w.select(Axis(0), indices),
            r_xz: self.r_xz.as_ref().map(|r| r.select(Axis(0), indices)),
        }
    }

    /// Randomly carves a validation set out of this data.
    ///
    /// # Arguments
    /// * `fraction` - The share of samples moved to the validation set.
    /// * `rng` - The generator used to pick them.
    ///
    /// # Returns
    /// The training and validation sets, the latter is `None` when it would be empty.
    pub fn split<R: Rng>(&self, fraction: f64, rng: &mut R) -> Result<(Self, Option<Self>)> {
        if !(0.0..1.0).contains(&fraction) {
            return Err(MlErr::InvalidHyperparameter(format!(
                "validation split must be in [0, 1), got {fraction}"
            )));
        }

        let n_val = (self.len() as f64 * fraction).round() as usize;
        if n_val == 0 {
            return Ok((self.clone(), None));
        }
        if n_val >= self.len() {
            return Err(MlErr::EmptyDataset);
        }

        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);
        let (val, train) = indices.split_at(n_val);

        Ok((self.select(train), Some(self.select(val))))
    }
}

/// The numerator and denominator samples kept apart, with the observable names, to follow the
/// reweighted distributions while training.
#[derive(Debug, Clone)]
pub struct FeatureData {
    pub feature_names: Vec<String>,
    pub x0: Array2<f32>,
    pub w0: Array1<f32>,
    pub x1: Array2<f32>,
    pub w1: Array1<f32>,
}
