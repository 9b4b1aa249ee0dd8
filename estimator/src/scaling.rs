//! Standardization of observables and parameters.

use std::ops::{Div, Sub};

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

use crate::{EstimatorErr, Result};

/// The smallest standard deviation kept, constant columns would otherwise blow up.
pub const STD_FLOOR: f64 = 1e-6;

/// An element type the scalers can be applied to.
///
/// Statistics are kept in `f64` and converted to the element type before being applied, so
/// `f32` model inputs and `f64` arrays agree up to the precision of `f32`.
pub trait ScalarElement: Copy + Sub<Output = Self> + Div<Output = Self> {
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl ScalarElement for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl ScalarElement for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }
}

/// Per column means and standard deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingStats {
    pub means: Array1<f64>,
    pub stds: Array1<f64>,
}

impl ScalingStats {
    /// Computes the column means and population standard deviations of `x`, the latter floored
    /// at `STD_FLOOR`.
    ///
    /// # Returns
    /// The statistics or an error if `x` has no rows.
    pub fn compute<A: ScalarElement>(x: ArrayView2<A>) -> Result<Self> {
        if x.nrows() == 0 {
            return Err(EstimatorErr::InvalidData(
                "can't compute scaling statistics without samples".to_string(),
            ));
        }

        let x = x.mapv(A::to_f64);
        let means = x
            .mean_axis(Axis(0))
            .ok_or_else(|| EstimatorErr::InvalidData("empty scaling sample".to_string()))?;
        let stds = x.std_axis(Axis(0), 0.).mapv(|s| s.max(STD_FLOOR));

        Ok(Self { means, stds })
    }

    /// Zero means and unit deviations, applying them leaves the data as is.
    pub fn identity(n_columns: usize) -> Self {
        Self {
            means: Array1::zeros(n_columns),
            stds: Array1::ones(n_columns),
        }
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Returns `(x - means) / stds`, broadcast over the sample axis.
    pub fn apply<A: ScalarElement>(&self, x: ArrayView2<A>) -> Result<Array2<A>> {
        if x.ncols() != self.len() {
            return Err(EstimatorErr::shape(
                "scaled columns",
                vec![x.ncols()],
                vec![self.len()],
            ));
        }

        let means = self.means.mapv(A::from_f64);
        let stds = self.stds.mapv(A::from_f64);

        let mut scaled = x.to_owned();
        Zip::from(&mut scaled)
            .and_broadcast(&means)
            .and_broadcast(&stds)
            .for_each(|v, &mean, &std| *v = (*v - mean) / std);

        Ok(scaled)
    }
}

/// Standardizes observables.
///
/// Disabling the transform still materializes identity statistics, so the scaling is always
/// defined once initialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputScaler {
    stats: Option<ScalingStats>,
}

impl InputScaler {
    pub fn stats(&self) -> Option<&ScalingStats> {
        self.stats.as_ref()
    }

    pub fn set_stats(&mut self, stats: Option<ScalingStats>) {
        self.stats = stats;
    }

    /// Sets up the scaling from a training sample.
    ///
    /// # Arguments
    /// * `x` - The observables, one row per sample.
    /// * `transform` - Whether to standardize or just use the identity.
    /// * `overwrite` - Whether to replace statistics that already exist.
    pub fn initialize<A: ScalarElement>(
        &mut self,
        x: ArrayView2<A>,
        transform: bool,
        overwrite: bool,
    ) -> Result<()> {
        if self.stats.is_some() && !overwrite {
            log::info!("input rescaling already defined, keeping it");
        } else if transform {
            log::info!("setting up input rescaling");
            self.stats = Some(ScalingStats::compute(x)?);
        } else {
            log::info!("disabling input rescaling");
            self.stats = Some(ScalingStats::identity(x.ncols()));
        }

        Ok(())
    }

    /// Standardizes `x`, returning it unchanged when there are no statistics.
    pub fn apply<A: ScalarElement>(&self, x: ArrayView2<A>) -> Result<Array2<A>> {
        match &self.stats {
            Some(stats) => stats.apply(x),
            None => Ok(x.to_owned()),
        }
    }
}

/// Standardizes the parameter vectors of conditional estimators.
///
/// Unlike `InputScaler`, disabling the transform removes the statistics, so saved models without
/// parameter scaling files keep loading the way they were written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterScaler {
    stats: Option<ScalingStats>,
}

impl ParameterScaler {
    pub fn stats(&self) -> Option<&ScalingStats> {
        self.stats.as_ref()
    }

    pub fn set_stats(&mut self, stats: Option<ScalingStats>) {
        self.stats = stats;
    }

    /// Sets up the scaling from the parameter points `theta`, one row per sample.
    pub fn initialize<A: ScalarElement>(
        &mut self,
        theta: ArrayView2<A>,
        transform: bool,
        overwrite: bool,
    ) -> Result<()> {
        if self.stats.is_some() && !overwrite {
            log::info!("parameter rescaling already defined, keeping it");
        } else if transform {
            log::info!("setting up parameter rescaling");
            self.stats = Some(ScalingStats::compute(theta)?);
        } else {
            log::info!("disabling parameter rescaling");
            self.stats = None;
        }

        Ok(())
    }

    pub fn apply<A: ScalarElement>(&self, theta: ArrayView2<A>) -> Result<Array2<A>> {
        match &self.stats {
            Some(stats) => stats.apply(theta),
            None => Ok(theta.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn standardizes_columns() {
        let x = array![[1.0f64, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let mut scaler = InputScaler::default();
        scaler.initialize(x.view(), true, false).unwrap();

        let stats = scaler.stats().unwrap();
        assert_eq!(stats.means, array![3.0, 10.0]);
        assert_abs_diff_eq!(stats.stds[0], (8.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        // a constant column is floored instead of dividing by zero
        assert_eq!(stats.stds[1], STD_FLOOR);

        let scaled = scaler.apply(x.view()).unwrap();
        assert_abs_diff_eq!(scaled.column(0).sum(), 0.0, epsilon = 1e-12);
        assert!(scaled.column(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn second_initialize_keeps_the_first_stats() {
        let mut scaler = InputScaler::default();
        scaler
            .initialize(array![[0.0f32], [2.0]].view(), true, false)
            .unwrap();
        let first = scaler.clone();

        scaler
            .initialize(array![[100.0f32], [300.0]].view(), true, false)
            .unwrap();
        assert_eq!(scaler, first);

        scaler
            .initialize(array![[100.0f32], [300.0]].view(), true, true)
            .unwrap();
        assert_eq!(scaler.stats().unwrap().means, array![200.0]);
    }

    #[test]
    fn disabled_input_scaling_is_identity() {
        let x = array![[1.5f32, -2.0, 7.0], [0.5, 4.0, -1.0]];
        let mut scaler = InputScaler::default();
        scaler.initialize(x.view(), false, false).unwrap();

        assert_eq!(scaler.stats(), Some(&ScalingStats::identity(3)));
        assert_eq!(scaler.apply(x.view()).unwrap(), x);
    }

    #[test]
    fn disabled_parameter_scaling_is_absent() {
        let theta = array![[1.0f64, 2.0], [3.0, 4.0]];
        let mut scaler = ParameterScaler::default();
        scaler.initialize(theta.view(), true, false).unwrap();
        assert!(scaler.stats().is_some());

        scaler.initialize(theta.view(), false, true).unwrap();
        assert!(scaler.stats().is_none());
        assert_eq!(scaler.apply(theta.view()).unwrap(), theta);
    }

    #[test]
    fn parameter_overwrite_check_looks_at_parameter_stats() {
        let mut scaler = ParameterScaler::default();
        scaler
            .initialize(array![[1.0f64], [3.0]].view(), true, false)
            .unwrap();
        scaler
            .initialize(array![[10.0f64], [30.0]].view(), true, false)
            .unwrap();

        assert_eq!(scaler.stats().unwrap().means, array![2.0]);
    }

    #[test]
    fn f32_and_f64_agree() {
        let x64 = array![[0.3f64, 12.5], [1.7, -3.25], [-0.4, 8.0], [2.2, 0.0]];
        let x32 = x64.mapv(|v| v as f32);
        let stats = ScalingStats::compute(x64.view()).unwrap();

        let a = stats.apply(x64.view()).unwrap();
        let b = stats.apply(x32.view()).unwrap();
        for (a, b) in a.iter().zip(&b) {
            assert_abs_diff_eq!(*a as f32, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn width_mismatch_is_an_error() {
        let stats = ScalingStats::identity(2);
        assert!(matches!(
            stats.apply(array![[1.0f32, 2.0, 3.0]].view()),
            Err(EstimatorErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn floor_holds_for_every_column() {
        let x = array![[1.0f32, 0.0, 5.0], [1.0, 1e-9, 5.0]];
        let stats = ScalingStats::compute(x.view()).unwrap();
        assert!(stats.stds.iter().all(|&s| s >= STD_FLOOR));
    }
}
