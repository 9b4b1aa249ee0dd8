use std::collections::BTreeMap;

use machine_learning::dataset::{ArraySource, into_matrix, into_vector, load_and_check};
use ndarray::{Array1, Array2, Axis, s};

use crate::{EstimatorErr, Result, diagnostics::MetaData};

pub const X_TRAIN: &str = "X_train";
pub const Y_TRAIN: &str = "y_train";
pub const W_TRAIN: &str = "w_train";
pub const X0_TRAIN: &str = "X0_train";
pub const W0_TRAIN: &str = "w0_train";
pub const X1_TRAIN: &str = "X1_train";
pub const W1_TRAIN: &str = "w1_train";
pub const X_VAL: &str = "X_val";
pub const Y_VAL: &str = "y_val";
pub const W_VAL: &str = "w_val";
pub const R_XZ_TRAIN: &str = "r_xz_train";
pub const R_XZ_VAL: &str = "r_xz_val";

pub const REQUIRED_KEYS: [&str; 3] = [X_TRAIN, Y_TRAIN, W_TRAIN];
/// The per hypothesis samples, used for input plots and intermediate statistics.
pub const DIAGNOSTIC_KEYS: [&str; 4] = [X0_TRAIN, W0_TRAIN, X1_TRAIN, W1_TRAIN];

const KNOWN_KEYS: [&str; 12] = [
    X_TRAIN, Y_TRAIN, W_TRAIN, X0_TRAIN, W0_TRAIN, X1_TRAIN, W1_TRAIN, X_VAL, Y_VAL, W_VAL,
    R_XZ_TRAIN, R_XZ_VAL,
];

/// The arrays a training run reads, by name, plus the optional observable names.
#[derive(Debug, Clone, Default)]
pub struct InputData {
    arrays: BTreeMap<String, ArraySource>,
    meta_data: Option<MetaData>,
}

impl InputData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, builder style.
    pub fn with(mut self, key: impl Into<String>, source: impl Into<ArraySource>) -> Self {
        self.insert(key, source);
        self
    }

    /// Adds an entry, returning the one it replaces.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        source: impl Into<ArraySource>,
    ) -> Option<ArraySource> {
        self.arrays.insert(key.into(), source.into())
    }

    pub fn with_meta_data(mut self, meta_data: MetaData) -> Self {
        self.meta_data = Some(meta_data);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ArraySource> {
        self.arrays.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.arrays.contains_key(key)
    }

    pub fn meta_data(&self) -> Option<&MetaData> {
        self.meta_data.as_ref()
    }

    /// The required entries that are absent.
    pub fn missing_required(&self) -> Vec<String> {
        missing(self, &REQUIRED_KEYS)
    }

    /// The per hypothesis entries that are absent.
    pub fn missing_diagnostic(&self) -> Vec<String> {
        missing(self, &DIAGNOSTIC_KEYS)
    }

    /// Reads and checks every entry.
    ///
    /// # Arguments
    /// * `memmap_threshold_gb` - Files larger than this are memory mapped.
    ///
    /// # Returns
    /// The arrays, or an error if one can't be read or the lengths and widths disagree.
    pub(crate) fn load(&self, memmap_threshold_gb: Option<f64>) -> Result<LoadedInputs> {
        for key in self.arrays.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                log::warn!("ignoring the unknown training entry {key}");
            }
        }

        let matrix = |key: &str| -> Result<Option<Array2<f32>>> {
            self.arrays
                .get(key)
                .map(|source| {
                    let array = load_and_check(source, memmap_threshold_gb, key)?;
                    Ok(into_matrix(array, key)?)
                })
                .transpose()
        };
        let vector = |key: &str| -> Result<Option<Array1<f32>>> {
            self.arrays
                .get(key)
                .map(|source| {
                    let array = load_and_check(source, memmap_threshold_gb, key)?;
                    Ok(into_vector(array, key)?)
                })
                .transpose()
        };
        let x = required(matrix(X_TRAIN)?, X_TRAIN)?;
        let y = required(vector(Y_TRAIN)?, Y_TRAIN)?;
        let w = required(vector(W_TRAIN)?, W_TRAIN)?;
        let r_xz = vector(R_XZ_TRAIN)?;

        let (n_samples, n_observables) = x.dim();
        check_len(Y_TRAIN, &y, n_samples)?;
        check_len(W_TRAIN, &w, n_samples)?;
        if let Some(r_xz) = &r_xz {
            check_len(R_XZ_TRAIN, r_xz, n_samples)?;
        }

        let diagnostic = match (
            matrix(X0_TRAIN)?,
            vector(W0_TRAIN)?,
            matrix(X1_TRAIN)?,
            vector(W1_TRAIN)?,
        ) {
            (Some(x0), Some(w0), Some(x1), Some(w1)) => {
                check_width(X0_TRAIN, &x0, n_observables)?;
                check_width(X1_TRAIN, &x1, n_observables)?;
                check_len(W0_TRAIN, &w0, x0.nrows())?;
                check_len(W1_TRAIN, &w1, x1.nrows())?;
                Some(HypothesisSamples { x0, w0, x1, w1 })
            }
            _ => None,
        };

        let validation = match (matrix(X_VAL)?, vector(Y_VAL)?) {
            (Some(x_val), Some(y_val)) => {
                check_width(X_VAL, &x_val, n_observables)?;
                let n_val = x_val.nrows();
                check_len(Y_VAL, &y_val, n_val)?;

                let w_val = vector(W_VAL)?.unwrap_or_else(|| Array1::ones(n_val));
                check_len(W_VAL, &w_val, n_val)?;

                let r_xz_val = vector(R_XZ_VAL)?;
                if let Some(r_xz_val) = &r_xz_val {
                    check_len(R_XZ_VAL, r_xz_val, n_val)?;
                }

                Some(ValidationSplit {
                    x: x_val,
                    y: y_val,
                    w: w_val,
                    r_xz: r_xz_val,
                })
            }
            (None, None) => None,
            _ => {
                log::warn!("a validation split needs both {X_VAL} and {Y_VAL}, ignoring it");
                None
            }
        };

        Ok(LoadedInputs {
            x,
            y,
            w,
            r_xz,
            diagnostic,
            validation,
        })
    }
}

fn required<T>(loaded: Option<T>, key: &str) -> Result<T> {
    loaded.ok_or_else(|| EstimatorErr::Validation {
        missing: vec![key.to_string()],
    })
}

fn missing(input: &InputData, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter(|key| !input.contains(key))
        .map(|key| key.to_string())
        .collect()
}

fn check_len(name: &str, array: &Array1<f32>, expected: usize) -> Result<()> {
    if array.len() != expected {
        return Err(EstimatorErr::shape(
            format!("{name} length"),
            vec![array.len()],
            vec![expected],
        ));
    }

    Ok(())
}

fn check_width(name: &str, array: &Array2<f32>, expected: usize) -> Result<()> {
    if array.ncols() != expected {
        return Err(EstimatorErr::shape(
            format!("{name} observables"),
            vec![array.ncols()],
            vec![expected],
        ));
    }

    Ok(())
}

/// Keeps the given observable columns, in the given order, `None` keeps them all.
pub(crate) fn restrict_features(x: Array2<f32>, features: Option<&[usize]>) -> Result<Array2<f32>> {
    let Some(features) = features else {
        return Ok(x);
    };

    if let Some(&bad) = features.iter().find(|&&i| i >= x.ncols()) {
        return Err(EstimatorErr::shape(
            format!("feature index {bad}"),
            vec![x.nrows(), x.ncols()],
            vec![x.nrows(), bad + 1],
        ));
    }

    Ok(x.select(Axis(1), features))
}

#[derive(Debug, Clone)]
pub(crate) struct HypothesisSamples {
    pub x0: Array2<f32>,
    pub w0: Array1<f32>,
    pub x1: Array2<f32>,
    pub w1: Array1<f32>,
}

#[derive(Debug)]
pub(crate) struct ValidationSplit {
    pub x: Array2<f32>,
    pub y: Array1<f32>,
    pub w: Array1<f32>,
    pub r_xz: Option<Array1<f32>>,
}

#[derive(Debug)]
pub(crate) struct LoadedInputs {
    pub x: Array2<f32>,
    pub y: Array1<f32>,
    pub w: Array1<f32>,
    pub r_xz: Option<Array1<f32>>,
    pub diagnostic: Option<HypothesisSamples>,
    pub validation: Option<ValidationSplit>,
}

impl LoadedInputs {
    /// Keeps only the first `limit` training samples.
    pub fn truncate(&mut self, limit: usize) {
        let n = limit.min(self.x.nrows());
        self.x = self.x.slice(s![..n, ..]).to_owned();
        self.y = self.y.slice(s![..n]).to_owned();
        self.w = self.w.slice(s![..n]).to_owned();
        self.r_xz = self.r_xz.as_ref().map(|r| r.slice(s![..n]).to_owned());
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn bundle() -> InputData {
        InputData::new()
            .with(X_TRAIN, array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]])
            .with(Y_TRAIN, array![0.0f32, 1.0, 0.0])
            .with(W_TRAIN, array![1.0f32, 1.0, 1.0])
    }

    #[test]
    fn lists_every_missing_required_key() {
        let input = InputData::new().with(Y_TRAIN, array![0.0f32]);
        assert_eq!(input.missing_required(), [X_TRAIN, W_TRAIN]);
        assert!(bundle().missing_required().is_empty());
        assert_eq!(bundle().missing_diagnostic().len(), 4);
    }

    #[test]
    fn loads_and_checks_lengths() {
        let loaded = bundle().load(None).unwrap();
        assert_eq!(loaded.x.dim(), (3, 2));
        assert!(loaded.validation.is_none());
        assert!(loaded.diagnostic.is_none());

        let bad = bundle().with(W_TRAIN, array![1.0f32, 1.0]);
        assert!(matches!(
            bad.load(None),
            Err(EstimatorErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn validation_width_must_match() {
        let input = bundle()
            .with(X_VAL, array![[1.0f32, 2.0, 3.0]])
            .with(Y_VAL, array![1.0f32]);

        assert!(matches!(
            input.load(None),
            Err(EstimatorErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn validation_weights_default_to_one() {
        let input = bundle()
            .with(X_VAL, array![[1.0f32, 2.0]])
            .with(Y_VAL, array![1.0f32]);

        let validation = input.load(None).unwrap().validation.unwrap();
        assert_eq!(validation.w, array![1.0]);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let input = bundle().with(X_TRAIN, array![[1.0f32, f32::NAN], [3.0, 4.0], [5.0, 6.0]]);
        assert!(matches!(input.load(None), Err(EstimatorErr::Ml(_))));
    }

    #[test]
    fn restricts_and_reorders_columns() {
        let x = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];

        assert_eq!(
            restrict_features(x.clone(), Some(&[2, 0][..])).unwrap(),
            array![[3.0, 1.0], [6.0, 4.0]]
        );
        assert_eq!(restrict_features(x.clone(), None).unwrap(), x);
        assert!(matches!(
            restrict_features(x, Some(&[3][..])),
            Err(EstimatorErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn truncation_keeps_the_first_samples() {
        let mut loaded = bundle().load(None).unwrap();
        loaded.truncate(2);
        assert_eq!(loaded.x, array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(loaded.y.len(), 2);
    }
}
