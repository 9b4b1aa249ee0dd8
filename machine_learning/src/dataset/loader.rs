use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2, IxDyn};

use crate::{MlErr, Result, tensors};

/// Files larger than this many gigabytes are memory mapped when mapping is requested.
pub const DEFAULT_MEMMAP_THRESHOLD_GB: f64 = 1.0;

/// Where an array comes from: already in memory or stored in a safetensors file.
#[derive(Debug, Clone, PartialEq)]
pub enum ArraySource {
    InMemory(ArrayD<f32>),
    Path(PathBuf),
}

impl From<ArrayD<f32>> for ArraySource {
    fn from(value: ArrayD<f32>) -> Self {
        Self::InMemory(value)
    }
}

impl From<Array1<f32>> for ArraySource {
    fn from(value: Array1<f32>) -> Self {
        Self::InMemory(value.into_dyn())
    }
}

impl From<Array2<f32>> for ArraySource {
    fn from(value: Array2<f32>) -> Self {
        Self::InMemory(value.into_dyn())
    }
}

impl From<PathBuf> for ArraySource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for ArraySource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<&str> for ArraySource {
    fn from(value: &str) -> Self {
        Self::Path(PathBuf::from(value))
    }
}

/// Materializes an array and checks every entry is finite.
///
/// A file may hold a tensor named `name` or a single tensor of any name. `F64` data is narrowed
/// to `f32`.
///
/// # Arguments
/// * `source` - The array or the file to read it from.
/// * `memmap_threshold_gb` - When set, files larger than this are memory mapped.
/// * `name` - The name of the array, used to pick the tensor and in error messages.
///
/// # Returns
/// The array or an error if it can't be read or holds a NaN or infinite value.
pub fn load_and_check(
    source: &ArraySource,
    memmap_threshold_gb: Option<f64>,
    name: &str,
) -> Result<ArrayD<f32>> {
    let check = |array: &ArrayD<f32>| {
        let bad = array.iter().filter(|v| !v.is_finite()).count();
        if bad > 0 {
            return Err(MlErr::InvalidArray {
                name: name.to_string(),
                reason: format!("{bad} entries are NaN or infinite"),
            });
        }

        Ok(())
    };

    match source {
        ArraySource::InMemory(array) => {
            check(array)?;
            Ok(array.clone())
        }
        ArraySource::Path(path) => {
            log::debug!("loading {name} from {}", path.display());
            let (shape, values) = tensors::read_f32_tensor(path, name, memmap_threshold_gb)?;
            let array = ArrayD::from_shape_vec(IxDyn(&shape), values)?;
            check(&array)?;
            Ok(array)
        }
    }
}

/// Converts a loaded array into a `(samples, columns)` matrix, a vector becomes a single column.
pub fn into_matrix(array: ArrayD<f32>, name: &str) -> Result<Array2<f32>> {
    match array.ndim() {
        1 => {
            let n = array.len();
            Ok(array.into_shape_with_order((n, 1))?)
        }
        2 => Ok(array.into_dimensionality::<Ix2>()?),
        ndim => Err(MlErr::InvalidArray {
            name: name.to_string(),
            reason: format!("expected a matrix, got {ndim} dimensions"),
        }),
    }
}

/// Converts a loaded array into a vector, a single column matrix is flattened.
pub fn into_vector(array: ArrayD<f32>, name: &str) -> Result<Array1<f32>> {
    let shape = array.shape().to_vec();

    match shape.as_slice() {
        [_] => Ok(array.into_dimensionality::<Ix1>()?),
        &[n, 1] => Ok(array.into_shape_with_order(n)?),
        shape => Err(MlErr::InvalidArray {
            name: name.to_string(),
            reason: format!("expected a vector, got shape {shape:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::tensors::{NamedTensor, write_tensors};

    #[test]
    fn in_memory_arrays_pass_through() {
        let x = array![[1.0f32, 2.0], [3.0, 4.0]];
        let loaded = load_and_check(&x.clone().into(), None, "X_train").unwrap();

        assert_eq!(into_matrix(loaded, "X_train").unwrap(), x);
    }

    #[test]
    fn non_finite_entries_are_rejected() {
        let x = array![1.0f32, f32::NAN, f32::INFINITY];

        let err = load_and_check(&x.into(), None, "w_train").unwrap_err();

        assert!(matches!(err, MlErr::InvalidArray { name, .. } if name == "w_train"));
    }

    #[test]
    fn reads_named_or_single_tensors_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("y.safetensors");
        let many = dir.path().join("bundle.safetensors");

        write_tensors(&single, &[NamedTensor::f64("labels", vec![3], vec![0., 1., 1.])]).unwrap();
        write_tensors(
            &many,
            &[
                NamedTensor::f32("X_train", vec![2, 1], vec![0.5, 1.5]),
                NamedTensor::f32("w_train", vec![2], vec![1., 1.]),
            ],
        )
        .unwrap();

        let y = load_and_check(&single.as_path().into(), None, "y_train").unwrap();
        assert_eq!(into_vector(y, "y_train").unwrap(), array![0.0f32, 1.0, 1.0]);

        let x = load_and_check(&many.as_path().into(), Some(1.0), "X_train").unwrap();
        assert_eq!(x.shape(), &[2, 1]);

        assert!(load_and_check(&many.as_path().into(), None, "r_xz").is_err());
    }

    #[test]
    fn mapped_files_are_checked_too() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        // finite as f64 but not once narrowed to f32
        write_tensors(&path, &[NamedTensor::f64("w_train", vec![2], vec![1.0, 1e300])]).unwrap();

        for threshold in [None, Some(0.0)] {
            assert!(matches!(
                load_and_check(&path.as_path().into(), threshold, "w_train"),
                Err(MlErr::InvalidArray { name, .. }) if name == "w_train"
            ));
        }
    }

    #[test]
    fn column_vectors_flatten() {
        let column = array![[1.0f32], [2.0]].into_dyn();

        assert_eq!(into_vector(column, "w").unwrap(), array![1.0f32, 2.0]);
        assert!(into_vector(Array2::<f32>::zeros((2, 2)).into_dyn(), "w").is_err());
    }
}
