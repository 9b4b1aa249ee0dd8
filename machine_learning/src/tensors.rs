//! Reading and writing named tensors in the safetensors format.
//!
//! Every numeric artifact of this workspace (scaling vectors, model state dicts, datasets) goes
//! through here. Only `F32` and `F64` little endian tensors are supported.

use std::{borrow::Cow, fs, ops::Deref, path::Path};

use memmap2::Mmap;
use safetensors::{
    SafeTensors,
    tensor::{Dtype, View},
};

use crate::{MlErr, Result};

const BYTES_PER_GB: f64 = 1024. * 1024. * 1024.;

/// The raw values of a tensor, row major.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the values as `f32`, narrowing `f64` data.
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            TensorData::F32(v) => v.clone(),
            TensorData::F64(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }

    /// Consumes the data as `f32` values, moving `F32` data without a copy.
    pub fn into_f32(self) -> Vec<f32> {
        match self {
            TensorData::F32(v) => v,
            TensorData::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        }
    }

    /// Returns the values as `f64`, widening `f32` data.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            TensorData::F32(v) => v.iter().map(|&x| x as f64).collect(),
            TensorData::F64(v) => v.clone(),
        }
    }

    fn dtype(&self) -> Dtype {
        match self {
            TensorData::F32(_) => Dtype::F32,
            TensorData::F64(_) => Dtype::F64,
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            TensorData::F32(v) => bytemuck::cast_slice(v),
            TensorData::F64(v) => bytemuck::cast_slice(v),
        }
    }
}

/// A tensor together with the name it's stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl NamedTensor {
    pub fn f32(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data: TensorData::F32(data),
        }
    }

    pub fn f64(name: impl Into<String>, shape: Vec<usize>, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            shape,
            data: TensorData::F64(data),
        }
    }

    fn check(&self) -> Result<()> {
        let expected = self.shape.iter().product::<usize>();
        if self.data.len() != expected {
            return Err(MlErr::InvalidArray {
                name: self.name.clone(),
                reason: format!(
                    "shape {:?} holds {expected} values but {} were given",
                    self.shape,
                    self.data.len()
                ),
            });
        }

        Ok(())
    }
}

impl View for &NamedTensor {
    fn dtype(&self) -> Dtype {
        self.data.dtype()
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.data.bytes())
    }

    fn data_len(&self) -> usize {
        self.data.bytes().len()
    }
}

/// Writes `tensors` to `path` as a single safetensors file.
///
/// # Arguments
/// * `path` - The destination file, overwritten if it exists.
/// * `tensors` - The tensors to store, names must be unique.
///
/// # Returns
/// An error if a tensor's data doesn't match its shape or the file can't be written.
pub fn write_tensors(path: &Path, tensors: &[NamedTensor]) -> Result<()> {
    for tensor in tensors {
        tensor.check()?;
    }

    let views = tensors.iter().map(|tensor| (tensor.name.as_str(), tensor));
    let bytes = safetensors::serialize(views, &None)?;
    fs::write(path, bytes).map_err(|e| MlErr::io(path, e))
}

/// Parses every tensor in a safetensors buffer, in name order.
pub fn read_tensors(bytes: &[u8]) -> Result<Vec<NamedTensor>> {
    let safetensors = SafeTensors::deserialize(bytes)?;
    let mut tensors = Vec::with_capacity(safetensors.len());

    for (name, view) in safetensors.tensors() {
        let data = match view.dtype() {
            Dtype::F32 => TensorData::F32(cast_values(view.data()).into_owned()),
            Dtype::F64 => TensorData::F64(cast_values(view.data()).into_owned()),
            other => {
                return Err(MlErr::InvalidArray {
                    name,
                    reason: format!("unsupported dtype {other:?}, expected F32 or F64"),
                });
            }
        };

        tensors.push(NamedTensor {
            name,
            shape: view.shape().to_vec(),
            data,
        });
    }

    tensors.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tensors)
}

/// The bytes of a safetensors file, either read into memory or mapped.
enum FileBytes {
    Read(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Read(bytes) => bytes.as_slice(),
            FileBytes::Mapped(mmap) => &mmap[..],
        }
    }
}

fn file_bytes(path: &Path, memmap_threshold_gb: Option<f64>) -> Result<FileBytes> {
    let file = fs::File::open(path).map_err(|e| MlErr::io(path, e))?;
    let len = file.metadata().map_err(|e| MlErr::io(path, e))?.len();

    match memmap_threshold_gb {
        Some(threshold) if len as f64 / BYTES_PER_GB > threshold => {
            log::debug!(bytes = len; "memory mapping {}", path.display());
            // SAFETY: the file is only read, a concurrent truncation by another process is
            // outside of what this loader supports.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| MlErr::io(path, e))?;
            Ok(FileBytes::Mapped(mmap))
        }
        _ => {
            let bytes = fs::read(path).map_err(|e| MlErr::io(path, e))?;
            Ok(FileBytes::Read(bytes))
        }
    }
}

/// Reinterprets little endian bytes as `T` in place, copying only when they are unaligned.
fn cast_values<T: bytemuck::Pod>(bytes: &[u8]) -> Cow<'_, [T]> {
    match bytemuck::try_cast_slice(bytes) {
        Ok(values) => Cow::Borrowed(values),
        Err(_) => Cow::Owned(bytemuck::pod_collect_to_vec(bytes)),
    }
}

/// Reads a safetensors file, memory mapping it when it's larger than `memmap_threshold_gb`.
///
/// # Arguments
/// * `path` - The file to read.
/// * `memmap_threshold_gb` - Files above this size are mapped instead of read, `None` always reads.
pub fn read_tensor_file(path: &Path, memmap_threshold_gb: Option<f64>) -> Result<Vec<NamedTensor>> {
    read_tensors(&file_bytes(path, memmap_threshold_gb)?)
}

/// Reads one tensor of a file as `f32` values, the one named `name` or the only one there is.
///
/// Only the selected tensor is copied out of the file, once. When the file is memory mapped the
/// values are taken straight from the mapping, so the peak memory is a single copy of the tensor.
///
/// # Returns
/// The shape and the row major values, or an error if the file has no such tensor.
pub fn read_f32_tensor(
    path: &Path,
    name: &str,
    memmap_threshold_gb: Option<f64>,
) -> Result<(Vec<usize>, Vec<f32>)> {
    let bytes = file_bytes(path, memmap_threshold_gb)?;
    let safetensors = SafeTensors::deserialize(&bytes)?;
    let names = safetensors.names();

    let selected = match names.as_slice() {
        names if names.iter().any(|n| n.as_str() == name) => name.to_string(),
        [only] => only.to_string(),
        names => {
            return Err(MlErr::InvalidArray {
                name: name.to_string(),
                reason: format!(
                    "{} holds {} tensors and none is named '{name}'",
                    path.display(),
                    names.len()
                ),
            });
        }
    };

    let view = safetensors.tensor(&selected)?;
    let values = match view.dtype() {
        Dtype::F32 => cast_values::<f32>(view.data()).into_owned(),
        Dtype::F64 => cast_values::<f64>(view.data())
            .iter()
            .map(|&x| x as f32)
            .collect(),
        other => {
            return Err(MlErr::InvalidArray {
                name: selected,
                reason: format!("unsupported dtype {other:?}, expected F32 or F64"),
            });
        }
    };

    Ok((view.shape().to_vec(), values))
}

/// Reads the single tensor stored in a one tensor file, such as a scaling vector.
pub fn read_single_tensor(path: &Path) -> Result<NamedTensor> {
    let mut tensors = read_tensor_file(path, None)?;

    match tensors.len() {
        1 => Ok(tensors.remove(0)),
        n => Err(MlErr::InvalidArray {
            name: path.display().to_string(),
            reason: format!("expected a single tensor, found {n}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensors_survive_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.safetensors");
        let tensors = vec![
            NamedTensor::f32("layers.0.bias", vec![2], vec![0.5, -0.5]),
            NamedTensor::f64("means", vec![3], vec![1.0, 2.0, 1e-9]),
        ];

        write_tensors(&path, &tensors).unwrap();

        assert_eq!(read_tensor_file(&path, None).unwrap(), tensors);
        // a zero threshold forces the memory mapped path
        assert_eq!(read_tensor_file(&path, Some(0.0)).unwrap(), tensors);
    }

    #[test]
    fn reads_one_tensor_of_a_mapped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.safetensors");
        let tensors = [
            NamedTensor::f32("X_train", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]),
            NamedTensor::f64("w_train", vec![2], vec![0.25, 0.75]),
        ];
        write_tensors(&path, &tensors).unwrap();

        for threshold in [None, Some(0.0)] {
            let (shape, values) = read_f32_tensor(&path, "X_train", threshold).unwrap();
            assert_eq!(shape, [2, 2]);
            assert_eq!(values, [1.0, 2.0, 3.0, 4.0]);

            let (shape, values) = read_f32_tensor(&path, "w_train", threshold).unwrap();
            assert_eq!(shape, [2]);
            assert_eq!(values, [0.25, 0.75]);
        }

        assert!(matches!(
            read_f32_tensor(&path, "y_train", Some(0.0)),
            Err(MlErr::InvalidArray { .. })
        ));
    }

    #[test]
    fn unaligned_bytes_are_copied() {
        let values = [1.5f64, -2.0];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(bytemuck::cast_slice(&values));

        assert_eq!(cast_values::<f64>(&bytes[1..]).as_ref(), values);
    }

    #[test]
    fn f32_data_moves_out_without_narrowing() {
        let data = TensorData::F32(vec![0.1, 0.2]);
        assert_eq!(data.into_f32(), [0.1f32, 0.2]);
        assert_eq!(TensorData::F64(vec![0.5]).into_f32(), [0.5f32]);
    }

    #[test]
    fn data_must_match_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        let tensors = [NamedTensor::f32("w", vec![2, 2], vec![1.0; 3])];

        assert!(matches!(
            write_tensors(&path, &tensors),
            Err(MlErr::InvalidArray { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn single_tensor_file_with_two_tensors_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.safetensors");
        let tensors = [
            NamedTensor::f64("a", vec![1], vec![1.0]),
            NamedTensor::f64("b", vec![1], vec![2.0]),
        ];
        write_tensors(&path, &tensors).unwrap();

        assert!(read_single_tensor(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_tensor_file(&dir.path().join("nope.safetensors"), None).unwrap_err();

        assert!(matches!(err, MlErr::Io { .. }));
    }
}
