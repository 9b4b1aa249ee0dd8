use crate::{Result, tensors::NamedTensor};

/// A model whose learned state can be exported and restored as named tensors.
pub trait PersistentModel {
    /// Returns the learned state, one tensor per weight matrix and bias vector.
    fn state_dict(&self) -> Vec<NamedTensor>;

    /// Replaces the learned state.
    ///
    /// # Arguments
    /// * `tensors` - The tensors previously returned by `state_dict` on a model with the same
    ///   architecture.
    ///
    /// # Returns
    /// An error if a tensor is missing, unexpected or has the wrong shape. The model is left
    /// untouched in that case.
    fn load_state_dict(&mut self, tensors: Vec<NamedTensor>) -> Result<()>;

    /// A human readable dump of the architecture and parameters.
    fn describe(&self) -> serde_json::Value;
}
