use crate::Result;

/// An optimization algorithm stepping a flat parameter buffer along it's gradient.
pub trait Optimizer {
    /// Updates the parameters according to the algorithm's learning rule.
    ///
    /// # Arguments
    /// * `grad` - The gradient used for taking the step.
    /// * `params` - The parameters that are going to be modified.
    ///
    /// # Returns
    /// An error if the two buffers differ in length.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    fn learning_rate(&self) -> f32;

    /// Changes the step length, used by the learning rate schedule between epochs.
    fn set_learning_rate(&mut self, learning_rate: f32);
}

pub(super) fn check_lengths(grad: &[f32], params: &[f32], state: usize) -> Result<()> {
    use crate::MlErr;

    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    if params.len() != state {
        return Err(MlErr::SizeMismatch {
            what: "optimizer state",
            got: params.len(),
            expected: state,
        });
    }

    Ok(())
}
