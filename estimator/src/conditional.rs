use ndarray::{Array2, ArrayView2};

use crate::{
    EstimatorErr, Result,
    estimator::Estimator,
    scaling::{ParameterScaler, ScalarElement},
};

const NOT_CONDITIONAL: &str = "the estimator isn't conditioned on parameters";

/// Parameter scaling for estimators whose state was created with `EstimatorState::conditional`.
///
/// `save` and `load` persist the parameter scaling of such estimators on their own, this adds the
/// operations to set it up and apply it.
pub trait ConditionalEstimator: Estimator {
    /// Sets up the parameter scaling from the parameter points `theta`.
    ///
    /// # Returns
    /// A state error if the estimator isn't conditional.
    fn initialize_parameter_transform<A: ScalarElement>(
        &mut self,
        theta: ArrayView2<A>,
        transform: bool,
        overwrite: bool,
    ) -> Result<()> {
        parameter_scaler_mut(self)?.initialize(theta, transform, overwrite)
    }

    /// Standardizes parameter points, returning them unchanged when the scaling is absent.
    fn transform_parameters<A: ScalarElement>(&self, theta: ArrayView2<A>) -> Result<Array2<A>> {
        self.state()
            .parameter_scaler
            .as_ref()
            .ok_or(EstimatorErr::State(NOT_CONDITIONAL))?
            .apply(theta)
    }
}

impl<E: Estimator> ConditionalEstimator for E {}

fn parameter_scaler_mut<E: Estimator + ?Sized>(estimator: &mut E) -> Result<&mut ParameterScaler> {
    estimator
        .state_mut()
        .parameter_scaler
        .as_mut()
        .ok_or(EstimatorErr::State(NOT_CONDITIONAL))
}
