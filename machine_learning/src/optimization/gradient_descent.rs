use super::{Optimizer, optimizer::check_lengths};
use crate::Result;

/// Stochastic gradient descent with optional (Nesterov) momentum.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
    momentum: f32,
    nesterov: bool,
    weight_decay: f32,
    velocity: Box<[f32]>,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer without momentum.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(len: usize, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            momentum: 0.,
            nesterov: false,
            weight_decay: 0.,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }

    /// Accumulates a velocity `v = momentum * v + g`, the step follows `v`, or `g + momentum * v`
    /// when `nesterov` is set.
    pub fn with_momentum(mut self, momentum: f32, nesterov: bool) -> Self {
        self.momentum = momentum;
        self.nesterov = nesterov;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_lengths(grad, params, self.velocity.len())?;

        let lr = self.learning_rate;
        let mu = self.momentum;
        let wd = self.weight_decay;
        let nesterov = self.nesterov;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                let g = g + wd * *p;
                *v = mu * *v + g;
                let step = if nesterov { g + mu * *v } else { *v };
                *p -= lr * step;
            });

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn plain_step() {
        let mut sgd = GradientDescent::new(2, 0.5);
        let mut params = [1.0, 2.0];

        sgd.update_params(&[2.0, -2.0], &mut params).unwrap();

        assert_eq!(params, [0.0, 3.0]);
    }

    #[test]
    fn momentum_accumulates() {
        let mut sgd = GradientDescent::new(1, 0.1).with_momentum(0.5, false);
        let mut params = [0.0];

        sgd.update_params(&[1.0], &mut params).unwrap();
        sgd.update_params(&[1.0], &mut params).unwrap();

        // steps of 1.0 and 1.5
        assert_abs_diff_eq!(params[0], -0.25, epsilon = 1e-6);
    }

    #[test]
    fn nesterov_looks_ahead() {
        let mut sgd = GradientDescent::new(1, 0.1).with_momentum(0.5, true);
        let mut params = [0.0];

        sgd.update_params(&[1.0], &mut params).unwrap();

        // v = 1, step = 1 + 0.5
        assert_abs_diff_eq!(params[0], -0.15, epsilon = 1e-6);
    }
}
