use super::{Optimizer, optimizer::check_lengths};
use crate::Result;

/// Adam, optionally with the AMSGrad correction that keeps the running maximum of the second
/// moment so the effective step never grows.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    weight_decay: f32,
    amsgrad: bool,
    v: Box<[f32]>,
    s: Box<[f32]>,
    s_max: Box<[f32]>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
            weight_decay: 0.,
            amsgrad: false,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            s_max: Box::default(),
        }
    }

    /// Enables the AMSGrad variant.
    pub fn with_amsgrad(mut self) -> Self {
        self.amsgrad = true;
        self.s_max = vec![0.; self.s.len()].into_boxed_slice();
        self
    }

    /// Adds an L2 penalty of `weight_decay * param` to every gradient entry.
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_lengths(grad, params, self.v.len())?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            weight_decay: wd,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        for (i, (p, g)) in params.iter_mut().zip(grad).enumerate() {
            let g = g + wd * *p;
            let v = &mut self.v[i];
            let s = &mut self.s[i];

            *v = b1 * *v + (1. - b1) * g;
            *s = b2 * *s + (1. - b2) * g.powi(2);

            let second = if self.amsgrad {
                let s_max = &mut self.s_max[i];
                *s_max = s_max.max(*s);
                *s_max
            } else {
                *s
            };

            *p -= step_size * *v / (second.sqrt() + eps);
        }

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
    fn first_step_has_the_length_of_the_learning_rate() {
        let mut adam = Adam::new(2, 0.1, 0.9, 0.999, 1e-8);
        let mut params = [1.0, -1.0];

        adam.update_params(&[0.5, -3.0], &mut params).unwrap();

        assert_abs_diff_eq!(params[0], 0.9, epsilon = 1e-5);
        assert_abs_diff_eq!(params[1], -0.9, epsilon = 1e-5);
    }

    #[test]
    fn amsgrad_never_takes_a_longer_step_after_a_large_gradient() {
        let mut plain = Adam::new(1, 0.1, 0.9, 0.999, 1e-8);
        let mut ams = Adam::new(1, 0.1, 0.9, 0.999, 1e-8).with_amsgrad();
        let (mut p_plain, mut p_ams) = ([0.0], [0.0]);

        for g in [10.0, 0.01, 0.01, 0.01] {
            plain.update_params(&[g], &mut p_plain).unwrap();
            ams.update_params(&[g], &mut p_ams).unwrap();
        }

        assert!(p_ams[0].abs() <= p_plain[0].abs());
    }

    #[test]
    fn size_mismatch() {
        let mut adam = Adam::new(3, 0.1, 0.9, 0.999, 1e-8);
        let mut params = [0.0; 2];

        assert!(adam.update_params(&[0.0; 2], &mut params).is_err());
    }
}
