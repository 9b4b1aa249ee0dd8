use ndarray::{Array2, ArrayView2};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{MlErr, Result};

/// Inverted dropout: while training every activation is zeroed with probability `prob` and the
/// survivors are scaled by `1 / (1 - prob)`, at inference it's the identity.
#[derive(Clone, Debug)]
pub struct Dropout {
    prob: f32,
    rng: StdRng,
    mask: Array2<f32>,
}

impl Dropout {
    /// Creates a new `Dropout` layer.
    ///
    /// # Arguments
    /// * `prob` - The probability of dropping an activation, in `[0, 1)`.
    /// * `seed` - The seed of the mask generator.
    ///
    /// # Returns
    /// A new `Dropout` instance or an error if `prob` is out of range.
    pub fn new(prob: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&prob) {
            return Err(MlErr::InvalidHyperparameter(format!(
                "dropout probability must be in [0, 1), got {prob}"
            )));
        }

        Ok(Self {
            prob,
            rng: StdRng::seed_from_u64(seed),
            mask: Array2::zeros((0, 0)),
        })
    }

    pub fn prob(&self) -> f32 {
        self.prob
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Array2<f32> {
        let keep = 1.0 - self.prob;
        let rng = &mut self.rng;
        self.mask = Array2::from_shape_simple_fn(x.dim(), || {
            if rng.random::<f32>() < keep {
                1.0 / keep
            } else {
                0.0
            }
        });

        &x * &self.mask
    }

    pub fn backward(&self, d: Array2<f32>) -> Result<Array2<f32>> {
        if d.dim() != self.mask.dim() {
            return Err(MlErr::SizeMismatch {
                what: "dropout delta rows",
                got: d.nrows(),
                expected: self.mask.nrows(),
            });
        }

        Ok(d * &self.mask)
    }
}
