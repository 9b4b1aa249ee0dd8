//! Initial values of a network's flat parameter vector.

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::{MlErr, Result};

/// How one block of parameters starts out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Constant(f32),
    /// Xavier (Glorot) uniform for a `fan_in × fan_out` weight matrix.
    XavierUniform { fan_in: usize, fan_out: usize },
    /// Kaiming (He) normal for a `fan_in × fan_out` weight matrix, meant for rectifier layers.
    KaimingNormal { fan_in: usize, fan_out: usize },
}

impl Init {
    /// The number of values of a weight matrix block.
    fn matrix_len(&self) -> usize {
        match *self {
            Init::Constant(_) => 0,
            Init::XavierUniform { fan_in, fan_out } | Init::KaimingNormal { fan_in, fan_out } => {
                fan_in * fan_out
            }
        }
    }

    /// Appends `n` values drawn from this block's distribution to `out`.
    fn extend<R: Rng>(&self, rng: &mut R, n: usize, out: &mut Vec<f32>) -> Result<()> {
        match *self {
            Init::Constant(value) => out.extend(std::iter::repeat_n(value, n)),
            Init::XavierUniform { fan_in, fan_out } => {
                let range = (6. / (fan_in + fan_out) as f32).sqrt();
                let uniform = Uniform::new(-range, range)
                    .map_err(|e| MlErr::InvalidHyperparameter(e.to_string()))?;
                out.extend(uniform.sample_iter(rng).take(n));
            }
            Init::KaimingNormal { fan_in, .. } => {
                let std_dev = (2. / fan_in as f32).sqrt();
                let normal = Normal::new(0., std_dev)
                    .map_err(|e| MlErr::InvalidHyperparameter(e.to_string()))?;
                out.extend(normal.sample_iter(rng).take(n));
            }
        }

        Ok(())
    }
}

/// The layout of a parameter vector as consecutive blocks, sampled in order from one rng so a
/// whole model is reproducible from a single seed.
#[derive(Debug, Clone, Default)]
pub struct InitPlan {
    blocks: Vec<(Init, usize)>,
}

impl InitPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a weight matrix block.
    pub fn weights(&mut self, init: Init) -> &mut Self {
        self.blocks.push((init, init.matrix_len()));
        self
    }

    /// Adds a block of `n` copies of `value`, for biases.
    pub fn constant(&mut self, value: f32, n: usize) -> &mut Self {
        self.blocks.push((Init::Constant(value), n));
        self
    }

    pub fn size(&self) -> usize {
        self.blocks.iter().map(|(_, n)| n).sum()
    }

    /// Draws every block.
    ///
    /// # Returns
    /// The parameters, `size()` of them, or an error if a distribution can't be built.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = Vec::with_capacity(self.size());
        for (init, n) in &self.blocks {
            init.extend(rng, *n, &mut params)?;
        }

        Ok(params)
    }
}
