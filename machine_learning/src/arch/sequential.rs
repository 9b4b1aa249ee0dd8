use ndarray::{Array2, ArrayView2};

use super::layers::Layer;
use crate::{MlErr, Result};

/// A sequential network: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// The network holds no parameters, every pass receives the whole flat parameter buffer and
/// hands each layer its own contiguous slice, in order.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Returns the amount of parameters of the whole network.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    /// Makes a training forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The parameters of the network.
    /// * `x` - The input data.
    ///
    /// # Returns
    /// The output of the last layer or an error if occurred.
    pub fn forward(&mut self, mut params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len(params.len())?;

        let mut out = x.to_owned();
        for layer in self.layers.iter_mut() {
            let (layer_params, rest) = params.split_at(layer.size());
            out = layer.forward(layer_params, out.view())?;
            params = rest;
        }

        Ok(out)
    }

    /// Makes an inference forward pass, dropout is disabled and nothing is cached.
    pub fn predict(&self, mut params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len(params.len())?;

        let mut out = x.to_owned();
        for layer in self.layers.iter() {
            let (layer_params, rest) = params.split_at(layer.size());
            out = layer.predict(layer_params, out.view())?;
            params = rest;
        }

        Ok(out)
    }

    /// Backpropagates `d` through the network, overwriting `grad`.
    ///
    /// # Arguments
    /// * `params` - The parameters used in the last forward pass.
    /// * `grad` - The buffer where the gradient is written, same layout as `params`.
    /// * `d` - The derivative of the loss with respect to the network's output.
    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: Array2<f32>) -> Result<()> {
        self.check_len(params.len())?;
        self.check_len(grad.len())?;

        let mut end = params.len();
        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }

    fn check_len(&self, got: usize) -> Result<()> {
        let expected = self.size();
        if got != expected {
            return Err(MlErr::SizeMismatch {
                what: "network parameters",
                got,
                expected,
            });
        }

        Ok(())
    }
}
