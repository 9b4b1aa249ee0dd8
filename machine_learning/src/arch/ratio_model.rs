use std::collections::HashMap;

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;

use super::{
    PersistentModel,
    activations::{ActFn, Activation},
    layers::Layer,
    sequential::Sequential,
};
use crate::{
    MlErr, Result,
    initialization::{Init, InitPlan},
    tensors::NamedTensor,
};

/// A feed forward network mapping observables to `log r(x)`.
///
/// The hidden layers use the configured activation, followed by dropout when `dropout_prob > 0`,
/// and the output layer is linear with a single unit. The ratio estimate is `exp(log_r)` and the
/// calibrated score is `1 / (1 + r) = sigmoid(-log_r)`.
#[derive(Clone, Debug)]
pub struct RatioModel {
    n_observables: usize,
    n_hidden: Vec<usize>,
    activation: Activation,
    dropout_prob: f32,
    network: Sequential,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl RatioModel {
    /// Creates a new `RatioModel` with randomly initialized weights.
    ///
    /// # Arguments
    /// * `n_observables` - The input width.
    /// * `n_hidden` - The width of every hidden layer.
    /// * `activation` - The activation of the hidden layers.
    /// * `dropout_prob` - The dropout probability after each hidden layer, in `[0, 1)`.
    ///
    /// # Returns
    /// A new `RatioModel` or an error if a width is zero or `dropout_prob` is out of range.
    pub fn new(
        n_observables: usize,
        n_hidden: &[usize],
        activation: Activation,
        dropout_prob: f64,
    ) -> Result<Self> {
        Self::with_seed(
            n_observables,
            n_hidden,
            activation,
            dropout_prob,
            rand::rng().random(),
        )
    }

    /// Same as `new` but every random draw derives from `seed`.
    pub fn with_seed(
        n_observables: usize,
        n_hidden: &[usize],
        activation: Activation,
        dropout_prob: f64,
        seed: u64,
    ) -> Result<Self> {
        if n_observables == 0 || n_hidden.contains(&0) {
            return Err(MlErr::InvalidHyperparameter(format!(
                "layer widths must be positive, got {n_observables} inputs and hidden {n_hidden:?}"
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let dropout_prob = dropout_prob as f32;
        let dims = layer_dims(n_observables, n_hidden);

        let mut layers = Vec::with_capacity(dims.len() * 2);
        let mut plan = InitPlan::new();

        for (i, &(fan_in, fan_out)) in dims.iter().enumerate() {
            let is_output = i + 1 == dims.len();
            let act_fn = (!is_output).then(|| ActFn::from(activation));
            layers.push(Layer::dense((fan_in, fan_out), act_fn));

            if !is_output && dropout_prob > 0.0 {
                layers.push(Layer::dropout(dropout_prob, rng.random())?);
            }

            let weights = match activation {
                Activation::Relu if !is_output => Init::KaimingNormal { fan_in, fan_out },
                _ => Init::XavierUniform { fan_in, fan_out },
            };
            plan.weights(weights).constant(0., fan_out);
        }

        let network = Sequential::new(layers);
        let size = network.size();
        let params = plan.sample(&mut rng)?;

        if params.len() != size {
            return Err(MlErr::SizeMismatch {
                what: "initialized parameters",
                got: params.len(),
                expected: size,
            });
        }

        Ok(Self {
            n_observables,
            n_hidden: n_hidden.to_vec(),
            activation,
            dropout_prob,
            network,
            grad: vec![0.; size],
            params,
        })
    }

    pub fn n_observables(&self) -> usize {
        self.n_observables
    }

    pub fn n_hidden(&self) -> &[usize] {
        &self.n_hidden
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn dropout_prob(&self) -> f32 {
        self.dropout_prob
    }

    /// Returns the amount of parameters of the model.
    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Replaces every parameter of the model.
    pub fn set_params(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params.copy_from_slice(params);
        Ok(())
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Splits the model into it's parameters and the gradient of the last backward pass, for an
    /// optimizer step.
    pub fn params_and_grad_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.params, &mut self.grad)
    }

    /// Training forward pass, dropout is active and the activations are kept for `backward`.
    ///
    /// # Returns
    /// `log r_hat` for every row of `x`.
    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array1<f32>> {
        self.check_width(x.ncols())?;
        let out = self.network.forward(&self.params, x)?;
        Ok(out.index_axis_move(Axis(1), 0))
    }

    /// Computes the gradient of the loss given it's derivative with respect to `log r_hat` for
    /// every row of the last `forward` call.
    pub fn backward(&mut self, d_log_r: ArrayView1<f32>) -> Result<()> {
        let d = d_log_r.to_owned().insert_axis(Axis(1));
        self.network.backward(&self.params, &mut self.grad, d)
    }

    /// Inference forward pass.
    ///
    /// # Returns
    /// `log r_hat` for every row of `x`.
    pub fn log_r_hat(&self, x: ArrayView2<f32>) -> Result<Array1<f32>> {
        self.check_width(x.ncols())?;
        let out = self.network.predict(&self.params, x)?;
        Ok(out.index_axis_move(Axis(1), 0))
    }

    /// Returns `(r_hat, s_hat)` for every row of `x`.
    pub fn evaluate(&self, x: ArrayView2<f32>) -> Result<(Array1<f32>, Array1<f32>)> {
        let log_r = self.log_r_hat(x)?;
        let r_hat = log_r.mapv(f32::exp);
        let s_hat = log_r.mapv(|l| 1. / (1. + l.exp()));
        Ok((r_hat, s_hat))
    }

    /// The `(fan_in, fan_out)` of every dense layer, in order.
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        layer_dims(self.n_observables, &self.n_hidden)
    }

    fn check_width(&self, got: usize) -> Result<()> {
        if got != self.n_observables {
            return Err(MlErr::SizeMismatch {
                what: "model input width",
                got,
                expected: self.n_observables,
            });
        }

        Ok(())
    }

    /// Yields `(index, weight offset, fan_in, fan_out)` for every dense layer.
    fn dense_offsets(&self) -> impl Iterator<Item = (usize, usize, usize, usize)> + '_ {
        let mut offset = 0;
        self.layer_dims()
            .into_iter()
            .enumerate()
            .map(move |(i, (fan_in, fan_out))| {
                let start = offset;
                offset += (fan_in + 1) * fan_out;
                (i, start, fan_in, fan_out)
            })
    }
}

impl PersistentModel for RatioModel {
    fn state_dict(&self) -> Vec<NamedTensor> {
        let mut tensors = Vec::new();

        for (i, start, fan_in, fan_out) in self.dense_offsets() {
            let w_end = start + fan_in * fan_out;
            tensors.push(NamedTensor::f32(
                format!("layers.{i}.weight"),
                vec![fan_in, fan_out],
                self.params[start..w_end].to_vec(),
            ));
            tensors.push(NamedTensor::f32(
                format!("layers.{i}.bias"),
                vec![fan_out],
                self.params[w_end..w_end + fan_out].to_vec(),
            ));
        }

        tensors
    }

    fn load_state_dict(&mut self, tensors: Vec<NamedTensor>) -> Result<()> {
        let mut by_name: HashMap<String, NamedTensor> = tensors
            .into_iter()
            .map(|tensor| (tensor.name.clone(), tensor))
            .collect();

        let mut params = vec![0.; self.params.len()];
        for (i, start, fan_in, fan_out) in self.dense_offsets() {
            let w_end = start + fan_in * fan_out;
            let slots = [
                (format!("layers.{i}.weight"), vec![fan_in, fan_out], start..w_end),
                (format!("layers.{i}.bias"), vec![fan_out], w_end..w_end + fan_out),
            ];

            for (name, expected, range) in slots {
                let tensor = by_name.remove(&name).ok_or_else(|| MlErr::InvalidArray {
                    name: name.clone(),
                    reason: "missing from the state dict".to_string(),
                })?;

                if tensor.shape != expected {
                    return Err(MlErr::TensorShape {
                        name,
                        got: tensor.shape,
                        expected,
                    });
                }

                params[range].copy_from_slice(&tensor.data.into_f32());
            }
        }

        if let Some(name) = by_name.into_keys().min() {
            return Err(MlErr::InvalidArray {
                name,
                reason: "the model has no such tensor".to_string(),
            });
        }

        self.params = params;
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        let layers: Vec<_> = self
            .dense_offsets()
            .map(|(_, start, fan_in, fan_out)| {
                let w_end = start + fan_in * fan_out;
                let weight: Vec<_> = self.params[start..w_end]
                    .chunks(fan_out)
                    .map(<[f32]>::to_vec)
                    .collect();

                json!({
                    "in_features": fan_in,
                    "out_features": fan_out,
                    "weight": weight,
                    "bias": &self.params[w_end..w_end + fan_out],
                })
            })
            .collect();

        json!({
            "model": "RatioModel",
            "n_observables": self.n_observables,
            "n_hidden": self.n_hidden,
            "activation": self.activation,
            "dropout_prob": self.dropout_prob,
            "layers": layers,
        })
    }
}

fn layer_dims(n_observables: usize, n_hidden: &[usize]) -> Vec<(usize, usize)> {
    let widths: Vec<_> = std::iter::once(n_observables)
        .chain(n_hidden.iter().copied())
        .chain(std::iter::once(1))
        .collect();

    widths.windows(2).map(|w| (w[0], w[1])).collect()
}
