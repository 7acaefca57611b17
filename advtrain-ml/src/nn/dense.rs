use crate::error::{MlError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

/// Hidden-layer nonlinearity. The output layer always emits raw logits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "relu" => Some(Self::Relu),
            "tanh" => Some(Self::Tanh),
            "sigmoid" => Some(Self::Sigmoid),
            _ => None,
        }
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            Self::Relu => z.max(0.0),
            Self::Tanh => z.tanh(),
            Self::Sigmoid => 1.0 / (1.0 + (-z).exp()),
        }
    }

    pub fn df(&self, z: f32) -> f32 {
        match self {
            Self::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Tanh => 1.0 - z.tanh().powi(2),
            Self::Sigmoid => {
                let s = self.f(z);
                s * (1.0 - s)
            }
        }
    }
}

/// Architecture of a fully connected network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Registry name the network was built from.
    pub arch: String,
    pub input_dim: usize,
    pub hidden: Vec<usize>,
    pub output_dim: usize,
    #[serde(default)]
    pub activation: Activation,
}

impl ModelSpec {
    /// `(fan_in, fan_out)` of every layer, input to output.
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut dims = Vec::with_capacity(self.hidden.len() + 1);
        let mut fan_in = self.input_dim;
        for &width in self.hidden.iter().chain(std::iter::once(&self.output_dim)) {
            dims.push((fan_in, width));
            fan_in = width;
        }
        dims
    }

    /// Total number of weights and biases.
    pub fn n_params(&self) -> usize {
        self.layer_dims()
            .iter()
            .map(|(fan_in, fan_out)| (fan_in + 1) * fan_out)
            .sum()
    }
}

/// Intermediate values of one forward pass, needed by [`DenseNet::backward`].
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    inputs: Vec<Array2<f32>>,
    pre_activations: Vec<Array2<f32>>,
}

/// Gradients of a scalar loss with respect to the parameters and to the input.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub params: Vec<f32>,
    pub input: Array2<f32>,
}

/// A dense feed-forward network over a flat parameter vector.
///
/// Each layer occupies `fan_in * fan_out` row-major weights followed by
/// `fan_out` biases. Forward and backward passes borrow the network
/// immutably; only an optimizer step mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseNet {
    spec: ModelSpec,
    params: Vec<f32>,
}

impl DenseNet {
    /// Xavier-uniform weights, zero biases.
    pub fn new<R: Rng + ?Sized>(spec: ModelSpec, rng: &mut R) -> Self {
        let mut params = Vec::with_capacity(spec.n_params());
        for (fan_in, fan_out) in spec.layer_dims() {
            let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
            let dist = Uniform::new_inclusive(-limit, limit);
            params.extend((0..fan_in * fan_out).map(|_| dist.sample(rng)));
            params.extend(std::iter::repeat_n(0.0, fan_out));
        }
        Self { spec, params }
    }

    pub fn from_params(spec: ModelSpec, params: Vec<f32>) -> Result<Self> {
        let expected = spec.n_params();
        if params.len() != expected {
            return Err(MlError::ShapeMismatch {
                what: "parameter vector",
                got: params.len(),
                expected,
            });
        }
        Ok(Self { spec, params })
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    pub fn input_dim(&self) -> usize {
        self.spec.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.spec.output_dim
    }

    fn view_layer(
        &self,
        offset: usize,
        (fan_in, fan_out): (usize, usize),
    ) -> Result<(ArrayView2<'_, f32>, ArrayView1<'_, f32>)> {
        let w_size = fan_in * fan_out;
        let w = ArrayView2::from_shape((fan_in, fan_out), &self.params[offset..offset + w_size])?;
        let b = ArrayView1::from_shape(fan_out, &self.params[offset + w_size..offset + w_size + fan_out])?;
        Ok((w, b))
    }

    /// Run the network and keep what the backward pass needs.
    pub fn forward(&self, x: ArrayView2<f32>) -> Result<(Array2<f32>, ForwardTrace)> {
        if x.ncols() != self.spec.input_dim {
            return Err(MlError::ShapeMismatch {
                what: "input features",
                got: x.ncols(),
                expected: self.spec.input_dim,
            });
        }
        let dims = self.spec.layer_dims();
        let last = dims.len() - 1;
        let mut trace = ForwardTrace {
            inputs: Vec::with_capacity(dims.len()),
            pre_activations: Vec::with_capacity(dims.len()),
        };

        let mut a = x.to_owned();
        let mut offset = 0;
        for (l, &dim) in dims.iter().enumerate() {
            let (w, b) = self.view_layer(offset, dim)?;
            let z = a.dot(&w) + &b;
            let next = if l == last {
                z.clone()
            } else {
                let act = self.spec.activation;
                z.mapv(|v| act.f(v))
            };
            trace.inputs.push(std::mem::replace(&mut a, next));
            trace.pre_activations.push(z);
            offset += (dim.0 + 1) * dim.1;
        }
        Ok((a, trace))
    }

    /// Logits only.
    pub fn logits(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.forward(x)?.0)
    }

    /// Backpropagate `d_logits` (dLoss/dLogits) through a recorded pass.
    pub fn backward(&self, trace: &ForwardTrace, d_logits: Array2<f32>) -> Result<Gradients> {
        let dims = self.spec.layer_dims();
        let mut offsets = Vec::with_capacity(dims.len());
        let mut offset = 0;
        for &(fan_in, fan_out) in &dims {
            offsets.push(offset);
            offset += (fan_in + 1) * fan_out;
        }

        let mut grad = vec![0.0; self.params.len()];
        let mut d = d_logits;
        let last = dims.len() - 1;
        for l in (0..dims.len()).rev() {
            if l != last {
                let act = self.spec.activation;
                d.zip_mut_with(&trace.pre_activations[l], |d, &z| *d *= act.df(z));
            }
            let (w, _) = self.view_layer(offsets[l], dims[l])?;
            let dw = trace.inputs[l].t().dot(&d);
            let db = d.sum_axis(Axis(0));

            let w_size = dims[l].0 * dims[l].1;
            let slot = &mut grad[offsets[l]..offsets[l] + w_size + dims[l].1];
            let (gw, gb) = slot.split_at_mut(w_size);
            gw.iter_mut().zip(dw.iter()).for_each(|(g, v)| *g = *v);
            gb.iter_mut().zip(db.iter()).for_each(|(g, v)| *g = *v);

            d = d.dot(&w.t());
        }
        Ok(Gradients {
            params: grad,
            input: d,
        })
    }
}
