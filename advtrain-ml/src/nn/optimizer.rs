use crate::error::{MlError, Result};
use advtrain_core::{ConfigError, NamedParams};

/// In-place parameter update rule.
pub trait Optimizer: Send {
    fn name(&self) -> &'static str;

    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, lr: f32);
}

fn check_len(params: &[f32], grad: &[f32]) -> Result<()> {
    if params.len() != grad.len() {
        return Err(MlError::ShapeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }
    Ok(())
}

/// Stochastic gradient descent with optional momentum and L2 weight decay.
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocity: Vec<f32>,
}

impl Sgd {
    pub fn new(lr: f32, momentum: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            velocity: Vec::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "SGD"
    }

    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        check_len(params, grad)?;
        if self.velocity.len() != params.len() {
            self.velocity = vec![0.0; params.len()];
        }
        for ((p, &g), v) in params.iter_mut().zip(grad).zip(self.velocity.iter_mut()) {
            let g = g + self.weight_decay * *p;
            *v = self.momentum * *v + g;
            *p -= self.lr * *v;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Adam; with `decoupled` set the weight decay is applied AdamW-style.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    decoupled: bool,
    m: Vec<f32>,
    v: Vec<f32>,
    t: i32,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            decoupled: false,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32, decoupled: bool) -> Self {
        self.weight_decay = weight_decay;
        self.decoupled = decoupled;
        self
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        if self.decoupled { "AdamW" } else { "Adam" }
    }

    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        check_len(params, grad)?;
        if self.m.len() != params.len() {
            self.m = vec![0.0; params.len()];
            self.v = vec![0.0; params.len()];
            self.t = 0;
        }
        self.t = self.t.saturating_add(1);
        let bc1 = 1.0 - self.beta1.powi(self.t);
        let bc2 = 1.0 - self.beta2.powi(self.t);

        for (i, p) in params.iter_mut().enumerate() {
            let mut g = grad[i];
            if self.decoupled {
                *p -= self.lr * self.weight_decay * *p;
            } else {
                g += self.weight_decay * *p;
            }
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Build an optimizer from its registry name.
pub fn build_optimizer(params: &NamedParams) -> std::result::Result<Box<dyn Optimizer>, ConfigError> {
    let lr = params.f64_or("lr", 0.001)? as f32;
    if !(lr > 0.0 && lr.is_finite()) {
        return Err(ConfigError::invalid(
            format!("{}.lr", params.name),
            "learning rate must be positive",
        ));
    }
    let weight_decay = params.f64_or("weight_decay", 0.0)? as f32;
    match params.name.as_str() {
        "SGD" | "sgd" => {
            let momentum = params.f64_or("momentum", 0.0)? as f32;
            Ok(Box::new(Sgd::new(lr, momentum, weight_decay)))
        }
        "Adam" | "adam" | "AdamW" | "adamw" => {
            let beta1 = params.f64_or("beta1", 0.9)? as f32;
            let beta2 = params.f64_or("beta2", 0.999)? as f32;
            let decoupled = params.name.eq_ignore_ascii_case("adamw");
            Ok(Box::new(
                Adam::new(lr)
                    .with_betas(beta1, beta2)
                    .with_weight_decay(weight_decay, decoupled),
            ))
        }
        other => Err(ConfigError::unknown("optimizer", other)),
    }
}
