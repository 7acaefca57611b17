//! Gradient-based perturbation attacks.
//!
//! All attacks ascend the target's training loss with respect to the input and
//! keep the perturbation inside an L-inf or L2 ball of radius `strength`.
//! The target network is borrowed immutably; attacking never changes it.

use super::AttackState;
use crate::discriminator::Discriminator;
use crate::error::{InvalidBoundsError, Result};
use crate::nn::{Criterion, DenseNet};
use advtrain_core::config::Norm;
use advtrain_core::{AttackConfig, ConfigError};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;
use rand::rngs::StdRng;

/// What an attack differentiates through.
#[derive(Clone, Copy)]
pub struct AttackTarget<'a> {
    pub model: &'a DenseNet,
    pub criterion: &'a dyn Criterion,
    /// Required by discriminator-aware attacks, ignored otherwise.
    pub discriminator: Option<&'a Discriminator>,
}

impl<'a> AttackTarget<'a> {
    pub fn new(model: &'a DenseNet, criterion: &'a dyn Criterion) -> Self {
        Self {
            model,
            criterion,
            discriminator: None,
        }
    }

    pub fn with_discriminator(mut self, discriminator: Option<&'a Discriminator>) -> Self {
        self.discriminator = discriminator;
        self
    }
}

pub trait Attack: Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`AttackTarget::discriminator`] must be set.
    fn needs_discriminator(&self) -> bool;

    /// Adversarial version of `x` within the budget in `state`.
    ///
    /// Fails with [`InvalidBoundsError`] before computing anything if the
    /// budget is not positive.
    fn perturb(
        &self,
        target: &AttackTarget<'_>,
        x: ArrayView2<f32>,
        y: ArrayView1<f32>,
        state: AttackState,
        rng: &mut StdRng,
    ) -> Result<Array2<f32>>;
}

pub fn check_bounds(state: &AttackState) -> std::result::Result<(), InvalidBoundsError> {
    if !(state.strength > 0.0 && state.strength.is_finite()) {
        return Err(InvalidBoundsError::Strength {
            strength: state.strength,
        });
    }
    if state.n_steps == 0 {
        return Err(InvalidBoundsError::Steps);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Method {
    /// One step of size `strength` (FGSM / fast gradient method).
    SingleStep,
    /// `n_steps` projected steps of size `strength * step_scale / n_steps`.
    Iterative { random_start: bool },
}

/// FGSM, iterative FGSM, and PGD, optionally evading a discriminator.
///
/// The discriminator-aware variants ascend
/// `L_model(x') - alpha * BCE(D(x'), clean)`.
#[derive(Debug, Clone)]
pub struct GradientAttack {
    name: String,
    method: Method,
    norm: Norm,
    step_scale: f32,
    disc_alpha: Option<f32>,
}

impl GradientAttack {
    pub fn fgsm(norm: Norm) -> Self {
        Self {
            name: "fgsm".into(),
            method: Method::SingleStep,
            norm,
            step_scale: 1.0,
            disc_alpha: None,
        }
    }

    pub fn iterative(norm: Norm, step_scale: f32, random_start: bool) -> Self {
        Self {
            name: if random_start { "pgd" } else { "ifgsm" }.into(),
            method: Method::Iterative { random_start },
            norm,
            step_scale,
            disc_alpha: None,
        }
    }

    pub fn evading(mut self, alpha: f32) -> Self {
        self.disc_alpha = Some(alpha);
        self.name.push_str("_disc");
        self
    }

    fn gradient(
        &self,
        target: &AttackTarget<'_>,
        x: ArrayView2<f32>,
        y: ArrayView1<f32>,
    ) -> Result<Array2<f32>> {
        let (logits, trace) = target.model.forward(x)?;
        let (_, d_logits) = target.criterion.loss_and_grad(logits.view(), y);
        let mut grad = target.model.backward(&trace, d_logits)?.input;
        if let Some(alpha) = self.disc_alpha {
            let disc = target.discriminator.ok_or_else(|| {
                ConfigError::invalid("attack.name", format!("{} needs a discriminator", self.name))
            })?;
            grad.scaled_add(-alpha, &disc.input_gradient(x, 0.0)?);
        }
        Ok(grad)
    }

    /// Unit step direction under the attack norm.
    fn direction(&self, grad: &Array2<f32>) -> Array2<f32> {
        match self.norm {
            Norm::Linf => grad.mapv(|g| {
                if g > 0.0 {
                    1.0
                } else if g < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }),
            Norm::L2 => {
                let mut dir = grad.clone();
                for mut row in dir.rows_mut() {
                    let norm = row.dot(&row).sqrt();
                    if norm > 0.0 {
                        row.mapv_inplace(|v| v / norm);
                    }
                }
                dir
            }
        }
    }

    /// Pull `delta` back into the ball of radius `eps`.
    fn project(&self, delta: &mut Array2<f32>, eps: f32) {
        match self.norm {
            Norm::Linf => delta.mapv_inplace(|v| v.clamp(-eps, eps)),
            Norm::L2 => {
                for mut row in delta.rows_mut() {
                    let norm = row.dot(&row).sqrt();
                    if norm > eps {
                        let scale = eps / norm;
                        row.mapv_inplace(|v| v * scale);
                    }
                }
            }
        }
    }

    fn random_start(&self, shape: (usize, usize), eps: f32, rng: &mut StdRng) -> Array2<f32> {
        let mut delta = Array2::from_shape_simple_fn(shape, || rng.gen_range(-eps..=eps));
        self.project(&mut delta, eps);
        delta
    }
}

impl Attack for GradientAttack {
    fn name(&self) -> &str {
        &self.name
    }

    fn needs_discriminator(&self) -> bool {
        self.disc_alpha.is_some()
    }

    fn perturb(
        &self,
        target: &AttackTarget<'_>,
        x: ArrayView2<f32>,
        y: ArrayView1<f32>,
        state: AttackState,
        rng: &mut StdRng,
    ) -> Result<Array2<f32>> {
        check_bounds(&state)?;
        let eps = state.strength;

        let mut delta = match self.method {
            Method::SingleStep => {
                let grad = self.gradient(target, x, y)?;
                self.direction(&grad) * eps
            }
            Method::Iterative { random_start } => {
                let step = eps * self.step_scale / state.n_steps as f32;
                let mut delta = if random_start {
                    self.random_start(x.dim(), eps, rng)
                } else {
                    Array2::zeros(x.dim())
                };
                for _ in 0..state.n_steps {
                    let x_adv = &x + &delta;
                    let grad = self.gradient(target, x_adv.view(), y)?;
                    delta.scaled_add(step, &self.direction(&grad));
                    self.project(&mut delta, eps);
                }
                delta
            }
        };
        self.project(&mut delta, eps);
        Ok(&x + &delta)
    }
}

/// Build an attack from its registry name.
pub fn build_attack(config: &AttackConfig) -> std::result::Result<Box<dyn Attack>, ConfigError> {
    let step_scale = config.step_scale as f32;
    let alpha = config.alpha as f32;
    if config.name.ends_with("_disc") && !alpha.is_finite() {
        return Err(ConfigError::invalid("attack.alpha", "must be finite"));
    }
    let attack = match config.name.as_str() {
        "fgsm" => GradientAttack::fgsm(config.norm),
        "ifgsm" | "bim" => GradientAttack::iterative(config.norm, step_scale, config.random_start),
        "pgd" => GradientAttack::iterative(config.norm, step_scale, true),
        "fgsm_disc" => GradientAttack::fgsm(config.norm).evading(alpha),
        "pgd_disc" => GradientAttack::iterative(config.norm, step_scale, true).evading(alpha),
        other => return Err(ConfigError::unknown("attack", other)),
    };
    Ok(Box::new(attack))
}
