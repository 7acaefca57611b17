//! Attack-strength schedules.
//!
//! A schedule is a pure function of the epoch; it holds no mutable state and
//! can be queried in any order.

use crate::nn::step_decay;
use advtrain_core::{AttackConfig, ConfigError, NamedParams};
use serde::{Deserialize, Serialize};

/// Attack budget in effect for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackState {
    pub epoch: usize,
    pub strength: f32,
    pub n_steps: usize,
}

pub trait AttackScheduler: Send + Sync {
    fn name(&self) -> &'static str;

    fn strength(&self, epoch: usize) -> f32;

    fn n_steps(&self, epoch: usize) -> usize;

    fn state(&self, epoch: usize) -> AttackState {
        AttackState {
            epoch,
            strength: self.strength(epoch),
            n_steps: self.n_steps(epoch),
        }
    }
}

/// Fixed budget for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct ConstantAttackScheduler {
    pub eps: f64,
    pub n_steps: usize,
}

impl AttackScheduler for ConstantAttackScheduler {
    fn name(&self) -> &'static str {
        "None"
    }

    fn strength(&self, _epoch: usize) -> f32 {
        self.eps as f32
    }

    fn n_steps(&self, _epoch: usize) -> usize {
        self.n_steps
    }
}

/// `strength(epoch) = eps * gamma^floor(epoch / step_size)`.
#[derive(Debug, Clone, Copy)]
pub struct StepAttackScheduler {
    eps: f64,
    step_size: usize,
    gamma: f64,
    n_steps: usize,
}

impl StepAttackScheduler {
    pub fn new(eps: f64, step_size: usize, gamma: f64, n_steps: usize) -> Result<Self, ConfigError> {
        if step_size == 0 {
            return Err(ConfigError::invalid(
                "attack_scheduler.attack_step_size",
                "must be positive",
            ));
        }
        if !(gamma > 0.0 && gamma.is_finite()) {
            return Err(ConfigError::invalid(
                "attack_scheduler.attack_gamma",
                "must be positive",
            ));
        }
        Ok(Self {
            eps,
            step_size,
            gamma,
            n_steps,
        })
    }
}

impl AttackScheduler for StepAttackScheduler {
    fn name(&self) -> &'static str {
        "StepAttackScheduler"
    }

    fn strength(&self, epoch: usize) -> f32 {
        step_decay(self.eps, self.gamma, self.step_size, epoch) as f32
    }

    fn n_steps(&self, _epoch: usize) -> usize {
        self.n_steps
    }
}

/// Build the configured attack schedule around the attack's base budget.
pub fn build_attack_scheduler(
    params: &NamedParams,
    attack: &AttackConfig,
) -> Result<Box<dyn AttackScheduler>, ConfigError> {
    if params.is_none() {
        return Ok(Box::new(ConstantAttackScheduler {
            eps: attack.eps,
            n_steps: attack.n_steps,
        }));
    }
    match params.name.as_str() {
        "StepAttackScheduler" | "step" => {
            let step_size = params.usize_or(
                "attack_step_size",
                params.usize_or("step_size", 1)?,
            )?;
            let gamma = params.f64_or("attack_gamma", params.f64_or("gamma", 1.0)?)?;
            Ok(Box::new(StepAttackScheduler::new(
                attack.eps,
                step_size,
                gamma,
                attack.n_steps,
            )?))
        }
        other => Err(ConfigError::unknown("attack scheduler", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_schedule_boundaries() {
        let s = StepAttackScheduler::new(0.1, 10, 0.5, 5).unwrap();
        assert!((s.strength(0) - 0.1).abs() < 1e-7);
        assert!((s.strength(9) - 0.1).abs() < 1e-7);
        assert!((s.strength(10) - 0.05).abs() < 1e-7);
        assert!((s.strength(25) - 0.025).abs() < 1e-7);
        assert_eq!(s.state(25).n_steps, 5);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(StepAttackScheduler::new(0.1, 0, 0.5, 1).is_err());
        assert!(StepAttackScheduler::new(0.1, 2, 0.0, 1).is_err());
        assert!(StepAttackScheduler::new(0.1, 2, f64::NAN, 1).is_err());
    }

    #[test]
    fn test_registry() {
        let attack = AttackConfig::new("fgsm", 0.2, 1);
        let constant = build_attack_scheduler(&NamedParams::new("None"), &attack).unwrap();
        assert_eq!(constant.strength(100), 0.2);

        let step = build_attack_scheduler(
            &NamedParams::new("StepAttackScheduler")
                .with("attack_step_size", 2)
                .with("attack_gamma", 0.5),
            &attack,
        )
        .unwrap();
        assert!((step.strength(2) - 0.1).abs() < 1e-7);

        assert!(build_attack_scheduler(&NamedParams::new("Cyclic"), &attack).is_err());
    }
}
