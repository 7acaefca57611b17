use advtrain_core::{ConfigError, NamedParams};

/// `base * gamma^floor(epoch / step_size)`.
///
/// Shared by learning-rate and attack-strength schedules so both decay on the
/// same epoch boundaries.
pub fn step_decay(base: f64, gamma: f64, step_size: usize, epoch: usize) -> f64 {
    let k = epoch / step_size.max(1);
    base * gamma.powf(k as f64)
}

/// Learning rate as a pure function of the epoch.
pub trait LrScheduler: Send + Sync {
    fn name(&self) -> &'static str;

    fn lr_at(&self, base_lr: f32, epoch: usize) -> f32;
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantLr;

impl LrScheduler for ConstantLr {
    fn name(&self) -> &'static str {
        "None"
    }

    fn lr_at(&self, base_lr: f32, _epoch: usize) -> f32 {
        base_lr
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StepLr {
    pub step_size: usize,
    pub gamma: f64,
}

impl LrScheduler for StepLr {
    fn name(&self) -> &'static str {
        "StepLR"
    }

    fn lr_at(&self, base_lr: f32, epoch: usize) -> f32 {
        step_decay(base_lr as f64, self.gamma, self.step_size, epoch) as f32
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExponentialLr {
    pub gamma: f64,
}

impl LrScheduler for ExponentialLr {
    fn name(&self) -> &'static str {
        "ExponentialLR"
    }

    fn lr_at(&self, base_lr: f32, epoch: usize) -> f32 {
        step_decay(base_lr as f64, self.gamma, 1, epoch) as f32
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CosineAnnealingLr {
    pub t_max: usize,
    pub eta_min: f64,
}

impl LrScheduler for CosineAnnealingLr {
    fn name(&self) -> &'static str {
        "CosineAnnealingLR"
    }

    fn lr_at(&self, base_lr: f32, epoch: usize) -> f32 {
        let t = (epoch % (2 * self.t_max)) as f64 / self.t_max as f64;
        let cos = (std::f64::consts::PI * t).cos();
        (self.eta_min + (base_lr as f64 - self.eta_min) * (1.0 + cos) / 2.0) as f32
    }
}

fn positive_gamma(params: &NamedParams) -> Result<f64, ConfigError> {
    let gamma = params.f64_or("gamma", 0.1)?;
    if !(gamma > 0.0 && gamma.is_finite()) {
        return Err(ConfigError::invalid(
            format!("{}.gamma", params.name),
            "must be positive",
        ));
    }
    Ok(gamma)
}

/// Build a learning-rate scheduler from its registry name (`None` disables it).
pub fn build_lr_scheduler(params: &NamedParams) -> Result<Box<dyn LrScheduler>, ConfigError> {
    if params.is_none() {
        return Ok(Box::new(ConstantLr));
    }
    match params.name.as_str() {
        "StepLR" => {
            let step_size = params.usize_or("step_size", 10)?;
            if step_size == 0 {
                return Err(ConfigError::invalid("StepLR.step_size", "must be positive"));
            }
            Ok(Box::new(StepLr {
                step_size,
                gamma: positive_gamma(params)?,
            }))
        }
        "ExponentialLR" => Ok(Box::new(ExponentialLr {
            gamma: positive_gamma(params)?,
        })),
        "CosineAnnealingLR" => {
            let t_max = params.usize_or("T_max", 10)?;
            if t_max == 0 {
                return Err(ConfigError::invalid("CosineAnnealingLR.T_max", "must be positive"));
            }
            Ok(Box::new(CosineAnnealingLr {
                t_max,
                eta_min: params.f64_or("eta_min", 0.0)?,
            }))
        }
        other => Err(ConfigError::unknown("scheduler", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_decay() {
        assert_eq!(step_decay(1.0, 0.5, 2, 0), 1.0);
        assert_eq!(step_decay(1.0, 0.5, 2, 1), 1.0);
        assert_eq!(step_decay(1.0, 0.5, 2, 2), 0.5);
        assert_eq!(step_decay(1.0, 0.5, 2, 5), 0.25);
    }

    #[test]
    fn test_step_lr() {
        let sched = build_lr_scheduler(
            &NamedParams::new("StepLR")
                .with("step_size", 3)
                .with("gamma", 0.1),
        )
        .unwrap();
        assert!((sched.lr_at(0.1, 2) - 0.1).abs() < 1e-7);
        assert!((sched.lr_at(0.1, 3) - 0.01).abs() < 1e-7);
    }

    #[test]
    fn test_cosine_hits_eta_min_at_t_max() {
        let sched = CosineAnnealingLr {
            t_max: 4,
            eta_min: 0.0,
        };
        assert!((sched.lr_at(1.0, 0) - 1.0).abs() < 1e-6);
        assert!(sched.lr_at(1.0, 4).abs() < 1e-6);
    }

    #[test]
    fn test_none_and_unknown() {
        assert_eq!(build_lr_scheduler(&NamedParams::new("None")).unwrap().name(), "None");
        assert!(build_lr_scheduler(&NamedParams::new("StepLR").with("step_size", 0)).is_err());
        assert!(build_lr_scheduler(&NamedParams::new("OneCycle")).is_err());
    }
}
