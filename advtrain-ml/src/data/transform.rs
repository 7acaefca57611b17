//! Training-time input augmentations, applied to clean batches before any attack.

use advtrain_core::{ConfigError, NamedParams};
use ndarray::Array2;
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, x: &mut Array2<f32>, rng: &mut StdRng);
}

/// Additive i.i.d. Gaussian noise.
#[derive(Debug, Clone, Copy)]
pub struct GaussianNoise {
    normal: Normal<f32>,
}

impl GaussianNoise {
    pub fn new(std: f32) -> Result<Self, ConfigError> {
        let normal = Normal::new(0.0, std)
            .map_err(|e| ConfigError::invalid("gaussian_noise.std", e.to_string()))?;
        Ok(Self { normal })
    }
}

impl Transform for GaussianNoise {
    fn name(&self) -> &'static str {
        "gaussian_noise"
    }

    fn apply(&self, x: &mut Array2<f32>, rng: &mut StdRng) {
        x.mapv_inplace(|v| v + self.normal.sample(rng));
    }
}

/// Multiply each series by a factor drawn from `[low, high]`.
#[derive(Debug, Clone, Copy)]
pub struct Scale {
    pub low: f32,
    pub high: f32,
}

impl Transform for Scale {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn apply(&self, x: &mut Array2<f32>, rng: &mut StdRng) {
        for mut row in x.rows_mut() {
            let factor = rng.gen_range(self.low..=self.high);
            row.mapv_inplace(|v| v * factor);
        }
    }
}

/// Add a per-series offset drawn from `[-max, max]`.
#[derive(Debug, Clone, Copy)]
pub struct Shift {
    pub max: f32,
}

impl Transform for Shift {
    fn name(&self) -> &'static str {
        "shift"
    }

    fn apply(&self, x: &mut Array2<f32>, rng: &mut StdRng) {
        for mut row in x.rows_mut() {
            let offset = rng.gen_range(-self.max..=self.max);
            row.mapv_inplace(|v| v + offset);
        }
    }
}

fn build_one(params: &NamedParams) -> Result<Box<dyn Transform>, ConfigError> {
    match params.name.as_str() {
        "gaussian_noise" => Ok(Box::new(GaussianNoise::new(
            params.f64_or("std", 0.01)? as f32,
        )?)),
        "scale" => {
            let low = params.f64_or("low", 0.9)? as f32;
            let high = params.f64_or("high", 1.1)? as f32;
            if !(low <= high) {
                return Err(ConfigError::invalid("scale", "low must not exceed high"));
            }
            Ok(Box::new(Scale { low, high }))
        }
        "shift" => {
            let max = params.f64_or("max", 0.1)? as f32;
            if !(max >= 0.0) {
                return Err(ConfigError::invalid("shift.max", "must be non-negative"));
            }
            Ok(Box::new(Shift { max }))
        }
        other => Err(ConfigError::unknown("transform", other)),
    }
}

/// Build the transform chain in configured order; `None` entries are skipped.
pub fn build_transforms(list: &[NamedParams]) -> Result<Vec<Box<dyn Transform>>, ConfigError> {
    list.iter()
        .filter(|p| !p.is_none())
        .map(build_one)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_shift_is_per_row_constant() {
        let mut x = Array2::<f32>::zeros((3, 4));
        let shift = Shift { max: 0.5 };
        shift.apply(&mut x, &mut StdRng::seed_from_u64(0));
        for row in x.rows() {
            assert!(row.iter().all(|&v| v == row[0]));
            assert!(row[0].abs() <= 0.5);
        }
    }

    #[test]
    fn test_scale_bounds() {
        let mut x = Array2::<f32>::ones((8, 2));
        Scale { low: 0.5, high: 2.0 }.apply(&mut x, &mut StdRng::seed_from_u64(0));
        assert!(x.iter().all(|&v| (0.5..=2.0).contains(&v)));
    }

    #[test]
    fn test_noise_changes_values() {
        let mut x = Array2::<f32>::zeros((2, 16));
        GaussianNoise::new(1.0)
            .unwrap()
            .apply(&mut x, &mut StdRng::seed_from_u64(0));
        assert!(x.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_registry() {
        let chain = build_transforms(&[
            NamedParams::new("gaussian_noise").with("std", 0.1),
            NamedParams::new("None"),
            NamedParams::new("scale"),
        ])
        .unwrap();
        assert_eq!(
            chain.iter().map(|t| t.name()).collect::<Vec<_>>(),
            vec!["gaussian_noise", "scale"]
        );
        assert!(build_transforms(&[NamedParams::new("mixup")]).is_err());
        assert!(build_transforms(&[NamedParams::new("scale").with("low", 2.0)]).is_err());
    }
}
