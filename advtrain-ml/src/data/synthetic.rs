//! Seeded sinusoid classification problem.
//!
//! Class `c` is a sine wave at frequency `c + 1` cycles per series with a
//! random phase and amplitude, plus Gaussian noise. Balanced by construction.

use super::Dataset;
use crate::error::{MlError, Result};
use advtrain_core::config::DatasetConfig;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f32::consts::PI;

fn split(n: usize, seq_len: usize, n_classes: usize, noise: f32, rng: &mut StdRng) -> Result<Dataset> {
    let normal = Normal::new(0.0, noise.max(0.0))
        .map_err(|e| MlError::dataset(format!("invalid noise level: {e}")))?;
    let mut x = Array2::zeros((n, seq_len));
    let mut y = Array1::zeros(n);
    for (i, mut row) in x.rows_mut().into_iter().enumerate() {
        let class = i % n_classes;
        let freq = (class + 1) as f32;
        let phase = rng.gen_range(0.0..2.0 * PI);
        let amp = rng.gen_range(0.8..1.2);
        for (t, v) in row.iter_mut().enumerate() {
            let step = t as f32 / seq_len as f32;
            *v = amp * (2.0 * PI * freq * step + phase).sin() + normal.sample(rng);
        }
        y[i] = class as f32;
    }
    Dataset::new(x, y, n_classes)
}

/// Train and test splits for a synthetic dataset config.
pub fn generate(config: &DatasetConfig, seed: u64) -> Result<(Dataset, Dataset)> {
    if config.seq_len == 0 {
        return Err(MlError::dataset("synthetic series need seq_len > 0"));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = config.noise as f32;
    let train = split(config.n_train, config.seq_len, config.n_classes, noise, &mut rng)?;
    let test = split(config.n_test, config.seq_len, config.n_classes, noise, &mut rng)?;
    Ok((train, test))
}
