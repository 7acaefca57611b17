//! Seed derivation and run-environment snapshots.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Snapshot of where and how a run executed, stored next to its results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub crate_version: String,
    pub system_info: String,
    pub device: String,
    pub global_seed: u64,
    pub timestamp: DateTime<Utc>,
    /// Hash of the environment variables that influence a run.
    pub env_vars_hash: String,
}

impl EnvironmentSnapshot {
    const TRACKED_VARS: [&'static str; 3] = ["RUST_LOG", "CUDA_VISIBLE_DEVICES", "ADVTRAIN_RESULTS_DIR"];

    pub fn capture(device: impl ToString, global_seed: u64) -> Self {
        Self {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            system_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            device: device.to_string(),
            global_seed,
            timestamp: Utc::now(),
            env_vars_hash: Self::env_vars_hash(),
        }
    }

    fn env_vars_hash() -> String {
        let mut hasher = Sha256::new();
        for var in Self::TRACKED_VARS {
            let value = std::env::var(var).unwrap_or_default();
            hasher.update(var.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Derives an independent, stable seed per named component from one global seed.
///
/// Two managers with the same global seed hand out identical streams for the
/// same component names, whatever order they are requested in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedManager {
    pub global_seed: u64,
    pub component_seeds: BTreeMap<String, u64>,
}

impl SeedManager {
    pub fn new(global_seed: u64) -> Self {
        Self {
            global_seed,
            component_seeds: BTreeMap::new(),
        }
    }

    /// First eight bytes of `sha256(global_seed || component)`.
    pub fn derive(global_seed: u64, component: &str) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(global_seed.to_le_bytes());
        hasher.update(component.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    pub fn get_seed(&mut self, component: &str) -> u64 {
        let global = self.global_seed;
        *self
            .component_seeds
            .entry(component.to_string())
            .or_insert_with(|| Self::derive(global, component))
    }

    pub fn rng(&mut self, component: &str) -> StdRng {
        StdRng::seed_from_u64(self.get_seed(component))
    }
}
