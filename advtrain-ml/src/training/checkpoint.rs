//! Model checkpoints: parameters plus architecture, guarded by a SHA-256 digest.

use crate::error::Result;
use crate::nn::{DenseNet, ModelSpec};
use advtrain_core::ArtifactError;
use advtrain_core::artifacts::{atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A serialized network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub id: String,
    pub spec: ModelSpec,
    pub params: Vec<f32>,
    /// Hex SHA-256 over the little-endian parameter bytes.
    pub hash: String,
    pub epoch: usize,
    pub metric: f64,
    pub created_at: DateTime<Utc>,
}

/// Hex digest of a parameter vector.
pub fn params_hash(params: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for p in params {
        hasher.update(p.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

impl ModelCheckpoint {
    pub fn capture(net: &DenseNet, epoch: usize, metric: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            spec: net.spec().clone(),
            params: net.params().to_vec(),
            hash: params_hash(net.params()),
            epoch,
            metric,
            created_at: Utc::now(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)?;
        Ok(())
    }

    /// Load and verify a checkpoint.
    pub fn load(path: &Path) -> Result<Self> {
        let ckpt: Self = load_json(path)?;
        let actual = params_hash(&ckpt.params);
        if actual != ckpt.hash {
            return Err(ArtifactError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: ckpt.hash,
                actual,
            }
            .into());
        }
        Ok(ckpt)
    }

    pub fn into_model(self) -> Result<DenseNet> {
        DenseNet::from_params(self.spec, self.params)
    }
}

/// One line of the checkpoint manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub id: String,
    pub name: String,
    pub epoch: usize,
    pub metric: f64,
    pub path: PathBuf,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Writes checkpoints into a directory and keeps a bounded manifest of them.
pub struct CheckpointManager {
    base_dir: PathBuf,
    max_entries: usize,
}

impl CheckpointManager {
    const MANIFEST: &'static str = "checkpoints.json";

    pub fn new(base_dir: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.json"))
    }

    pub fn list(&self) -> Result<Vec<CheckpointEntry>> {
        let manifest = self.base_dir.join(Self::MANIFEST);
        if !manifest.exists() {
            return Ok(Vec::new());
        }
        Ok(load_json(&manifest)?)
    }

    /// Save `ckpt` as `<name>.json` and record it, dropping the oldest
    /// manifest entries beyond `max_entries`.
    pub fn save(&self, name: &str, ckpt: &ModelCheckpoint) -> Result<CheckpointEntry> {
        let path = self.path_for(name);
        ckpt.save(&path)?;

        let entry = CheckpointEntry {
            id: ckpt.id.clone(),
            name: name.to_string(),
            epoch: ckpt.epoch,
            metric: ckpt.metric,
            path,
            hash: ckpt.hash.clone(),
            created_at: ckpt.created_at,
        };
        let mut entries = self.list()?;
        entries.retain(|e| e.name != name);
        entries.push(entry.clone());
        let excess = entries.len().saturating_sub(self.max_entries);
        entries.drain(..excess);
        atomic_write_json(&self.base_dir.join(Self::MANIFEST), &entries)?;

        tracing::debug!(name, path = %entry.path.display(), "Saved checkpoint");
        Ok(entry)
    }

    pub fn load(&self, name: &str) -> Result<ModelCheckpoint> {
        ModelCheckpoint::load(&self.path_for(name))
    }

    /// Entry with the highest (or lowest) metric.
    pub fn best(&self, higher_is_better: bool) -> Result<Option<CheckpointEntry>> {
        let entries = self.list()?;
        Ok(entries.into_iter().reduce(|a, b| {
            let better = if higher_is_better {
                b.metric > a.metric
            } else {
                b.metric < a.metric
            };
            if better { b } else { a }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MlError;
    use crate::nn::Activation;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::TempDir;

    fn net() -> DenseNet {
        let spec = ModelSpec {
            arch: "MLP".into(),
            input_dim: 3,
            hidden: vec![4],
            output_dim: 1,
            activation: Activation::Relu,
        };
        DenseNet::new(spec, &mut StdRng::seed_from_u64(0))
    }

    #[test]
    fn test_save_and_restore_model() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.json");
        let original = net();
        ModelCheckpoint::capture(&original, 3, 0.8).save(&path).unwrap();

        let restored = ModelCheckpoint::load(&path).unwrap();
        assert_eq!(restored.epoch, 3);
        assert_eq!(restored.into_model().unwrap(), original);
    }

    #[test]
    fn test_tampered_params_fail_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0.json");
        let mut ckpt = ModelCheckpoint::capture(&net(), 0, 0.0);
        ckpt.params[0] += 1.0;
        atomic_write_json(&path, &ckpt).unwrap();

        let err = ModelCheckpoint::load(&path).unwrap_err();
        assert!(matches!(err, MlError::Artifact(ArtifactError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_missing_checkpoint_is_not_found() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path(), 3);
        let err = manager.load("7").unwrap_err();
        assert!(matches!(err, MlError::Artifact(ArtifactError::NotFound { .. })));
    }

    #[test]
    fn test_manifest_is_bounded() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path(), 2);
        let n = net();
        for (i, metric) in [0.5, 0.9, 0.7].into_iter().enumerate() {
            manager
                .save(&i.to_string(), &ModelCheckpoint::capture(&n, i, metric))
                .unwrap();
        }
        let names: Vec<_> = manager.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["1", "2"]);
        assert_eq!(manager.best(true).unwrap().unwrap().name, "1");
        assert_eq!(manager.best(false).unwrap().unwrap().name, "2");
    }
}
