//! Persisted experiment layout and atomic file writes.
//!
//! Layout under `results_dir`:
//! - classifier checkpoints: `<dataset>/<model>/<exp_name>/<model_id>.json`
//! - discriminators: `<dataset>/<model>/discriminator/<attack short>/<suffix>/<model_id>.json`
//! - attack results: `<dataset>/<model>/attack/<attack short>/<suffix>/...`

use crate::config::ExperimentConfig;
use crate::error::ArtifactError;
use std::io;
use std::path::{Path, PathBuf};

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes to a `.tmp` sibling file,
/// then renames onto the target path. Creates parent directories if needed.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to a file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from a file, failing with `NotFound` if it is absent.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Path scheme for one (dataset, model architecture) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
    dataset: String,
    model: String,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>, dataset: &str, model: &str) -> Self {
        Self {
            root: root.into(),
            dataset: dataset.to_string(),
            model: model.to_string(),
        }
    }

    pub fn for_experiment(config: &ExperimentConfig) -> Self {
        Self::new(
            config.results_dir.clone(),
            &config.dataset.name,
            &config.model.name,
        )
    }

    fn base(&self) -> PathBuf {
        self.root.join(&self.dataset).join(&self.model)
    }

    pub fn model_dir(&self, exp_name: &str) -> PathBuf {
        self.base().join(exp_name)
    }

    pub fn model_path(&self, exp_name: &str, model_id: usize) -> PathBuf {
        self.model_dir(exp_name).join(format!("{model_id}.json"))
    }

    pub fn discriminator_dir(&self, attack_short: &str, suffix: &str) -> PathBuf {
        self.base()
            .join("discriminator")
            .join(attack_short)
            .join(suffix)
    }

    pub fn discriminator_path(&self, attack_short: &str, suffix: &str, model_id: usize) -> PathBuf {
        self.discriminator_dir(attack_short, suffix)
            .join(format!("{model_id}.json"))
    }

    pub fn attack_dir(&self, attack_short: &str, suffix: &str) -> PathBuf {
        self.base().join("attack").join(attack_short).join(suffix)
    }
}

/// Save a YAML snapshot of the resolved configuration next to an artifact.
pub fn save_config_snapshot(
    dir: &Path,
    file_name: &str,
    config: &ExperimentConfig,
) -> Result<PathBuf, ArtifactError> {
    let yaml = serde_yaml::to_string(config)?;
    let path = dir.join(file_name);
    atomic_write(&path, yaml.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        name: String,
        count: u32,
    }

    #[test]
    fn test_atomic_write_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("test.json");
        let data = TestData {
            name: "hello".into(),
            count: 42,
        };

        atomic_write_json(&path, &data).unwrap();
        let loaded: TestData = load_json(&path).unwrap();
        assert_eq!(loaded, data);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_json_missing_is_not_found() {
        let result: Result<TestData, _> = load_json(Path::new("/nonexistent/file.json"));
        assert!(matches!(result, Err(ArtifactError::NotFound { .. })));
    }

    #[test]
    fn test_layout_paths() {
        let layout = ArtifactLayout::new("results", "FordA", "MLP");
        assert_eq!(
            layout.model_path("adv_train", 3),
            PathBuf::from("results/FordA/MLP/adv_train/3.json")
        );
        assert_eq!(
            layout.discriminator_path("fgsm_attack", "fgsm_attack_eps=0.03_nsteps=10", 0),
            PathBuf::from(
                "results/FordA/MLP/discriminator/fgsm_attack/fgsm_attack_eps=0.03_nsteps=10/0.json"
            )
        );
        assert_eq!(
            layout.attack_dir("fgsm_attack", "x"),
            PathBuf::from("results/FordA/MLP/attack/fgsm_attack/x")
        );
    }

    #[test]
    fn test_config_snapshot_is_yaml() {
        let dir = TempDir::new().unwrap();
        let cfg = ExperimentConfig::minimal("FordA");
        let path = save_config_snapshot(dir.path(), "0_config.yaml", &cfg).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("exp_name: default"));
    }
}
