//! Layered configuration loading.
//!
//! Uses `figment` the same way the rest of the workspace does, in this order
//! (later layers win):
//! 1. Sub-documents named in the root `defaults` list
//!    (`- dataset: FordA` loads `<config_dir>/dataset/FordA.yaml` under `dataset`)
//! 2. The root YAML document itself
//! 3. Environment variables (`ADVTRAIN_TRAINING__N_EPOCHS=5`)
//! 4. Explicit `key.path=value` overrides (CLI `--set`)
//!
//! The merged tree is then interpolated and validated by
//! [`ExperimentConfig::from_value`].

use super::ExperimentConfig;
use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "ADVTRAIN_";

/// Builder for loading an [`ExperimentConfig`] from layered sources.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    config_dir: PathBuf,
    env_prefix: Option<String>,
    overrides: Vec<String>,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            path,
            config_dir,
            env_prefix: Some(ENV_PREFIX.to_string()),
            overrides: Vec::new(),
        }
    }

    /// Directory holding the composable groups (`dataset/`, `model/`, `attack/`, ...).
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Disable the environment layer (used by tests).
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    pub fn overrides<I, S>(mut self, assignments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.extend(assignments.into_iter().map(Into::into));
        self
    }

    pub fn load(&self) -> Result<ExperimentConfig, ConfigError> {
        ExperimentConfig::from_value(self.load_value()?)
    }

    /// Merge every layer into one raw (not yet interpolated) tree.
    pub fn load_value(&self) -> Result<Value, ConfigError> {
        if !self.path.exists() {
            return Err(ConfigError::FileNotFound {
                path: self.path.clone(),
            });
        }
        let root: Value = Figment::from(Yaml::file(&self.path))
            .extract()
            .map_err(ConfigError::parse)?;

        let mut figment = Figment::new();
        for (group, name) in default_groups(&root)? {
            let file = self.config_dir.join(&group).join(format!("{name}.yaml"));
            if !file.exists() {
                return Err(ConfigError::FileNotFound { path: file });
            }
            let sub: Value = Figment::from(Yaml::file(&file))
                .extract()
                .map_err(ConfigError::parse)?;
            tracing::debug!(group = %group, name = %name, "Composed config group");
            let mut wrapped = Map::new();
            wrapped.insert(group, sub);
            figment = figment.merge(Serialized::defaults(Value::Object(wrapped)));
        }

        figment = figment.merge(Yaml::file(&self.path));
        if let Some(prefix) = &self.env_prefix {
            figment = figment.merge(Env::prefixed(prefix).split("__"));
        }
        for assignment in &self.overrides {
            figment = figment.merge(Serialized::defaults(parse_assignment(assignment)?));
        }

        let mut value: Value = figment.extract().map_err(ConfigError::parse)?;
        if let Value::Object(map) = &mut value {
            map.remove("defaults");
        }
        Ok(value)
    }
}

/// Load a configuration file with CLI overrides, environment included.
pub fn load_config(path: &Path, overrides: &[String]) -> Result<ExperimentConfig, ConfigError> {
    ConfigLoader::new(path).overrides(overrides.iter().cloned()).load()
}

fn default_groups(root: &Value) -> Result<Vec<(String, String)>, ConfigError> {
    let Some(defaults) = root.get("defaults") else {
        return Ok(Vec::new());
    };
    let entries = defaults
        .as_array()
        .ok_or_else(|| ConfigError::invalid("defaults", "expected a list"))?;

    let mut groups = Vec::new();
    for entry in entries {
        match entry {
            Value::String(s) if s == "_self_" => {}
            Value::Object(map) => {
                for (group, name) in map {
                    match name {
                        Value::Null => {}
                        Value::String(name) if name == "None" => {}
                        Value::String(name) => groups.push((group.clone(), name.clone())),
                        _ => {
                            return Err(ConfigError::invalid(
                                format!("defaults.{group}"),
                                "expected a sub-document name",
                            ));
                        }
                    }
                }
            }
            other => {
                return Err(ConfigError::invalid(
                    "defaults",
                    format!("unsupported entry {other}"),
                ));
            }
        }
    }
    Ok(groups)
}

/// Turn `a.b.c=value` into `{"a": {"b": {"c": value}}}`; the value is parsed as YAML.
pub fn parse_assignment(assignment: &str) -> Result<Value, ConfigError> {
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| ConfigError::invalid(assignment, "expected key.path=value"))?;
    let key = key.trim();
    if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(ConfigError::invalid(assignment, "empty key segment"));
    }
    let value = serde_yaml::from_str::<Value>(raw.trim())
        .unwrap_or_else(|_| Value::String(raw.trim().to_string()));

    Ok(key.rsplit('.').fold(value, |inner, segment| {
        let mut map = Map::new();
        map.insert(segment.to_string(), inner);
        Value::Object(map)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_assignment_nests_and_types() {
        assert_eq!(
            parse_assignment("training.n_epochs=3").unwrap(),
            json!({"training": {"n_epochs": 3}})
        );
        assert_eq!(
            parse_assignment("exp_name=baseline").unwrap(),
            json!({"exp_name": "baseline"})
        );
        assert!(parse_assignment("no_equals").is_err());
        assert!(parse_assignment("a..b=1").is_err());
    }

    #[test]
    fn test_composes_defaults_and_interpolates() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "dataset/FordA.yaml",
            "name: FordA\nsource: synthetic\nseq_len: 16\n",
        );
        write(
            dir.path(),
            "attack/fgsm.yaml",
            "name: fgsm\neps: 0.03\nn_iterations: 10\n",
        );
        let root = write(
            dir.path(),
            "config.yaml",
            "defaults:\n  - dataset: FordA\n  - attack: fgsm\n  - _self_\n\
             exp_name: ${dataset.name}_adv\n\
             batch_size: 16\n\
             training:\n  n_epochs: 4\n  adversarial: true\n",
        );

        let cfg = ConfigLoader::new(&root).without_env().load().unwrap();
        assert_eq!(cfg.exp_name, "FordA_adv");
        assert_eq!(cfg.dataset.seq_len, 16);
        assert_eq!(cfg.attack.as_ref().unwrap().n_steps, 10);
        assert_eq!(cfg.training.n_epochs, 4);
        assert_eq!(cfg.task, TaskKind::Classifier);
    }

    #[test]
    fn test_root_overrides_group_and_cli_overrides_root() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "dataset/FordA.yaml", "name: FordA\nseq_len: 16\n");
        let root = write(
            dir.path(),
            "config.yaml",
            "defaults:\n  - dataset: FordA\ndataset:\n  seq_len: 24\nbatch_size: 8\n",
        );

        let cfg = ConfigLoader::new(&root)
            .without_env()
            .overrides(["batch_size=4"])
            .load()
            .unwrap();
        assert_eq!(cfg.dataset.name, "FordA");
        assert_eq!(cfg.dataset.seq_len, 24);
        assert_eq!(cfg.batch_size, 4);
    }

    #[test]
    fn test_missing_group_file() {
        let dir = TempDir::new().unwrap();
        let root = write(dir.path(), "config.yaml", "defaults:\n  - dataset: Nope\n");
        let err = ConfigLoader::new(&root).without_env().load().unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_missing_root_file() {
        let err = load_config(Path::new("/nonexistent/config.yaml"), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_unresolvable_interpolation_aborts_load() {
        let dir = TempDir::new().unwrap();
        let root = write(
            dir.path(),
            "config.yaml",
            "dataset:\n  name: FordA\nexp_name: ${attack.name}\n",
        );
        let err = ConfigLoader::new(&root).without_env().load().unwrap_err();
        assert!(matches!(err, ConfigError::Interpolation { .. }));
    }
}
