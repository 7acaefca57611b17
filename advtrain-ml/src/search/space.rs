//! Search spaces declared as a tree mirroring the configuration.
//!
//! Any object carrying an `optuna_type` key is a leaf:
//!
//! ```yaml
//! training:
//!   optimizer:
//!     params:
//!       lr: {optuna_type: float, low: 1.0e-4, high: 1.0e-2, log: true}
//!   n_epochs: {optuna_type: const, value: 20}
//! model:
//!   params:
//!     hidden: {optuna_type: choice, choices: [[32], [64, 32]]}
//! ```
//!
//! Leaves are addressed by their dotted path (`training.optimizer.params.lr`).

use advtrain_core::ConfigError;
use advtrain_core::config::SamplerConfig;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Sampled values keyed by dotted path.
pub type TrialParams = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "optuna_type", rename_all = "snake_case")]
pub enum ParamSpec {
    Const {
        value: Value,
    },
    Choice {
        choices: Vec<Value>,
    },
    Float {
        low: f64,
        high: f64,
        #[serde(default)]
        log: bool,
        #[serde(default)]
        step: Option<f64>,
    },
    Int {
        low: i64,
        high: i64,
        #[serde(default = "default_int_step")]
        step: i64,
        #[serde(default)]
        log: bool,
    },
}

fn default_int_step() -> i64 {
    1
}

impl ParamSpec {
    fn parse(path: &str, leaf: &Value) -> Result<Self, ConfigError> {
        let kind = leaf
            .get("optuna_type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !matches!(kind, "const" | "choice" | "float" | "int") {
            return Err(ConfigError::UnsupportedSearchType {
                param: path.to_string(),
                kind: kind.to_string(),
            });
        }
        let spec: Self = serde_json::from_value(leaf.clone())
            .map_err(|e| ConfigError::invalid(path, e.to_string()))?;
        spec.validate(path)?;
        Ok(spec)
    }

    fn validate(&self, path: &str) -> Result<(), ConfigError> {
        match self {
            Self::Const { .. } => Ok(()),
            Self::Choice { choices } if choices.is_empty() => {
                Err(ConfigError::invalid(path, "choices must not be empty"))
            }
            Self::Choice { .. } => Ok(()),
            Self::Float { low, high, log, step } => {
                if !(low.is_finite() && high.is_finite() && low <= high) {
                    return Err(ConfigError::invalid(path, "expected finite low <= high"));
                }
                if *log && *low <= 0.0 {
                    return Err(ConfigError::invalid(path, "log scale requires low > 0"));
                }
                if step.is_some_and(|s| s <= 0.0) {
                    return Err(ConfigError::invalid(path, "step must be positive"));
                }
                if *log && step.is_some() {
                    return Err(ConfigError::invalid(path, "step and log are exclusive"));
                }
                Ok(())
            }
            Self::Int { low, high, step, log } => {
                if low > high {
                    return Err(ConfigError::invalid(path, "expected low <= high"));
                }
                if *step <= 0 {
                    return Err(ConfigError::invalid(path, "step must be positive"));
                }
                if *log && *low <= 0 {
                    return Err(ConfigError::invalid(path, "log scale requires low > 0"));
                }
                Ok(())
            }
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        match self {
            Self::Const { value } => value.clone(),
            Self::Choice { choices } => choices.choose(rng).cloned().unwrap_or(Value::Null),
            Self::Float { low, high, log, step } => {
                if low == high {
                    return Value::from(*low);
                }
                let x = if *log {
                    rng.gen_range(low.ln()..high.ln()).exp()
                } else {
                    rng.gen_range(*low..*high)
                };
                let x = match step {
                    Some(s) => {
                        let n = ((high - low) / s).floor();
                        low + ((x - low) / s).round().min(n) * s
                    }
                    None => x,
                };
                Value::from(x.clamp(*low, *high))
            }
            Self::Int { low, high, step, log } => {
                let v = if *log {
                    let x = rng.gen_range((*low as f64).ln()..=((*high as f64) + 0.5).ln()).exp();
                    (x.floor() as i64).clamp(*low, *high)
                } else {
                    let n = (high - low) / step;
                    low + rng.gen_range(0..=n) * step
                };
                Value::from(v)
            }
        }
    }
}

/// Flattened search space in path order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSpace {
    params: Vec<(String, ParamSpec)>,
}

impl SearchSpace {
    /// Walk a `hyperparameters_vary` tree.
    pub fn parse(tree: &Value) -> Result<Self, ConfigError> {
        let mut params = Vec::new();
        walk(tree, "", &mut params)?;
        Ok(Self { params })
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[(String, ParamSpec)] {
        &self.params
    }

    /// Draw one value per leaf.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> TrialParams {
        self.params
            .iter()
            .map(|(path, spec)| (path.clone(), spec.sample(rng)))
            .collect()
    }

    /// Values of the `const` leaves.
    pub fn defaults(&self) -> TrialParams {
        self.params
            .iter()
            .filter_map(|(path, spec)| match spec {
                ParamSpec::Const { value } => Some((path.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }
}

fn walk(node: &Value, prefix: &str, out: &mut Vec<(String, ParamSpec)>) -> Result<(), ConfigError> {
    let Value::Object(map) = node else {
        return Err(ConfigError::invalid(
            if prefix.is_empty() { "hyperparameters_vary" } else { prefix },
            "expected a mapping or a leaf with optuna_type",
        ));
    };
    if map.contains_key("optuna_type") {
        out.push((prefix.to_string(), ParamSpec::parse(prefix, node)?));
        return Ok(());
    }
    for (key, child) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        walk(child, &path, out)?;
    }
    Ok(())
}

/// Nest dotted-path values into a configuration patch.
pub fn to_patch(params: &TrialParams) -> Value {
    let mut root = Map::new();
    for (path, value) in params {
        let mut node = &mut root;
        let mut keys = path.split('.').peekable();
        while let Some(key) = keys.next() {
            if keys.peek().is_none() {
                node.insert(key.to_string(), value.clone());
                break;
            }
            let child = node
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            let Value::Object(next) = child else { break };
            node = next;
        }
    }
    Value::Object(root)
}

/// Draws trial parameters.
pub trait Sampler: Send {
    fn name(&self) -> &'static str;

    fn sample(&mut self, space: &SearchSpace) -> TrialParams;
}

/// Independent uniform draws from every leaf.
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for RandomSampler {
    fn name(&self) -> &'static str {
        "random"
    }

    fn sample(&mut self, space: &SearchSpace) -> TrialParams {
        space.sample(&mut self.rng)
    }
}

pub fn build_sampler(config: &SamplerConfig) -> Result<Box<dyn Sampler>, ConfigError> {
    let kind = config.kind.rsplit('.').next().unwrap_or_default();
    match kind {
        "random" | "RandomSampler" => Ok(Box::new(RandomSampler::new(config.seed))),
        "tpe" | "TPESampler" => {
            tracing::warn!(sampler = kind, "TPE sampling is not available, using random sampling");
            Ok(Box::new(RandomSampler::new(config.seed)))
        }
        _ => Err(ConfigError::unknown("sampler", config.kind.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tree() -> Value {
        json!({
            "training": {
                "optimizer": {"params": {"lr": {"optuna_type": "float", "low": 1e-4, "high": 1e-1, "log": true}}},
                "n_epochs": {"optuna_type": "const", "value": 5}
            },
            "model": {"params": {
                "hidden": {"optuna_type": "choice", "choices": [[8], [16, 8]]}
            }},
            "batch_size": {"optuna_type": "int", "low": 16, "high": 64, "step": 16}
        })
    }

    #[test]
    fn test_parse_flattens_paths() {
        let space = SearchSpace::parse(&tree()).unwrap();
        let paths: Vec<_> = space.params().iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "batch_size",
                "model.params.hidden",
                "training.n_epochs",
                "training.optimizer.params.lr"
            ]
        );
    }

    #[test]
    fn test_samples_stay_in_range() {
        let space = SearchSpace::parse(&tree()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..200 {
            let p = space.sample(&mut rng);
            let lr = p["training.optimizer.params.lr"].as_f64().unwrap();
            assert!((1e-4..=1e-1).contains(&lr));
            let bs = p["batch_size"].as_i64().unwrap();
            assert!([16, 32, 48, 64].contains(&bs));
            assert_eq!(p["training.n_epochs"], json!(5));
            assert!(p["model.params.hidden"].is_array());
        }
    }

    #[test]
    fn test_unsupported_type_is_rejected() {
        let err = SearchSpace::parse(&json!({"lr": {"optuna_type": "loguniform", "low": 0.1, "high": 1.0}}))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedSearchType { ref param, .. } if param == "lr"));
    }

    #[test]
    fn test_invalid_ranges_are_rejected() {
        assert!(SearchSpace::parse(&json!({"a": {"optuna_type": "float", "low": 0.0, "high": 1.0, "log": true}})).is_err());
        assert!(SearchSpace::parse(&json!({"a": {"optuna_type": "int", "low": 3, "high": 1}})).is_err());
        assert!(SearchSpace::parse(&json!({"a": {"optuna_type": "choice", "choices": []}})).is_err());
        assert!(SearchSpace::parse(&json!({"a": 3})).is_err());
    }

    #[test]
    fn test_defaults_and_patch() {
        let space = SearchSpace::parse(&tree()).unwrap();
        let defaults = space.defaults();
        assert_eq!(defaults.len(), 1);
        assert_eq!(to_patch(&defaults), json!({"training": {"n_epochs": 5}}));

        let mut params = TrialParams::new();
        params.insert("training.optimizer.params.lr".into(), json!(0.01));
        params.insert("training.n_epochs".into(), json!(3));
        assert_eq!(
            to_patch(&params),
            json!({"training": {"n_epochs": 3, "optimizer": {"params": {"lr": 0.01}}}})
        );
    }

    #[test]
    fn test_sampler_registry() {
        assert_eq!(build_sampler(&SamplerConfig::default()).unwrap().name(), "random");
        let tpe = SamplerConfig {
            kind: "optuna.samplers.TPESampler".into(),
            seed: 1,
        };
        assert_eq!(build_sampler(&tpe).unwrap().name(), "random");
        let bad = SamplerConfig {
            kind: "grid".into(),
            seed: 1,
        };
        assert!(build_sampler(&bad).is_err());
    }

    #[test]
    fn test_seeded_sampler_replays() {
        let space = SearchSpace::parse(&tree()).unwrap();
        let a = RandomSampler::new(9).sample(&space);
        let b = RandomSampler::new(9).sample(&space);
        assert_eq!(a, b);
    }
}
