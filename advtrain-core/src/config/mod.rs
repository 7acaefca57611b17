//! Experiment configuration for advtrain.
//!
//! A configuration is loaded once (see [`loader`]), interpolated eagerly (see
//! [`interpolate`]), validated, and then passed by reference into every
//! component. Nothing in the engine reads configuration from ambient state.

pub mod interpolate;
pub mod loader;

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub use interpolate::interpolate;
pub use loader::{ConfigLoader, load_config};

/// Top-level, fully resolved experiment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_exp_name")]
    pub exp_name: String,
    #[serde(default)]
    pub task: TaskKind,
    /// Dry run: nothing is persisted.
    #[serde(default)]
    pub test_run: bool,
    /// Truncate every series to `dataset.slice_len` leading steps.
    #[serde(default)]
    pub slice: bool,
    #[serde(default)]
    pub use_disc_check: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Device selector (`cpu`, `cuda`, `cuda:1`, `1`).
    #[serde(default)]
    pub cuda: Device,
    #[serde(default = "default_metric_effect")]
    pub metric_effect: MetricName,
    #[serde(default = "default_metric_hid")]
    pub metric_hid: MetricName,
    /// Id the trained model is saved under.
    #[serde(default)]
    pub model_id: usize,
    /// Id of the trained classifier that attacks and discriminators target.
    #[serde(default)]
    pub model_id_attack: usize,
    /// Experiment name the targeted classifier was saved under.
    #[serde(default = "default_exp_name")]
    pub model_name_attack: String,
    #[serde(default)]
    pub list_check_model_params: Vec<CheckModelParams>,
    #[serde(default)]
    pub enable_optimization: bool,
    #[serde(default)]
    pub optuna_optimizer: Option<SearchConfig>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    pub dataset: DatasetConfig,
    #[serde(default = "default_model")]
    pub model: NamedParams,
    #[serde(default)]
    pub attack: Option<AttackConfig>,
    #[serde(default)]
    pub discriminator: DiscriminatorConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

fn default_exp_name() -> String {
    "default".to_string()
}

fn default_batch_size() -> usize {
    64
}

fn default_metric_effect() -> MetricName {
    MetricName::F1
}

fn default_metric_hid() -> MetricName {
    MetricName::RocAuc
}

fn default_seed() -> u64 {
    0
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_model() -> NamedParams {
    NamedParams::new("MLP").with("hidden", serde_json::json!([64, 32]))
}

/// Which pipeline an experiment runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Train the classifier, optionally adversarially and with discriminator regularization.
    #[default]
    Classifier,
    /// Train a detector against a frozen, previously trained classifier.
    Discriminator,
    /// Attack a trained classifier and report effect (and optionally detection) metrics.
    Attack,
}

/// How the discriminator participates in an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscMode {
    Off,
    Regularization,
    Check,
}

/// Which quantity early stopping watches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyStopMonitor {
    /// Held-out loss, lower is better.
    #[default]
    Loss,
    /// The configured effect metric, higher is better.
    Effect,
}

/// Perturbation ball geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Norm {
    #[default]
    Linf,
    L2,
}

/// Compute device selector. The math layer always runs on the host; an
/// accelerator index is recorded and reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Accelerator(usize),
}

impl TryFrom<String> for Device {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let s = raw.trim().to_ascii_lowercase();
        if s.is_empty() || s == "cpu" {
            return Ok(Self::Cpu);
        }
        if s == "cuda" {
            return Ok(Self::Accelerator(0));
        }
        let index = s.strip_prefix("cuda:").unwrap_or(&s);
        index
            .parse::<usize>()
            .map(Self::Accelerator)
            .map_err(|_| ConfigError::invalid("cuda", format!("unrecognized device '{raw}'")))
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator(i) => write!(f, "cuda:{i}"),
        }
    }
}

/// A named classification metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricName {
    Accuracy,
    Precision,
    Recall,
    F1,
    RocAuc,
    BalancePred,
    Loss,
}

impl MetricName {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let key: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "acc" | "accuracy" => Ok(Self::Accuracy),
            "pr" | "precision" => Ok(Self::Precision),
            "rec" | "recall" => Ok(Self::Recall),
            "f1" | "f1score" => Ok(Self::F1),
            "rocauc" | "auc" | "roc" => Ok(Self::RocAuc),
            "balance" | "balancepred" => Ok(Self::BalancePred),
            "loss" => Ok(Self::Loss),
            _ => Err(ConfigError::unknown("metric", raw)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1 => "f1",
            Self::RocAuc => "roc_auc",
            Self::BalancePred => "balance_pred",
            Self::Loss => "loss",
        }
    }

    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Self::Loss)
    }
}

impl TryFrom<String> for MetricName {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<MetricName> for String {
    fn from(metric: MetricName) -> Self {
        metric.as_str().to_string()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registry key plus its free-form parameters, e.g. `{name: Adam, params: {lr: 0.001}}`.
///
/// `params: None` (the string) and `params: null` both mean "no parameters".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedParams {
    pub name: String,
    #[serde(default, deserialize_with = "params_or_none")]
    pub params: BTreeMap<String, Value>,
}

fn params_or_none<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(BTreeMap::new()),
        Value::String(s) if s.is_empty() || s == "None" => Ok(BTreeMap::new()),
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(serde::de::Error::custom(format!(
            "expected a parameter map, got {other}"
        ))),
    }
}

fn usize_or_none<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() || s == "None" => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(|v| Some(v as usize))
            .ok_or_else(|| serde::de::Error::custom(format!("expected a count, got {n}"))),
        other => Err(serde::de::Error::custom(format!(
            "expected a count or None, got {other}"
        ))),
    }
}

impl NamedParams {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// `"None"` (any case) or an empty name disables the component.
    pub fn is_none(&self) -> bool {
        self.name.is_empty() || self.name.eq_ignore_ascii_case("none")
    }

    fn field(&self, key: &str) -> String {
        format!("{}.{key}", self.name)
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key).filter(|v| !v.is_null())
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| ConfigError::invalid(self.field(key), "expected a number")),
        }
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| ConfigError::invalid(self.field(key), "expected a count")),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| ConfigError::invalid(self.field(key), "expected a boolean")),
        }
    }

    pub fn str_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.get(key) {
            None => Ok(default.to_string()),
            Some(v) => v
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::invalid(self.field(key), "expected a string")),
        }
    }

    pub fn usize_list_or(&self, key: &str, default: &[usize]) -> Result<Vec<usize>, ConfigError> {
        let Some(v) = self.get(key) else {
            return Ok(default.to_vec());
        };
        let items = v
            .as_array()
            .ok_or_else(|| ConfigError::invalid(self.field(key), "expected a list"))?;
        items
            .iter()
            .map(|item| {
                item.as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| ConfigError::invalid(self.field(key), "expected counts"))
            })
            .collect()
    }
}

/// Where samples come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    /// `{"x": [[...]], "y": [...]}` files.
    Json,
    /// Seeded two-class sinusoid problem.
    #[default]
    Synthetic,
}

/// Dataset selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    #[serde(default)]
    pub source: DataSourceKind,
    #[serde(default)]
    pub train_path: Option<PathBuf>,
    #[serde(default)]
    pub test_path: Option<PathBuf>,
    #[serde(default = "default_n_classes")]
    pub n_classes: usize,
    #[serde(default)]
    pub slice_len: Option<usize>,
    #[serde(default = "default_n_train")]
    pub n_train: usize,
    #[serde(default = "default_n_test")]
    pub n_test: usize,
    #[serde(default = "default_seq_len")]
    pub seq_len: usize,
    #[serde(default = "default_noise")]
    pub noise: f64,
}

fn default_n_classes() -> usize {
    2
}

fn default_n_train() -> usize {
    256
}

fn default_n_test() -> usize {
    128
}

fn default_seq_len() -> usize {
    32
}

fn default_noise() -> f64 {
    0.3
}

impl DatasetConfig {
    pub fn synthetic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: DataSourceKind::Synthetic,
            train_path: None,
            test_path: None,
            n_classes: default_n_classes(),
            slice_len: None,
            n_train: default_n_train(),
            n_test: default_n_test(),
            seq_len: default_seq_len(),
            noise: default_noise(),
        }
    }
}

/// Attack selection and its static budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackConfig {
    /// Registry key: `fgsm`, `ifgsm`, `pgd`, `fgsm_disc`, `pgd_disc`.
    pub name: String,
    /// Directory name used in the artifact layout; defaults to `<name>_attack`.
    #[serde(default)]
    pub short_name: Option<String>,
    pub eps: f64,
    #[serde(default = "default_n_steps", alias = "n_iterations")]
    pub n_steps: usize,
    /// Weight of the discriminator term in disc-regularized attacks.
    #[serde(default)]
    pub alpha: f64,
    #[serde(default)]
    pub norm: Norm,
    /// Per-step size of iterative attacks is `strength * step_scale / n_steps`.
    #[serde(default = "default_step_scale")]
    pub step_scale: f64,
    #[serde(default)]
    pub random_start: bool,
    #[serde(default)]
    pub prefix: String,
}

fn default_n_steps() -> usize {
    1
}

fn default_step_scale() -> f64 {
    2.5
}

impl AttackConfig {
    pub fn new(name: &str, eps: f64, n_steps: usize) -> Self {
        Self {
            name: name.to_string(),
            short_name: None,
            eps,
            n_steps,
            alpha: 0.0,
            norm: Norm::Linf,
            step_scale: default_step_scale(),
            random_start: false,
            prefix: String::new(),
        }
    }

    pub fn short(&self) -> String {
        self.short_name
            .clone()
            .unwrap_or_else(|| format!("{}_attack", self.name))
    }

    /// Experiment suffix used in the discriminator/attack subtrees,
    /// e.g. `fgsm_attack_eps=0.03_nsteps=10`.
    pub fn suffix(&self, regularized: bool) -> String {
        let mut s = format!(
            "{}{}_eps={}_nsteps={}",
            self.short(),
            self.prefix,
            self.eps,
            self.n_steps
        );
        if regularized || self.name.ends_with("_disc") {
            s.push_str(&format!("_alpha={}", self.alpha));
        }
        s
    }
}

/// Discriminator architecture and its role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorConfig {
    #[serde(default = "default_disc_model")]
    pub model: NamedParams,
    #[serde(default = "default_optimizer")]
    pub optimizer: NamedParams,
    /// Weight of the discriminator loss in regularization mode.
    #[serde(default = "default_disc_alpha")]
    pub alpha: f64,
    /// Train the discriminator jointly with the classifier.
    #[serde(default)]
    pub regularize: bool,
    #[serde(default)]
    pub model_id: usize,
}

fn default_disc_model() -> NamedParams {
    NamedParams::new("MLP").with("hidden", serde_json::json!([32]))
}

fn default_disc_alpha() -> f64 {
    1.0
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            model: default_disc_model(),
            optimizer: default_optimizer(),
            alpha: default_disc_alpha(),
            regularize: false,
            model_id: 0,
        }
    }
}

/// Training schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_n_epochs")]
    pub n_epochs: usize,
    #[serde(default = "default_print_every")]
    pub print_every: usize,
    #[serde(default, deserialize_with = "usize_or_none")]
    pub early_stop_patience: Option<usize>,
    #[serde(default)]
    pub early_stop_min_delta: f64,
    #[serde(default)]
    pub early_stop_monitor: EarlyStopMonitor,
    #[serde(default = "default_optimizer")]
    pub optimizer: NamedParams,
    #[serde(default = "default_none")]
    pub scheduler: NamedParams,
    #[serde(default = "default_none")]
    pub attack_scheduler: NamedParams,
    #[serde(default = "default_criterion")]
    pub criterion: NamedParams,
    #[serde(default)]
    pub transform: Vec<NamedParams>,
    /// Attack training batches (classifier task only).
    #[serde(default)]
    pub adversarial: bool,
    #[serde(default = "default_true")]
    pub shuffle: bool,
}

fn default_n_epochs() -> usize {
    30
}

fn default_print_every() -> usize {
    5
}

fn default_optimizer() -> NamedParams {
    NamedParams::new("Adam").with("lr", 0.001)
}

fn default_none() -> NamedParams {
    NamedParams::new("None")
}

fn default_criterion() -> NamedParams {
    NamedParams::new("BCELoss")
}

fn default_true() -> bool {
    true
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_epochs: default_n_epochs(),
            print_every: default_print_every(),
            early_stop_patience: None,
            early_stop_min_delta: 0.0,
            early_stop_monitor: EarlyStopMonitor::Loss,
            optimizer: default_optimizer(),
            scheduler: default_none(),
            attack_scheduler: default_none(),
            criterion: default_criterion(),
            transform: Vec::new(),
            adversarial: false,
            shuffle: true,
        }
    }
}

/// One attacked-model checkpoint to score in check mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckModelParams {
    pub model_id: usize,
    pub model_name: String,
}

/// Hyperparameter search settings (`optuna_optimizer`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub n_trials: usize,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub pruner: PrunerConfig,
    #[serde(default = "default_metric_effect")]
    pub optim_metric: MetricName,
    /// Tree of leaves carrying `optuna_type`; paths mirror the configuration tree.
    #[serde(default = "empty_object")]
    pub hyperparameters_vary: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_sampler_kind", alias = "_target_")]
    pub kind: String,
    #[serde(default)]
    pub seed: u64,
}

fn default_sampler_kind() -> String {
    "random".to_string()
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            kind: default_sampler_kind(),
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrunerConfig {
    #[serde(default = "default_pruner_kind", alias = "_target_")]
    pub kind: String,
    #[serde(default)]
    pub n_startup_trials: usize,
    #[serde(default)]
    pub n_warmup_steps: usize,
}

fn default_pruner_kind() -> String {
    "median".to_string()
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            kind: default_pruner_kind(),
            n_startup_trials: 0,
            n_warmup_steps: 0,
        }
    }
}

impl ExperimentConfig {
    /// A minimal runnable configuration over a synthetic dataset.
    pub fn minimal(dataset: &str) -> Self {
        Self {
            exp_name: default_exp_name(),
            task: TaskKind::Classifier,
            test_run: true,
            slice: false,
            use_disc_check: false,
            batch_size: default_batch_size(),
            cuda: Device::Cpu,
            metric_effect: default_metric_effect(),
            metric_hid: default_metric_hid(),
            model_id: 0,
            model_id_attack: 0,
            model_name_attack: default_exp_name(),
            list_check_model_params: Vec::new(),
            enable_optimization: false,
            optuna_optimizer: None,
            seed: default_seed(),
            results_dir: default_results_dir(),
            dataset: DatasetConfig::synthetic(dataset),
            model: default_model(),
            attack: None,
            discriminator: DiscriminatorConfig::default(),
            training: TrainingConfig::default(),
        }
    }

    /// Interpolate, deserialize, and validate a raw configuration tree.
    pub fn from_value(raw: Value) -> Result<Self, ConfigError> {
        let resolved = interpolate(&raw)?;
        let config: Self = serde_json::from_value(resolved).map_err(ConfigError::parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_value(&self) -> Result<Value, ConfigError> {
        serde_json::to_value(self).map_err(ConfigError::parse)
    }

    /// Deep-merge `patch` over this configuration and re-validate.
    pub fn with_overrides(&self, patch: &Value) -> Result<Self, ConfigError> {
        let mut base = self.to_value()?;
        deep_merge(&mut base, patch);
        Self::from_value(base)
    }

    pub fn disc_mode(&self) -> DiscMode {
        if self.discriminator.regularize {
            DiscMode::Regularization
        } else if self.use_disc_check {
            DiscMode::Check
        } else {
            DiscMode::Off
        }
    }

    /// Series length after optional slicing.
    pub fn effective_len(&self, raw_len: usize) -> usize {
        match (self.slice, self.dataset.slice_len) {
            (true, Some(n)) => n.min(raw_len),
            _ => raw_len,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be positive"));
        }
        if self.training.n_epochs == 0 {
            return Err(ConfigError::invalid("training.n_epochs", "must be positive"));
        }
        if self.training.print_every == 0 {
            return Err(ConfigError::invalid("training.print_every", "must be positive"));
        }
        if self.training.early_stop_patience == Some(0) {
            return Err(ConfigError::invalid(
                "training.early_stop_patience",
                "must be positive or None",
            ));
        }
        if self.dataset.n_classes < 2 {
            return Err(ConfigError::invalid("dataset.n_classes", "need at least two classes"));
        }
        if self.dataset.source == DataSourceKind::Json {
            if self.dataset.train_path.is_none() {
                return Err(ConfigError::MissingField {
                    field: "dataset.train_path".into(),
                });
            }
            if self.dataset.test_path.is_none() {
                return Err(ConfigError::MissingField {
                    field: "dataset.test_path".into(),
                });
            }
        }
        if self.slice && self.dataset.slice_len.is_none_or(|n| n == 0) {
            return Err(ConfigError::invalid(
                "dataset.slice_len",
                "slice is enabled but no positive slice_len is set",
            ));
        }

        let needs_attack = match self.task {
            TaskKind::Classifier => self.training.adversarial || self.discriminator.regularize,
            TaskKind::Discriminator | TaskKind::Attack => true,
        };
        match &self.attack {
            None if needs_attack => {
                return Err(ConfigError::MissingField {
                    field: "attack".into(),
                });
            }
            Some(attack) if !attack.eps.is_finite() => {
                return Err(ConfigError::invalid("attack.eps", "must be finite"));
            }
            Some(attack) if attack.step_scale <= 0.0 => {
                return Err(ConfigError::invalid("attack.step_scale", "must be positive"));
            }
            _ => {}
        }

        if self.discriminator.regularize && self.use_disc_check {
            return Err(ConfigError::invalid(
                "discriminator.regularize",
                "regularization and check modes are mutually exclusive",
            ));
        }
        if self.discriminator.regularize && self.task != TaskKind::Classifier {
            return Err(ConfigError::invalid(
                "discriminator.regularize",
                "only applies to the classifier task",
            ));
        }
        if self.use_disc_check {
            if self.task != TaskKind::Attack {
                return Err(ConfigError::invalid(
                    "use_disc_check",
                    "only applies to the attack task",
                ));
            }
            if self.list_check_model_params.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "list_check_model_params".into(),
                });
            }
        }

        if self.enable_optimization {
            let search = self
                .optuna_optimizer
                .as_ref()
                .ok_or_else(|| ConfigError::MissingField {
                    field: "optuna_optimizer".into(),
                })?;
            if search.n_trials == 0 {
                return Err(ConfigError::invalid(
                    "optuna_optimizer.n_trials",
                    "must be positive",
                ));
            }
            if !search.hyperparameters_vary.is_object() {
                return Err(ConfigError::invalid(
                    "optuna_optimizer.hyperparameters_vary",
                    "expected a mapping",
                ));
            }
        }
        Ok(())
    }
}

/// Recursively merge `patch` into `base`. Objects merge key by key; every other
/// value in `patch` replaces the one in `base`.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}
