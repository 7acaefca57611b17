//! Experiment tasks: train a classifier, train a discriminator, or attack.
//!
//! An [`Experiment`] owns the resolved configuration and wires data, models,
//! attacks, the training loop, and the optional hyperparameter search
//! together. Artifacts are written under the [`ArtifactLayout`] unless the
//! configuration is a test run.

use crate::attack::{AdversarialPlan, AttackState, AttackTarget};
use crate::data::{BatchSource, Dataset, load_splits};
use crate::discriminator::{CheckRecord, CheckSettings, Discriminator, check_candidate};
use crate::error::{MlError, Result};
use crate::nn::{DenseNet, build_criterion};
use crate::search::{SearchDriver, SearchSummary, TrialReporter, to_patch};
use crate::training::callbacks::{EpochObserver, NoopObserver};
use crate::training::checkpoint::{CheckpointManager, ModelCheckpoint};
use crate::training::metrics::{self, SplitMetrics};
use crate::training::reproducibility::{EnvironmentSnapshot, SeedManager};
use crate::training::runner::{
    FrozenTarget, JointDiscriminator, Learner, Objective, TrainingLoop, TrainingOutcome,
};
use advtrain_core::artifacts::{atomic_write_json, save_config_snapshot};
use advtrain_core::config::{Device, DiscMode};
use advtrain_core::{ArtifactLayout, AttackConfig, ConfigError, ExperimentConfig, TaskKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Checkpoints kept in a model directory manifest.
const MAX_CHECKPOINTS: usize = 32;

/// Condensed result of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub outcome: TrainingOutcome,
    /// Path of the saved network, if anything was persisted.
    pub checkpoint: Option<PathBuf>,
}

/// Metrics of one trained classifier under attack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackSummary {
    pub state: AttackState,
    pub clean: SplitMetrics,
    pub adversarial: SplitMetrics,
    pub effect: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub id: String,
    pub exp_name: String,
    pub task: TaskKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub environment: EnvironmentSnapshot,
    pub search: Option<SearchSummary>,
    pub training: Option<TrainingSummary>,
    pub attack: Option<AttackSummary>,
    pub checks: Vec<CheckRecord>,
    pub artifacts: Vec<PathBuf>,
}

pub struct Experiment {
    config: ExperimentConfig,
    layout: ArtifactLayout,
    seeds: SeedManager,
}

impl Experiment {
    pub fn new(config: ExperimentConfig) -> Self {
        let layout = ArtifactLayout::for_experiment(&config);
        let seeds = SeedManager::new(config.seed);
        Self {
            config,
            layout,
            seeds,
        }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    fn persist(&self) -> bool {
        !self.config.test_run
    }

    pub fn run(&mut self) -> Result<ExperimentReport> {
        let started_at = Utc::now();
        let cfg = &self.config;
        if let Device::Accelerator(index) = cfg.cuda {
            tracing::warn!(index, "Accelerator requested; running on the host math layer");
        }
        tracing::info!(
            exp_name = %cfg.exp_name,
            task = ?cfg.task,
            dataset = %cfg.dataset.name,
            model = %cfg.model.name,
            device = %cfg.cuda,
            test_run = cfg.test_run,
            "Starting experiment"
        );

        let environment = EnvironmentSnapshot::capture(cfg.cuda, cfg.seed);
        let data_seed = self.seeds.get_seed("data");
        let (train, test) = load_splits(&self.config, data_seed)?;

        let mut report = ExperimentReport {
            id: uuid::Uuid::new_v4().to_string(),
            exp_name: self.config.exp_name.clone(),
            task: self.config.task,
            started_at,
            finished_at: started_at,
            environment,
            search: None,
            training: None,
            attack: None,
            checks: Vec::new(),
            artifacts: Vec::new(),
        };

        match self.config.task {
            TaskKind::Classifier | TaskKind::Discriminator => {
                let final_config = if self.config.enable_optimization {
                    let summary = self.search(&train, &test)?;
                    let best = best_config(&self.config, &summary)?;
                    report.search = Some(summary);
                    best
                } else {
                    self.config.clone()
                };
                let summary = self.train_and_save(&final_config, &train, &test, &mut report.artifacts)?;
                if let Some(search) = &report.search {
                    if let Some(dir) = self.task_dir(&final_config)? {
                        let path = dir.join(format!("{}_search.json", final_config.model_id));
                        atomic_write_json(&path, search)?;
                        report.artifacts.push(path);
                    }
                }
                report.training = Some(summary);
            }
            TaskKind::Attack => {
                let (attack, checks) = self.attack(&test, &mut report.artifacts)?;
                report.attack = Some(attack);
                report.checks = checks;
            }
        }

        report.finished_at = Utc::now();
        if let Some(dir) = self.task_dir(&self.config)? {
            let path = dir.join(format!("{}_report.json", self.report_id()));
            atomic_write_json(&path, &report)?;
            report.artifacts.push(path);
        }
        tracing::info!(
            id = %report.id,
            artifacts = report.artifacts.len(),
            "Experiment finished"
        );
        Ok(report)
    }

    fn report_id(&self) -> usize {
        match self.config.task {
            TaskKind::Attack => self.config.model_id_attack,
            _ => self.config.model_id,
        }
    }

    /// Directory the task's artifacts go to, `None` on test runs.
    fn task_dir(&self, cfg: &ExperimentConfig) -> Result<Option<PathBuf>> {
        if !self.persist() {
            return Ok(None);
        }
        let dir = match cfg.task {
            TaskKind::Classifier => self.layout.model_dir(&cfg.exp_name),
            TaskKind::Discriminator => {
                let attack = required_attack(cfg)?;
                self.layout.discriminator_dir(&attack.short(), &attack.suffix(false))
            }
            TaskKind::Attack => {
                let attack = required_attack(cfg)?;
                self.layout.attack_dir(&attack.short(), &attack.suffix(false))
            }
        };
        Ok(Some(dir))
    }

    fn search(&mut self, train: &Dataset, valid: &Dataset) -> Result<SearchSummary> {
        let search = self
            .config
            .optuna_optimizer
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField {
                field: "optuna_optimizer".into(),
            })?;
        let mut driver = SearchDriver::from_config(search)?;
        let defaults = to_patch(&driver.space().defaults());
        let base = self.config.with_overrides(&defaults)?;
        let seeds = &mut self.seeds;
        let layout = &self.layout;

        driver.run(|params, reporter| {
            let trial_config = base.with_overrides(&to_patch(params))?;
            let (outcome, _, _) = train_one(&trial_config, layout, seeds, train, valid, reporter)?;
            tracing::debug!(trial = reporter.number(), state = ?outcome.state, "Trial training done");
            reporter_value(reporter)
        })
    }

    fn train_and_save(
        &mut self,
        cfg: &ExperimentConfig,
        train: &Dataset,
        valid: &Dataset,
        artifacts: &mut Vec<PathBuf>,
    ) -> Result<TrainingSummary> {
        let (outcome, learner, objective) =
            train_one(cfg, &self.layout, &mut self.seeds, train, valid, &mut NoopObserver)?;
        tracing::info!(
            state = ?outcome.state,
            epochs = outcome.epochs_run(),
            best_epoch = outcome.best.epoch,
            effect = outcome.best.effect,
            hidden = outcome.best.hidden,
            skipped_batches = outcome.skipped_batches,
            "Training finished"
        );

        let Some(dir) = self.task_dir(cfg)? else {
            return Ok(TrainingSummary {
                outcome,
                checkpoint: None,
            });
        };
        let last_metric = outcome
            .history
            .last()
            .map_or(f64::NAN, |s| s.value(cfg.metric_effect));
        let manager = CheckpointManager::new(&dir, MAX_CHECKPOINTS);
        let ckpt = ModelCheckpoint::capture(&learner.net, outcome.epochs_run().saturating_sub(1), last_metric);
        let entry = manager.save(&cfg.model_id.to_string(), &ckpt)?;
        artifacts.push(entry.path.clone());

        let csv = dir.join(format!("{}_metrics.csv", cfg.model_id));
        outcome.history.save_csv(&csv)?;
        artifacts.push(csv);
        artifacts.push(save_config_snapshot(
            &dir,
            &format!("{}_config.yaml", cfg.model_id),
            cfg,
        )?);

        if let Some(joint) = objective.regularizer() {
            let attack = required_attack(cfg)?;
            let disc_dir = self
                .layout
                .discriminator_dir(&attack.short(), &attack.suffix(true));
            let disc_ckpt = ModelCheckpoint::capture(joint.disc.net(), ckpt.epoch, outcome.best.hidden);
            let entry = CheckpointManager::new(disc_dir, MAX_CHECKPOINTS)
                .save(&cfg.discriminator.model_id.to_string(), &disc_ckpt)?;
            artifacts.push(entry.path);
        }

        Ok(TrainingSummary {
            outcome,
            checkpoint: Some(entry.path),
        })
    }

    fn attack(
        &mut self,
        test: &Dataset,
        artifacts: &mut Vec<PathBuf>,
    ) -> Result<(AttackSummary, Vec<CheckRecord>)> {
        let cfg = &self.config;
        let attack_cfg = required_attack(cfg)?;
        let plan = AdversarialPlan::from_config(attack_cfg, &cfg.training.attack_scheduler)?;
        let state = plan.state(0);

        let net = load_classifier(&self.layout, &cfg.model_name_attack, cfg.model_id_attack)?;
        let criterion = build_criterion(&cfg.training.criterion, test.n_classes())?;
        let disc = if plan.attack.needs_discriminator() || cfg.disc_mode() == DiscMode::Check {
            Some(load_discriminator(&self.layout, cfg, attack_cfg)?)
        } else {
            None
        };
        let target = AttackTarget::new(&net, criterion.as_ref())
            .with_discriminator(disc.as_ref().filter(|_| plan.attack.needs_discriminator()));

        let mut rng = self.seeds.rng("attack");
        let (x, y) = (test.x().view(), test.y().view());
        let adv = crate::training::attack_in_batches(
            plan.attack.as_ref(),
            &target,
            x,
            y,
            state,
            cfg.batch_size,
            &mut rng,
        )?;
        let clean = metrics::evaluate(&net, criterion.as_ref(), x, y, cfg.batch_size)?;
        let adversarial = metrics::evaluate(&net, criterion.as_ref(), adv.view(), y, cfg.batch_size)?;
        let summary = AttackSummary {
            state,
            effect: adversarial.value(cfg.metric_effect),
            clean,
            adversarial,
        };
        tracing::info!(
            attack = plan.attack.name(),
            strength = state.strength,
            n_steps = state.n_steps,
            clean = summary.clean.value(cfg.metric_effect),
            effect = summary.effect,
            "Attack finished"
        );

        let mut checks = Vec::new();
        if let (DiscMode::Check, Some(disc)) = (cfg.disc_mode(), disc.as_ref()) {
            let settings = CheckSettings {
                state,
                metric_effect: cfg.metric_effect,
                metric_hid: cfg.metric_hid,
                batch_size: cfg.batch_size,
            };
            for candidate in &cfg.list_check_model_params {
                let model = load_classifier(&self.layout, &candidate.model_name, candidate.model_id)?;
                let target = AttackTarget::new(&model, criterion.as_ref());
                checks.push(check_candidate(
                    disc,
                    candidate,
                    &target,
                    plan.attack.as_ref(),
                    test,
                    settings,
                    &mut rng,
                )?);
            }
        }

        if let Some(dir) = self.task_dir(cfg)? {
            if !checks.is_empty() {
                let path = dir.join(format!(
                    "{}_check_{}.json",
                    cfg.model_id_attack, cfg.discriminator.model_id
                ));
                atomic_write_json(&path, &checks)?;
                artifacts.push(path);
            }
            artifacts.push(save_config_snapshot(
                &dir,
                &format!("{}_config.yaml", cfg.model_id_attack),
                cfg,
            )?);
        }
        Ok((summary, checks))
    }
}

fn required_attack(cfg: &ExperimentConfig) -> std::result::Result<&AttackConfig, ConfigError> {
    cfg.attack.as_ref().ok_or_else(|| ConfigError::MissingField {
        field: "attack".into(),
    })
}

fn reporter_value(reporter: &TrialReporter<'_>) -> Result<f64> {
    reporter
        .best()
        .ok_or_else(|| MlError::dataset("trial finished without a reported epoch"))
}

/// Base configuration with the search defaults and the best trial's values merged in.
pub fn best_config(base: &ExperimentConfig, summary: &SearchSummary) -> Result<ExperimentConfig> {
    let merged = base.with_overrides(&to_patch(&summary.best.params))?;
    tracing::info!(
        trial = summary.best.number,
        value = summary.best.value,
        "Retraining with the best parameters"
    );
    Ok(merged)
}

fn load_classifier(layout: &ArtifactLayout, exp_name: &str, model_id: usize) -> Result<DenseNet> {
    let path = layout.model_path(exp_name, model_id);
    tracing::debug!(path = %path.display(), "Loading classifier");
    ModelCheckpoint::load(&path)?.into_model()
}

fn load_discriminator(
    layout: &ArtifactLayout,
    cfg: &ExperimentConfig,
    attack: &AttackConfig,
) -> Result<Discriminator> {
    let path = layout.discriminator_path(&attack.short(), &attack.suffix(false), cfg.discriminator.model_id);
    tracing::debug!(path = %path.display(), "Loading discriminator");
    let net = ModelCheckpoint::load(&path)?.into_model()?;
    Ok(Discriminator::from_net(net, &cfg.discriminator)?)
}

/// Build and run one training loop for the classifier or discriminator task.
fn train_one(
    cfg: &ExperimentConfig,
    layout: &ArtifactLayout,
    seeds: &mut SeedManager,
    train: &Dataset,
    valid: &Dataset,
    observer: &mut dyn EpochObserver,
) -> Result<(TrainingOutcome, Learner, Objective)> {
    let n_features = train.n_features();
    let mut model_rng = seeds.rng("model");
    let (learner, objective) = match cfg.task {
        TaskKind::Classifier => {
            let learner = Learner::classifier(
                &cfg.model,
                &cfg.training,
                n_features,
                train.n_classes(),
                &mut model_rng,
            )?;
            let plan = if cfg.training.adversarial || cfg.discriminator.regularize {
                Some(AdversarialPlan::from_config(
                    required_attack(cfg)?,
                    &cfg.training.attack_scheduler,
                )?)
            } else {
                None
            };
            let regularizer = if cfg.disc_mode() == DiscMode::Regularization {
                let mut disc_rng = seeds.rng("discriminator");
                Some(JointDiscriminator {
                    disc: Discriminator::new(&cfg.discriminator, n_features, &mut disc_rng)?,
                    alpha: cfg.discriminator.alpha as f32,
                })
            } else {
                None
            };
            (learner, Objective::Classify { plan, regularizer })
        }
        TaskKind::Discriminator => {
            let target = FrozenTarget {
                net: load_classifier(layout, &cfg.model_name_attack, cfg.model_id_attack)?,
                criterion: build_criterion(&cfg.training.criterion, train.n_classes())?,
            };
            let plan = AdversarialPlan::from_config(required_attack(cfg)?, &cfg.training.attack_scheduler)?;
            let learner = Learner::detector(&cfg.discriminator, &cfg.training, n_features, &mut model_rng)?;
            (learner, Objective::Detect { target, plan })
        }
        TaskKind::Attack => {
            return Err(ConfigError::invalid("task", "the attack task does not train").into());
        }
    };

    let mut training = TrainingLoop::from_config(cfg, learner, objective, seeds.get_seed("loop"))?;
    let outcome = training.run(train, valid, observer)?;
    let (learner, objective) = training.into_parts();
    Ok((outcome, learner, objective))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::TrialState;
    use advtrain_core::NamedParams;
    use advtrain_core::config::{CheckModelParams, SearchConfig};
    use serde_json::json;
    use tempfile::TempDir;

    fn config(root: &std::path::Path) -> ExperimentConfig {
        let mut cfg = ExperimentConfig::minimal("Synth");
        cfg.test_run = false;
        cfg.results_dir = root.to_path_buf();
        cfg.dataset.n_train = 48;
        cfg.dataset.n_test = 24;
        cfg.dataset.seq_len = 12;
        cfg.batch_size = 16;
        cfg.model = NamedParams::new("MLP").with("hidden", json!([8]));
        cfg.training.n_epochs = 2;
        cfg.discriminator.model = NamedParams::new("MLP").with("hidden", json!([4]));
        cfg
    }

    #[test]
    fn test_test_run_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.test_run = true;
        let report = Experiment::new(cfg).run().unwrap();
        assert!(report.artifacts.is_empty());
        assert!(report.training.unwrap().checkpoint.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_classifier_then_discriminator_then_attack() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let layout = ArtifactLayout::for_experiment(&cfg);

        let report = Experiment::new(cfg.clone()).run().unwrap();
        let ckpt = report.training.unwrap().checkpoint.unwrap();
        assert_eq!(ckpt, layout.model_path("default", 0));
        assert!(layout.model_dir("default").join("0_metrics.csv").exists());
        assert!(layout.model_dir("default").join("0_config.yaml").exists());

        let attack = AttackConfig::new("fgsm", 0.1, 1);
        let mut disc_cfg = cfg.clone();
        disc_cfg.task = TaskKind::Discriminator;
        disc_cfg.attack = Some(attack.clone());
        let report = Experiment::new(disc_cfg).run().unwrap();
        let disc_path = report.training.unwrap().checkpoint.unwrap();
        assert_eq!(
            disc_path,
            layout.discriminator_path(&attack.short(), &attack.suffix(false), 0)
        );

        let mut attack_cfg = cfg.clone();
        attack_cfg.task = TaskKind::Attack;
        attack_cfg.attack = Some(attack);
        attack_cfg.use_disc_check = true;
        attack_cfg.list_check_model_params = vec![CheckModelParams {
            model_id: 0,
            model_name: "default".into(),
        }];
        let report = Experiment::new(attack_cfg).run().unwrap();
        let summary = report.attack.unwrap();
        assert!((summary.state.strength - 0.1).abs() < 1e-6);
        assert_eq!(report.checks.len(), 1);
        assert!((0.0..=1.0).contains(&report.checks[0].hidden));
    }

    #[test]
    fn test_attack_without_trained_model_fails() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.task = TaskKind::Attack;
        cfg.attack = Some(AttackConfig::new("fgsm", 0.1, 1));
        let err = Experiment::new(cfg).run().unwrap_err();
        assert!(matches!(err, MlError::Artifact(_)));
    }

    #[test]
    fn test_search_retrains_best_configuration() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.enable_optimization = true;
        cfg.optuna_optimizer = Some(SearchConfig {
            n_trials: 3,
            sampler: Default::default(),
            pruner: Default::default(),
            optim_metric: advtrain_core::MetricName::Accuracy,
            hyperparameters_vary: json!({
                "training": {
                    "optimizer": {"params": {"lr": {"optuna_type": "float", "low": 1e-3, "high": 1e-1, "log": true}}},
                    "n_epochs": {"optuna_type": "const", "value": 3}
                }
            }),
        });
        let report = Experiment::new(cfg).run().unwrap();
        let search = report.search.unwrap();
        assert_eq!(search.trials.len(), 3);
        assert_ne!(search.best.state, TrialState::Failed);
        let training = report.training.unwrap();
        assert!(training.outcome.epochs_run() <= 3);
        assert!(
            report
                .artifacts
                .iter()
                .any(|p| p.ends_with("0_search.json"))
        );
    }
}
