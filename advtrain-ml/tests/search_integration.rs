//! End-to-end search runs over the real training loop.

use advtrain_core::config::{PrunerConfig, SamplerConfig, SearchConfig};
use advtrain_core::{ExperimentConfig, MetricName, NamedParams};
use advtrain_ml::data::synthetic;
use advtrain_ml::search::{SearchDriver, TrialState, to_patch};
use advtrain_ml::training::{EpochObserver, Learner, Objective, TrainingLoop, TrainingState};
use advtrain_ml::Dataset;
use pretty_assertions::assert_eq;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Value, json};

fn base() -> ExperimentConfig {
    let mut cfg = ExperimentConfig::minimal("Synth");
    cfg.dataset.n_train = 48;
    cfg.dataset.n_test = 24;
    cfg.dataset.seq_len = 10;
    cfg.batch_size = 16;
    cfg.model = NamedParams::new("MLP").with("hidden", json!([6]));
    cfg.training.n_epochs = 3;
    cfg.training.early_stop_patience = Some(900);
    cfg
}

fn search(n_trials: usize, vary: Value) -> SearchConfig {
    SearchConfig {
        n_trials,
        sampler: SamplerConfig::default(),
        pruner: PrunerConfig::default(),
        optim_metric: MetricName::Accuracy,
        hyperparameters_vary: vary,
    }
}

fn train(
    cfg: &ExperimentConfig,
    data: &(Dataset, Dataset),
    observer: &mut dyn EpochObserver,
) -> advtrain_ml::Result<TrainingState> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let learner = Learner::classifier(&cfg.model, &cfg.training, cfg.dataset.seq_len, 2, &mut rng)?;
    let objective = Objective::Classify { plan: None, regularizer: None };
    let outcome = TrainingLoop::from_config(cfg, learner, objective, cfg.seed)?.run(&data.0, &data.1, observer)?;
    Ok(outcome.state)
}

#[test]
fn identical_trials_report_identical_metrics() {
    let cfg = base();
    let data = synthetic::generate(&cfg.dataset, 0).unwrap();
    let mut driver = SearchDriver::from_config(&search(
        3,
        json!({"training": {"n_epochs": {"optuna_type": "const", "value": 3}}}),
    ))
    .unwrap();

    let summary = driver
        .run(|params, reporter| {
            let trial = cfg.with_overrides(&to_patch(params))?;
            let state = train(&trial, &data, reporter)?;
            assert_eq!(state, TrainingState::Completed);
            Ok(reporter.best().unwrap())
        })
        .unwrap();

    assert_eq!(summary.trials.len(), 3);
    assert_eq!(summary.count(TrialState::Complete), 3);
    assert_eq!(summary.count(TrialState::Pruned), 0);
    let values: Vec<_> = summary.trials.iter().map(|t| t.value).collect();
    assert_eq!(values, vec![values[0]; 3]);
    assert_eq!(summary.trials[0].intermediate, summary.trials[2].intermediate);
    assert_eq!(summary.best.number, 0);
}

#[test]
fn diverging_trials_are_recorded_and_search_continues() {
    let cfg = base();
    let data = synthetic::generate(&cfg.dataset, 0).unwrap();
    let mut driver = SearchDriver::from_config(&search(
        8,
        json!({"training": {"optimizer": {
            "name": {"optuna_type": "const", "value": "SGD"},
            "params": {"lr": {"optuna_type": "choice", "choices": [1e30, 0.05, 0.01]}}
        }}}),
    ))
    .unwrap();

    let summary = driver
        .run(|params, reporter| {
            let trial = cfg.with_overrides(&to_patch(params))?;
            train(&trial, &data, reporter)?;
            Ok(reporter.best().unwrap())
        })
        .unwrap();

    assert_eq!(summary.trials.len(), 8);
    for t in &summary.trials {
        let lr = t.params["training.optimizer.params.lr"].as_f64().unwrap();
        if lr > 1.0 {
            assert_eq!(t.state, TrialState::Failed);
            assert!(t.error.is_some());
        } else {
            assert_ne!(t.state, TrialState::Failed);
        }
    }
    assert!(summary.best.params["training.optimizer.params.lr"].as_f64().unwrap() < 1.0);
}

#[test]
fn unsupported_search_type_fails_before_training() {
    let err = SearchDriver::from_config(&search(
        2,
        json!({"training": {"n_epochs": {"optuna_type": "uniform", "low": 1, "high": 3}}}),
    ))
    .err()
    .unwrap();
    assert!(matches!(err, advtrain_core::ConfigError::UnsupportedSearchType { .. }));
}
