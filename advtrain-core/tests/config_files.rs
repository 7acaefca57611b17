//! The configurations shipped under `configs/` load and validate.

use advtrain_core::config::{DataSourceKind, Norm};
use advtrain_core::{ConfigLoader, DiscMode, MetricName, TaskKind};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn configs() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../configs")
}

#[test]
fn classifier_config_composes_groups() {
    let cfg = ConfigLoader::new(configs().join("config.yaml"))
        .without_env()
        .load()
        .unwrap();
    assert_eq!(cfg.task, TaskKind::Classifier);
    assert_eq!(cfg.exp_name, "MLP_fgsm");
    assert_eq!(cfg.model_name_attack, "MLP_fgsm");
    assert_eq!(cfg.dataset.source, DataSourceKind::Synthetic);
    assert_eq!(cfg.metric_hid, MetricName::RocAuc);
    let attack = cfg.attack.as_ref().unwrap();
    assert_eq!(attack.norm, Norm::Linf);
    assert_eq!(attack.suffix(false), "fgsm_attack_eps=0.03_nsteps=1");
    assert_eq!(cfg.training.early_stop_patience, Some(5));
}

#[test]
fn discriminator_and_attack_configs_validate() {
    let disc = ConfigLoader::new(configs().join("config_disc.yaml"))
        .without_env()
        .load()
        .unwrap();
    assert_eq!(disc.task, TaskKind::Discriminator);
    assert_eq!(disc.exp_name, "discriminator_pgd");

    let attack = ConfigLoader::new(configs().join("config_attack.yaml"))
        .without_env()
        .load()
        .unwrap();
    assert_eq!(attack.disc_mode(), DiscMode::Check);
    assert_eq!(attack.list_check_model_params.len(), 2);
}

#[test]
fn search_config_carries_space() {
    let cfg = ConfigLoader::new(configs().join("config_search.yaml"))
        .without_env()
        .overrides(["optuna_optimizer.n_trials=4"])
        .load()
        .unwrap();
    assert!(cfg.enable_optimization);
    let search = cfg.optuna_optimizer.unwrap();
    assert_eq!(search.n_trials, 4);
    assert_eq!(search.pruner.n_startup_trials, 3);
    assert_eq!(
        search.hyperparameters_vary["training"]["n_epochs"]["optuna_type"],
        "const"
    );
}
