//! CLI subcommand handlers.

use crate::{Commands, ConfigArgs};
use advtrain_core::{ConfigLoader, ExperimentConfig};
use advtrain_ml::Experiment;
use advtrain_ml::data::{save_json, synthetic};
use anyhow::Context;

/// Resolve the configuration named on the command line.
pub fn load(args: &ConfigArgs, test_run: bool) -> anyhow::Result<ExperimentConfig> {
    let mut loader = ConfigLoader::new(&args.config).overrides(args.overrides.iter().cloned());
    if let Some(dir) = &args.config_dir {
        loader = loader.config_dir(dir);
    }
    if test_run {
        loader = loader.overrides(["test_run=true"]);
    }
    loader
        .load()
        .with_context(|| format!("Configuration error in {}", args.config.display()))
}

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, config: ExperimentConfig) -> anyhow::Result<()> {
    match command {
        Commands::Run { report, .. } => handle_run(config, report),
        Commands::Validate { .. } => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Synth { out, .. } => handle_synth(&config, &out),
    }
}

fn handle_run(config: ExperimentConfig, report_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let mut experiment = Experiment::new(config);
    let report = experiment.run()?;

    if let Some(training) = &report.training {
        let best = &training.outcome.best;
        println!(
            "{}: {:?} after {} epochs, best epoch {} (valid loss {:.4}, effect {:.4}, hidden {:.4})",
            report.exp_name,
            training.outcome.state,
            training.outcome.epochs_run(),
            best.epoch + 1,
            best.valid.loss,
            best.effect,
            best.hidden,
        );
    }
    if let Some(search) = &report.search {
        println!(
            "search: {} trials, best #{} = {:?}",
            search.trials.len(),
            search.best.number,
            search.best.value
        );
    }
    if let Some(attack) = &report.attack {
        println!(
            "attack: strength {} ({} steps), effect {:.4}",
            attack.state.strength, attack.state.n_steps, attack.effect
        );
    }
    for check in &report.checks {
        println!(
            "check {}#{}: effect {:.4}, hidden {:.4}",
            check.model_name, check.model_id, check.effect, check.hidden
        );
    }

    if let Some(path) = report_path {
        advtrain_core::artifacts::atomic_write_json(&path, &report)
            .with_context(|| format!("writing report to {}", path.display()))?;
    }
    Ok(())
}

fn handle_synth(config: &ExperimentConfig, out: &std::path::Path) -> anyhow::Result<()> {
    let (train, test) = synthetic::generate(&config.dataset, config.seed)?;
    let train_path = out.join(format!("{}_TRAIN.json", config.dataset.name));
    let test_path = out.join(format!("{}_TEST.json", config.dataset.name));
    save_json(&train_path, &train)?;
    save_json(&test_path, &test)?;
    tracing::info!(
        train = %train_path.display(),
        test = %test_path.display(),
        n_train = train.len(),
        n_test = test.len(),
        "Wrote synthetic dataset"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use advtrain_ml::data::load_json_splits;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn write_config(dir: &Path) -> ConfigArgs {
        let path = dir.join("config.yaml");
        std::fs::write(
            &path,
            "exp_name: demo\n\
             task: classifier\n\
             dataset:\n  name: Tiny\n  n_train: 12\n  n_test: 6\n  seq_len: 8\n\
             training:\n  n_epochs: 2\n  adversarial: false\n",
        )
        .unwrap();
        ConfigArgs {
            config: path,
            config_dir: None,
            overrides: vec!["training.n_epochs=3".into()],
        }
    }

    #[test]
    fn test_load_applies_overrides_and_test_run() {
        let dir = tempfile::tempdir().unwrap();
        let args = write_config(dir.path());
        let config = load(&args, true).unwrap();
        assert_eq!(config.training.n_epochs, 3);
        assert!(config.test_run);

        let config = load(&args, false).unwrap();
        assert!(!config.test_run);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let args = ConfigArgs {
            config: "does/not/exist.yaml".into(),
            config_dir: None,
            overrides: Vec::new(),
        };
        let err = load(&args, false).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.yaml"));
    }

    #[test]
    fn test_synth_writes_loadable_splits() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&write_config(dir.path()), true).unwrap();
        let out = dir.path().join("data");
        handle_synth(&config, &out).unwrap();

        let (train, test) = load_json_splits(
            &out.join("Tiny_TRAIN.json"),
            &out.join("Tiny_TEST.json"),
            2,
        )
        .unwrap();
        assert_eq!(train.len(), 12);
        assert_eq!(test.len(), 6);
        assert_eq!(train.x().ncols(), 8);
    }
}
