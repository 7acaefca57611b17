//! advtrain CLI: run, validate, and prepare adversarial-training experiments.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Adversarial training for time-series classifiers
#[derive(Parser, Debug)]
#[command(name = "advtrain", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Directory for JSON log files (defaults to `<results_dir>/logs`)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Configuration source shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
struct ConfigArgs {
    /// Root YAML configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Directory of composable groups (defaults to the config file's directory)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Override a value, e.g. `--set training.n_epochs=5` (repeatable)
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the configured task (classifier, discriminator, or attack)
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Never write artifacts
        #[arg(long)]
        test_run: bool,

        /// Write the experiment report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Resolve and validate a configuration, printing the result as YAML
    Validate {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Write the configured synthetic dataset as JSON train/test splits
    Synth {
        #[command(flatten)]
        config: ConfigArgs,

        /// Output directory
        #[arg(short, long, default_value = "data")]
        out: PathBuf,
    },
}

fn init_tracing(verbose: u8, quiet: bool, log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let (json_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let file_appender = tracing_appender::rolling::daily(dir, "advtrain.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let (config_args, test_run) = match &cli.command {
        Commands::Run { config, test_run, .. } => (config, *test_run),
        Commands::Validate { config } | Commands::Synth { config, .. } => (config, false),
    };
    let config = commands::load(config_args, test_run)?;

    // Test runs leave nothing behind, log files included.
    let log_dir = match (&cli.log_dir, &cli.command) {
        (_, Commands::Validate { .. }) => None,
        (_, _) if config.test_run => None,
        (Some(dir), _) => Some(dir.clone()),
        (None, _) => Some(config.results_dir.join("logs")),
    };
    let _guard = init_tracing(cli.verbose, cli.quiet, log_dir.as_ref());

    commands::handle_command(cli.command, config)
}
