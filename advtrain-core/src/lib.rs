//! # advtrain-core
//!
//! Shared foundation for the advtrain workspace: the experiment configuration
//! (layered loading, composition, interpolation, validation), the error
//! taxonomy, and the persisted artifact layout.

pub mod artifacts;
pub mod config;
pub mod error;

pub use artifacts::ArtifactLayout;
pub use config::{
    AttackConfig, ConfigLoader, DiscMode, ExperimentConfig, MetricName, NamedParams, TaskKind,
    TrainingConfig, load_config,
};
pub use error::{ArtifactError, ConfigError, CoreError};
