//! # advtrain-ml: models, attacks, and the adversarial training engine
//!
//! Builds on `advtrain-core` configuration to provide:
//! - dense networks with manual backpropagation, criteria, optimizers, and
//!   learning-rate schedules ([`nn`])
//! - datasets, batching, and input transforms ([`data`])
//! - strength schedules and gradient attacks under L∞/L2 budgets ([`attack`])
//! - the clean-vs-adversarial [`discriminator`]
//! - the epoch/batch training state machine with early stopping, metrics, and
//!   checkpoints ([`training`])
//! - hyperparameter search with median pruning ([`search`])
//! - the classifier, discriminator, and attack tasks ([`experiment`])

pub mod attack;
pub mod data;
pub mod discriminator;
pub mod error;
pub mod experiment;
pub mod nn;
pub mod search;
pub mod training;

pub use attack::{AdversarialPlan, Attack, AttackScheduler, AttackState, AttackTarget};
pub use data::{Batch, BatchSource, Dataset};
pub use discriminator::{CheckRecord, Discriminator};
pub use error::{BatchError, FatalTrainingError, InvalidBoundsError, MlError, Result};
pub use experiment::{Experiment, ExperimentReport};
pub use nn::DenseNet;
pub use search::{SearchDriver, SearchSummary, TrialRecord, TrialState};
pub use training::{Learner, Objective, TrainingLoop, TrainingOutcome, TrainingState};
