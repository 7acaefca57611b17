//! Training infrastructure: the epoch loop, metrics, callbacks, checkpoints, seeding.

pub mod callbacks;
pub mod checkpoint;
pub mod metrics;
pub mod reproducibility;
pub mod runner;

pub use callbacks::{CallbackAction, EarlyStopping, EpochObserver, NoopObserver};
pub use checkpoint::{CheckpointManager, ModelCheckpoint};
pub use metrics::{ClassificationReport, MetricHistory, MetricSnapshot, SplitMetrics};
pub use reproducibility::{EnvironmentSnapshot, SeedManager};
pub use runner::{
    FrozenTarget, JointDiscriminator, Learner, LoopSettings, Objective, StopReason, TrainingLoop,
    TrainingOutcome, TrainingState, attack_in_batches,
};
