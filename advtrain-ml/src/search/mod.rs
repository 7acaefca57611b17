//! Hyperparameter search: spaces, samplers, pruners, and the trial loop.

pub mod driver;
pub mod pruner;
pub mod space;

pub use driver::{
    SearchDriver, SearchSummary, TrialRecord, TrialReporter, TrialState, best_trial,
    objective_value,
};
pub use pruner::{MedianPruner, NopPruner, Pruner, build_pruner};
pub use space::{ParamSpec, RandomSampler, Sampler, SearchSpace, TrialParams, build_sampler, to_patch};
