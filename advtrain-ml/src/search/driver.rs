//! Sequential hyperparameter search with median pruning.

use crate::error::{MlError, Result};
use crate::search::pruner::{Pruner, build_pruner};
use crate::search::space::{Sampler, SearchSpace, TrialParams, build_sampler};
use crate::training::callbacks::{CallbackAction, EpochObserver};
use crate::training::metrics::MetricSnapshot;
use advtrain_core::config::SearchConfig;
use advtrain_core::{ConfigError, MetricName};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialState {
    Complete,
    Pruned,
    Failed,
}

/// One sampled configuration and how it went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub number: usize,
    pub params: TrialParams,
    pub value: Option<f64>,
    /// One reported value per epoch.
    pub intermediate: Vec<f64>,
    pub state: TrialState,
    pub error: Option<String>,
}

/// Value of `metric` oriented so that higher is better.
pub fn objective_value(snapshot: &MetricSnapshot, metric: MetricName) -> f64 {
    match metric {
        MetricName::Loss => -snapshot.value(metric),
        _ => snapshot.value(metric),
    }
}

/// Per-trial epoch observer: records intermediate values and asks the pruner
/// whether to continue.
pub struct TrialReporter<'a> {
    number: usize,
    metric: MetricName,
    pruner: &'a dyn Pruner,
    history: &'a [TrialRecord],
    intermediate: Vec<f64>,
    pruned: bool,
}

impl<'a> TrialReporter<'a> {
    pub fn new(
        number: usize,
        metric: MetricName,
        pruner: &'a dyn Pruner,
        history: &'a [TrialRecord],
    ) -> Self {
        Self {
            number,
            metric,
            pruner,
            history,
            intermediate: Vec::new(),
            pruned: false,
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    /// Report a value for the next step; returns `true` if the trial should stop.
    pub fn report(&mut self, value: f64) -> bool {
        let step = self.intermediate.len();
        self.intermediate.push(value);
        if self.pruner.should_prune(step, value, self.history) {
            tracing::info!(trial = self.number, step, value, "Trial pruned");
            self.pruned = true;
        }
        self.pruned
    }

    pub fn is_pruned(&self) -> bool {
        self.pruned
    }

    /// Highest reported value so far.
    pub fn best(&self) -> Option<f64> {
        self.intermediate.iter().copied().reduce(f64::max)
    }

    pub fn intermediate(&self) -> &[f64] {
        &self.intermediate
    }
}

impl EpochObserver for TrialReporter<'_> {
    fn on_epoch_end(&mut self, snapshot: &MetricSnapshot) -> CallbackAction {
        if self.report(objective_value(snapshot, self.metric)) {
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }
}

/// Every trial plus the winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub trials: Vec<TrialRecord>,
    pub best: TrialRecord,
}

impl SearchSummary {
    pub fn count(&self, state: TrialState) -> usize {
        self.trials.iter().filter(|t| t.state == state).count()
    }
}

pub struct SearchDriver {
    n_trials: usize,
    metric: MetricName,
    space: SearchSpace,
    sampler: Box<dyn Sampler>,
    pruner: Box<dyn Pruner>,
    history: Vec<TrialRecord>,
}

impl SearchDriver {
    pub fn new(
        n_trials: usize,
        metric: MetricName,
        space: SearchSpace,
        sampler: Box<dyn Sampler>,
        pruner: Box<dyn Pruner>,
    ) -> Self {
        Self {
            n_trials,
            metric,
            space,
            sampler,
            pruner,
            history: Vec::new(),
        }
    }

    pub fn from_config(config: &SearchConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(
            config.n_trials,
            config.optim_metric,
            SearchSpace::parse(&config.hyperparameters_vary)?,
            build_sampler(&config.sampler)?,
            build_pruner(&config.pruner)?,
        ))
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn history(&self) -> &[TrialRecord] {
        &self.history
    }

    /// Run every trial in sequence.
    ///
    /// `objective` trains one configuration, feeding the reporter each epoch,
    /// and returns the trial's value (higher is better). Trial-fatal errors
    /// are recorded as failed trials; any other error aborts the search.
    pub fn run<F>(&mut self, mut objective: F) -> Result<SearchSummary>
    where
        F: FnMut(&TrialParams, &mut TrialReporter<'_>) -> Result<f64>,
    {
        tracing::info!(
            n_trials = self.n_trials,
            n_params = self.space.len(),
            sampler = self.sampler.name(),
            pruner = self.pruner.name(),
            "Starting search"
        );
        for number in 0..self.n_trials {
            let params = self.sampler.sample(&self.space);
            tracing::debug!(trial = number, ?params, "Sampled trial");

            let mut reporter = TrialReporter::new(number, self.metric, self.pruner.as_ref(), &self.history);
            let result = objective(&params, &mut reporter);
            let pruned = reporter.is_pruned();
            let intermediate = reporter.intermediate.clone();

            let record = match result {
                Ok(value) if !value.is_finite() => TrialRecord {
                    number,
                    params,
                    value: None,
                    intermediate,
                    state: TrialState::Failed,
                    error: Some(format!("non-finite objective value {value}")),
                },
                Ok(value) => TrialRecord {
                    number,
                    params,
                    value: Some(value),
                    intermediate,
                    state: if pruned {
                        TrialState::Pruned
                    } else {
                        TrialState::Complete
                    },
                    error: None,
                },
                Err(e) if e.is_trial_fatal() => {
                    tracing::warn!(trial = number, error = %e, "Trial failed");
                    TrialRecord {
                        number,
                        params,
                        value: None,
                        intermediate,
                        state: TrialState::Failed,
                        error: Some(e.to_string()),
                    }
                }
                Err(e) => return Err(e),
            };
            tracing::info!(
                trial = number,
                state = ?record.state,
                value = record.value,
                "Trial finished"
            );
            self.history.push(record);
        }

        let best = best_trial(&self.history)
            .cloned()
            .ok_or(MlError::NoCompletedTrials {
                n_trials: self.n_trials,
            })?;
        tracing::info!(trial = best.number, value = best.value, params = ?best.params, "Best trial");
        Ok(SearchSummary {
            trials: self.history.clone(),
            best,
        })
    }
}

/// Highest-valued completed trial; the earliest wins ties.
pub fn best_trial(history: &[TrialRecord]) -> Option<&TrialRecord> {
    history
        .iter()
        .filter(|t| t.state == TrialState::Complete)
        .filter_map(|t| t.value.map(|v| (v, t)))
        .reduce(|best, cur| if cur.0 > best.0 { cur } else { best })
        .map(|(_, t)| t)
}
