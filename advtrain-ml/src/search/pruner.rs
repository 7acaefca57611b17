//! Early termination of unpromising trials. Higher values are better.

use crate::search::driver::{TrialRecord, TrialState};
use advtrain_core::ConfigError;
use advtrain_core::config::PrunerConfig;

pub trait Pruner: Send {
    fn name(&self) -> &'static str;

    /// Whether a trial reporting `value` at `step` should stop, given the
    /// trials finished so far.
    fn should_prune(&self, step: usize, value: f64, history: &[TrialRecord]) -> bool;
}

/// Never prunes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopPruner;

impl Pruner for NopPruner {
    fn name(&self) -> &'static str {
        "none"
    }

    fn should_prune(&self, _step: usize, _value: f64, _history: &[TrialRecord]) -> bool {
        false
    }
}

/// Prunes a trial whose intermediate value is strictly below the median of
/// the completed trials' values at the same step.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianPruner {
    /// Completed trials required before pruning starts.
    pub n_startup_trials: usize,
    /// Steps of every trial that are never pruned.
    pub n_warmup_steps: usize,
}

impl MedianPruner {
    pub fn new(n_startup_trials: usize, n_warmup_steps: usize) -> Self {
        Self {
            n_startup_trials,
            n_warmup_steps,
        }
    }
}

impl Pruner for MedianPruner {
    fn name(&self) -> &'static str {
        "median"
    }

    fn should_prune(&self, step: usize, value: f64, history: &[TrialRecord]) -> bool {
        if step < self.n_warmup_steps {
            return false;
        }
        let completed = history.iter().filter(|t| t.state == TrialState::Complete);
        if completed.clone().count() < self.n_startup_trials.max(1) {
            return false;
        }
        let at_step: Vec<f64> = completed
            .filter_map(|t| t.intermediate.get(step).copied())
            .filter(|v| v.is_finite())
            .collect();
        match median(at_step) {
            Some(m) => value.is_nan() || value < m,
            None => false,
        }
    }
}

pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

pub fn build_pruner(config: &PrunerConfig) -> Result<Box<dyn Pruner>, ConfigError> {
    let kind = config.kind.rsplit('.').next().unwrap_or_default();
    match kind {
        "median" | "MedianPruner" => Ok(Box::new(MedianPruner::new(
            config.n_startup_trials,
            config.n_warmup_steps,
        ))),
        "none" | "None" | "nop" | "NopPruner" => Ok(Box::new(NopPruner)),
        _ => Err(ConfigError::unknown("pruner", config.kind.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(number: usize, state: TrialState, intermediate: &[f64]) -> TrialRecord {
        TrialRecord {
            number,
            params: Default::default(),
            value: intermediate.last().copied(),
            intermediate: intermediate.to_vec(),
            state,
            error: None,
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(vec![]), None);
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn test_prunes_strictly_below_median() {
        let history = vec![
            trial(0, TrialState::Complete, &[0.5, 0.6]),
            trial(1, TrialState::Complete, &[0.7, 0.8]),
            trial(2, TrialState::Complete, &[0.9, 0.9]),
        ];
        let p = MedianPruner::default();
        assert!(p.should_prune(0, 0.69, &history));
        assert!(!p.should_prune(0, 0.7, &history));
        assert!(!p.should_prune(1, 0.8, &history));
        assert!(p.should_prune(1, 0.79, &history));
    }

    #[test]
    fn test_ignores_unfinished_trials_and_missing_steps() {
        let history = vec![
            trial(0, TrialState::Pruned, &[0.9]),
            trial(1, TrialState::Failed, &[0.9]),
            trial(2, TrialState::Complete, &[0.1]),
        ];
        let p = MedianPruner::default();
        assert!(!p.should_prune(0, 0.2, &history));
        assert!(!p.should_prune(3, 0.0, &history));
    }

    #[test]
    fn test_startup_and_warmup() {
        let history = vec![trial(0, TrialState::Complete, &[0.9, 0.9, 0.9])];
        assert!(!MedianPruner::new(2, 0).should_prune(0, 0.1, &history));
        assert!(!MedianPruner::new(0, 2).should_prune(1, 0.1, &history));
        assert!(MedianPruner::new(0, 2).should_prune(2, 0.1, &history));
    }

    #[test]
    fn test_registry() {
        assert_eq!(build_pruner(&PrunerConfig::default()).unwrap().name(), "median");
        let nop = PrunerConfig {
            kind: "optuna.pruners.NopPruner".into(),
            ..PrunerConfig::default()
        };
        assert_eq!(build_pruner(&nop).unwrap().name(), "none");
        let bad = PrunerConfig {
            kind: "hyperband".into(),
            ..PrunerConfig::default()
        };
        assert!(build_pruner(&bad).is_err());
    }
}
