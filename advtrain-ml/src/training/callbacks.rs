//! Epoch-end callbacks: early stopping and external observers.

use crate::training::metrics::MetricSnapshot;
use serde::{Deserialize, Serialize};

/// Action a callback can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Hook called with every snapshot as soon as it is recorded.
///
/// The search driver implements this to report intermediate values and to
/// prune unpromising trials.
pub trait EpochObserver {
    fn on_epoch_end(&mut self, snapshot: &MetricSnapshot) -> CallbackAction;
}

/// Observer that never interrupts training.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl EpochObserver for NoopObserver {
    fn on_epoch_end(&mut self, _snapshot: &MetricSnapshot) -> CallbackAction {
        CallbackAction::Continue
    }
}

/// Early stopping on a monitored scalar.
///
/// An epoch improves when its value beats the best so far by more than
/// `min_delta`. Training stops once `patience` consecutive epochs fail to
/// improve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    pub higher_is_better: bool,
    #[serde(skip)]
    counter: usize,
    #[serde(skip)]
    best: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64, higher_is_better: bool) -> Self {
        Self {
            patience,
            min_delta,
            higher_is_better,
            counter: 0,
            best: None,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Epochs since the last improvement.
    pub fn stale_epochs(&self) -> usize {
        self.counter
    }

    pub fn observe(&mut self, value: f64) -> CallbackAction {
        let improved = match self.best {
            None => true,
            Some(best) if self.higher_is_better => value > best + self.min_delta,
            Some(best) => value < best - self.min_delta,
        };
        if improved {
            self.best = Some(value);
            self.counter = 0;
            return CallbackAction::Continue;
        }
        self.counter += 1;
        if self.counter >= self.patience {
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }
}
