//! Classification metrics and per-epoch snapshots.

use crate::error::Result;
use crate::nn::{Criterion, DenseNet};
use advtrain_core::MetricName;
use advtrain_core::config::EarlyStopMonitor;
use ndarray::{Array2, ArrayView1, ArrayView2, s};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Standard classification metrics. Binary metrics treat class 1 as positive;
/// with more classes precision, recall, F1, and ROC-AUC are macro averages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
    /// Share of predictions falling in the most predicted class (class 1 for binary).
    pub balance_pred: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Precision, recall, F1 for one class; zero when undefined.
fn class_prf(y_true: &[usize], y_pred: &[usize], class: usize) -> (f64, f64, f64) {
    let mut tp = 0;
    let mut fp = 0;
    let mut fn_ = 0;
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == class, p == class) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}

/// Rank-based ROC-AUC (Mann-Whitney U with averaged ties).
///
/// Returns 0.5 when only one class is present.
pub fn roc_auc(scores: &[f64], positive: &[bool]) -> f64 {
    let n_pos = positive.iter().filter(|&&p| p).count();
    let n_neg = positive.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; tied block shares the mean rank
        let mean_rank = (i + j + 2) as f64 / 2.0;
        rank_sum += order[i..=j]
            .iter()
            .filter(|&&k| positive[k])
            .count() as f64
            * mean_rank;
        i = j + 1;
    }
    let u = rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    u / (n_pos * n_neg) as f64
}

impl ClassificationReport {
    /// `probabilities` has one column per class.
    pub fn compute(y_true: &[usize], probabilities: ArrayView2<f32>) -> Self {
        let n_classes = probabilities.ncols().max(2);
        let y_pred: Vec<usize> = probabilities
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &p)| {
                        if p > best.1 { (i, p) } else { best }
                    })
                    .0
            })
            .collect();
        let correct = y_true.iter().zip(&y_pred).filter(|(t, p)| t == p).count();
        let accuracy = ratio(correct, y_true.len());

        let mut counts = vec![0usize; n_classes];
        for &p in &y_pred {
            counts[p.min(n_classes - 1)] += 1;
        }

        let auc_for = |class: usize| {
            let scores: Vec<f64> = probabilities.column(class).iter().map(|&p| p as f64).collect();
            let positive: Vec<bool> = y_true.iter().map(|&t| t == class).collect();
            roc_auc(&scores, &positive)
        };

        if n_classes == 2 {
            let (precision, recall, f1) = class_prf(y_true, &y_pred, 1);
            Self {
                accuracy,
                precision,
                recall,
                f1,
                roc_auc: auc_for(1),
                balance_pred: ratio(counts[1], y_pred.len()),
            }
        } else {
            let mut sums = (0.0, 0.0, 0.0, 0.0);
            for class in 0..n_classes {
                let (p, r, f) = class_prf(y_true, &y_pred, class);
                sums.0 += p;
                sums.1 += r;
                sums.2 += f;
                sums.3 += auc_for(class);
            }
            let k = n_classes as f64;
            Self {
                accuracy,
                precision: sums.0 / k,
                recall: sums.1 / k,
                f1: sums.2 / k,
                roc_auc: sums.3 / k,
                balance_pred: ratio(counts.iter().copied().max().unwrap_or(0), y_pred.len()),
            }
        }
    }

    pub fn get(&self, metric: MetricName) -> Option<f64> {
        match metric {
            MetricName::Accuracy => Some(self.accuracy),
            MetricName::Precision => Some(self.precision),
            MetricName::Recall => Some(self.recall),
            MetricName::F1 => Some(self.f1),
            MetricName::RocAuc => Some(self.roc_auc),
            MetricName::BalancePred => Some(self.balance_pred),
            MetricName::Loss => None,
        }
    }
}

/// Loss and report over one data split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    pub loss: f64,
    pub report: ClassificationReport,
}

impl SplitMetrics {
    pub fn value(&self, metric: MetricName) -> f64 {
        self.report.get(metric).unwrap_or(self.loss)
    }
}

/// Accumulates predictions batch by batch.
#[derive(Debug, Default)]
pub struct MetricAccumulator {
    loss_sum: f64,
    labels: Vec<usize>,
    probabilities: Vec<f32>,
    width: usize,
}

impl MetricAccumulator {
    pub fn push(&mut self, loss: f32, targets: ArrayView1<f32>, probabilities: ArrayView2<f32>) {
        self.loss_sum += loss as f64 * targets.len() as f64;
        self.labels.extend(targets.iter().map(|&t| t.max(0.0) as usize));
        self.width = probabilities.ncols();
        self.probabilities.extend(probabilities.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn finish(self) -> Result<SplitMetrics> {
        if self.labels.is_empty() {
            return Ok(SplitMetrics::default());
        }
        let n = self.labels.len();
        let probs = Array2::from_shape_vec((n, self.width), self.probabilities)?;
        Ok(SplitMetrics {
            loss: self.loss_sum / n as f64,
            report: ClassificationReport::compute(&self.labels, probs.view()),
        })
    }
}

/// Evaluate a network over `(x, y)` in batches without touching its parameters.
pub fn evaluate(
    net: &DenseNet,
    criterion: &dyn Criterion,
    x: ArrayView2<f32>,
    y: ArrayView1<f32>,
    batch_size: usize,
) -> Result<SplitMetrics> {
    let mut acc = MetricAccumulator::default();
    let step = batch_size.max(1);
    let mut start = 0;
    while start < x.nrows() {
        let end = (start + step).min(x.nrows());
        let xb = x.slice(s![start..end, ..]);
        let yb = y.slice(s![start..end]);
        let logits = net.logits(xb)?;
        let loss = criterion.loss(logits.view(), yb);
        acc.push(loss, yb, criterion.probabilities(logits.view()).view());
        start = end;
    }
    acc.finish()
}

/// Everything recorded at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub epoch: usize,
    pub lr: f32,
    /// Attack strength in effect, if batches were attacked.
    pub strength: Option<f32>,
    pub train: SplitMetrics,
    pub valid: SplitMetrics,
    /// Configured effect metric on the held-out split.
    pub effect: f64,
    /// Configured hidden-ness metric (discriminator or adversarial view).
    pub hidden: f64,
}

impl MetricSnapshot {
    /// Held-out value of `metric`.
    pub fn value(&self, metric: MetricName) -> f64 {
        self.valid.value(metric)
    }

    pub fn monitored(&self, monitor: EarlyStopMonitor) -> f64 {
        match monitor {
            EarlyStopMonitor::Loss => self.valid.loss,
            EarlyStopMonitor::Effect => self.effect,
        }
    }

    /// Names and values of every scalar, for finiteness checks.
    pub fn scalars(&self) -> [(&'static str, f64); 4] {
        [
            ("train_loss", self.train.loss),
            ("valid_loss", self.valid.loss),
            ("effect", self.effect),
            ("hidden", self.hidden),
        ]
    }
}

/// Append-only record of snapshots for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricHistory {
    snapshots: Vec<MetricSnapshot>,
}

impl MetricHistory {
    pub fn push(&mut self, snapshot: MetricSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn last(&self) -> Option<&MetricSnapshot> {
        self.snapshots.last()
    }

    pub fn snapshots(&self) -> &[MetricSnapshot] {
        &self.snapshots
    }

    /// Best snapshot under `monitor`; the earliest wins ties.
    pub fn best(&self, monitor: EarlyStopMonitor) -> Option<&MetricSnapshot> {
        let higher = matches!(monitor, EarlyStopMonitor::Effect);
        self.snapshots.iter().reduce(|best, s| {
            let (a, b) = (s.monitored(monitor), best.monitored(monitor));
            let better = if higher { a > b } else { a < b };
            if better { s } else { best }
        })
    }

    /// Write one row per epoch as CSV.
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let mut out = String::from(
            "epoch,lr,strength,train_loss,valid_loss,accuracy,precision,recall,f1,roc_auc,balance_pred,effect,hidden\n",
        );
        for s in &self.snapshots {
            let r = &s.valid.report;
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
                s.epoch,
                s.lr,
                s.strength.map(|v| v.to_string()).unwrap_or_default(),
                s.train.loss,
                s.valid.loss,
                r.accuracy,
                r.precision,
                r.recall,
                r.f1,
                r.roc_auc,
                r.balance_pred,
                s.effect,
                s.hidden
            ));
        }
        advtrain_core::artifacts::atomic_write(path, out.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_roc_auc_perfect_inverse_and_ties() {
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &[false, false, true, true]), 1.0);
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &[false, false, true, true]), 0.0);
        assert_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &[false, true, false, true]), 0.5);
        assert_eq!(roc_auc(&[0.1, 0.2], &[true, true]), 0.5);
    }

    #[test]
    fn test_binary_report() {
        // predictions: 1, 1, 0, 0 ; truth: 1, 0, 0, 1
        let probs = array![[0.2f32, 0.8], [0.4, 0.6], [0.7, 0.3], [0.9, 0.1]];
        let r = ClassificationReport::compute(&[1, 0, 0, 1], probs.view());
        assert_eq!(r.accuracy, 0.5);
        assert_eq!(r.precision, 0.5);
        assert_eq!(r.recall, 0.5);
        assert_eq!(r.f1, 0.5);
        assert_eq!(r.balance_pred, 0.5);
        assert_eq!(r.roc_auc, 0.5);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let probs = array![[0.9f32, 0.1], [0.8, 0.2]];
        let r = ClassificationReport::compute(&[0, 0], probs.view());
        assert_eq!(r.precision, 0.0);
        assert_eq!(r.f1, 0.0);
        assert_eq!(r.accuracy, 1.0);
    }

    #[test]
    fn test_multiclass_macro() {
        let probs = array![[0.8f32, 0.1, 0.1], [0.1, 0.8, 0.1], [0.1, 0.1, 0.8]];
        let r = ClassificationReport::compute(&[0, 1, 2], probs.view());
        assert_eq!(r.accuracy, 1.0);
        assert_eq!(r.f1, 1.0);
        assert_eq!(r.roc_auc, 1.0);
    }

    fn snap(epoch: usize, loss: f64, effect: f64) -> MetricSnapshot {
        MetricSnapshot {
            epoch,
            lr: 0.1,
            strength: None,
            train: SplitMetrics::default(),
            valid: SplitMetrics {
                loss,
                report: ClassificationReport::default(),
            },
            effect,
            hidden: 0.0,
        }
    }

    #[test]
    fn test_history_best() {
        let mut h = MetricHistory::default();
        h.push(snap(0, 0.5, 0.6));
        h.push(snap(1, 0.3, 0.6));
        h.push(snap(2, 0.3, 0.9));
        assert_eq!(h.best(EarlyStopMonitor::Loss).unwrap().epoch, 1);
        assert_eq!(h.best(EarlyStopMonitor::Effect).unwrap().epoch, 2);
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn test_split_value_falls_back_to_loss() {
        let s = snap(0, 0.25, 0.0);
        assert_eq!(s.value(MetricName::Loss), 0.25);
        assert_eq!(s.value(MetricName::F1), 0.0);
    }
}
