use advtrain_core::{ConfigError, NamedParams};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// A differentiable training criterion over raw logits.
///
/// Targets are class indices stored as `f32` (`0.0`/`1.0` for binary).
pub trait Criterion: Send + Sync {
    fn name(&self) -> &'static str;

    /// Width of the logit layer this criterion expects for `n_classes`.
    fn output_dim(&self, n_classes: usize) -> usize;

    /// Mean loss over the batch and its gradient with respect to the logits.
    fn loss_and_grad(&self, logits: ArrayView2<f32>, targets: ArrayView1<f32>) -> (f32, Array2<f32>);

    fn loss(&self, logits: ArrayView2<f32>, targets: ArrayView1<f32>) -> f32 {
        self.loss_and_grad(logits, targets).0
    }

    /// Class probabilities, one row per sample.
    fn probabilities(&self, logits: ArrayView2<f32>) -> Array2<f32>;
}

pub fn sigmoid(z: f32) -> f32 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Row-wise softmax with max subtraction.
pub fn softmax_rows(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Binary cross-entropy on a single logit column (`BCELoss`).
#[derive(Debug, Clone, Copy)]
pub struct BinaryCrossEntropy {
    pub pos_weight: f32,
}

impl Default for BinaryCrossEntropy {
    fn default() -> Self {
        Self { pos_weight: 1.0 }
    }
}

impl Criterion for BinaryCrossEntropy {
    fn name(&self) -> &'static str {
        "BCELoss"
    }

    fn output_dim(&self, _n_classes: usize) -> usize {
        1
    }

    fn loss_and_grad(&self, logits: ArrayView2<f32>, targets: ArrayView1<f32>) -> (f32, Array2<f32>) {
        let n = logits.nrows().max(1) as f32;
        let mut grad = Array2::zeros(logits.raw_dim());
        let mut total = 0.0;
        for ((i, &z), &y) in logits.column(0).indexed_iter().zip(targets.iter()) {
            // log(1 + e^-|z|) keeps both branches finite.
            let softplus_neg = (-z.abs()).exp().ln_1p();
            let log_p = -(softplus_neg + (-z).max(0.0));
            let log_not_p = -(softplus_neg + z.max(0.0));
            total -= self.pos_weight * y * log_p + (1.0 - y) * log_not_p;
            let p = sigmoid(z);
            grad[[i, 0]] = (self.pos_weight * y * (p - 1.0) + (1.0 - y) * p) / n;
        }
        (total / n, grad)
    }

    fn probabilities(&self, logits: ArrayView2<f32>) -> Array2<f32> {
        let p = logits.column(0).mapv(sigmoid);
        let mut out = Array2::zeros((logits.nrows(), 2));
        out.column_mut(1).assign(&p);
        out.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
        out
    }
}

/// Softmax cross-entropy over one logit per class (`CrossEntropyLoss`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl Criterion for CrossEntropy {
    fn name(&self) -> &'static str {
        "CrossEntropyLoss"
    }

    fn output_dim(&self, n_classes: usize) -> usize {
        n_classes
    }

    fn loss_and_grad(&self, logits: ArrayView2<f32>, targets: ArrayView1<f32>) -> (f32, Array2<f32>) {
        let n = logits.nrows().max(1) as f32;
        let k = logits.ncols();
        let mut grad = softmax_rows(logits);
        let mut total = 0.0;
        for (mut row, &y) in grad.axis_iter_mut(Axis(0)).zip(targets.iter()) {
            let class = (y.max(0.0) as usize).min(k - 1);
            total -= row[class].max(f32::MIN_POSITIVE).ln();
            row[class] -= 1.0;
            row.mapv_inplace(|v| v / n);
        }
        (total / n, grad)
    }

    fn probabilities(&self, logits: ArrayView2<f32>) -> Array2<f32> {
        softmax_rows(logits)
    }
}

/// Build a criterion from its registry name.
pub fn build_criterion(params: &NamedParams, n_classes: usize) -> Result<Box<dyn Criterion>, ConfigError> {
    match params.name.as_str() {
        "BCELoss" | "BCEWithLogitsLoss" | "bce" => {
            if n_classes != 2 {
                return Err(ConfigError::invalid(
                    "training.criterion",
                    format!("{} needs exactly two classes, dataset has {n_classes}", params.name),
                ));
            }
            let pos_weight = params.f64_or("pos_weight", 1.0)? as f32;
            Ok(Box::new(BinaryCrossEntropy { pos_weight }))
        }
        "CrossEntropyLoss" | "ce" => Ok(Box::new(CrossEntropy)),
        other => Err(ConfigError::unknown("criterion", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_bce_matches_closed_form() {
        let bce = BinaryCrossEntropy::default();
        let logits = array![[0.0f32], [2.0]];
        let targets = array![1.0f32, 0.0];
        let (loss, grad) = bce.loss_and_grad(logits.view(), targets.view());
        let expected = (2f32.ln() + (1.0 + 2f32.exp()).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5);
        assert!((grad[[0, 0]] - (0.5 - 1.0) / 2.0).abs() < 1e-6);
        assert!((grad[[1, 0]] - sigmoid(2.0) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_bce_is_finite_for_extreme_logits() {
        let bce = BinaryCrossEntropy::default();
        let (loss, grad) = bce.loss_and_grad(array![[80.0f32], [-80.0]].view(), array![0.0f32, 1.0].view());
        assert!(loss.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_cross_entropy_gradient_sums_to_zero() {
        let ce = CrossEntropy;
        let logits = array![[1.0f32, 2.0, 0.5], [0.0, 0.0, 0.0]];
        let (loss, grad) = ce.loss_and_grad(logits.view(), array![1.0f32, 2.0].view());
        assert!(loss > 0.0);
        for row in grad.rows() {
            assert!(row.sum().abs() < 1e-6);
        }
        let probs = ce.probabilities(logits.view());
        assert!((probs.row(1).sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_registry() {
        assert_eq!(build_criterion(&NamedParams::new("BCELoss"), 2).unwrap().output_dim(2), 1);
        assert_eq!(
            build_criterion(&NamedParams::new("CrossEntropyLoss"), 4).unwrap().output_dim(4),
            4
        );
        assert!(build_criterion(&NamedParams::new("BCELoss"), 3).is_err());
        assert!(matches!(
            build_criterion(&NamedParams::new("Huber"), 2),
            Err(ConfigError::UnknownName { .. })
        ));
    }
}
