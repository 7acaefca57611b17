//! Binary detector separating clean (label 0) from adversarial (label 1) inputs.
//!
//! A discriminator plays one of two mutually exclusive roles per experiment:
//! - regularization: trained jointly with the classifier, its loss weighted by `alpha`
//! - check: loaded frozen and used to score attacks against other classifiers

use crate::attack::{Attack, AttackState, AttackTarget};
use crate::data::Dataset;
use crate::error::Result;
use crate::nn::{BinaryCrossEntropy, Criterion, DenseNet, Optimizer, build_model, build_optimizer};
use crate::training::metrics::{self, ClassificationReport, SplitMetrics};
use advtrain_core::config::{CheckModelParams, DiscriminatorConfig};
use advtrain_core::{ConfigError, MetricName};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub struct Discriminator {
    net: DenseNet,
    criterion: BinaryCrossEntropy,
    optimizer: Box<dyn Optimizer>,
}

impl std::fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discriminator")
            .field("spec", self.net.spec())
            .field("optimizer", &self.optimizer.name())
            .finish()
    }
}

impl Discriminator {
    pub fn new<R: Rng + ?Sized>(
        config: &DiscriminatorConfig,
        input_dim: usize,
        rng: &mut R,
    ) -> std::result::Result<Self, ConfigError> {
        let net = build_model(&config.model, input_dim, 1, rng)?;
        Self::from_net(net, config)
    }

    /// Wrap an already trained network (e.g. a loaded checkpoint).
    pub fn from_net(net: DenseNet, config: &DiscriminatorConfig) -> std::result::Result<Self, ConfigError> {
        if net.output_dim() != 1 {
            return Err(ConfigError::invalid(
                "discriminator.model",
                "a discriminator emits a single logit",
            ));
        }
        Ok(Self {
            net,
            criterion: BinaryCrossEntropy::default(),
            optimizer: build_optimizer(&config.optimizer)?,
        })
    }

    pub fn net(&self) -> &DenseNet {
        &self.net
    }

    pub fn into_net(self) -> DenseNet {
        self.net
    }

    /// Mean BCE against `labels` and its parameter gradient.
    pub fn loss_and_grads(&self, x: ArrayView2<f32>, labels: ArrayView1<f32>) -> Result<(f32, Vec<f32>)> {
        let (logits, trace) = self.net.forward(x)?;
        let (loss, d_logits) = self.criterion.loss_and_grad(logits.view(), labels);
        Ok((loss, self.net.backward(&trace, d_logits)?.params))
    }

    pub fn apply_gradients(&mut self, grad: &[f32]) -> Result<()> {
        self.optimizer.step(self.net.params_mut(), grad)
    }

    /// One optimizer step on `(x, labels)`; returns the pre-step loss.
    pub fn train_step(&mut self, x: ArrayView2<f32>, labels: ArrayView1<f32>) -> Result<f32> {
        let (loss, grad) = self.loss_and_grads(x, labels)?;
        self.apply_gradients(&grad)?;
        Ok(loss)
    }

    /// Probability that each row is adversarial.
    pub fn evaluate(&self, x: ArrayView2<f32>) -> Result<Array1<f32>> {
        let logits = self.net.logits(x)?;
        Ok(logits.column(0).mapv(crate::nn::loss::sigmoid))
    }

    /// Gradient of the BCE against a constant `label` with respect to the input.
    pub fn input_gradient(&self, x: ArrayView2<f32>, label: f32) -> Result<Array2<f32>> {
        let (logits, trace) = self.net.forward(x)?;
        let labels = Array1::from_elem(x.nrows(), label);
        let (_, d_logits) = self.criterion.loss_and_grad(logits.view(), labels.view());
        Ok(self.net.backward(&trace, d_logits)?.input)
    }

    /// Detection metrics on clean rows stacked over their adversarial counterparts.
    pub fn score(&self, clean: ArrayView2<f32>, adversarial: ArrayView2<f32>, batch_size: usize) -> Result<SplitMetrics> {
        let data = Dataset::detection(clean, adversarial)?;
        metrics::evaluate(&self.net, &self.criterion, data.x().view(), data.y().view(), batch_size)
    }
}

/// Outcome of scoring one attacked classifier with a frozen discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub model_id: usize,
    pub model_name: String,
    pub strength: f32,
    pub n_steps: usize,
    pub clean: ClassificationReport,
    pub adversarial: ClassificationReport,
    pub detection: ClassificationReport,
    /// Effect metric of the classifier on adversarial inputs.
    pub effect: f64,
    /// Hidden-ness metric of the discriminator on clean vs adversarial inputs.
    pub hidden: f64,
}

/// Options shared by every scored candidate.
#[derive(Debug, Clone, Copy)]
pub struct CheckSettings {
    pub state: AttackState,
    pub metric_effect: MetricName,
    pub metric_hid: MetricName,
    pub batch_size: usize,
}

/// Attack one candidate classifier on `data` and score the result.
pub fn check_candidate(
    disc: &Discriminator,
    candidate: &CheckModelParams,
    target: &AttackTarget<'_>,
    attack: &dyn Attack,
    data: &Dataset,
    settings: CheckSettings,
    rng: &mut StdRng,
) -> Result<CheckRecord> {
    let adv = attack.perturb(target, data.x().view(), data.y().view(), settings.state, rng)?;
    let clean = metrics::evaluate(
        target.model,
        target.criterion,
        data.x().view(),
        data.y().view(),
        settings.batch_size,
    )?;
    let adversarial = metrics::evaluate(
        target.model,
        target.criterion,
        adv.view(),
        data.y().view(),
        settings.batch_size,
    )?;
    let detection = disc.score(data.x().view(), adv.view(), settings.batch_size)?;

    tracing::info!(
        model_id = candidate.model_id,
        model_name = %candidate.model_name,
        clean = clean.value(settings.metric_effect),
        adversarial = adversarial.value(settings.metric_effect),
        detection = detection.value(settings.metric_hid),
        "Checked attacked model"
    );
    Ok(CheckRecord {
        model_id: candidate.model_id,
        model_name: candidate.model_name.clone(),
        strength: settings.state.strength,
        n_steps: settings.state.n_steps,
        clean: clean.report,
        adversarial: adversarial.report,
        detection: detection.report,
        effect: adversarial.value(settings.metric_effect),
        hidden: detection.value(settings.metric_hid),
    })
}
