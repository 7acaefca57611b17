//! The epoch/batch training state machine.
//!
//! `Init -> {EpochStart -> BatchLoop -> EpochEnd}* -> EarlyStopped | Completed`
//!
//! Each epoch resolves the attack budget and learning rate from their
//! schedules, trains over every valid batch, evaluates on the held-out split,
//! appends a [`MetricSnapshot`], and then consults the external observer
//! (pruning) and early stopping, in that order.

use crate::attack::{AdversarialPlan, Attack, AttackState, AttackTarget};
use crate::data::{Batch, BatchSource, Dataset, Transform, build_transforms};
use crate::discriminator::Discriminator;
use crate::error::{FatalTrainingError, MlError, Result};
use crate::nn::{
    Criterion, DenseNet, LrScheduler, Optimizer, build_criterion, build_lr_scheduler, build_model,
    build_optimizer,
};
use crate::training::callbacks::{CallbackAction, EarlyStopping, EpochObserver};
use crate::training::metrics::{self, MetricAccumulator, MetricHistory, MetricSnapshot, SplitMetrics};
use advtrain_core::config::{DiscriminatorConfig, EarlyStopMonitor};
use advtrain_core::{ConfigError, ExperimentConfig, MetricName, NamedParams, TrainingConfig};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// The network being trained and everything that updates it.
pub struct Learner {
    pub net: DenseNet,
    pub criterion: Box<dyn Criterion>,
    pub optimizer: Box<dyn Optimizer>,
    pub lr_scheduler: Box<dyn LrScheduler>,
    base_lr: f32,
}

impl Learner {
    pub fn new(
        net: DenseNet,
        criterion: Box<dyn Criterion>,
        optimizer: Box<dyn Optimizer>,
        lr_scheduler: Box<dyn LrScheduler>,
    ) -> Self {
        let base_lr = optimizer.learning_rate();
        Self {
            net,
            criterion,
            optimizer,
            lr_scheduler,
            base_lr,
        }
    }

    /// A classifier over `n_classes` built from the model and training sections.
    pub fn classifier<R: Rng + ?Sized>(
        model: &NamedParams,
        training: &TrainingConfig,
        input_dim: usize,
        n_classes: usize,
        rng: &mut R,
    ) -> std::result::Result<Self, ConfigError> {
        let criterion = build_criterion(&training.criterion, n_classes)?;
        let net = build_model(model, input_dim, criterion.output_dim(n_classes), rng)?;
        Ok(Self::new(
            net,
            criterion,
            build_optimizer(&training.optimizer)?,
            build_lr_scheduler(&training.scheduler)?,
        ))
    }

    /// A single-logit detector built from the discriminator section.
    pub fn detector<R: Rng + ?Sized>(
        config: &DiscriminatorConfig,
        training: &TrainingConfig,
        input_dim: usize,
        rng: &mut R,
    ) -> std::result::Result<Self, ConfigError> {
        let criterion = build_criterion(&NamedParams::new("BCELoss"), 2)?;
        let net = build_model(&config.model, input_dim, 1, rng)?;
        Ok(Self::new(
            net,
            criterion,
            build_optimizer(&config.optimizer)?,
            build_lr_scheduler(&training.scheduler)?,
        ))
    }

    pub fn base_lr(&self) -> f32 {
        self.base_lr
    }
}

/// A trained classifier that is attacked but never updated.
pub struct FrozenTarget {
    pub net: DenseNet,
    pub criterion: Box<dyn Criterion>,
}

impl FrozenTarget {
    pub fn attack_target(&self) -> AttackTarget<'_> {
        AttackTarget::new(&self.net, self.criterion.as_ref())
    }
}

/// Discriminator trained alongside the classifier, its loss weighted by `alpha`.
pub struct JointDiscriminator {
    pub disc: Discriminator,
    pub alpha: f32,
}

/// What the loop optimizes.
pub enum Objective {
    /// Fit the learner to labelled data. With a plan, training batches are
    /// attacked first; with a regularizer, a discriminator learns to tell the
    /// attacked batches from the clean ones.
    Classify {
        plan: Option<AdversarialPlan>,
        regularizer: Option<JointDiscriminator>,
    },
    /// Fit the learner to tell clean inputs (0) from inputs attacked against
    /// a frozen classifier (1).
    Detect {
        target: FrozenTarget,
        plan: AdversarialPlan,
    },
}

impl Objective {
    pub fn plan(&self) -> Option<&AdversarialPlan> {
        match self {
            Self::Classify { plan, .. } => plan.as_ref(),
            Self::Detect { plan, .. } => Some(plan),
        }
    }

    pub fn regularizer(&self) -> Option<&JointDiscriminator> {
        match self {
            Self::Classify { regularizer, .. } => regularizer.as_ref(),
            Self::Detect { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Patience,
    Pruned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    Init,
    EpochStart(usize),
    BatchLoop(usize),
    EpochEnd(usize),
    EarlyStopped(StopReason),
    Completed,
}

impl TrainingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::EarlyStopped(_) | Self::Completed)
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub state: TrainingState,
    /// Best snapshot under the early-stopping monitor.
    pub best: MetricSnapshot,
    pub history: MetricHistory,
    pub skipped_batches: usize,
}

impl TrainingOutcome {
    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }
}

/// Schedule and reporting knobs of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub n_epochs: usize,
    pub print_every: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    pub patience: Option<usize>,
    pub min_delta: f64,
    pub monitor: EarlyStopMonitor,
    pub metric_effect: MetricName,
    pub metric_hid: MetricName,
}

impl LoopSettings {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        let t = &config.training;
        Self {
            n_epochs: t.n_epochs,
            print_every: t.print_every.max(1),
            batch_size: config.batch_size,
            shuffle: t.shuffle,
            patience: t.early_stop_patience,
            min_delta: t.early_stop_min_delta,
            monitor: t.early_stop_monitor,
            metric_effect: config.metric_effect,
            metric_hid: config.metric_hid,
        }
    }
}

/// Batch prepared for one optimizer step.
struct Prepared {
    inputs: Array2<f32>,
    targets: Array1<f32>,
    /// Clean counterpart of `inputs` when they were attacked.
    clean: Option<Array2<f32>>,
}

pub struct TrainingLoop {
    learner: Learner,
    objective: Objective,
    transforms: Vec<Box<dyn Transform>>,
    settings: LoopSettings,
    rng: StdRng,
    state: TrainingState,
}

impl TrainingLoop {
    pub fn new(
        learner: Learner,
        objective: Objective,
        transforms: Vec<Box<dyn Transform>>,
        settings: LoopSettings,
        seed: u64,
    ) -> std::result::Result<Self, ConfigError> {
        if let Objective::Classify {
            plan: None,
            regularizer: Some(_),
        } = &objective
        {
            return Err(ConfigError::invalid(
                "discriminator.regularize",
                "regularization needs attacked batches",
            ));
        }
        if settings.n_epochs == 0 || settings.batch_size == 0 {
            return Err(ConfigError::invalid(
                "training",
                "n_epochs and batch_size must be positive",
            ));
        }
        Ok(Self {
            learner,
            objective,
            transforms,
            settings,
            rng: StdRng::seed_from_u64(seed),
            state: TrainingState::Init,
        })
    }

    /// Build the loop described by an experiment's training section.
    pub fn from_config(
        config: &ExperimentConfig,
        learner: Learner,
        objective: Objective,
        seed: u64,
    ) -> std::result::Result<Self, ConfigError> {
        Self::new(
            learner,
            objective,
            build_transforms(&config.training.transform)?,
            LoopSettings::from_config(config),
            seed,
        )
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn learner(&self) -> &Learner {
        &self.learner
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn into_parts(self) -> (Learner, Objective) {
        (self.learner, self.objective)
    }

    /// Run to a terminal state.
    ///
    /// Invalid batches are logged and skipped. A non-finite loss or metric
    /// ends the run with [`FatalTrainingError`].
    pub fn run(
        &mut self,
        train: &dyn BatchSource,
        valid: &Dataset,
        observer: &mut dyn EpochObserver,
    ) -> Result<TrainingOutcome> {
        self.state = TrainingState::Init;
        let mut history = MetricHistory::default();
        let mut early_stop = self.settings.patience.map(|patience| {
            EarlyStopping::new(
                patience,
                self.settings.min_delta,
                matches!(self.settings.monitor, EarlyStopMonitor::Effect),
            )
        });
        let mut skipped = 0;
        let mut terminal = TrainingState::Completed;

        for epoch in 0..self.settings.n_epochs {
            self.state = TrainingState::EpochStart(epoch);
            let attack_state = self.objective.plan().map(|p| p.state(epoch));
            let lr = self.learner.lr_scheduler.lr_at(self.learner.base_lr, epoch);
            self.learner.optimizer.set_learning_rate(lr);

            self.state = TrainingState::BatchLoop(epoch);
            let (train_metrics, epoch_skipped) = self.train_epoch(epoch, train, attack_state)?;
            skipped += epoch_skipped;

            self.state = TrainingState::EpochEnd(epoch);
            let snapshot = self.evaluate_epoch(epoch, lr, train_metrics, valid, attack_state)?;
            if let Some((metric, _)) = snapshot.scalars().into_iter().find(|(_, v)| !v.is_finite()) {
                return Err(FatalTrainingError::NonFiniteMetric {
                    epoch,
                    metric: metric.to_string(),
                }
                .into());
            }
            self.log_epoch(&snapshot);
            history.push(snapshot.clone());

            if observer.on_epoch_end(&snapshot) == CallbackAction::Stop {
                tracing::info!(epoch, "Run pruned");
                terminal = TrainingState::EarlyStopped(StopReason::Pruned);
                break;
            }
            if let Some(es) = early_stop.as_mut() {
                if es.observe(snapshot.monitored(self.settings.monitor)) == CallbackAction::Stop {
                    tracing::info!(epoch, patience = es.patience, "Early stopping");
                    terminal = TrainingState::EarlyStopped(StopReason::Patience);
                    break;
                }
            }
        }

        self.state = terminal;
        let best = history
            .best(self.settings.monitor)
            .cloned()
            .ok_or_else(|| MlError::dataset("no epoch was recorded"))?;
        Ok(TrainingOutcome {
            state: terminal,
            best,
            history,
            skipped_batches: skipped,
        })
    }

    fn log_epoch(&self, s: &MetricSnapshot) {
        let r = &s.valid.report;
        if s.epoch % self.settings.print_every == 0 {
            tracing::info!(
                epoch = s.epoch + 1,
                train_loss = s.train.loss,
                acc_train = s.train.report.accuracy,
                valid_loss = s.valid.loss,
                acc_valid = r.accuracy,
                f1_valid = r.f1,
                balance = r.balance_pred,
                effect = s.effect,
                hidden = s.hidden,
                strength = s.strength,
                "Epoch finished"
            );
        } else {
            tracing::debug!(
                epoch = s.epoch + 1,
                train_loss = s.train.loss,
                valid_loss = s.valid.loss,
                effect = s.effect,
                hidden = s.hidden,
                "Epoch finished"
            );
        }
    }

    /// Apply transforms, then turn the batch into what the learner trains on.
    fn prepare(&mut self, batch: Batch, attack_state: Option<AttackState>) -> Result<Prepared> {
        let Batch { mut x, y } = batch;
        for t in &self.transforms {
            t.apply(&mut x, &mut self.rng);
        }
        match (&self.objective, attack_state) {
            (Objective::Classify { plan: Some(plan), regularizer }, Some(state)) => {
                let target = AttackTarget::new(&self.learner.net, self.learner.criterion.as_ref())
                    .with_discriminator(regularizer.as_ref().map(|r| &r.disc));
                let adv = plan.attack.perturb(&target, x.view(), y.view(), state, &mut self.rng)?;
                Ok(Prepared {
                    inputs: adv,
                    targets: y,
                    clean: Some(x),
                })
            }
            (Objective::Detect { target, plan }, Some(state)) => {
                let adv = plan
                    .attack
                    .perturb(&target.attack_target(), x.view(), y.view(), state, &mut self.rng)?;
                let data = Dataset::detection(x.view(), adv.view())?;
                Ok(Prepared {
                    inputs: data.x().clone(),
                    targets: data.y().clone(),
                    clean: None,
                })
            }
            _ => Ok(Prepared {
                inputs: x,
                targets: y,
                clean: None,
            }),
        }
    }

    fn train_epoch(
        &mut self,
        epoch: usize,
        train: &dyn BatchSource,
        attack_state: Option<AttackState>,
    ) -> Result<(SplitMetrics, usize)> {
        let n_features = train.n_features();
        let shuffle = self.settings.shuffle.then_some(&mut self.rng);
        let batches = train.epoch_batches(self.settings.batch_size, shuffle);

        let mut acc = MetricAccumulator::default();
        let mut skipped = 0;
        for (index, batch) in batches.into_iter().enumerate() {
            if let Err(err) = batch.validate(n_features) {
                tracing::warn!(epoch, batch = index, error = %err, "Skipping batch");
                skipped += 1;
                continue;
            }
            let prepared = self.prepare(batch, attack_state)?;

            let (logits, trace) = self.learner.net.forward(prepared.inputs.view())?;
            let (loss, d_logits) = self
                .learner
                .criterion
                .loss_and_grad(logits.view(), prepared.targets.view());

            let disc_step = match (&self.objective, &prepared.clean) {
                (
                    Objective::Classify {
                        regularizer: Some(joint),
                        ..
                    },
                    Some(clean),
                ) => {
                    let data = Dataset::detection(clean.view(), prepared.inputs.view())?;
                    let (disc_loss, grad) = joint.disc.loss_and_grads(data.x().view(), data.y().view())?;
                    Some((disc_loss, grad, joint.alpha))
                }
                _ => None,
            };
            let total = loss + disc_step.as_ref().map_or(0.0, |(l, _, alpha)| alpha * l);
            if !total.is_finite() {
                return Err(FatalTrainingError::Diverged {
                    epoch,
                    batch: index,
                    loss: total,
                }
                .into());
            }

            let grads = self.learner.net.backward(&trace, d_logits)?;
            self.learner
                .optimizer
                .step(self.learner.net.params_mut(), &grads.params)?;
            if let (
                Some((_, mut grad, alpha)),
                Objective::Classify {
                    regularizer: Some(joint),
                    ..
                },
            ) = (disc_step, &mut self.objective)
            {
                grad.iter_mut().for_each(|g| *g *= alpha);
                joint.disc.apply_gradients(&grad)?;
            }

            let probs = self.learner.criterion.probabilities(logits.view());
            acc.push(loss, prepared.targets.view(), probs.view());
        }
        if acc.is_empty() {
            tracing::warn!(epoch, skipped, "No valid batch in epoch");
        }
        Ok((acc.finish()?, skipped))
    }

    fn evaluate_epoch(
        &mut self,
        epoch: usize,
        lr: f32,
        train_metrics: SplitMetrics,
        valid: &Dataset,
        attack_state: Option<AttackState>,
    ) -> Result<MetricSnapshot> {
        let batch_size = self.settings.batch_size;
        let hid_metric = self.settings.metric_hid;
        let net = &self.learner.net;
        let criterion = self.learner.criterion.as_ref();
        let (x, y) = (valid.x().view(), valid.y().view());

        let (valid_metrics, hidden) = match (&self.objective, attack_state) {
            (Objective::Detect { target, plan }, Some(state)) => {
                let adv = attack_in_batches(
                    plan.attack.as_ref(),
                    &target.attack_target(),
                    x,
                    y,
                    state,
                    batch_size,
                    &mut self.rng,
                )?;
                let data = Dataset::detection(x, adv.view())?;
                let split = metrics::evaluate(net, criterion, data.x().view(), data.y().view(), batch_size)?;
                let hidden = split.value(hid_metric);
                (split, hidden)
            }
            (Objective::Classify { plan: Some(plan), regularizer }, Some(state)) => {
                let clean = metrics::evaluate(net, criterion, x, y, batch_size)?;
                let disc = regularizer.as_ref().map(|r| &r.disc);
                let target = AttackTarget::new(net, criterion).with_discriminator(disc);
                let adv = attack_in_batches(
                    plan.attack.as_ref(),
                    &target,
                    x,
                    y,
                    state,
                    batch_size,
                    &mut self.rng,
                )?;
                // Hidden-ness: how well the discriminator spots the attack, or
                // without one, how the classifier holds up under it.
                let hidden = match disc {
                    Some(d) => d.score(x, adv.view(), batch_size)?.value(hid_metric),
                    None => metrics::evaluate(net, criterion, adv.view(), y, batch_size)?.value(hid_metric),
                };
                (clean, hidden)
            }
            _ => {
                let split = metrics::evaluate(net, criterion, x, y, batch_size)?;
                let hidden = split.value(hid_metric);
                (split, hidden)
            }
        };

        Ok(MetricSnapshot {
            epoch,
            lr,
            strength: attack_state.map(|s| s.strength),
            train: train_metrics,
            effect: valid_metrics.value(self.settings.metric_effect),
            valid: valid_metrics,
            hidden,
        })
    }
}

/// Attack `x` chunk by chunk with a fixed budget.
pub fn attack_in_batches(
    attack: &dyn Attack,
    target: &AttackTarget<'_>,
    x: ArrayView2<f32>,
    y: ArrayView1<f32>,
    state: AttackState,
    batch_size: usize,
    rng: &mut StdRng,
) -> Result<Array2<f32>> {
    let step = batch_size.max(1);
    let mut parts = Vec::new();
    let mut start = 0;
    while start < x.nrows() {
        let end = (start + step).min(x.nrows());
        parts.push(attack.perturb(
            target,
            x.slice(s![start..end, ..]),
            y.slice(s![start..end]),
            state,
            rng,
        )?);
        start = end;
    }
    if parts.is_empty() {
        return Ok(x.to_owned());
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    Ok(concatenate(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::{GradientAttack, StepAttackScheduler};
    use crate::data::synthetic;
    use crate::training::callbacks::NoopObserver;
    use advtrain_core::config::Norm;
    use serde_json::json;

    fn config() -> ExperimentConfig {
        let mut cfg = ExperimentConfig::minimal("Synth");
        cfg.dataset.n_train = 64;
        cfg.dataset.n_test = 32;
        cfg.dataset.seq_len = 16;
        cfg.batch_size = 16;
        cfg.model = NamedParams::new("MLP").with("hidden", json!([8]));
        cfg.training.optimizer = NamedParams::new("Adam").with("lr", 0.01);
        cfg.training.n_epochs = 4;
        cfg
    }

    fn data(cfg: &ExperimentConfig) -> (Dataset, Dataset) {
        synthetic::generate(&cfg.dataset, 0).unwrap()
    }

    fn learner(cfg: &ExperimentConfig) -> Learner {
        let mut rng = StdRng::seed_from_u64(1);
        Learner::classifier(&cfg.model, &cfg.training, cfg.dataset.seq_len, 2, &mut rng).unwrap()
    }

    fn clean() -> Objective {
        Objective::Classify {
            plan: None,
            regularizer: None,
        }
    }

    fn plan(eps: f64) -> AdversarialPlan {
        AdversarialPlan {
            attack: Box::new(GradientAttack::fgsm(Norm::Linf)),
            scheduler: Box::new(StepAttackScheduler::new(eps, 2, 0.5, 1).unwrap()),
        }
    }

    #[test]
    fn test_completes_all_epochs() {
        let cfg = config();
        let (train, valid) = data(&cfg);
        let mut lp = TrainingLoop::from_config(&cfg, learner(&cfg), clean(), 0).unwrap();
        assert_eq!(lp.state(), TrainingState::Init);
        let out = lp.run(&train, &valid, &mut NoopObserver).unwrap();
        assert_eq!(out.state, TrainingState::Completed);
        assert_eq!(lp.state(), TrainingState::Completed);
        assert_eq!(out.epochs_run(), 4);
        let h = out.history.snapshots();
        assert!(h.last().unwrap().train.loss < h[0].train.loss);
        assert!(h.iter().all(|s| s.strength.is_none()));
    }

    #[test]
    fn test_large_patience_never_stops_early() {
        let mut cfg = config();
        cfg.training.n_epochs = 3;
        cfg.training.early_stop_patience = Some(900);
        let (train, valid) = data(&cfg);
        let out = TrainingLoop::from_config(&cfg, learner(&cfg), clean(), 0)
            .unwrap()
            .run(&train, &valid, &mut NoopObserver)
            .unwrap();
        assert_eq!(out.state, TrainingState::Completed);
        assert_eq!(out.epochs_run(), 3);
    }

    #[test]
    fn test_stops_patience_epochs_after_last_improvement() {
        let mut cfg = config();
        cfg.training.n_epochs = 10;
        cfg.training.early_stop_patience = Some(2);
        cfg.training.early_stop_min_delta = 1e-6;
        cfg.training.optimizer = NamedParams::new("SGD").with("lr", 1e-30);
        let (train, valid) = data(&cfg);
        let out = TrainingLoop::from_config(&cfg, learner(&cfg), clean(), 0)
            .unwrap()
            .run(&train, &valid, &mut NoopObserver)
            .unwrap();
        // epoch 0 sets the best, epochs 1 and 2 are stale
        assert_eq!(out.state, TrainingState::EarlyStopped(StopReason::Patience));
        assert_eq!(out.epochs_run(), 3);
        assert_eq!(out.best.epoch, 0);
    }

    struct WithEmptyBatch<'a>(&'a Dataset);

    impl BatchSource for WithEmptyBatch<'_> {
        fn n_features(&self) -> usize {
            self.0.n_features()
        }

        fn epoch_batches(&self, batch_size: usize, shuffle: Option<&mut StdRng>) -> Vec<Batch> {
            let mut batches = self.0.epoch_batches(batch_size, shuffle);
            batches.insert(
                1,
                Batch {
                    x: Array2::zeros((0, self.n_features())),
                    y: Array1::zeros(0),
                },
            );
            batches.push(Batch {
                x: Array2::zeros((2, self.n_features() + 1)),
                y: Array1::zeros(2),
            });
            batches
        }
    }

    #[test]
    fn test_invalid_batches_are_skipped() {
        let cfg = config();
        let (train, valid) = data(&cfg);
        let out = TrainingLoop::from_config(&cfg, learner(&cfg), clean(), 0)
            .unwrap()
            .run(&WithEmptyBatch(&train), &valid, &mut NoopObserver)
            .unwrap();
        assert_eq!(out.state, TrainingState::Completed);
        assert_eq!(out.skipped_batches, 2 * cfg.training.n_epochs);
    }

    #[test]
    fn test_divergence_is_fatal() {
        let mut cfg = config();
        cfg.training.optimizer = NamedParams::new("SGD").with("lr", 1e30);
        let (train, valid) = data(&cfg);
        let err = TrainingLoop::from_config(&cfg, learner(&cfg), clean(), 0)
            .unwrap()
            .run(&train, &valid, &mut NoopObserver)
            .unwrap_err();
        assert!(matches!(err, MlError::FatalTraining(_)), "{err}");
    }

    #[test]
    fn test_adversarial_training_follows_schedule() {
        let cfg = config();
        let (train, valid) = data(&cfg);
        let objective = Objective::Classify {
            plan: Some(plan(0.2)),
            regularizer: None,
        };
        let out = TrainingLoop::from_config(&cfg, learner(&cfg), objective, 0)
            .unwrap()
            .run(&train, &valid, &mut NoopObserver)
            .unwrap();
        let strengths: Vec<f32> = out.history.snapshots().iter().filter_map(|s| s.strength).collect();
        assert_eq!(strengths.len(), 4);
        assert!((strengths[0] - 0.2).abs() < 1e-6);
        assert!((strengths[2] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_zero_strength_aborts_run() {
        let cfg = config();
        let (train, valid) = data(&cfg);
        let objective = Objective::Classify {
            plan: Some(plan(0.0)),
            regularizer: None,
        };
        let err = TrainingLoop::from_config(&cfg, learner(&cfg), objective, 0)
            .unwrap()
            .run(&train, &valid, &mut NoopObserver)
            .unwrap_err();
        assert!(matches!(err, MlError::InvalidBounds(_)));
    }

    struct StopAfter(usize);

    impl EpochObserver for StopAfter {
        fn on_epoch_end(&mut self, snapshot: &MetricSnapshot) -> CallbackAction {
            if snapshot.epoch + 1 >= self.0 {
                CallbackAction::Stop
            } else {
                CallbackAction::Continue
            }
        }
    }

    #[test]
    fn test_observer_prunes() {
        let cfg = config();
        let (train, valid) = data(&cfg);
        let out = TrainingLoop::from_config(&cfg, learner(&cfg), clean(), 0)
            .unwrap()
            .run(&train, &valid, &mut StopAfter(2))
            .unwrap();
        assert_eq!(out.state, TrainingState::EarlyStopped(StopReason::Pruned));
        assert_eq!(out.epochs_run(), 2);
    }

    #[test]
    fn test_regularized_training_updates_discriminator() {
        let cfg = config();
        let (train, valid) = data(&cfg);
        let mut rng = StdRng::seed_from_u64(2);
        let disc = Discriminator::new(&cfg.discriminator, cfg.dataset.seq_len, &mut rng).unwrap();
        let before = disc.net().clone();
        let objective = Objective::Classify {
            plan: Some(plan(0.1)),
            regularizer: Some(JointDiscriminator { disc, alpha: 1.0 }),
        };
        let mut lp = TrainingLoop::from_config(&cfg, learner(&cfg), objective, 0).unwrap();
        let out = lp.run(&train, &valid, &mut NoopObserver).unwrap();
        assert_eq!(out.state, TrainingState::Completed);
        let after = lp.objective().regularizer().unwrap().disc.net();
        assert_ne!(after, &before);
        assert!(out.history.snapshots().iter().all(|s| (0.0..=1.0).contains(&s.hidden)));
    }

    #[test]
    fn test_regularizer_requires_plan() {
        let cfg = config();
        let mut rng = StdRng::seed_from_u64(2);
        let disc = Discriminator::new(&cfg.discriminator, cfg.dataset.seq_len, &mut rng).unwrap();
        let objective = Objective::Classify {
            plan: None,
            regularizer: Some(JointDiscriminator { disc, alpha: 1.0 }),
        };
        assert!(TrainingLoop::from_config(&cfg, learner(&cfg), objective, 0).is_err());
    }

    #[test]
    fn test_detector_training() {
        let cfg = config();
        let (train, valid) = data(&cfg);
        // a briefly trained classifier to attack
        let mut lp = TrainingLoop::from_config(&cfg, learner(&cfg), clean(), 0).unwrap();
        lp.run(&train, &valid, &mut NoopObserver).unwrap();
        let (classifier, _) = lp.into_parts();

        let mut rng = StdRng::seed_from_u64(3);
        let detector = Learner::detector(&cfg.discriminator, &cfg.training, cfg.dataset.seq_len, &mut rng).unwrap();
        let objective = Objective::Detect {
            target: FrozenTarget {
                net: classifier.net.clone(),
                criterion: classifier.criterion,
            },
            plan: plan(0.5),
        };
        let mut lp = TrainingLoop::from_config(&cfg, detector, objective, 0).unwrap();
        let out = lp.run(&train, &valid, &mut NoopObserver).unwrap();
        assert_eq!(out.state, TrainingState::Completed);
        assert!((0.0..=1.0).contains(&out.best.valid.report.accuracy));
        assert!(out.history.snapshots().iter().all(|s| s.strength == Some(0.5)));
        match lp.objective() {
            Objective::Detect { target, .. } => assert_eq!(target.net, classifier.net),
            Objective::Classify { .. } => unreachable!(),
        }
    }
}
