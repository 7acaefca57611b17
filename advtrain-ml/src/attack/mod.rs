//! Adversarial attacks and the schedules that set their strength per epoch.

pub mod attacker;
pub mod scheduler;

pub use attacker::{Attack, AttackTarget, GradientAttack, build_attack, check_bounds};
pub use scheduler::{
    AttackScheduler, AttackState, ConstantAttackScheduler, StepAttackScheduler,
    build_attack_scheduler,
};

/// An attack paired with the schedule that drives it.
pub struct AdversarialPlan {
    pub attack: Box<dyn Attack>,
    pub scheduler: Box<dyn AttackScheduler>,
}

impl AdversarialPlan {
    pub fn from_config(
        attack: &advtrain_core::AttackConfig,
        schedule: &advtrain_core::NamedParams,
    ) -> Result<Self, advtrain_core::ConfigError> {
        Ok(Self {
            attack: build_attack(attack)?,
            scheduler: build_attack_scheduler(schedule, attack)?,
        })
    }

    pub fn state(&self, epoch: usize) -> AttackState {
        self.scheduler.state(epoch)
    }
}
