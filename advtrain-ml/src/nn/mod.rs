//! Dense networks, training criteria, optimizers, and learning-rate schedules.
//!
//! Every component is built from a `{name, params}` pair through a small
//! registry function; unknown names fail with a configuration error before any
//! training starts.

pub mod dense;
pub mod loss;
pub mod optimizer;
pub mod schedule;

pub use dense::{Activation, DenseNet, ForwardTrace, Gradients, ModelSpec};
pub use loss::{BinaryCrossEntropy, Criterion, CrossEntropy, build_criterion};
pub use optimizer::{Adam, Optimizer, Sgd, build_optimizer};
pub use schedule::{LrScheduler, build_lr_scheduler, step_decay};

use advtrain_core::{ConfigError, NamedParams};
use rand::Rng;

/// Resolve a model registry entry into an architecture.
pub fn model_spec(
    params: &NamedParams,
    input_dim: usize,
    output_dim: usize,
) -> Result<ModelSpec, ConfigError> {
    let activation = {
        let raw = params.str_or("activation", "relu")?;
        Activation::parse(&raw)
            .ok_or_else(|| ConfigError::unknown("activation", raw.clone()))?
    };
    let hidden = match params.name.as_str() {
        "MLP" | "mlp" => params.usize_list_or("hidden", &[64, 32])?,
        "Logistic" | "logistic" | "Linear" | "linear" => Vec::new(),
        other => return Err(ConfigError::unknown("model", other)),
    };
    if hidden.contains(&0) {
        return Err(ConfigError::invalid(
            format!("{}.hidden", params.name),
            "layer widths must be positive",
        ));
    }
    Ok(ModelSpec {
        arch: params.name.clone(),
        input_dim,
        hidden,
        output_dim,
        activation,
    })
}

/// Build a freshly initialized network from a registry entry.
pub fn build_model<R: Rng + ?Sized>(
    params: &NamedParams,
    input_dim: usize,
    output_dim: usize,
    rng: &mut R,
) -> Result<DenseNet, ConfigError> {
    Ok(DenseNet::new(model_spec(params, input_dim, output_dim)?, rng))
}
