pub mod checkpoint;
pub mod configs;
pub mod data;
pub mod error;
pub mod inference;
pub mod session;

use std::path::Path;

use machine_learning::{arch::{Model, ModelBuilder}, specs::InputShape};

use configs::{Adapter, ArchitectureConfig, TrainingConfig};
use data::Splits;

pub use checkpoint::CheckpointStore;
pub use error::OrchestratorError;
pub use inference::{Classification, InferenceEngine};
pub use session::{LossHistory, TrainingEvent, TrainingOutcome, TrainingSession};

/// Compiles an architecture description into a model for `num_classes` classes.
///
/// # Arguments
/// * `architecture` - The ordered layer description.
/// * `input_shape` - The shape of every sample the model will receive.
/// * `num_classes` - The amount of classes, the last fully connected layer must output this many.
/// * `seed` - An optional seed for the parameter initialization.
///
/// # Errors
/// `Configuration` for unknown kinds, activations or misplaced layers, `ShapeMismatch` when the
/// layer sizes do not chain.
pub fn compile(
    architecture: &ArchitectureConfig,
    input_shape: InputShape,
    num_classes: usize,
    seed: Option<u64>,
) -> Result<Model, OrchestratorError> {
    let layers = Adapter::new().adapt_architecture(architecture)?;
    let model = ModelBuilder::new(input_shape, num_classes).build(&layers, seed)?;

    log::info!(
        "compiled {} layers into {} parameters",
        layers.len(),
        model.size()
    );
    Ok(model)
}

/// Trains a freshly compiled model on the `train` split, validating on `valid`.
///
/// Every config and the train split are validated before any file is written or any batch is
/// processed.
///
/// # Arguments
/// * `architecture` - The ordered layer description.
/// * `training` - The hyperparameters.
/// * `splits` - The loaded dataset, its class list sets the amount of classes.
/// * `results` - The directory for checkpoints and the loss history.
pub fn train(
    architecture: &ArchitectureConfig,
    training: &TrainingConfig,
    splits: &mut Splits,
    results: impl AsRef<Path>,
) -> Result<TrainingOutcome, OrchestratorError> {
    log::info!("adapting configs");
    let spec = Adapter::new().adapt_training(training)?;

    session::check_train_split(&splits.train)?;

    let (c, h, w) = splits.train.sample_dim();
    let model = compile(
        architecture,
        InputShape::new(c, h, w),
        splits.classes.len(),
        spec.seed,
    )?;

    let store = CheckpointStore::new(results.as_ref())?;
    let session = TrainingSession::new(model, spec, store)?;
    session.run(&mut splits.train, &splits.valid)
}
