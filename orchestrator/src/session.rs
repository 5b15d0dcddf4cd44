use std::{
    path::{Path, PathBuf},
    sync::mpsc::Sender,
};

use machine_learning::{
    arch::{Model, loss::CrossEntropy},
    dataset::Dataset,
    initialization::generate_rng,
    optimization::{self, Optimizer},
    specs::TrainingSpec,
};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::{self, CheckpointStore},
    configs::ConfigError,
    error::OrchestratorError,
};

type Result<T> = std::result::Result<T, OrchestratorError>;

/// The per epoch losses of a run, ready to be plotted downstream.
///
/// `train[i]` and `validation[i]` belong to epoch `first_epoch + i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    #[serde(default = "default_first_epoch")]
    pub first_epoch: usize,
    pub train: Vec<f32>,
    pub validation: Vec<f32>,
}

fn default_first_epoch() -> usize {
    1
}

impl Default for LossHistory {
    fn default() -> Self {
        Self::starting_at(default_first_epoch())
    }
}

impl LossHistory {
    /// An empty history whose first recorded epoch will be `first_epoch`.
    pub fn starting_at(first_epoch: usize) -> Self {
        Self {
            first_epoch,
            train: Vec::new(),
            validation: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }

    /// The last epoch with a recorded loss, `first_epoch - 1` when empty.
    pub fn last_epoch(&self) -> usize {
        (self.first_epoch + self.len()).saturating_sub(1)
    }

    /// Keeps the history of a run resumed after `epoch`, or `None` if it does not reach that
    /// epoch.
    fn resumed_at(mut self, epoch: usize) -> Option<Self> {
        if self.first_epoch > epoch + 1 || self.last_epoch() < epoch {
            return None;
        }

        let keep = epoch + 1 - self.first_epoch;
        self.train.truncate(keep);
        self.validation.truncate(keep);
        Some(self)
    }
}

/// Progress notifications published while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    EpochFinished {
        epoch: usize,
        total_epochs: usize,
        train_loss: f32,
        val_loss: f32,
    },
    CheckpointSaved {
        /// `None` for the final snapshot.
        epoch: Option<usize>,
        path: PathBuf,
    },
    Finished {
        history: LossHistory,
        checkpoint: PathBuf,
    },
}

/// What a completed session hands back to its caller.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub model: Model,
    pub history: LossHistory,
    pub epoch_checkpoints: Vec<PathBuf>,
    pub final_checkpoint: PathBuf,
}

/// One run of the epoch loop. It owns the only reference to its model while training.
pub struct TrainingSession {
    model: Model,
    optimizer: Box<dyn Optimizer>,
    spec: TrainingSpec,
    store: CheckpointStore,
    rng: StdRng,
    completed_epochs: usize,
    history: LossHistory,
    events: Option<Sender<TrainingEvent>>,
}

impl TrainingSession {
    /// Creates a new `TrainingSession`.
    ///
    /// # Arguments
    /// * `model` - A freshly compiled model.
    /// * `spec` - The validated hyperparameters.
    /// * `store` - Where checkpoints and the loss history are written.
    pub fn new(model: Model, spec: TrainingSpec, store: CheckpointStore) -> Result<Self> {
        let optimizer = optimization::from_spec(spec.optimizer, model.size())?;

        Ok(Self {
            model,
            optimizer,
            spec,
            store,
            rng: generate_rng(spec.seed),
            completed_epochs: 0,
            history: LossHistory::default(),
            events: None,
        })
    }

    /// Publishes a `TrainingEvent` on `events` for every epoch, checkpoint and for the end of
    /// the run.
    pub fn with_events(mut self, events: Sender<TrainingEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Restarts from the checkpoint written at the end of `epoch`.
    ///
    /// The session then runs the remaining epochs, numbered from `epoch + 1`. The losses of the
    /// first `epoch` epochs are taken from the loss history of the results directory when it
    /// covers them, otherwise the history starts at `epoch + 1`. The optimizer state is not part
    /// of a checkpoint and starts fresh.
    pub fn resume(mut self, checkpoint: impl AsRef<Path>, epoch: usize) -> Result<Self> {
        let total = self.spec.epochs.get();
        if epoch > total {
            return Err(ConfigError::InvalidHyperparameter(format!(
                "cannot resume from epoch {epoch} of a {total} epoch run"
            ))
            .into());
        }

        checkpoint::load(&mut self.model, checkpoint.as_ref())?;
        log::info!(
            "resuming from {} after epoch {epoch}",
            checkpoint.as_ref().display()
        );

        let previous = self
            .store
            .load_history()?
            .and_then(|history| history.resumed_at(epoch));
        self.history = previous.unwrap_or_else(|| {
            log::warn!(
                "no loss history covers epoch {epoch}, recording from epoch {}",
                epoch + 1
            );
            LossHistory::starting_at(epoch + 1)
        });

        self.completed_epochs = epoch;
        Ok(self)
    }

    /// Runs every remaining epoch: a training pass, a validation pass and a checkpoint.
    ///
    /// # Arguments
    /// * `train` - The training split, reshuffled every epoch when `shuffle` is set.
    /// * `valid` - The validation split, may be empty.
    ///
    /// # Returns
    /// The trained model and its loss history, or the first error found, in which case the
    /// checkpoints of the finished epochs remain on disk.
    pub fn run(mut self, train: &mut Dataset, valid: &Dataset) -> Result<TrainingOutcome> {
        self.check_shapes(train, valid)?;

        let total = self.spec.epochs.get();
        let batch_size = self.spec.batch_size;
        let mut history = std::mem::take(&mut self.history);
        let mut epoch_checkpoints = Vec::new();

        log::info!(
            "training {} parameters on {} samples, validating on {}",
            self.model.size(),
            train.len(),
            valid.len()
        );

        for epoch in self.completed_epochs + 1..=total {
            if self.spec.shuffle {
                train.shuffle(&mut self.rng);
            }

            let train_loss =
                self.model
                    .backprop(&CrossEntropy, &mut *self.optimizer, train.batches(batch_size))?;
            let val_loss = self
                .model
                .validate(&CrossEntropy, valid.batches(batch_size))?;

            log::info!("epoch {epoch}/{total} - train loss {train_loss} - val loss {val_loss}");
            history.train.push(train_loss);
            history.validation.push(val_loss);
            self.emit(TrainingEvent::EpochFinished {
                epoch,
                total_epochs: total,
                train_loss,
                val_loss,
            });

            let path = self.store.save_epoch(&self.model, epoch)?;
            self.emit(TrainingEvent::CheckpointSaved {
                epoch: Some(epoch),
                path: path.clone(),
            });
            epoch_checkpoints.push(path);
        }

        let final_checkpoint = self.store.save_final(&self.model)?;
        self.emit(TrainingEvent::CheckpointSaved {
            epoch: None,
            path: final_checkpoint.clone(),
        });

        self.store.save_history(&history)?;
        self.emit(TrainingEvent::Finished {
            history: history.clone(),
            checkpoint: final_checkpoint.clone(),
        });

        Ok(TrainingOutcome {
            model: self.model,
            history,
            epoch_checkpoints,
            final_checkpoint,
        })
    }

    /// Makes sure both splits match the model before the first batch, running a dummy forward
    /// pass through the feature stage.
    fn check_shapes(&mut self, train: &Dataset, valid: &Dataset) -> Result<()> {
        check_train_split(train)?;
        let expected = self.model.input_shape().dim();

        for (split, dataset) in [("train", train), ("validation", valid)] {
            let got = dataset.sample_dim();
            if got != expected {
                return Err(OrchestratorError::ShapeMismatch(format!(
                    "{split} samples are {got:?} and the model expects {expected:?}"
                )));
            }
        }

        let width = self.model.flatten_width()?;
        log::debug!("feature stage flattens to {width} values");
        Ok(())
    }

    fn emit(&self, event: TrainingEvent) {
        let Some(events) = &self.events else {
            return;
        };

        if events.send(event).is_err() {
            log::debug!("training event receiver hung up");
        }
    }
}

/// The train loss is a mean over the train samples, so there must be at least one.
pub(crate) fn check_train_split(train: &Dataset) -> Result<()> {
    if train.is_empty() {
        return Err(ConfigError::DatasetLayout("the train split has no samples".to_string()).into());
    }

    Ok(())
}
