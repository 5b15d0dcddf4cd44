use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use machine_learning::{arch::Model, dataset::Dataset};
use ndarray::{Array4, ArrayView1, Axis};

use crate::{checkpoint, error::OrchestratorError};

type Result<T> = std::result::Result<T, OrchestratorError>;

/// A prediction paired with the class names, most likely class first.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class: String,
    pub confidence: f32,
    pub ranked: Vec<(String, f32)>,
}

#[derive(Debug)]
enum EngineState {
    Uninitialized,
    Ready { checkpoint: PathBuf },
}

/// Runs a compiled model with the parameters of a checkpoint.
///
/// The engine starts uninitialized and only predicts once `load_checkpoint` succeeds.
#[derive(Debug)]
pub struct InferenceEngine {
    model: Model,
    classes: Vec<String>,
    state: EngineState,
}

impl InferenceEngine {
    /// Creates a new `InferenceEngine`.
    ///
    /// # Arguments
    /// * `model` - A model compiled from the same architecture as the checkpoints it will load.
    /// * `classes` - The class names, indexed by label.
    pub fn new(model: Model, classes: Vec<String>) -> Result<Self> {
        if classes.len() != model.num_classes() {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "the model scores {} classes but {} class names were given",
                model.num_classes(),
                classes.len()
            )));
        }

        Ok(Self {
            model,
            classes,
            state: EngineState::Uninitialized,
        })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EngineState::Ready { .. })
    }

    /// The checkpoint currently applied, if any.
    pub fn checkpoint(&self) -> Option<&Path> {
        match &self.state {
            EngineState::Uninitialized => None,
            EngineState::Ready { checkpoint } => Some(checkpoint),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Applies a checkpoint's parameters, making the engine ready.
    ///
    /// A failed load leaves the engine in its previous state.
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        checkpoint::load(&mut self.model, path)?;

        log::info!("loaded checkpoint {}", path.display());
        self.state = EngineState::Ready {
            checkpoint: path.to_path_buf(),
        };
        Ok(())
    }

    fn model(&mut self) -> Result<&mut Model> {
        match self.state {
            EngineState::Uninitialized => Err(OrchestratorError::NotReady),
            EngineState::Ready { .. } => Ok(&mut self.model),
        }
    }

    /// Class probabilities for a single `(1, C, H, W)` input.
    ///
    /// # Returns
    /// One probability per class, in label order, summing to one.
    pub fn predict(&mut self, x: Array4<f32>) -> Result<Vec<f32>> {
        let batch = x.len_of(Axis(0));
        if batch != 1 {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "predict takes a single input, got a batch of {batch}"
            )));
        }

        let probs = self.model()?.predict_proba(x)?;
        Ok(probs.into_iter().collect())
    }

    /// Like `predict`, with every probability paired with its class name.
    pub fn classify(&mut self, x: Array4<f32>) -> Result<Classification> {
        let probs = self.predict(x)?;

        let mut ranked: Vec<_> = self.classes.iter().cloned().zip(probs).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (class, confidence) = ranked[0].clone();
        Ok(Classification {
            class,
            confidence,
            ranked,
        })
    }

    /// The fraction of samples of `dataset` whose most likely class is their label.
    ///
    /// # Returns
    /// A value in `[0, 1]`, or `None` if the dataset is empty.
    pub fn evaluate(&mut self, dataset: &Dataset, batch_size: NonZeroUsize) -> Result<Option<f32>> {
        let model = self.model()?;

        let mut correct = 0;
        let mut total = 0;
        for (x, y) in dataset.batches(batch_size) {
            let scores = model.forward(x)?;

            for (row, &label) in scores.outer_iter().zip(&y) {
                if argmax(row) == label {
                    correct += 1;
                }
            }
            total += y.len();
        }

        if total == 0 {
            log::warn!("evaluated an empty split");
            return Ok(None);
        }

        Ok(Some(correct as f32 / total as f32))
    }
}

/// The index of the first maximum of a row.
fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}
