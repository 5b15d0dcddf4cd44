use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    /// A runtime buffer or tensor does not have the size the model expects.
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// The declared shape of a layer disagrees with the shape flowing into it.
    ShapeMismatch {
        what: String,
        got: usize,
        expected: usize,
    },
    /// A layer's parameters describe an impossible computation.
    InvalidGeometry {
        layer: String,
        reason: &'static str,
    },
    /// A feature layer was declared after the classifier head started.
    InterleavedLayers { layer: String },
    /// The architecture has no fully connected layer to produce class scores.
    EmptyClassifier,
    /// A label is not a valid class index.
    LabelOutOfRange { label: usize, classes: usize },
    /// The loss of a batch became NaN or infinite.
    NonFiniteLoss { batch: usize },
    /// `backward` was called on a layer that has no forward pass cached.
    MissingForward { layer: &'static str },
    /// The optimizer or initializer received an invalid hyperparameter.
    InvalidHyperparameter(String),
    /// An ndarray reshape failed.
    Shape(ShapeError),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "size mismatch for {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch at {what}, got {got} and expected {expected}"
            ),
            MlErr::InvalidGeometry { layer, reason } => {
                write!(f, "layer {layer} is invalid: {reason}")
            }
            MlErr::InterleavedLayers { layer } => write!(
                f,
                "layer {layer} is a feature layer declared after the classifier head"
            ),
            MlErr::EmptyClassifier => {
                write!(f, "the architecture needs at least one fully connected layer")
            }
            MlErr::LabelOutOfRange { label, classes } => {
                write!(f, "label {label} is out of range for {classes} classes")
            }
            MlErr::NonFiniteLoss { batch } => {
                write!(f, "the loss of batch {batch} is not finite")
            }
            MlErr::MissingForward { layer } => {
                write!(f, "tried to run backward on a {layer} layer before forward")
            }
            MlErr::InvalidHyperparameter(msg) => write!(f, "invalid hyperparameter: {msg}"),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}
