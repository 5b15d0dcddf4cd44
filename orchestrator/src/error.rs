use std::{fmt, io, path::PathBuf};

use machine_learning::MlErr;
use safetensors::SafeTensorError;

use crate::configs::ConfigError;

/// All errors that can occur while compiling, training or running a model.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before any compute starts.
    Configuration(ConfigError),
    /// A layer, the flatten stage or a checkpoint disagrees with the compiled model's shapes.
    ShapeMismatch(String),
    /// Inference was attempted before a checkpoint was loaded.
    NotReady,
    /// Reading or writing a file failed.
    Io(io::Error),
    /// A checkpoint file could not be encoded or decoded.
    Checkpoint(SafeTensorError),
    /// An image of the dataset could not be decoded.
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    /// A batch produced a non finite loss, the session is aborted.
    Numerical(MlErr),
    /// Any other failure of the numeric core.
    Model(MlErr),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "configuration error: {e}"),
            Self::ShapeMismatch(msg) => write!(f, "shape mismatch: {msg}"),
            Self::NotReady => write!(f, "no checkpoint has been loaded yet"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Checkpoint(e) => write!(f, "checkpoint error: {e}"),
            Self::Image { path, source } => {
                write!(f, "cannot decode image {}: {source}", path.display())
            }
            Self::Numerical(e) => write!(f, "numerical failure: {e}"),
            Self::Model(e) => write!(f, "model error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Configuration(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            Self::Image { source, .. } => Some(source),
            Self::Numerical(e) | Self::Model(e) => Some(e),
            Self::ShapeMismatch(_) | Self::NotReady => None,
        }
    }
}

impl From<ConfigError> for OrchestratorError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e)
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SafeTensorError> for OrchestratorError {
    fn from(e: SafeTensorError) -> Self {
        Self::Checkpoint(e)
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        match e {
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => Self::ShapeMismatch(format!("{what}, got {got} and expected {expected}")),
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => Self::ShapeMismatch(format!("{what}, got {got} and expected {expected}")),
            MlErr::InterleavedLayers { layer } => {
                Self::Configuration(ConfigError::InterleavedLayers { layer })
            }
            MlErr::EmptyClassifier => Self::Configuration(ConfigError::EmptyClassifier),
            MlErr::InvalidGeometry { layer, reason } => {
                Self::Configuration(ConfigError::InvalidLayer {
                    layer,
                    reason: reason.to_string(),
                })
            }
            MlErr::InvalidHyperparameter(msg) => {
                Self::Configuration(ConfigError::InvalidHyperparameter(msg))
            }
            e @ MlErr::NonFiniteLoss { .. } => Self::Numerical(e),
            e => Self::Model(e),
        }
    }
}
