use std::{
    error::Error,
    fmt::{self, Display},
};

/// Everything that can be wrong with the configuration of a run, detected before any compute.
#[derive(Debug)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    Parse(serde_json::Error),
    /// A layer declares a `kind` that is not `conv`, `pool` or `fcl`.
    UnknownLayerKind { layer: String, kind: String },
    /// A layer declares an activation other than `none`, `relu` or `sigmoid`.
    UnknownActivation { layer: String, activation: String },
    /// A layer's parameters are missing, mistyped or describe an impossible computation.
    InvalidLayer { layer: String, reason: String },
    /// A convolution or pooling layer follows the first fully connected layer.
    InterleavedLayers { layer: String },
    /// There is no fully connected layer to produce class scores.
    EmptyClassifier,
    UnknownOptimizer(String),
    InvalidHyperparameter(String),
    /// The dataset directory does not follow the `<split>/<class>/<image>` layout.
    DatasetLayout(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "malformed config: {e}"),
            Self::UnknownLayerKind { layer, kind } => {
                write!(f, "layer {layer} has an unknown kind {kind:?}")
            }
            Self::UnknownActivation { layer, activation } => {
                write!(f, "layer {layer} has an unknown activation {activation:?}")
            }
            Self::InvalidLayer { layer, reason } => write!(f, "layer {layer} is invalid: {reason}"),
            Self::InterleavedLayers { layer } => write!(
                f,
                "layer {layer} is a feature layer declared after the first fully connected layer"
            ),
            Self::EmptyClassifier => {
                write!(f, "the architecture needs at least one fully connected layer")
            }
            Self::UnknownOptimizer(name) => write!(
                f,
                "unknown optimizer {name:?}, expected one of adam, sgd, adagrad or rmsprop"
            ),
            Self::InvalidHyperparameter(msg) => write!(f, "invalid hyperparameter: {msg}"),
            Self::DatasetLayout(msg) => write!(f, "invalid dataset layout: {msg}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}
