mod adapter;
mod error;
mod model;
mod training;

pub use adapter::Adapter;
pub use error::ConfigError;
pub use model::{ArchitectureConfig, LayerConfig};
pub use training::{OptimizerKind, TrainingConfig};
