mod activation;
mod conv;
mod dense;
mod layer;
mod pool;

pub use activation::Activation;
pub use conv::Conv;
pub use dense::Dense;
pub use layer::{ClassifierLayer, FeatureLayer};
pub use pool::MaxPool;
