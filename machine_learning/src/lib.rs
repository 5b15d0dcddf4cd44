pub mod arch;
pub mod dataset;
pub mod error;
pub mod initialization;
pub mod optimization;
mod params;
pub mod specs;

pub use error::{MlErr, Result};
