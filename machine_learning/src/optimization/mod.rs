mod adagrad;
mod adam;
mod gradient_descent;
mod optimizer;
mod rms_prop;

pub use adagrad::Adagrad;
pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use optimizer::{Optimizer, from_spec};
pub use rms_prop::RmsProp;
