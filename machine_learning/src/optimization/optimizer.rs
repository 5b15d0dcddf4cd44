use super::{Adagrad, Adam, GradientDescent, RmsProp};
use crate::{MlErr, Result, specs::OptimizerSpec};

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates the provided parameters using the gradient of the last batch.
    ///
    /// # Arguments
    /// * `params` - The parameters to update.
    /// * `grad` - The model's gradient.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `params`, `grad` or the optimizer's state.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        (**self).update_params(params, grad)
    }
}

/// Builds the optimizer described by `spec` for a model of `len` parameters.
///
/// # Errors
/// `InvalidHyperparameter` if the learning rate is negative or not finite.
pub fn from_spec(spec: OptimizerSpec, len: usize) -> Result<Box<dyn Optimizer>> {
    let lr = spec.learning_rate();
    if !lr.is_finite() || lr < 0. {
        return Err(MlErr::InvalidHyperparameter(format!(
            "learning rate must be a finite non negative number, got {lr}"
        )));
    }

    let optimizer: Box<dyn Optimizer> = match spec {
        OptimizerSpec::Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
        OptimizerSpec::GradientDescent { learning_rate } => {
            Box::new(GradientDescent::new(learning_rate))
        }
        OptimizerSpec::Adagrad {
            learning_rate,
            epsilon,
        } => Box::new(Adagrad::new(len, learning_rate, epsilon)),
        OptimizerSpec::RmsProp {
            learning_rate,
            alpha,
            epsilon,
        } => Box::new(RmsProp::new(len, learning_rate, alpha, epsilon)),
    };

    Ok(optimizer)
}

/// Checks that the parameters, the gradient and any per parameter state agree in length.
pub(super) fn check_sizes(params: &[f32], grad: &[f32], state: usize) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    if state != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "optimizer state",
            got: state,
            expected: params.len(),
        });
    }

    Ok(())
}
