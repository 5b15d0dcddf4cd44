use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// RMSProp keeps an exponential moving average of the squared gradients.
#[derive(Debug)]
pub struct RmsProp {
    learning_rate: f32,
    alpha: f32,
    epsilon: f32,
    sq: Box<[f32]>,
}

impl RmsProp {
    pub fn new(len: usize, learning_rate: f32, alpha: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            alpha,
            epsilon,
            sq: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for RmsProp {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        check_sizes(params, grad, self.sq.len())?;

        let Self {
            learning_rate: lr,
            alpha,
            epsilon: eps,
            ..
        } = *self;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.sq.iter_mut())
            .for_each(|((p, g), sq)| {
                *sq = alpha * *sq + (1. - alpha) * g.powi(2);
                *p -= lr * g / (sq.sqrt() + eps);
            });

        Ok(())
    }
}
