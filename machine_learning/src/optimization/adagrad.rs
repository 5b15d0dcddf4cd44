use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// Adagrad scales each step by the inverse root of the accumulated squared gradients.
#[derive(Debug)]
pub struct Adagrad {
    learning_rate: f32,
    epsilon: f32,
    acc: Box<[f32]>,
}

impl Adagrad {
    pub fn new(len: usize, learning_rate: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            epsilon,
            acc: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for Adagrad {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        check_sizes(params, grad, self.acc.len())?;

        let lr = self.learning_rate;
        let eps = self.epsilon;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.acc.iter_mut())
            .for_each(|((p, g), acc)| {
                *acc += g.powi(2);
                *p -= lr * g / (acc.sqrt() + eps);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_shrink() {
        let mut optimizer = Adagrad::new(1, 1., 1e-10);
        let mut params = [0.];

        optimizer.update_params(&mut params, &[2.]).unwrap();
        let first = -params[0];
        optimizer.update_params(&mut params, &[2.]).unwrap();
        let second = -params[0] - first;

        assert!((first - 1.).abs() < 1e-6);
        assert!(second < first);
    }
}
