use ndarray::{Array2, ArrayView2};

/// A loss over a batch of raw class scores and their integer labels.
pub trait LossFn {
    /// The mean loss of the batch.
    fn loss(&self, y_pred: ArrayView2<f32>, y: &[usize]) -> f32;

    /// The derivative of `loss` with respect to every score of `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: &[usize]) -> Array2<f32>;
}
