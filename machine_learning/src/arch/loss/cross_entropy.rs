use ndarray::{Array2, ArrayView2, Axis};

use super::LossFn;

/// Categorical cross entropy over logits, the softmax is applied internally.
#[derive(Default, Clone, Copy, Debug)]
pub struct CrossEntropy;

impl CrossEntropy {
    pub fn new() -> Self {
        Self
    }
}

/// Row wise softmax, shifted by each row's maximum so large scores do not overflow.
pub fn softmax(y_pred: ArrayView2<f32>) -> Array2<f32> {
    let mut out = y_pred.to_owned();

    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }

    out
}

impl LossFn for CrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: &[usize]) -> f32 {
        let n = y_pred.nrows();
        if n == 0 {
            return 0.;
        }

        let total: f32 = y_pred
            .axis_iter(Axis(0))
            .zip(y)
            .map(|(row, &label)| {
                let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
                let log_sum = row.mapv(|v| (v - max).exp()).sum().ln() + max;
                log_sum - row[label]
            })
            .sum();

        total / n as f32
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: &[usize]) -> Array2<f32> {
        let n = y_pred.nrows().max(1) as f32;
        let mut d = softmax(y_pred);

        for (mut row, &label) in d.axis_iter_mut(Axis(0)).zip(y) {
            row[label] -= 1.;
        }

        d / n
    }
}
