use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result};

/// A fully connected layer.
///
/// Its parameters are laid out as an `(out, in)` row major weight matrix followed by `out`
/// biases, so `forward` computes `x · wᵀ + b`.
#[derive(Clone, Debug)]
pub struct Dense {
    name: String,
    dim: (usize, usize),
    size: usize,

    // Forward metadata
    x: Option<Array2<f32>>,
}

impl Dense {
    /// Creates a new `Dense`.
    ///
    /// # Arguments
    /// * `name` - The name of the layer.
    /// * `dim` - The `(in, out)` dimensions of the layer.
    pub fn new(name: impl Into<String>, dim: (usize, usize)) -> Self {
        Self {
            name: name.into(),
            dim,
            size: (dim.0 + 1) * dim.1,
            x: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `(in, out)` dimensions of this layer.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Makes a forward pass through the layer, remembering its input for `backward` when
    /// `train` is set.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `x` - A `(batch, in)` input.
    /// * `train` - Whether a backward pass will follow.
    ///
    /// # Returns
    /// The `(batch, out)` output of the layer.
    pub fn forward(&mut self, params: &[f32], x: Array2<f32>, train: bool) -> Result<Array2<f32>> {
        let (n, m) = self.dim;
        if x.ncols() != n {
            return Err(MlErr::SizeMismatch {
                what: "dense input features",
                got: x.ncols(),
                expected: n,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), m));
        linalg::general_mat_mul(1.0, &x, &w.t(), 0.0, &mut z);
        z += &b;

        self.x = train.then_some(x);
        Ok(z)
    }

    /// Writes this layer's gradient and propagates the delta to the previous layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's slice of the gradient, overwritten.
    /// * `d` - The `(batch, out)` delta coming from the next layer.
    ///
    /// # Returns
    /// The `(batch, in)` delta for the previous layer.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let x = self
            .x
            .take()
            .ok_or(MlErr::MissingForward { layer: "dense" })?;

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &d.t(), &x, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        let mut dx = Array2::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w, 0.0, &mut dx);

        Ok(dx)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let (n, m) = self.dim;
        let (dw_raw, db_raw) = grad.split_at_mut(n * m);
        let dw = ArrayViewMut2::from_shape((m, n), dw_raw)?;
        let db = ArrayViewMut1::from_shape(m, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "dense parameters",
                got: params.len(),
                expected: self.size,
            });
        }

        let (n, m) = self.dim;
        let (w_raw, b_raw) = params.split_at(n * m);
        let w = ArrayView2::from_shape((m, n), w_raw)?;
        let b = ArrayView1::from_shape(m, b_raw)?;
        Ok((w, b))
    }
}
