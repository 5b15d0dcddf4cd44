use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result};

/// A 2d convolution with stride 1 and symmetric zero padding.
///
/// Its parameters are an `(out, in, k, k)` weight tensor followed by `out` biases. Each sample is
/// unrolled into a column matrix so the convolution becomes a single matrix product.
#[derive(Clone, Debug)]
pub struct Conv {
    name: String,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    padding: usize,
    size: usize,

    // Forward metadata
    cols: Vec<Array2<f32>>,
    in_dim: Option<(usize, usize)>,
}

impl Conv {
    /// Creates a new `Conv`.
    ///
    /// # Arguments
    /// * `name` - The name of the layer.
    /// * `in_channels` - The channels of the incoming tensor.
    /// * `out_channels` - The amount of filters.
    /// * `kernel_size` - The side of the square kernel.
    /// * `padding` - The zeros added on every border.
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: usize,
    ) -> Self {
        let fan_in = in_channels * kernel_size * kernel_size;

        Self {
            name: name.into(),
            in_channels,
            out_channels,
            kernel_size,
            padding,
            size: (fan_in + 1) * out_channels,
            cols: Vec::new(),
            in_dim: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The amount of inputs feeding each output value.
    pub fn fan_in(&self) -> usize {
        self.in_channels * self.kernel_size * self.kernel_size
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    /// The spatial size of the output for an `(h, w)` input, `None` if it would be empty.
    pub fn out_dim(&self, (h, w): (usize, usize)) -> Option<(usize, usize)> {
        let k = self.kernel_size;
        let p = self.padding;
        let oh = (h + 2 * p + 1).checked_sub(k).filter(|&oh| oh > 0)?;
        let ow = (w + 2 * p + 1).checked_sub(k).filter(|&ow| ow > 0)?;
        Some((oh, ow))
    }

    /// Makes a forward pass through the layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `x` - A `(batch, in_channels, h, w)` input.
    ///
    /// # Returns
    /// The `(batch, out_channels, oh, ow)` output.
    pub fn forward(&mut self, params: &[f32], x: Array4<f32>, train: bool) -> Result<Array4<f32>> {
        let (n, c, h, w) = x.dim();
        if c != self.in_channels {
            return Err(MlErr::SizeMismatch {
                what: "convolution input channels",
                got: c,
                expected: self.in_channels,
            });
        }

        let (oh, ow) = self.out_dim((h, w)).ok_or_else(|| MlErr::InvalidGeometry {
            layer: self.name.clone(),
            reason: "kernel is larger than the padded input",
        })?;

        let (weights, bias) = self.view_params(params)?;
        let oc = self.out_channels;
        let mut out = Array4::zeros((n, oc, oh, ow));

        self.cols.clear();
        for (sample, mut out) in x.outer_iter().zip(out.outer_iter_mut()) {
            let cols = self.im2col(sample, (oh, ow));

            let mut z = Array2::zeros((oc, oh * ow));
            linalg::general_mat_mul(1.0, &weights, &cols, 0.0, &mut z);
            z += &bias.insert_axis(Axis(1));

            out.assign(&z.into_shape_with_order((oc, oh, ow))?);
            if train {
                self.cols.push(cols);
            }
        }

        self.in_dim = train.then_some((h, w));
        Ok(out)
    }

    /// Writes this layer's gradient and propagates the delta to the previous layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's slice of the gradient, overwritten.
    /// * `d` - The `(batch, out_channels, oh, ow)` delta coming from the next layer.
    ///
    /// # Returns
    /// The `(batch, in_channels, h, w)` delta for the previous layer.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        let (h, w) = self
            .in_dim
            .take()
            .ok_or(MlErr::MissingForward { layer: "convolution" })?;

        let cols = std::mem::take(&mut self.cols);
        let (n, oc, oh, ow) = d.dim();
        if cols.len() != n {
            return Err(MlErr::SizeMismatch {
                what: "convolution delta batch",
                got: n,
                expected: cols.len(),
            });
        }

        let (weights, _) = self.view_params(params)?;
        let (mut dw, mut db) = self.view_grad(grad)?;
        dw.fill(0.);
        db.fill(0.);

        let mut dx = Array4::zeros((n, self.in_channels, h, w));

        for ((d, cols), mut dx) in d.outer_iter().zip(&cols).zip(dx.outer_iter_mut()) {
            let d = d.to_shape((oc, oh * ow))?;

            linalg::general_mat_mul(1.0, &d, &cols.t(), 1.0, &mut dw);
            db += &d.sum_axis(Axis(1));

            let mut dcols = Array2::zeros(cols.dim());
            linalg::general_mat_mul(1.0, &weights.t(), &d, 0.0, &mut dcols);
            self.col2im(&dcols, dx.view_mut(), (oh, ow));
        }

        Ok(dx)
    }

    /// Unrolls every receptive field of `x` into a column.
    ///
    /// Row `(ci * k + ki) * k + kj` holds the kernel tap `(ci, ki, kj)` and column `oy * ow + ox`
    /// the output position it contributes to.
    fn im2col(&self, x: ArrayView3<f32>, (oh, ow): (usize, usize)) -> Array2<f32> {
        let (c, h, w) = x.dim();
        let k = self.kernel_size;
        let p = self.padding;
        let mut cols = Array2::zeros((c * k * k, oh * ow));

        for ci in 0..c {
            for ki in 0..k {
                for kj in 0..k {
                    let row = (ci * k + ki) * k + kj;

                    for oy in 0..oh {
                        let Some(iy) = (oy + ki).checked_sub(p).filter(|&iy| iy < h) else {
                            continue;
                        };

                        for ox in 0..ow {
                            let Some(ix) = (ox + kj).checked_sub(p).filter(|&ix| ix < w) else {
                                continue;
                            };

                            cols[[row, oy * ow + ox]] = x[[ci, iy, ix]];
                        }
                    }
                }
            }
        }

        cols
    }

    /// Folds a column matrix back onto the input, accumulating overlapping taps.
    fn col2im(&self, cols: &Array2<f32>, mut dx: ArrayViewMut3<f32>, (oh, ow): (usize, usize)) {
        let (c, h, w) = dx.dim();
        let k = self.kernel_size;
        let p = self.padding;

        for ci in 0..c {
            for ki in 0..k {
                for kj in 0..k {
                    let row = (ci * k + ki) * k + kj;

                    for oy in 0..oh {
                        let Some(iy) = (oy + ki).checked_sub(p).filter(|&iy| iy < h) else {
                            continue;
                        };

                        for ox in 0..ow {
                            let Some(ix) = (ox + kj).checked_sub(p).filter(|&ix| ix < w) else {
                                continue;
                            };

                            dx[[ci, iy, ix]] += cols[[row, oy * ow + ox]];
                        }
                    }
                }
            }
        }
    }

    /// Views the parameters as an `(out, in * k * k)` weight matrix and the biases.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "convolution parameters",
                got: params.len(),
                expected: self.size,
            });
        }

        let (w_raw, b_raw) = params.split_at(self.out_channels * self.fan_in());
        let w = ArrayView2::from_shape((self.out_channels, self.fan_in()), w_raw)?;
        let b = ArrayView1::from_shape(self.out_channels, b_raw)?;
        Ok((w, b))
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        if grad.len() != self.size {
            return Err(MlErr::SizeMismatch {
                what: "convolution gradient",
                got: grad.len(),
                expected: self.size,
            });
        }

        let (dw_raw, db_raw) = grad.split_at_mut(self.out_channels * self.fan_in());
        let dw = ArrayViewMut2::from_shape((self.out_channels, self.fan_in()), dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.out_channels, db_raw)?;
        Ok((dw, db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_keeps_spatial_size() {
        let conv = Conv::new("conv1", 3, 16, 3, 1);

        assert_eq!(conv.out_dim((128, 128)), Some((128, 128)));
        assert_eq!(conv.size(), 16 * 3 * 3 * 3 + 16);
    }

    #[test]
    fn oversized_kernel_has_no_output() {
        let conv = Conv::new("conv1", 1, 1, 5, 0);
        assert_eq!(conv.out_dim((4, 4)), None);
    }

    #[test]
    fn forward_sums_the_window() {
        // A single all ones 2x2 filter with bias 1 over a 1x3x3 input.
        let mut conv = Conv::new("conv1", 1, 1, 2, 0);
        let params = [1., 1., 1., 1., 1.];
        let x = Array::from_shape_vec((1, 1, 3, 3), (1..=9).map(|v| v as f32).collect()).unwrap();

        let y = conv.forward(&params, x, true).unwrap();

        let expected = Array::from_shape_vec((1, 1, 2, 2), vec![13., 17., 25., 29.]).unwrap();
        assert_eq!(y, expected);
    }

    #[test]
    fn padding_reads_zeros() {
        let mut conv = Conv::new("conv1", 1, 1, 3, 1);
        let mut params = [0.; 10];
        // Only the center tap is set, so the output equals the input.
        params[4] = 1.;
        let x = Array::from_shape_vec((1, 1, 2, 2), vec![1., 2., 3., 4.]).unwrap();

        let y = conv.forward(&params, x.clone(), true).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut conv = Conv::new("conv1", 2, 2, 3, 1);
        let params: Vec<f32> = (0..conv.size()).map(|i| ((i * 7 % 11) as f32 - 5.) / 10.).collect();
        let x = Array::from_shape_fn((2, 2, 3, 3), |(n, c, i, j)| {
            ((n * 5 + c * 3 + i * 2 + j) % 7) as f32 / 7. - 0.4
        });

        // loss = sum(y), so the incoming delta is all ones.
        let y = conv.forward(&params, x.clone(), true).unwrap();
        let mut grad = vec![0.; conv.size()];
        let dx = conv.backward(&params, &mut grad, Array::ones(y.dim())).unwrap();

        let eps = 1e-2;
        for i in [0, 5, 17, conv.size() - 1] {
            let mut plus = params.clone();
            plus[i] += eps;
            let mut minus = params.clone();
            minus[i] -= eps;

            let lp = conv.forward(&plus, x.clone(), false).unwrap().sum();
            let lm = conv.forward(&minus, x.clone(), false).unwrap().sum();
            let numeric = (lp - lm) / (2. * eps);

            assert!((numeric - grad[i]).abs() < 1e-2, "param {i}: {numeric} vs {}", grad[i]);
        }

        let mut xp = x.clone();
        xp[[1, 0, 1, 1]] += eps;
        let mut xm = x.clone();
        xm[[1, 0, 1, 1]] -= eps;
        let lp = conv.forward(&params, xp, false).unwrap().sum();
        let lm = conv.forward(&params, xm, false).unwrap().sum();
        let numeric = (lp - lm) / (2. * eps);

        assert!((numeric - dx[[1, 0, 1, 1]]).abs() < 1e-2);
    }

    #[test]
    fn inference_keeps_no_columns() {
        let mut conv = Conv::new("conv1", 1, 2, 3, 1);
        let params = vec![0.1; conv.size()];
        let x = Array::ones((4, 1, 5, 5));

        let y = conv.forward(&params, x.clone(), true).unwrap();
        assert_eq!(conv.cols.len(), 4);

        let inferred = conv.forward(&params, x, false).unwrap();
        assert_eq!(inferred, y);
        assert!(conv.cols.is_empty());

        let mut grad = vec![0.; conv.size()];
        assert!(matches!(
            conv.backward(&params, &mut grad, Array::ones(y.dim())),
            Err(MlErr::MissingForward { .. })
        ));
    }
}
