use ndarray::prelude::*;

use crate::{MlErr, Result};

/// A parameterless max pooling stage over square windows.
#[derive(Clone, Debug)]
pub struct MaxPool {
    name: String,
    kernel_size: usize,
    stride: usize,

    // Forward metadata, the flat `(y, x)` input offset that won each output cell.
    argmax: Option<(Array4<usize>, (usize, usize))>,
}

impl MaxPool {
    pub fn new(name: impl Into<String>, kernel_size: usize, stride: usize) -> Self {
        Self {
            name: name.into(),
            kernel_size,
            stride,
            argmax: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The spatial size of the output for an `(h, w)` input, `None` if it would be empty.
    pub fn out_dim(&self, (h, w): (usize, usize)) -> Option<(usize, usize)> {
        if self.kernel_size == 0 || self.stride == 0 || h < self.kernel_size || w < self.kernel_size
        {
            return None;
        }

        let oh = (h - self.kernel_size) / self.stride + 1;
        let ow = (w - self.kernel_size) / self.stride + 1;
        Some((oh, ow))
    }

    pub fn forward(&mut self, x: Array4<f32>, train: bool) -> Result<Array4<f32>> {
        let (n, c, h, w) = x.dim();
        let (oh, ow) = self.out_dim((h, w)).ok_or_else(|| MlErr::InvalidGeometry {
            layer: self.name.clone(),
            reason: "pooling window is larger than the input",
        })?;

        let k = self.kernel_size;
        let s = self.stride;
        let mut out = Array4::zeros((n, c, oh, ow));
        let mut argmax = Array4::zeros((n, c, oh, ow));

        for ((b, ch, oy, ox), v) in out.indexed_iter_mut() {
            let window = x.slice(s![b, ch, oy * s..oy * s + k, ox * s..ox * s + k]);

            let mut best = (f32::NEG_INFINITY, oy * s * w + ox * s);
            for ((ky, kx), &value) in window.indexed_iter() {
                if value > best.0 {
                    best = (value, (oy * s + ky) * w + ox * s + kx);
                }
            }

            *v = best.0;
            argmax[[b, ch, oy, ox]] = best.1;
        }

        self.argmax = train.then_some((argmax, (h, w)));
        Ok(out)
    }

    /// Routes each delta to the input position that won its window.
    pub fn backward(&mut self, d: Array4<f32>) -> Result<Array4<f32>> {
        let (argmax, (h, w)) = self
            .argmax
            .take()
            .ok_or(MlErr::MissingForward { layer: "pool" })?;

        if argmax.dim() != d.dim() {
            return Err(MlErr::SizeMismatch {
                what: "pool delta",
                got: d.len(),
                expected: argmax.len(),
            });
        }

        let (n, c, _, _) = d.dim();
        let mut dx = Array4::zeros((n, c, h, w));

        for ((b, ch, oy, ox), &delta) in d.indexed_iter() {
            let at = argmax[[b, ch, oy, ox]];
            dx[[b, ch, at / w, at % w]] += delta;
        }

        Ok(dx)
    }
}
