use std::mem;

use crate::{MlErr, Result};

/// Hands out consecutive parameter slices, from the first layer to the last.
pub(crate) struct FrontIter<'p> {
    rest: &'p [f32],
}

impl<'p> FrontIter<'p> {
    /// Creates a new `FrontIter` over the whole parameter buffer.
    pub fn new(params: &'p [f32]) -> Self {
        Self { rest: params }
    }

    /// Takes the next `n` parameters.
    ///
    /// # Arguments
    /// * `n` - The amount of parameters to take.
    ///
    /// # Returns
    /// A slice of parameters or an error if less than `n` parameters remain.
    pub fn take(&mut self, n: usize) -> Result<&'p [f32]> {
        if n > self.rest.len() {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: self.rest.len(),
                expected: n,
            });
        }

        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }
}

/// Hands out pairs of parameter and gradient slices, from the last layer to the first.
pub(crate) struct BackIter<'p> {
    params: &'p [f32],
    grad: &'p mut [f32],
}

impl<'p> BackIter<'p> {
    /// Creates a new `BackIter` over the parameter buffer and its gradient.
    ///
    /// # Returns
    /// An error if both buffers don't have the same length.
    pub fn new(params: &'p [f32], grad: &'p mut [f32]) -> Result<Self> {
        if params.len() != grad.len() {
            return Err(MlErr::SizeMismatch {
                what: "gradient",
                got: grad.len(),
                expected: params.len(),
            });
        }

        Ok(Self { params, grad })
    }

    /// Takes the last `n` parameters and their gradient.
    ///
    /// # Arguments
    /// * `n` - The amount of parameters to take.
    ///
    /// # Returns
    /// The parameters and gradient slices or an error if less than `n` parameters remain.
    pub fn take(&mut self, n: usize) -> Result<(&'p [f32], &'p mut [f32])> {
        let len = self.params.len();

        if n > len {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: len,
                expected: n,
            });
        }

        let (p_head, p_tail) = self.params.split_at(len - n);
        let (g_head, g_tail) = mem::take(&mut self.grad).split_at_mut(len - n);
        self.params = p_head;
        self.grad = g_head;
        Ok((p_tail, g_tail))
    }
}
