use ndarray::{Array, Dimension};

use crate::{MlErr, Result, arch::activations::ActFn};

/// A parameterless layer applying an activation function element wise.
///
/// Works over any dimensionality, so the same layer type serves both the image tensors of the
/// feature extractor and the flat rows of the classifier.
#[derive(Clone, Debug)]
pub struct Activation<D: Dimension> {
    name: String,
    act_fn: ActFn,
    z: Option<Array<f32, D>>,
}

impl<D: Dimension> Activation<D> {
    pub fn new(name: impl Into<String>, act_fn: ActFn) -> Self {
        Self {
            name: name.into(),
            act_fn,
            z: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn act_fn(&self) -> ActFn {
        self.act_fn
    }

    /// Applies the activation, keeping its input for `backward` only when `train` is set.
    pub fn forward(&mut self, z: Array<f32, D>, train: bool) -> Array<f32, D> {
        let a = z.mapv(|v| self.act_fn.f(v));
        self.z = train.then_some(z);
        a
    }

    /// Multiplies the incoming delta by the derivative of the activation at the cached input.
    pub fn backward(&mut self, mut d: Array<f32, D>) -> Result<Array<f32, D>> {
        let z = self
            .z
            .take()
            .ok_or(MlErr::MissingForward { layer: "activation" })?;

        d.zip_mut_with(&z, |d, &z| *d *= self.act_fn.df(z));
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Ix2, array};

    use super::*;

    #[test]
    fn relu_masks_negative_deltas() {
        let mut act = Activation::<Ix2>::new("fc1.relu", ActFn::relu());

        let a = act.forward(array![[-1., 2.]], true);
        assert_eq!(a, array![[0., 2.]]);

        let d = act.backward(array![[5., 5.]]).unwrap();
        assert_eq!(d, array![[0., 5.]]);
    }

    #[test]
    fn inference_keeps_nothing_for_backward() {
        let mut act = Activation::<Ix2>::new("fc1.relu", ActFn::relu());

        let a = act.forward(array![[-1., 2.]], false);
        assert_eq!(a, array![[0., 2.]]);
        assert!(matches!(
            act.backward(array![[5., 5.]]),
            Err(MlErr::MissingForward { .. })
        ));
    }
}
