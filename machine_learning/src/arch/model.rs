use ndarray::{Array2, Array4, Axis};

use super::{
    layers::{ClassifierLayer, FeatureLayer},
    loss::{LossFn, softmax},
};
use crate::{
    MlErr, Result,
    optimization::Optimizer,
    params::{BackIter, FrontIter},
    specs::InputShape,
};

/// The location of one learnable tensor inside the flat parameter buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorSlot {
    /// `<layer>.weight` or `<layer>.bias`.
    pub name: String,
    pub shape: Vec<usize>,
    pub offset: usize,
    /// The inputs feeding each output unit of the owning layer.
    pub fan_in: usize,
}

impl TensorSlot {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this slot holds biases rather than weights.
    pub fn is_bias(&self) -> bool {
        self.shape.len() == 1
    }
}

/// A compiled image classifier: a feature extractor, a flatten and a classifier head.
///
/// The structure is fixed once built, only the values of the flat parameter buffer change while
/// training or when a checkpoint is applied.
#[derive(Clone, Debug)]
pub struct Model {
    features: Vec<FeatureLayer>,
    classifier: Vec<ClassifierLayer>,
    input_shape: InputShape,
    num_classes: usize,
    layout: Vec<TensorSlot>,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl Model {
    /// Assembles a model from already validated layers.
    ///
    /// # Returns
    /// An error if `params` does not cover every learnable tensor of the layers.
    pub(crate) fn new(
        features: Vec<FeatureLayer>,
        classifier: Vec<ClassifierLayer>,
        input_shape: InputShape,
        num_classes: usize,
        params: Vec<f32>,
    ) -> Result<Self> {
        let layout = Self::layout_of(&features, &classifier);
        let size: usize = layout.iter().map(TensorSlot::len).sum();

        if params.len() != size {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got: params.len(),
                expected: size,
            });
        }

        Ok(Self {
            features,
            classifier,
            input_shape,
            num_classes,
            layout,
            grad: vec![0.; size],
            params,
        })
    }

    fn layout_of(features: &[FeatureLayer], classifier: &[ClassifierLayer]) -> Vec<TensorSlot> {
        let mut layout = Vec::new();
        let mut offset = 0;
        let mut push = |name: &str, weight: Vec<usize>, out: usize, fan_in: usize| {
            for (suffix, shape) in [("weight", weight), ("bias", vec![out])] {
                let slot = TensorSlot {
                    name: format!("{name}.{suffix}"),
                    shape,
                    offset,
                    fan_in,
                };
                offset += slot.len();
                layout.push(slot);
            }
        };

        for layer in features {
            if let FeatureLayer::Conv(conv) = layer {
                let (i, o, k) = (conv.in_channels(), conv.out_channels(), conv.kernel_size());
                push(conv.name(), vec![o, i, k, k], o, conv.fan_in());
            }
        }

        for layer in classifier {
            if let ClassifierLayer::Dense(dense) = layer {
                let (i, o) = dense.dim();
                push(dense.name(), vec![o, i], o, i);
            }
        }

        layout
    }

    /// The total amount of learnable parameters.
    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Every learnable tensor in execution order.
    pub fn layout(&self) -> &[TensorSlot] {
        &self.layout
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Overwrites every parameter value, the structure is left untouched.
    pub fn set_params(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params.copy_from_slice(params);
        Ok(())
    }

    /// The names of the feature stages in execution order, activations included.
    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(FeatureLayer::name).collect()
    }

    /// The names of the classifier stages in execution order, activations included.
    pub fn classifier_names(&self) -> Vec<&str> {
        self.classifier.iter().map(ClassifierLayer::name).collect()
    }

    /// Runs the feature extractor alone, in evaluation mode.
    ///
    /// # Arguments
    /// * `x` - A `(batch, channels, height, width)` input matching the declared input shape.
    pub fn extract_features(&mut self, x: Array4<f32>) -> Result<Array4<f32>> {
        self.forward_features(x, false)
    }

    /// Makes a forward pass through the whole network in evaluation mode, keeping nothing for
    /// a backward pass.
    ///
    /// # Returns
    /// The raw `(batch, classes)` scores of the classifier head.
    pub fn forward(&mut self, x: Array4<f32>) -> Result<Array2<f32>> {
        let features = self.forward_features(x, false)?;
        self.forward_classifier(features, false)
    }

    fn forward_features(&mut self, x: Array4<f32>, train: bool) -> Result<Array4<f32>> {
        self.check_input(&x)?;

        let mut front = FrontIter::new(&self.params);
        let mut x = x;
        for layer in &mut self.features {
            let params = front.take(layer.size())?;
            x = layer.forward(params, x, train)?;
        }

        Ok(x)
    }

    /// The width the flatten stage produces, measured with a zero filled dummy sample.
    pub fn flatten_width(&mut self) -> Result<usize> {
        let (c, h, w) = self.input_shape.dim();
        let features = self.extract_features(Array4::zeros((1, c, h, w)))?;
        Ok(features.len())
    }

    /// Class probabilities for every sample of `x`, one row per sample.
    pub fn predict_proba(&mut self, x: Array4<f32>) -> Result<Array2<f32>> {
        let scores = self.forward(x)?;
        Ok(softmax(scores.view()))
    }

    /// Propagates the loss delta back through the network, overwriting the gradient buffer.
    fn backward(&mut self, d: Array2<f32>, feature_dim: (usize, usize, usize)) -> Result<()> {
        let mut back = BackIter::new(&self.params, &mut self.grad)?;

        let mut d = d;
        for layer in self.classifier.iter_mut().rev() {
            let (params, grad) = back.take(layer.size())?;
            d = layer.backward(params, grad, d)?;
        }

        let (c, h, w) = feature_dim;
        let n = d.nrows();
        let mut d = d.into_shape_with_order((n, c, h, w))?;
        for layer in self.features.iter_mut().rev() {
            let (params, grad) = back.take(layer.size())?;
            d = layer.backward(params, grad, d)?;
        }

        Ok(())
    }

    /// Trains the model for one pass over `batches`, stepping the optimizer after every batch.
    ///
    /// # Arguments
    /// * `loss_fn` - The loss function.
    /// * `optimizer` - The optimizer that dictates how to update the parameters.
    /// * `batches` - The labeled batches.
    ///
    /// # Returns
    /// The mean loss over every sample seen, each batch weighted by its size, or an error on the
    /// first batch whose loss is not finite.
    pub fn backprop<L, O, I>(&mut self, loss_fn: &L, optimizer: &mut O, batches: I) -> Result<f32>
    where
        L: LossFn + ?Sized,
        O: Optimizer + ?Sized,
        I: IntoIterator<Item = (Array4<f32>, Vec<usize>)>,
    {
        let mut total_loss = 0.;
        let mut samples = 0;

        for (i, (x, y)) in batches.into_iter().enumerate() {
            self.check_labels(&x, &y)?;

            let features = self.forward_features(x, true)?;
            let (_, c, h, w) = features.dim();
            let scores = self.forward_classifier(features, true)?;

            let loss = loss_fn.loss(scores.view(), &y);
            if !loss.is_finite() {
                return Err(MlErr::NonFiniteLoss { batch: i });
            }

            total_loss += loss * y.len() as f32;
            samples += y.len();

            let d = loss_fn.loss_prime(scores.view(), &y);
            self.backward(d, (c, h, w))?;
            optimizer.update_params(&mut self.params, &self.grad)?;
        }

        Ok(mean(total_loss, samples))
    }

    /// Computes the loss over `batches` without touching the parameters.
    ///
    /// # Returns
    /// The sample weighted mean loss, `0` when there are no samples.
    pub fn validate<L, I>(&mut self, loss_fn: &L, batches: I) -> Result<f32>
    where
        L: LossFn + ?Sized,
        I: IntoIterator<Item = (Array4<f32>, Vec<usize>)>,
    {
        let mut total_loss = 0.;
        let mut samples = 0;

        for (i, (x, y)) in batches.into_iter().enumerate() {
            self.check_labels(&x, &y)?;

            let scores = self.forward(x)?;
            let loss = loss_fn.loss(scores.view(), &y);
            if !loss.is_finite() {
                return Err(MlErr::NonFiniteLoss { batch: i });
            }

            total_loss += loss * y.len() as f32;
            samples += y.len();
        }

        Ok(mean(total_loss, samples))
    }

    fn forward_classifier(&mut self, features: Array4<f32>, train: bool) -> Result<Array2<f32>> {
        let feature_size: usize = self.features.iter().map(FeatureLayer::size).sum();

        let mut front = FrontIter::new(&self.params[feature_size..]);
        let mut x = flatten(features)?;
        for layer in &mut self.classifier {
            let params = front.take(layer.size())?;
            x = layer.forward(params, x, train)?;
        }

        Ok(x)
    }

    fn check_input(&self, x: &Array4<f32>) -> Result<()> {
        let (_, c, h, w) = x.dim();
        let shape = self.input_shape;

        for (what, got, expected) in [
            ("input channels", c, shape.channels),
            ("input height", h, shape.height),
            ("input width", w, shape.width),
        ] {
            if got != expected {
                return Err(MlErr::ShapeMismatch {
                    what: what.to_string(),
                    got,
                    expected,
                });
            }
        }

        Ok(())
    }

    fn check_labels(&self, x: &Array4<f32>, y: &[usize]) -> Result<()> {
        let n = x.len_of(Axis(0));
        if y.len() != n {
            return Err(MlErr::SizeMismatch {
                what: "labels",
                got: y.len(),
                expected: n,
            });
        }

        match y.iter().find(|&&label| label >= self.num_classes) {
            Some(&label) => Err(MlErr::LabelOutOfRange {
                label,
                classes: self.num_classes,
            }),
            None => Ok(()),
        }
    }
}

/// Collapses every dimension but the batch one, keeping the memory order.
fn flatten(x: Array4<f32>) -> Result<Array2<f32>> {
    let (n, c, h, w) = x.dim();
    let x = if x.is_standard_layout() {
        x
    } else {
        x.as_standard_layout().into_owned()
    };

    Ok(x.into_shape_with_order((n, c * h * w))?)
}

fn mean(total: f32, samples: usize) -> f32 {
    if samples == 0 {
        0.
    } else {
        total / samples as f32
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::{
        arch::{ModelBuilder, loss::CrossEntropy},
        dataset::Dataset,
        optimization::GradientDescent,
        specs::{ActFnSpec, LayerSpec},
    };

    fn sigmoid_model() -> Model {
        let layers = vec![
            (
                "conv1".to_string(),
                LayerSpec::Conv {
                    in_channels: 1,
                    out_channels: 2,
                    kernel_size: 3,
                    padding: 1,
                    act_fn: Some(ActFnSpec::Sigmoid),
                },
            ),
            (
                "fcl1".to_string(),
                LayerSpec::FullyConnected {
                    in_features: 18,
                    out_features: 2,
                    act_fn: Some(ActFnSpec::Sigmoid),
                },
            ),
        ];

        ModelBuilder::new(InputShape::new(1, 3, 3), 2)
            .build(&layers, Some(11))
            .unwrap()
    }

    fn dataset() -> Dataset {
        let x = Array4::from_shape_fn((4, 1, 3, 3), |(n, _, i, j)| {
            ((n * 9 + i * 3 + j) % 5) as f32 / 4. - 0.5
        });
        Dataset::new(x, vec![0, 1, 1, 0]).unwrap()
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut model = sigmoid_model();
        let data = dataset();
        let all = NonZeroUsize::new(4).unwrap();

        model
            .backprop(&CrossEntropy, &mut GradientDescent::new(0.), data.batches(all))
            .unwrap();
        let grad = model.grad.clone();
        let params = model.params().to_vec();

        let eps = 1e-2;
        for i in [0, 4, 9, 18, 20, 40, params.len() - 1] {
            let mut plus = params.clone();
            plus[i] += eps;
            model.set_params(&plus).unwrap();
            let lp = model.validate(&CrossEntropy, data.batches(all)).unwrap();

            let mut minus = params.clone();
            minus[i] -= eps;
            model.set_params(&minus).unwrap();
            let lm = model.validate(&CrossEntropy, data.batches(all)).unwrap();

            let numeric = (lp - lm) / (2. * eps);
            assert!(
                (numeric - grad[i]).abs() < 2e-3,
                "param {i}: numeric {numeric} analytic {}",
                grad[i]
            );
        }
    }

    #[test]
    fn evaluation_passes_leave_nothing_to_backpropagate() {
        let mut model = sigmoid_model();
        let x = dataset().batches(NonZeroUsize::new(4).unwrap()).next().unwrap().0;

        model.predict_proba(x).unwrap();

        assert!(matches!(
            model.backward(Array2::ones((4, 2)), (2, 3, 3)),
            Err(MlErr::MissingForward { .. })
        ));
    }

    #[test]
    fn epoch_loss_is_sample_weighted() {
        let mut model = sigmoid_model();
        let data = dataset();

        let full = model
            .validate(&CrossEntropy, data.batches(NonZeroUsize::new(4).unwrap()))
            .unwrap();
        let uneven = model
            .backprop(
                &CrossEntropy,
                &mut GradientDescent::new(0.),
                data.batches(NonZeroUsize::new(3).unwrap()),
            )
            .unwrap();

        assert!((full - uneven).abs() < 1e-5);
    }

    #[test]
    fn training_lowers_the_loss() {
        let mut model = sigmoid_model();
        let data = dataset();
        let all = NonZeroUsize::new(4).unwrap();
        let mut optimizer = GradientDescent::new(0.5);

        let before = model.validate(&CrossEntropy, data.batches(all)).unwrap();
        for _ in 0..20 {
            model
                .backprop(&CrossEntropy, &mut optimizer, data.batches(all))
                .unwrap();
        }
        let after = model.validate(&CrossEntropy, data.batches(all)).unwrap();

        assert!(after < before);
    }

    #[test]
    fn non_finite_loss_aborts() {
        let mut model = sigmoid_model();
        let nan = vec![f32::NAN; model.size()];
        model.set_params(&nan).unwrap();

        let err = model
            .backprop(
                &CrossEntropy,
                &mut GradientDescent::new(0.1),
                dataset().batches(NonZeroUsize::MIN),
            )
            .unwrap_err();
        assert!(matches!(err, MlErr::NonFiniteLoss { batch: 0 }));
    }

    #[test]
    fn labels_are_checked() {
        let mut model = sigmoid_model();
        let x = Array4::zeros((1, 1, 3, 3));

        let err = model
            .validate(&CrossEntropy, [(x, vec![2])])
            .unwrap_err();
        assert!(matches!(err, MlErr::LabelOutOfRange { label: 2, classes: 2 }));
    }

    #[test]
    fn wrong_input_shape_is_rejected() {
        let mut model = sigmoid_model();

        assert!(model.forward(Array4::zeros((1, 1, 4, 4))).is_err());
    }

    #[test]
    fn probabilities_sum_to_one() {
        let mut model = sigmoid_model();
        let probs = model.predict_proba(Array4::ones((3, 1, 3, 3))).unwrap();

        assert_eq!(probs.dim(), (3, 2));
        for row in probs.rows() {
            assert!((row.sum() - 1.).abs() < 1e-6);
        }
    }

    #[test]
    fn layout_names_tensors() {
        let model = sigmoid_model();
        let names: Vec<_> = model.layout().iter().map(|slot| slot.name.as_str()).collect();

        assert_eq!(names, ["conv1.weight", "conv1.bias", "fcl1.weight", "fcl1.bias"]);
        assert_eq!(model.layout()[2].offset, 2 * 9 + 2);
        assert_eq!(model.size(), 2 * 9 + 2 + 18 * 2 + 2);
    }
}
