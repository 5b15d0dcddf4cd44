use std::{cell::RefCell, collections::HashSet, rc::Rc};

use super::{
    Model,
    activations::ActFn,
    layers::{Activation, ClassifierLayer, Conv, Dense, FeatureLayer, MaxPool},
};
use crate::{
    MlErr, Result,
    initialization::{ChainedParamGen, ParamGen, RandParamGen, generate_rng},
    specs::{ActFnSpec, InputShape, LayerSpec},
};

/// Compiles an ordered architecture description into a `Model`.
///
/// The description must list every feature layer (convolutions and poolings) before the first
/// fully connected layer. The `(channels, height, width)` of the declared input shape is tracked
/// through the feature stage, so every size disagreement is reported before any parameter is
/// allocated.
#[derive(Clone, Copy, Debug)]
pub struct ModelBuilder {
    input_shape: InputShape,
    num_classes: usize,
}

impl ModelBuilder {
    /// Creates a new `ModelBuilder`.
    ///
    /// # Arguments
    /// * `input_shape` - The shape of every sample the model will receive.
    /// * `num_classes` - The amount of classes the last layer must score.
    pub fn new(input_shape: InputShape, num_classes: usize) -> Self {
        Self {
            input_shape,
            num_classes,
        }
    }

    /// Builds a model with every tensor drawn from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    ///
    /// # Arguments
    /// * `layers` - The named layer specs in execution order.
    /// * `seed` - An optional seed for reproducible initialization.
    pub fn build(&self, layers: &[(String, LayerSpec)], seed: Option<u64>) -> Result<Model> {
        let mut model = self.compile(layers)?;

        let rng = Rc::new(RefCell::new(generate_rng(seed)));
        let mut param_gens: Vec<Box<dyn ParamGen>> = Vec::with_capacity(model.layout().len());
        for slot in model.layout() {
            let param_gen = RandParamGen::fan_in_uniform(rng.clone(), slot.len(), slot.fan_in)?;
            param_gens.push(Box::new(param_gen));
        }

        let mut param_gen = ChainedParamGen::new(param_gens);
        Self::init(&mut model, &mut param_gen)?;
        Ok(model)
    }

    /// Builds a model taking its initial parameters, in execution order, from `param_gen`.
    pub fn build_with(
        &self,
        layers: &[(String, LayerSpec)],
        param_gen: &mut dyn ParamGen,
    ) -> Result<Model> {
        let mut model = self.compile(layers)?;
        Self::init(&mut model, param_gen)?;
        Ok(model)
    }

    fn init(model: &mut Model, param_gen: &mut dyn ParamGen) -> Result<()> {
        let size = model.size();
        let params = param_gen.sample(size).unwrap_or_default();

        if params.len() != size {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: size,
            });
        }

        model.set_params(&params)
    }

    /// Validates the description and creates its layers with zeroed parameters.
    fn compile(&self, layers: &[(String, LayerSpec)]) -> Result<Model> {
        let (mut c, mut h, mut w) = self.input_shape.dim();
        if c == 0 || h == 0 || w == 0 {
            return Err(MlErr::InvalidGeometry {
                layer: "input".to_string(),
                reason: "every input dimension must be positive",
            });
        }

        if self.num_classes == 0 {
            return Err(MlErr::InvalidHyperparameter(
                "the model needs at least one class".to_string(),
            ));
        }

        let mut features = Vec::new();
        let mut classifier = Vec::new();
        let mut names = HashSet::new();
        // The `out_features` of the previous dense layer, `None` until the head starts.
        let mut width: Option<usize> = None;

        for (name, spec) in layers {
            if !names.insert(name.as_str()) {
                return Err(MlErr::InvalidGeometry {
                    layer: name.clone(),
                    reason: "the layer name is used more than once",
                });
            }

            if width.is_some() && spec.is_feature() {
                return Err(MlErr::InterleavedLayers {
                    layer: name.clone(),
                });
            }

            match *spec {
                LayerSpec::Conv {
                    in_channels,
                    out_channels,
                    kernel_size,
                    padding,
                    act_fn,
                } => {
                    if in_channels != c {
                        return Err(MlErr::ShapeMismatch {
                            what: format!("{name} in_channels"),
                            got: in_channels,
                            expected: c,
                        });
                    }

                    if out_channels == 0 || kernel_size == 0 {
                        return Err(MlErr::InvalidGeometry {
                            layer: name.clone(),
                            reason: "channels and kernel size must be positive",
                        });
                    }

                    let conv = Conv::new(name.as_str(), in_channels, out_channels, kernel_size, padding);
                    (h, w) = conv.out_dim((h, w)).ok_or_else(|| MlErr::InvalidGeometry {
                        layer: name.clone(),
                        reason: "kernel is larger than the padded input",
                    })?;
                    c = out_channels;

                    features.push(FeatureLayer::Conv(conv));
                    if let Some(act_fn) = act_fn {
                        features.push(FeatureLayer::Act(activation(name, act_fn)));
                    }
                }
                LayerSpec::Pool {
                    kernel_size,
                    stride,
                } => {
                    let pool = MaxPool::new(name.as_str(), kernel_size, stride);
                    (h, w) = pool.out_dim((h, w)).ok_or_else(|| MlErr::InvalidGeometry {
                        layer: name.clone(),
                        reason: "pooling window must be positive and fit the input",
                    })?;

                    features.push(FeatureLayer::Pool(pool));
                }
                LayerSpec::FullyConnected {
                    in_features,
                    out_features,
                    act_fn,
                } => {
                    let expected = width.unwrap_or(c * h * w);
                    if in_features != expected {
                        let what = match width {
                            Some(_) => format!("{name} in_features"),
                            None => format!("{name} in_features against the flatten width"),
                        };

                        return Err(MlErr::ShapeMismatch {
                            what,
                            got: in_features,
                            expected,
                        });
                    }

                    if out_features == 0 {
                        return Err(MlErr::InvalidGeometry {
                            layer: name.clone(),
                            reason: "out_features must be positive",
                        });
                    }

                    classifier.push(ClassifierLayer::Dense(Dense::new(
                        name.as_str(),
                        (in_features, out_features),
                    )));
                    if let Some(act_fn) = act_fn {
                        classifier.push(ClassifierLayer::Act(activation(name, act_fn)));
                    }

                    width = Some(out_features);
                }
            }
        }

        let out = width.ok_or(MlErr::EmptyClassifier)?;
        if out != self.num_classes {
            return Err(MlErr::ShapeMismatch {
                what: "class count".to_string(),
                got: out,
                expected: self.num_classes,
            });
        }

        let size = features.iter().map(FeatureLayer::size).sum::<usize>()
            + classifier.iter().map(ClassifierLayer::size).sum::<usize>();

        Model::new(
            features,
            classifier,
            self.input_shape,
            self.num_classes,
            vec![0.; size],
        )
    }
}

fn activation<D: ndarray::Dimension>(layer: &str, spec: ActFnSpec) -> Activation<D> {
    let act_fn = ActFn::from(spec);
    Activation::new(format!("{layer}.{}", act_fn.name()), act_fn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::ConstParamGen;

    fn conv(in_channels: usize, out_channels: usize) -> LayerSpec {
        LayerSpec::Conv {
            in_channels,
            out_channels,
            kernel_size: 3,
            padding: 1,
            act_fn: Some(ActFnSpec::Relu),
        }
    }

    fn pool() -> LayerSpec {
        LayerSpec::Pool {
            kernel_size: 2,
            stride: 2,
        }
    }

    fn fcl(in_features: usize, out_features: usize) -> LayerSpec {
        LayerSpec::FullyConnected {
            in_features,
            out_features,
            act_fn: None,
        }
    }

    fn named(layers: Vec<(&str, LayerSpec)>) -> Vec<(String, LayerSpec)> {
        layers
            .into_iter()
            .map(|(name, spec)| (name.to_string(), spec))
            .collect()
    }

    fn small() -> Vec<(String, LayerSpec)> {
        named(vec![
            ("conv1", conv(1, 2)),
            ("pool1", pool()),
            ("fcl1", fcl(8, 2)),
        ])
    }

    #[test]
    fn keeps_declared_order() {
        let layers = named(vec![
            ("conv_b", conv(1, 2)),
            ("conv_a", conv(2, 3)),
            ("pool", pool()),
            ("head_2", fcl(12, 4)),
            ("head_1", fcl(4, 2)),
        ]);

        let model = ModelBuilder::new(InputShape::new(1, 4, 4), 2)
            .build(&layers, Some(0))
            .unwrap();

        assert_eq!(
            model.feature_names(),
            ["conv_b", "conv_b.relu", "conv_a", "conv_a.relu", "pool"]
        );
        assert_eq!(model.classifier_names(), ["head_2", "head_1"]);
    }

    #[test]
    fn dispatches_by_kind_not_name() {
        let layers = named(vec![("pool_like_conv", conv(1, 1)), ("conv_like_fc", fcl(16, 2))]);

        let model = ModelBuilder::new(InputShape::new(1, 4, 4), 2)
            .build(&layers, Some(0))
            .unwrap();

        assert_eq!(model.layout()[0].shape, [1, 1, 3, 3]);
        assert_eq!(model.layout()[2].shape, [2, 16]);
    }

    #[test]
    fn interleaving_is_rejected() {
        let layers = named(vec![
            ("conv1", conv(1, 2)),
            ("fcl1", fcl(32, 2)),
            ("pool1", pool()),
        ]);

        let err = ModelBuilder::new(InputShape::new(1, 4, 4), 2)
            .build(&layers, None)
            .unwrap_err();
        assert!(matches!(err, MlErr::InterleavedLayers { layer } if layer == "pool1"));
    }

    #[test]
    fn flatten_width_must_match() {
        let layers = named(vec![("conv1", conv(1, 2)), ("pool1", pool()), ("fcl1", fcl(9, 2))]);

        let err = ModelBuilder::new(InputShape::new(1, 4, 4), 2)
            .build(&layers, None)
            .unwrap_err();
        assert!(matches!(err, MlErr::ShapeMismatch { got: 9, expected: 8, .. }));
    }

    #[test]
    fn class_count_must_match() {
        let err = ModelBuilder::new(InputShape::new(1, 4, 4), 3)
            .build(&small(), None)
            .unwrap_err();
        assert!(matches!(err, MlErr::ShapeMismatch { got: 2, expected: 3, .. }));
    }

    #[test]
    fn channels_must_chain() {
        let layers = named(vec![("conv1", conv(3, 2)), ("fcl1", fcl(32, 2))]);

        let err = ModelBuilder::new(InputShape::new(1, 4, 4), 2)
            .build(&layers, None)
            .unwrap_err();
        assert!(matches!(err, MlErr::ShapeMismatch { got: 3, expected: 1, .. }));
    }

    #[test]
    fn oversized_pool_is_rejected() {
        let layers = named(vec![
            ("pool1", LayerSpec::Pool { kernel_size: 8, stride: 1 }),
            ("fcl1", fcl(1, 2)),
        ]);

        let err = ModelBuilder::new(InputShape::new(1, 4, 4), 2)
            .build(&layers, None)
            .unwrap_err();
        assert!(matches!(err, MlErr::InvalidGeometry { .. }));
    }

    #[test]
    fn needs_a_classifier() {
        let layers = named(vec![("conv1", conv(1, 2))]);

        let err = ModelBuilder::new(InputShape::new(1, 4, 4), 2)
            .build(&layers, None)
            .unwrap_err();
        assert!(matches!(err, MlErr::EmptyClassifier));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let layers = named(vec![("a", fcl(16, 4)), ("a", fcl(4, 2))]);

        assert!(
            ModelBuilder::new(InputShape::new(1, 4, 4), 2)
                .build(&layers, None)
                .is_err()
        );
    }

    #[test]
    fn dummy_forward_agrees_with_static_width() {
        let mut model = ModelBuilder::new(InputShape::new(1, 4, 4), 2)
            .build(&small(), Some(1))
            .unwrap();

        assert_eq!(model.flatten_width().unwrap(), 8);
    }

    #[test]
    fn initialization_respects_fan_in() {
        let model = ModelBuilder::new(InputShape::new(1, 4, 4), 2)
            .build(&small(), Some(3))
            .unwrap();

        for slot in model.layout() {
            let bound = 1. / (slot.fan_in as f32).sqrt();
            let values = &model.params()[slot.offset..slot.offset + slot.len()];
            assert!(values.iter().all(|v| v.abs() <= bound), "{}", slot.name);
        }
    }

    #[test]
    fn same_seed_same_model() {
        let builder = ModelBuilder::new(InputShape::new(1, 4, 4), 2);

        let a = builder.build(&small(), Some(9)).unwrap();
        let b = builder.build(&small(), Some(9)).unwrap();
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn short_generator_fails() {
        let mut param_gen = ConstParamGen::new(0.1, 3);

        assert!(
            ModelBuilder::new(InputShape::new(1, 4, 4), 2)
                .build_with(&small(), &mut param_gen)
                .is_err()
        );
    }

    #[test]
    fn constant_generator_fills_every_parameter() {
        let builder = ModelBuilder::new(InputShape::new(1, 4, 4), 2);
        let size = builder.build(&small(), Some(0)).unwrap().size();
        let mut param_gen = ConstParamGen::new(0.5, size);

        let model = builder.build_with(&small(), &mut param_gen).unwrap();
        assert!(model.params().iter().all(|&p| p == 0.5));
    }
}
