use std::num::NonZeroUsize;

use machine_learning::specs::{ActFnSpec, LayerSpec, OptimizerSpec, TrainingSpec};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use super::{ArchitectureConfig, ConfigError, LayerConfig, OptimizerKind, TrainingConfig};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConvFields {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    #[serde(default)]
    padding: usize,
    #[serde(default, alias = "act")]
    activation: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolFields {
    kernel_size: usize,
    stride: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FclFields {
    in_features: usize,
    out_features: usize,
    #[serde(default, alias = "act")]
    activation: Option<String>,
}

/// Validates wire configs and lowers them into the typed specs of the numeric core.
#[derive(Debug, Default, Clone, Copy)]
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    /// Converts every layer of `architecture` into its spec, keeping the declared order.
    ///
    /// Dispatch is done on the `kind` tag alone, the layer name is never inspected.
    ///
    /// # Errors
    /// `UnknownLayerKind`, `UnknownActivation` or `InvalidLayer` for the first offending layer.
    pub fn adapt_architecture(
        &self,
        architecture: &ArchitectureConfig,
    ) -> Result<Vec<(String, LayerSpec)>, ConfigError> {
        let mut layers = Vec::with_capacity(architecture.layers().len());
        for (name, layer) in architecture.layers() {
            layers.push((name.clone(), self.adapt_layer(name, layer)?));
        }

        Ok(layers)
    }

    fn adapt_layer(&self, name: &str, layer: &LayerConfig) -> Result<LayerSpec, ConfigError> {
        let spec = match layer.kind.trim().to_ascii_lowercase().as_str() {
            "conv" => {
                let fields: ConvFields = self.fields(name, layer)?;
                LayerSpec::Conv {
                    in_channels: fields.in_channels,
                    out_channels: fields.out_channels,
                    kernel_size: fields.kernel_size,
                    padding: fields.padding,
                    act_fn: self.adapt_act_fn(name, fields.activation.as_deref())?,
                }
            }
            "pool" => {
                let fields: PoolFields = self.fields(name, layer)?;
                LayerSpec::Pool {
                    kernel_size: fields.kernel_size,
                    stride: fields.stride,
                }
            }
            "fcl" => {
                let fields: FclFields = self.fields(name, layer)?;
                LayerSpec::FullyConnected {
                    in_features: fields.in_features,
                    out_features: fields.out_features,
                    act_fn: self.adapt_act_fn(name, fields.activation.as_deref())?,
                }
            }
            _ => {
                return Err(ConfigError::UnknownLayerKind {
                    layer: name.to_string(),
                    kind: layer.kind.clone(),
                });
            }
        };

        Ok(spec)
    }

    fn fields<T: DeserializeOwned>(&self, name: &str, layer: &LayerConfig) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object(layer.fields.clone())).map_err(|e| {
            ConfigError::InvalidLayer {
                layer: name.to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn adapt_act_fn(
        &self,
        name: &str,
        activation: Option<&str>,
    ) -> Result<Option<ActFnSpec>, ConfigError> {
        let Some(activation) = activation else {
            return Ok(None);
        };

        match activation.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(None),
            "relu" => Ok(Some(ActFnSpec::Relu)),
            "sigmoid" => Ok(Some(ActFnSpec::Sigmoid)),
            _ => Err(ConfigError::UnknownActivation {
                layer: name.to_string(),
                activation: activation.to_string(),
            }),
        }
    }

    /// Validates the hyperparameters and resolves the optimizer.
    ///
    /// # Errors
    /// `UnknownOptimizer` if the optimizer name is not recognized, `InvalidHyperparameter` for a
    /// zero epoch count or batch size and for a learning rate that is not a positive number.
    pub fn adapt_training(&self, training: &TrainingConfig) -> Result<TrainingSpec, ConfigError> {
        let epochs = NonZeroUsize::new(training.epochs).ok_or_else(|| {
            ConfigError::InvalidHyperparameter("epochs must be at least 1".to_string())
        })?;

        let batch_size = NonZeroUsize::new(training.batch_size).ok_or_else(|| {
            ConfigError::InvalidHyperparameter("batch_size must be at least 1".to_string())
        })?;

        let lr = training.learning_rate;
        if !lr.is_finite() || lr <= 0. {
            return Err(ConfigError::InvalidHyperparameter(format!(
                "learning_rate must be a positive number, got {lr}"
            )));
        }

        let optimizer = match training.optimizer.parse::<OptimizerKind>()? {
            OptimizerKind::Adam => OptimizerSpec::adam(lr),
            OptimizerKind::Sgd => OptimizerSpec::gradient_descent(lr),
            OptimizerKind::Adagrad => OptimizerSpec::adagrad(lr),
            OptimizerKind::RmsProp => OptimizerSpec::rms_prop(lr),
        };

        Ok(TrainingSpec {
            epochs,
            batch_size,
            shuffle: training.shuffle,
            optimizer,
            seed: training.seed,
        })
    }
}
