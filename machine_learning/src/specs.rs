use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// The specification for the `ActFn` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnSpec {
    Relu,
    Sigmoid,
}

/// The specification of one computational stage of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LayerSpec {
    /// A stride 1 convolution with symmetric zero padding.
    Conv {
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: usize,
        act_fn: Option<ActFnSpec>,
    },
    /// A max pooling stage.
    Pool { kernel_size: usize, stride: usize },
    /// A dense layer of the classifier head.
    FullyConnected {
        in_features: usize,
        out_features: usize,
        act_fn: Option<ActFnSpec>,
    },
}

impl LayerSpec {
    /// Whether this layer belongs to the feature extraction stage.
    pub fn is_feature(&self) -> bool {
        matches!(self, LayerSpec::Conv { .. } | LayerSpec::Pool { .. })
    }
}

/// The shape of a single input sample, channels first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// The `(channels, height, width)` triple.
    pub fn dim(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }
}

impl Default for InputShape {
    fn default() -> Self {
        Self::new(3, 128, 128)
    }
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
    Adagrad {
        learning_rate: f32,
        epsilon: f32,
    },
    RmsProp {
        learning_rate: f32,
        alpha: f32,
        epsilon: f32,
    },
}

impl OptimizerSpec {
    pub fn adam(learning_rate: f32) -> Self {
        Self::Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    pub fn gradient_descent(learning_rate: f32) -> Self {
        Self::GradientDescent { learning_rate }
    }

    pub fn adagrad(learning_rate: f32) -> Self {
        Self::Adagrad {
            learning_rate,
            epsilon: 1e-10,
        }
    }

    pub fn rms_prop(learning_rate: f32) -> Self {
        Self::RmsProp {
            learning_rate,
            alpha: 0.99,
            epsilon: 1e-8,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match *self {
            Self::Adam { learning_rate, .. }
            | Self::GradientDescent { learning_rate }
            | Self::Adagrad { learning_rate, .. }
            | Self::RmsProp { learning_rate, .. } => learning_rate,
        }
    }
}

/// The specification of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSpec {
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub shuffle: bool,
    pub optimizer: OptimizerSpec,
    pub seed: Option<u64>,
}
