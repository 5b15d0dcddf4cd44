use ndarray::{Array2, Array4, Ix2, Ix4};

use super::{Activation, Conv, Dense, MaxPool};
use crate::Result;

/// A stage of the feature extractor, operating on `(batch, channels, h, w)` tensors.
#[derive(Clone, Debug)]
pub enum FeatureLayer {
    Conv(Conv),
    Pool(MaxPool),
    Act(Activation<Ix4>),
}

/// A stage of the classifier head, operating on `(batch, features)` rows.
#[derive(Clone, Debug)]
pub enum ClassifierLayer {
    Dense(Dense),
    Act(Activation<Ix2>),
}

impl FeatureLayer {
    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Self::Conv(l) => l.size(),
            Self::Pool(_) | Self::Act(_) => 0,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Conv(l) => l.name(),
            Self::Pool(l) => l.name(),
            Self::Act(l) => l.name(),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Array4<f32>, train: bool) -> Result<Array4<f32>> {
        match self {
            Self::Conv(l) => l.forward(params, x, train),
            Self::Pool(l) => l.forward(x, train),
            Self::Act(l) => Ok(l.forward(x, train)),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        match self {
            Self::Conv(l) => l.backward(params, grad, d),
            Self::Pool(l) => l.backward(d),
            Self::Act(l) => l.backward(d),
        }
    }
}

impl ClassifierLayer {
    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Self::Dense(l) => l.size(),
            Self::Act(_) => 0,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Dense(l) => l.name(),
            Self::Act(l) => l.name(),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>, train: bool) -> Result<Array2<f32>> {
        match self {
            Self::Dense(l) => l.forward(params, x, train),
            Self::Act(l) => Ok(l.forward(x, train)),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Self::Dense(l) => l.backward(params, grad, d),
            Self::Act(l) => l.backward(d),
        }
    }
}
