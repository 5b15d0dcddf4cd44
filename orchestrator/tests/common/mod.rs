#![allow(dead_code)]

use machine_learning::{dataset::Dataset, specs::InputShape};
use ndarray::Array4;

use orchestrator::{
    configs::{ArchitectureConfig, LayerConfig, TrainingConfig},
    data::Splits,
};

pub const SHAPE: InputShape = InputShape {
    channels: 1,
    height: 4,
    width: 4,
};

pub fn tiny_architecture() -> ArchitectureConfig {
    ArchitectureConfig::default()
        .with("conv1", LayerConfig::conv(1, 2, 3, 1, Some("relu")))
        .with("pool1", LayerConfig::pool(2, 2))
        .with("fcl_output1", LayerConfig::fcl(8, 2, None))
}

pub fn training(epochs: usize) -> TrainingConfig {
    TrainingConfig {
        epochs,
        learning_rate: 0.01,
        batch_size: 2,
        seed: Some(7),
        ..TrainingConfig::default()
    }
}

/// Bright images are class `b`, dark ones class `a`.
pub fn dataset(n: usize) -> Dataset {
    let labels: Vec<usize> = (0..n).map(|i| i % 2).collect();
    let x = Array4::from_shape_fn((n, 1, 4, 4), |(i, _, y, x)| {
        let base = if labels[i] == 1 { 0.8 } else { 0.1 };
        base + 0.01 * (y * 4 + x) as f32
    });

    Dataset::new(x, labels).unwrap()
}

pub fn splits(train: usize, valid: usize) -> Splits {
    Splits {
        classes: vec!["a".to_string(), "b".to_string()],
        train: dataset(train),
        valid: if valid == 0 {
            Dataset::empty(SHAPE)
        } else {
            dataset(valid)
        },
        test: Dataset::empty(SHAPE),
    }
}
