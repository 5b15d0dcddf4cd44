mod common;

use std::num::NonZeroUsize;

use image::{Rgb, RgbImage};
use machine_learning::{dataset::Dataset, specs::InputShape};
use ndarray::Array4;
use orchestrator::{
    InferenceEngine, OrchestratorError, checkpoint,
    configs::{ArchitectureConfig, LayerConfig},
    data::preprocess_image,
};

use common::{SHAPE, dataset, tiny_architecture};

fn engine(seed: u64) -> InferenceEngine {
    let model = orchestrator::compile(&tiny_architecture(), SHAPE, 2, Some(seed)).unwrap();
    InferenceEngine::new(model, vec!["a".to_string(), "b".to_string()]).unwrap()
}

fn saved_checkpoint(dir: &tempfile::TempDir, seed: u64) -> std::path::PathBuf {
    let model = orchestrator::compile(&tiny_architecture(), SHAPE, 2, Some(seed)).unwrap();
    let path = dir.path().join(format!("model_{seed}.safetensors"));
    checkpoint::save(&model, &path).unwrap();
    path
}

#[test]
fn predicting_before_loading_is_not_ready() {
    let mut engine = engine(0);

    assert!(!engine.is_ready());
    let err = engine.predict(Array4::zeros((1, 1, 4, 4))).unwrap_err();
    assert!(matches!(err, OrchestratorError::NotReady));
}

#[test]
fn checkpoint_round_trip_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let original = orchestrator::compile(&tiny_architecture(), SHAPE, 2, Some(3)).unwrap();
    let path = dir.path().join("model.safetensors");
    checkpoint::save(&original, &path).unwrap();

    let mut restored = orchestrator::compile(&tiny_architecture(), SHAPE, 2, Some(4)).unwrap();
    assert_ne!(restored.params(), original.params());
    checkpoint::load(&mut restored, &path).unwrap();

    assert_eq!(restored.params(), original.params());
}

#[test]
fn checkpoint_of_another_architecture_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let wider = ArchitectureConfig::default()
        .with("conv1", LayerConfig::conv(1, 4, 3, 1, Some("relu")))
        .with("pool1", LayerConfig::pool(2, 2))
        .with("fcl_output1", LayerConfig::fcl(16, 2, None));
    let model = orchestrator::compile(&wider, SHAPE, 2, None).unwrap();
    let path = dir.path().join("wider.safetensors");
    checkpoint::save(&model, &path).unwrap();

    let mut engine = engine(0);
    let err = engine.load_checkpoint(&path).unwrap_err();

    assert!(matches!(err, OrchestratorError::ShapeMismatch(_)));
    assert!(!engine.is_ready());
}

#[test]
fn missing_checkpoint_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(0);

    let err = engine
        .load_checkpoint(dir.path().join("missing.safetensors"))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Io(_)));
}

#[test]
fn probabilities_form_a_distribution() {
    let dir = tempfile::tempdir().unwrap();
    let path = saved_checkpoint(&dir, 1);
    let mut engine = engine(0);
    engine.load_checkpoint(&path).unwrap();

    assert!(engine.is_ready());
    assert_eq!(engine.checkpoint(), Some(path.as_path()));

    let x = Array4::from_shape_fn((1, 1, 4, 4), |(_, _, y, x)| (y * 4 + x) as f32 / 16.);
    let probs = engine.predict(x).unwrap();

    assert_eq!(probs.len(), 2);
    assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    assert!((probs.iter().sum::<f32>() - 1.).abs() < 1e-5);
}

#[test]
fn classification_ranks_classes() {
    let dir = tempfile::tempdir().unwrap();
    let path = saved_checkpoint(&dir, 2);
    let mut engine = engine(0);
    engine.load_checkpoint(&path).unwrap();

    let classification = engine.classify(Array4::ones((1, 1, 4, 4))).unwrap();

    assert_eq!(classification.ranked.len(), 2);
    assert_eq!(classification.ranked[0].0, classification.class);
    assert_eq!(classification.ranked[0].1, classification.confidence);
    assert!(classification.ranked[0].1 >= classification.ranked[1].1);
}

#[test]
fn batches_are_rejected_by_predict() {
    let dir = tempfile::tempdir().unwrap();
    let path = saved_checkpoint(&dir, 1);
    let mut engine = engine(0);
    engine.load_checkpoint(&path).unwrap();

    let err = engine.predict(Array4::zeros((2, 1, 4, 4))).unwrap_err();
    assert!(matches!(err, OrchestratorError::ShapeMismatch(_)));
}

#[test]
fn accuracy_is_a_fraction() {
    let dir = tempfile::tempdir().unwrap();
    let path = saved_checkpoint(&dir, 5);
    let mut engine = engine(0);
    engine.load_checkpoint(&path).unwrap();

    let batch = NonZeroUsize::new(3).unwrap();
    let accuracy = engine.evaluate(&dataset(7), batch).unwrap().unwrap();
    assert!((0.0..=1.0).contains(&accuracy));

    assert_eq!(engine.evaluate(&Dataset::empty(SHAPE), batch).unwrap(), None);
}

#[test]
fn class_names_must_match_the_model() {
    let model = orchestrator::compile(&tiny_architecture(), SHAPE, 2, None).unwrap();
    let err = InferenceEngine::new(model, vec!["only".to_string()]).unwrap_err();
    assert!(matches!(err, OrchestratorError::ShapeMismatch(_)));
}

#[test]
fn trained_checkpoint_classifies_an_image_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut splits = common::splits(8, 0);
    let outcome = orchestrator::train(
        &tiny_architecture(),
        &common::training(1),
        &mut splits,
        dir.path().join("results"),
    )
    .unwrap();

    let image_path = dir.path().join("sample.png");
    RgbImage::from_pixel(8, 8, Rgb([200, 200, 200]))
        .save(&image_path)
        .unwrap();

    let shape = InputShape::new(1, 4, 4);
    let x = preprocess_image(&image_path, shape).unwrap();
    assert_eq!(x.dim(), (1, 1, 4, 4));

    let mut engine = engine(0);
    engine.load_checkpoint(&outcome.final_checkpoint).unwrap();
    let probs = engine.predict(x).unwrap();
    assert!((probs.iter().sum::<f32>() - 1.).abs() < 1e-5);
}
