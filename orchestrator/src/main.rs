use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use machine_learning::specs::InputShape;

use orchestrator::{
    InferenceEngine,
    configs::{ArchitectureConfig, TrainingConfig},
    data::{ImageFolder, Split, preprocess_image},
};

/// Trains and runs convolutional image classifiers.
#[derive(Parser, Debug)]
#[command(name = "orchestrator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model on the train split, validating every epoch on the valid split
    Train {
        #[command(flatten)]
        common: Common,

        /// Training hyperparameters as JSON, defaults apply when absent
        #[arg(long)]
        params: Option<PathBuf>,

        /// Directory for checkpoints and the loss history
        #[arg(long, default_value = "results")]
        results: PathBuf,
    },

    /// Compute the accuracy of a checkpoint on a split
    Evaluate {
        #[command(flatten)]
        common: Common,

        /// The checkpoint to load
        #[arg(long)]
        checkpoint: PathBuf,

        /// The split to evaluate on
        #[arg(long, value_enum, default_value_t = SplitArg::Test)]
        split: SplitArg,

        #[arg(long, default_value_t = 32)]
        batch_size: usize,
    },

    /// Classify a single image
    Predict {
        #[command(flatten)]
        common: Common,

        /// The checkpoint to load
        #[arg(long)]
        checkpoint: PathBuf,

        /// The image to classify
        #[arg(long)]
        image: PathBuf,
    },
}

#[derive(Args, Debug)]
struct Common {
    /// Architecture as JSON, the reference classifier when absent
    #[arg(long)]
    arch: Option<PathBuf>,

    /// Dataset root holding the train, valid and test directories
    #[arg(long, default_value = "data")]
    data: PathBuf,

    #[arg(long, default_value_t = 3)]
    channels: usize,

    #[arg(long, default_value_t = 128)]
    height: usize,

    #[arg(long, default_value_t = 128)]
    width: usize,
}

impl Common {
    fn shape(&self) -> InputShape {
        InputShape::new(self.channels, self.height, self.width)
    }

    fn architecture(&self, num_classes: usize) -> anyhow::Result<ArchitectureConfig> {
        match &self.arch {
            Some(path) => ArchitectureConfig::from_path(path)
                .with_context(|| format!("reading architecture {}", path.display())),
            None => Ok(ArchitectureConfig::reference(num_classes)),
        }
    }

    fn folder(&self) -> anyhow::Result<ImageFolder> {
        Ok(ImageFolder::new(&self.data, self.shape())?)
    }

    /// Compiles the architecture and loads `checkpoint` into an engine.
    fn engine(&self, checkpoint: &Path) -> anyhow::Result<InferenceEngine> {
        let classes = self.folder()?.classes(Split::Train)?;
        let architecture = self.architecture(classes.len())?;
        let model = orchestrator::compile(&architecture, self.shape(), classes.len(), None)?;

        let mut engine = InferenceEngine::new(model, classes)?;
        engine
            .load_checkpoint(checkpoint)
            .with_context(|| format!("loading checkpoint {}", checkpoint.display()))?;
        Ok(engine)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SplitArg {
    Train,
    Valid,
    Test,
}

impl From<SplitArg> for Split {
    fn from(split: SplitArg) -> Self {
        match split {
            SplitArg::Train => Split::Train,
            SplitArg::Valid => Split::Valid,
            SplitArg::Test => Split::Test,
        }
    }
}

fn train(common: &Common, params: Option<&Path>, results: &Path) -> anyhow::Result<()> {
    let training = match params {
        Some(path) => TrainingConfig::from_path(path)
            .with_context(|| format!("reading training params {}", path.display()))?,
        None => TrainingConfig::default(),
    };

    let mut splits = common.folder()?.load()?;
    let architecture = common.architecture(splits.classes.len())?;
    let outcome = orchestrator::train(&architecture, &training, &mut splits, results)?;

    let history = &outcome.history;
    for (i, (train, valid)) in history.train.iter().zip(&history.validation).enumerate() {
        let epoch = history.first_epoch + i;
        println!("epoch {epoch}: train loss {train:.4}, val loss {valid:.4}");
    }
    println!("final model saved to {}", outcome.final_checkpoint.display());

    Ok(())
}

fn evaluate(
    common: &Common,
    checkpoint: &Path,
    split: Split,
    batch_size: usize,
) -> anyhow::Result<()> {
    let Some(batch_size) = NonZeroUsize::new(batch_size) else {
        bail!("the batch size must be positive");
    };

    let mut engine = common.engine(checkpoint)?;
    let folder = common.folder()?;
    let dataset = folder.load_split(split, engine.classes())?;

    match engine.evaluate(&dataset, batch_size)? {
        Some(accuracy) => println!("{split} accuracy: {:.2}%", accuracy * 100.0),
        None => println!("{split} has no images"),
    }

    Ok(())
}

fn predict(common: &Common, checkpoint: &Path, image: &Path) -> anyhow::Result<()> {
    let mut engine = common.engine(checkpoint)?;
    let x = preprocess_image(image, common.shape())?;
    let classification = engine.classify(x)?;

    println!(
        "{}: {} ({:.2}%)",
        image.display(),
        classification.class,
        classification.confidence * 100.0
    );
    for (class, probability) in &classification.ranked {
        println!("  {class}: {probability:.4}");
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Train {
            common,
            params,
            results,
        } => train(common, params.as_deref(), results),
        Command::Evaluate {
            common,
            checkpoint,
            split,
            batch_size,
        } => evaluate(common, checkpoint, (*split).into(), *batch_size),
        Command::Predict {
            common,
            checkpoint,
            image,
        } => predict(common, checkpoint, image),
    }
}
