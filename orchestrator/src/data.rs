use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use image::{ImageReader, imageops::FilterType};
use machine_learning::{dataset::Dataset, specs::InputShape};
use ndarray::{Array3, Array4, Axis};

use crate::{configs::ConfigError, error::OrchestratorError};

type Result<T> = std::result::Result<T, OrchestratorError>;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// The three splits of an image folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Every split of a dataset loaded in memory, with the class names indexed by label.
#[derive(Debug, Clone)]
pub struct Splits {
    pub classes: Vec<String>,
    pub train: Dataset,
    pub valid: Dataset,
    pub test: Dataset,
}

impl Splits {
    pub fn get(&self, split: Split) -> &Dataset {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }
}

/// A dataset laid out as `root/<split>/<class>/<image>`.
///
/// Class indices follow the sorted class directory names, which must be the same in every split.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    shape: InputShape,
}

impl ImageFolder {
    /// Creates a new `ImageFolder`.
    ///
    /// # Arguments
    /// * `root` - The directory holding the split directories.
    /// * `shape` - The shape every image is resized and converted to, with 1 (grayscale) or 3
    ///   (RGB) channels.
    pub fn new(root: impl Into<PathBuf>, shape: InputShape) -> Result<Self> {
        check_shape(shape)?;

        Ok(Self {
            root: root.into(),
            shape,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn split_dir(&self, split: Split) -> PathBuf {
        self.root.join(split.dir_name())
    }

    /// The sorted class directory names of a split.
    pub fn classes(&self, split: Split) -> Result<Vec<String>> {
        let dir = self.split_dir(split);
        if !dir.is_dir() {
            return Err(ConfigError::DatasetLayout(format!(
                "missing split directory {}",
                dir.display()
            ))
            .into());
        }

        let mut classes = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                classes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        if classes.is_empty() {
            return Err(ConfigError::DatasetLayout(format!(
                "split {split} has no class directories"
            ))
            .into());
        }

        classes.sort();
        Ok(classes)
    }

    /// Loads and preprocesses every image of a split.
    ///
    /// # Arguments
    /// * `split` - The split to load.
    /// * `classes` - The class list, the label of an image is the index of its directory here.
    ///
    /// # Errors
    /// `DatasetLayout` if the split is missing or its class directories differ from `classes`.
    pub fn load_split(&self, split: Split, classes: &[String]) -> Result<Dataset> {
        let found = self.classes(split)?;
        if found != classes {
            return Err(ConfigError::DatasetLayout(format!(
                "split {split} has classes {found:?} but {classes:?} were expected"
            ))
            .into());
        }

        let (c, h, w) = self.shape.dim();
        let mut data = Vec::new();
        let mut labels = Vec::new();

        for (label, class) in classes.iter().enumerate() {
            let dir = self.split_dir(split).join(class);
            for path in image_files(&dir)? {
                let image = load_image(&path, self.shape)?;
                data.extend(image.iter().copied());
                labels.push(label);
            }
        }

        log::info!("loaded {} images from split {split}", labels.len());

        let x = Array4::from_shape_vec((labels.len(), c, h, w), data)
            .map_err(machine_learning::MlErr::from)?;
        Ok(Dataset::new(x, labels)?)
    }

    /// Loads every split. The class list comes from `train`.
    ///
    /// A missing `valid` or `test` directory yields an empty split, any present split must have
    /// the same classes as `train`.
    pub fn load(&self) -> Result<Splits> {
        let classes = self.classes(Split::Train)?;
        let train = self.load_split(Split::Train, &classes)?;

        let mut optional = [Split::Valid, Split::Test].map(|split| (split, None));
        for (split, dataset) in &mut optional {
            if !self.split_dir(*split).is_dir() {
                log::warn!("split {split} not found under {}", self.root.display());
                continue;
            }

            *dataset = Some(self.load_split(*split, &classes)?);
        }

        let [(_, valid), (_, test)] = optional;
        Ok(Splits {
            train,
            valid: valid.unwrap_or_else(|| Dataset::empty(self.shape)),
            test: test.unwrap_or_else(|| Dataset::empty(self.shape)),
            classes,
        })
    }
}

fn check_shape(shape: InputShape) -> Result<()> {
    if !matches!(shape.channels, 1 | 3) || shape.height == 0 || shape.width == 0 {
        return Err(ConfigError::DatasetLayout(format!(
            "images can only be loaded as 1 or 3 channels of a positive size, got {shape:?}"
        ))
        .into());
    }

    Ok(())
}

/// The image files of a directory, sorted by name.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));

        if path.is_file() && is_image {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Decodes an image, resizes it to `shape` and converts it to a `(C, H, W)` tensor in `[0, 1]`.
pub fn load_image(path: &Path, shape: InputShape) -> Result<Array3<f32>> {
    check_shape(shape)?;
    let (c, h, w) = shape.dim();

    let image = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|source| OrchestratorError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .resize_exact(w as u32, h as u32, FilterType::Triangle);

    // Interleaved `(H, W, C)` bytes.
    let raw = match c {
        1 => image.to_luma8().into_raw(),
        _ => image.to_rgb8().into_raw(),
    };

    Ok(Array3::from_shape_fn((c, h, w), |(ch, y, x)| {
        f32::from(raw[(y * w + x) * c + ch]) / 255.
    }))
}

/// Preprocesses a single image for inference, as a batch of one.
pub fn preprocess_image(path: impl AsRef<Path>, shape: InputShape) -> Result<Array4<f32>> {
    let image = load_image(path.as_ref(), shape)?;
    Ok(image.insert_axis(Axis(0)))
}
