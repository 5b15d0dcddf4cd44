use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use machine_learning::arch::Model;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{error::OrchestratorError, session::LossHistory};

type Result<T> = std::result::Result<T, OrchestratorError>;

/// Writes a model's parameters to a safetensors file, one tensor per learnable array.
///
/// # Arguments
/// * `model` - The model to snapshot.
/// * `path` - The destination file, replaced as a whole once the new one is fully written.
pub fn save(model: &Model, path: impl AsRef<Path>) -> Result<()> {
    let params = model.params();

    let mut views = Vec::with_capacity(model.layout().len());
    for slot in model.layout() {
        let values = &params[slot.offset..slot.offset + slot.len()];
        let view = TensorView::new(Dtype::F32, slot.shape.clone(), bytemuck::cast_slice(values))?;
        views.push((slot.name.as_str(), view));
    }

    let bytes = safetensors::serialize(views, &None)?;
    write_replacing(path.as_ref(), &bytes)?;
    Ok(())
}

/// Writes `bytes` next to `path` and renames the result over it, so an interrupted write never
/// leaves a truncated file at `path`.
fn write_replacing(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Overwrites a model's parameters with the ones stored in a safetensors file.
///
/// The file must hold exactly the tensors of the model, with the same names and shapes.
/// Nothing is applied unless every tensor matches.
///
/// # Errors
/// `ShapeMismatch` for a missing, extra, mistyped or mis-shaped tensor.
pub fn load(model: &mut Model, path: impl AsRef<Path>) -> Result<()> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let expected: HashSet<&str> = model.layout().iter().map(|slot| slot.name.as_str()).collect();
    if let Some(extra) = tensors
        .names()
        .into_iter()
        .find(|name| !expected.contains(name.as_str()))
    {
        return Err(OrchestratorError::ShapeMismatch(format!(
            "the checkpoint holds tensor {extra} which the model does not have"
        )));
    }

    let mut params = vec![0.; model.size()];
    for slot in model.layout() {
        let tensor = tensors.tensor(&slot.name).map_err(|_| {
            OrchestratorError::ShapeMismatch(format!(
                "the checkpoint is missing tensor {}",
                slot.name
            ))
        })?;

        if tensor.dtype() != Dtype::F32 {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "tensor {} is {:?} instead of F32",
                slot.name,
                tensor.dtype()
            )));
        }

        if tensor.shape() != slot.shape.as_slice() {
            return Err(OrchestratorError::ShapeMismatch(format!(
                "tensor {} has shape {:?} and the model expects {:?}",
                slot.name,
                tensor.shape(),
                slot.shape
            )));
        }

        let values = &mut params[slot.offset..slot.offset + slot.len()];
        for (value, chunk) in values.iter_mut().zip(tensor.data().chunks_exact(4)) {
            *value = bytemuck::pod_read_unaligned(chunk);
        }
    }

    model.set_params(&params)?;
    Ok(())
}

/// The results directory of a training run.
///
/// Holds `model_epoch_<n>.safetensors` for every finished epoch, `model.safetensors` for the
/// final snapshot and `loss_history.json`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens a results directory, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn epoch_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("model_epoch_{epoch}.safetensors"))
    }

    pub fn final_path(&self) -> PathBuf {
        self.dir.join("model.safetensors")
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join("loss_history.json")
    }

    /// Snapshots `model` as the checkpoint of `epoch`, replacing any previous one.
    pub fn save_epoch(&self, model: &Model, epoch: usize) -> Result<PathBuf> {
        let path = self.epoch_path(epoch);
        save(model, &path)?;
        log::debug!("saved checkpoint {}", path.display());
        Ok(path)
    }

    pub fn save_final(&self, model: &Model) -> Result<PathBuf> {
        let path = self.final_path();
        save(model, &path)?;
        log::debug!("saved final checkpoint {}", path.display());
        Ok(path)
    }

    pub fn save_history(&self, history: &LossHistory) -> Result<PathBuf> {
        let path = self.history_path();
        let json = serde_json::to_vec_pretty(history).map_err(io::Error::from)?;
        write_replacing(&path, &json)?;
        Ok(path)
    }

    /// Reads the loss history of a previous run, `None` if there is none.
    pub fn load_history(&self) -> Result<Option<LossHistory>> {
        let path = self.history_path();
        if !path.is_file() {
            return Ok(None);
        }

        let json = fs::read(&path)?;
        let history = serde_json::from_slice(&json).map_err(io::Error::from)?;
        Ok(Some(history))
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::{
        arch::ModelBuilder,
        specs::{InputShape, LayerSpec},
    };

    use super::*;

    fn model(seed: u64) -> Model {
        let layers = [(
            "fcl1".to_string(),
            LayerSpec::FullyConnected {
                in_features: 4,
                out_features: 2,
                act_fn: None,
            },
        )];

        ModelBuilder::new(InputShape::new(1, 2, 2), 2)
            .build(&layers, Some(seed))
            .unwrap()
    }

    #[test]
    fn tensors_are_named_after_layers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        save(&model(0), &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        let tensors = SafeTensors::deserialize(&bytes).unwrap();
        let mut names = tensors.names();
        names.sort();

        assert_eq!(names, ["fcl1.bias", "fcl1.weight"]);
        assert_eq!(tensors.tensor("fcl1.weight").unwrap().shape(), [2, 4]);
    }

    #[test]
    fn extra_tensors_are_rejected_and_params_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.safetensors");
        let source = model(1);

        let weight = &source.params()[..8];
        let bias = &source.params()[8..];
        let stray = [0f32; 3];
        let views = vec![
            (
                "fcl1.weight",
                TensorView::new(Dtype::F32, vec![2, 4], bytemuck::cast_slice(weight)).unwrap(),
            ),
            (
                "fcl1.bias",
                TensorView::new(Dtype::F32, vec![2], bytemuck::cast_slice(bias)).unwrap(),
            ),
            (
                "fcl2.bias",
                TensorView::new(Dtype::F32, vec![3], bytemuck::cast_slice(&stray)).unwrap(),
            ),
        ];
        fs::write(&path, safetensors::serialize(views, &None).unwrap()).unwrap();

        let mut target = model(2);
        let before = target.params().to_vec();
        let err = load(&mut target, &path).unwrap_err();

        assert!(matches!(err, OrchestratorError::ShapeMismatch(_)));
        assert_eq!(target.params(), before.as_slice());
    }

    #[test]
    fn saving_replaces_the_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        fs::write(&path, b"an older, truncated checkpoint").unwrap();

        let source = model(3);
        save(&source, &path).unwrap();

        let mut restored = model(4);
        load(&mut restored, &path).unwrap();
        assert_eq!(restored.params(), source.params());

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, ["model.safetensors"]);
    }

    #[test]
    fn garbage_is_a_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.safetensors");
        fs::write(&path, b"not a checkpoint").unwrap();

        let err = load(&mut model(0), &path).unwrap_err();
        assert!(matches!(err, OrchestratorError::Checkpoint(_)));
    }

    #[test]
    fn store_lays_out_the_results_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/results")).unwrap();

        assert!(store.dir().is_dir());
        assert_eq!(
            store.epoch_path(3),
            store.dir().join("model_epoch_3.safetensors")
        );

        let history = LossHistory {
            first_epoch: 1,
            train: vec![0.5, 0.25],
            validation: vec![0.75, 0.5],
        };
        let path = store.save_history(&history).unwrap();
        let read: LossHistory = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(read, history);
        assert_eq!(store.load_history().unwrap(), Some(history));
    }

    #[test]
    fn missing_history_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        assert_eq!(store.load_history().unwrap(), None);
    }
}
