use std::num::NonZeroUsize;

use ndarray::{Array4, Axis};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result, specs::InputShape};

/// An in memory set of labeled images, `(samples, channels, height, width)`.
///
/// Shuffling permutes an index table, the samples themselves never move.
#[derive(Clone, Debug)]
pub struct Dataset {
    x: Array4<f32>,
    y: Vec<usize>,
    indices: Vec<usize>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The samples.
    /// * `y` - One class index per sample.
    ///
    /// # Returns
    /// An error if the amount of labels and samples differ.
    pub fn new(x: Array4<f32>, y: Vec<usize>) -> Result<Self> {
        let len = x.len_of(Axis(0));
        if y.len() != len {
            return Err(MlErr::SizeMismatch {
                what: "labels",
                got: y.len(),
                expected: len,
            });
        }

        Ok(Self {
            x,
            y,
            indices: (0..len).collect(),
        })
    }

    /// A dataset with no samples of the given shape.
    pub fn empty(shape: InputShape) -> Self {
        let (c, h, w) = shape.dim();

        Self {
            x: Array4::zeros((0, c, h, w)),
            y: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// The `(channels, height, width)` of every sample.
    pub fn sample_dim(&self) -> (usize, usize, usize) {
        let (_, c, h, w) = self.x.dim();
        (c, h, w)
    }

    pub fn labels(&self) -> &[usize] {
        &self.y
    }

    /// Randomly permutes the order in which samples are batched.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.indices.shuffle(rng);
    }

    /// Iterates over the dataset in batches of at most `batch_size` samples.
    pub fn batches(&self, batch_size: NonZeroUsize) -> Batches<'_> {
        Batches {
            dataset: self,
            batch_size: batch_size.get(),
            pos: 0,
        }
    }
}

/// An iterator of `(x, y)` batches over a `Dataset`, the last one may be smaller.
pub struct Batches<'d> {
    dataset: &'d Dataset,
    batch_size: usize,
    pos: usize,
}

impl Iterator for Batches<'_> {
    type Item = (Array4<f32>, Vec<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        let indices = &self.dataset.indices;
        if self.pos >= indices.len() {
            return None;
        }

        let end = (self.pos + self.batch_size).min(indices.len());
        let chunk = &indices[self.pos..end];
        self.pos = end;

        let x = self.dataset.x.select(Axis(0), chunk);
        let y = chunk.iter().map(|&i| self.dataset.y[i]).collect();
        Some((x, y))
    }
}
