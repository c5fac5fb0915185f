//! Dataset views and batch iteration.
//!
//! Dataset parsing and augmentation live outside this crate. Here a dataset is
//! anything indexable and finite; [`Subset`] gives fold views over it, and a
//! [`DataLoader`] turns a dataset plus a [`Batcher`] into a lazy, restartable
//! sequence of batches.

use crate::error::TrainError;

/// Indexable, finite collection of samples.
pub trait Dataset {
    type Item;

    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<Self::Item, TrainError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Dataset for [T] {
    type Item = T;

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn get(&self, index: usize) -> Result<T, TrainError> {
        <[T]>::get(self, index).cloned().ok_or_else(|| {
            TrainError::dataset(format!(
                "index {index} out of range for dataset of {} samples",
                <[T]>::len(self)
            ))
        })
    }
}

impl<T: Clone> Dataset for Vec<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn get(&self, index: usize) -> Result<T, TrainError> {
        Dataset::get(self.as_slice(), index)
    }
}

impl<D: Dataset + ?Sized> Dataset for &D {
    type Item = D::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<D::Item, TrainError> {
        (**self).get(index)
    }
}

/// View over selected indices of a parent dataset.
///
/// Item `i` of the subset is item `indices[i]` of the parent, unchanged.
#[derive(Debug)]
pub struct Subset<'a, D: ?Sized> {
    parent: &'a D,
    indices: Vec<usize>,
}

impl<'a, D: Dataset + ?Sized> Subset<'a, D> {
    /// Fails if any index is out of range for `parent`.
    pub fn new(parent: &'a D, indices: Vec<usize>) -> Result<Self, TrainError> {
        let len = parent.len();
        if let Some(bad) = indices.iter().find(|&&i| i >= len) {
            return Err(TrainError::dataset(format!(
                "subset index {bad} out of range for dataset of {len} samples"
            )));
        }
        Ok(Self { parent, indices })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl<D: Dataset + ?Sized> Dataset for Subset<'_, D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get(&self, index: usize) -> Result<D::Item, TrainError> {
        let parent_index = <[usize]>::get(&self.indices, index).ok_or_else(|| {
            TrainError::dataset(format!(
                "index {index} out of range for subset of {} samples",
                self.indices.len()
            ))
        })?;
        self.parent.get(*parent_index)
    }
}

/// Stacks a list of samples into one batch.
///
/// Implementors usually hold the target device and produce batches already
/// placed on it.
pub trait Batcher<I> {
    type Batch;

    fn batch(&self, items: Vec<I>) -> Result<Self::Batch, TrainError>;
}

impl<I, B: Batcher<I> + ?Sized> Batcher<I> for &B {
    type Batch = B::Batch;

    fn batch(&self, items: Vec<I>) -> Result<Self::Batch, TrainError> {
        (**self).batch(items)
    }
}

/// A finite, restartable sequence of batches.
///
/// Every call to `batches` starts from the first batch again.
pub trait BatchSource {
    type Batch;

    fn num_batches(&self) -> usize;

    fn batches(&self) -> Box<dyn Iterator<Item = Result<Self::Batch, TrainError>> + '_>;
}

/// Pre-built batches, replayed in order.
impl<T: Clone> BatchSource for Vec<T> {
    type Batch = T;

    fn num_batches(&self) -> usize {
        self.len()
    }

    fn batches(&self) -> Box<dyn Iterator<Item = Result<T, TrainError>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

/// Sequential batches of `batch_size` samples; the last batch may be smaller.
#[derive(Debug)]
pub struct DataLoader<'a, D: ?Sized, B> {
    dataset: &'a D,
    batcher: &'a B,
    batch_size: usize,
}

impl<'a, D, B> DataLoader<'a, D, B>
where
    D: Dataset + ?Sized,
    B: Batcher<D::Item>,
{
    pub fn new(dataset: &'a D, batcher: &'a B, batch_size: usize) -> Result<Self, TrainError> {
        if batch_size == 0 {
            return Err(TrainError::config("batch_size must be >= 1"));
        }
        Ok(Self {
            dataset,
            batcher,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per pass, counting a trailing partial batch.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn iter(&self) -> Batches<'a, D, B> {
        Batches {
            dataset: self.dataset,
            batcher: self.batcher,
            batch_size: self.batch_size,
            cursor: 0,
        }
    }
}

impl<D, B> BatchSource for DataLoader<'_, D, B>
where
    D: Dataset + ?Sized,
    B: Batcher<D::Item>,
{
    type Batch = B::Batch;

    fn num_batches(&self) -> usize {
        self.len()
    }

    fn batches(&self) -> Box<dyn Iterator<Item = Result<B::Batch, TrainError>> + '_> {
        Box::new(self.iter())
    }
}

/// Iterator returned by [`DataLoader::iter`]. Samples are fetched lazily, one
/// batch at a time.
#[derive(Debug)]
pub struct Batches<'a, D: ?Sized, B> {
    dataset: &'a D,
    batcher: &'a B,
    batch_size: usize,
    cursor: usize,
}

impl<D, B> Iterator for Batches<'_, D, B>
where
    D: Dataset + ?Sized,
    B: Batcher<D::Item>,
{
    type Item = Result<B::Batch, TrainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.dataset.len();
        if self.cursor >= len {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(len);
        let items: Result<Vec<D::Item>, TrainError> =
            (self.cursor..end).map(|i| self.dataset.get(i)).collect();
        self.cursor = end;
        Some(items.and_then(|items| self.batcher.batch(items)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .dataset
            .len()
            .saturating_sub(self.cursor)
            .div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}
