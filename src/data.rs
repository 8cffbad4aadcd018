//! Preparing column-major datasets for training.

use ndarray::{s, Axis};
use ndarray_rand::rand::{seq::SliceRandom, Rng};

use crate::{Error, Result, Tensor};

/// Standardize every column to zero mean and unit variance.
/// A constant column is only centred.
pub fn zscore_columns(data: &mut Tensor) {
    for mut column in data.columns_mut() {
        let n = column.len();
        if n == 0 {
            continue;
        }
        let mean = column.sum() / n as f32;
        let variance = column.fold(0.0, |sum, &x| sum + (x - mean).powi(2)) / n as f32;
        let std = variance.sqrt();
        if std > 0.0 {
            column.mapv_inplace(|x| (x - mean) / std);
        } else {
            column.mapv_inplace(|x| x - mean);
        }
    }
}

/// Linearly map all values into `[lower, upper]`, the smallest value landing on `lower`
/// and the largest on `upper`. A constant tensor is filled with `lower`.
pub fn rescale(data: &mut Tensor, lower: f32, upper: f32) -> Result<()> {
    if !(lower.is_finite() && upper.is_finite() && lower < upper) {
        return Err(Error::InvalidConfig(format!(
            "rescale range must satisfy lower < upper, got [{lower}, {upper}]"
        )));
    }
    let (min, max) = data.fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &x| {
        (min.min(x), max.max(x))
    });
    if max <= min {
        data.fill(lower);
        return Ok(());
    }
    let scale = (upper - lower) / (max - min);
    data.mapv_inplace(|x| lower + (x - min) * scale);
    Ok(())
}

fn check_example_counts(features: &Tensor, labels: &Tensor) -> Result<()> {
    if features.ncols() != labels.ncols() {
        return Err(Error::InvalidShape(format!(
            "{} feature columns but {} label columns",
            features.ncols(),
            labels.ncols()
        )));
    }
    Ok(())
}

/// Shuffle the examples, applying the same permutation to features and labels.
pub fn shuffle_columns<R: Rng + ?Sized>(
    features: &Tensor,
    labels: &Tensor,
    rng: &mut R,
) -> Result<(Tensor, Tensor)> {
    check_example_counts(features, labels)?;
    let mut indices = (0..features.ncols()).collect::<Vec<_>>();
    indices.shuffle(rng);
    Ok((
        features.select(Axis(1), &indices),
        labels.select(Axis(1), &indices),
    ))
}

/// Split dataset into train and test data.
/// `test_ratio` is a ratio of the number of test data to the whole dataset.
///
/// Returns `(x_train, y_train, x_test, y_test)`.
pub fn train_test_split<R: Rng + ?Sized>(
    features: &Tensor,
    labels: &Tensor,
    test_ratio: f32,
    rng: &mut R,
) -> Result<(Tensor, Tensor, Tensor, Tensor)> {
    if !(0.0..1.0).contains(&test_ratio) {
        return Err(Error::InvalidConfig(format!(
            "test ratio must be in [0, 1), got {test_ratio}"
        )));
    }
    let (features, labels) = shuffle_columns(features, labels, rng)?;
    let n_trains = (features.ncols() as f32 * (1.0 - test_ratio)) as usize;

    let (x_train, x_test) = features.view().split_at(Axis(1), n_trains);
    let (y_train, y_test) = labels.view().split_at(Axis(1), n_trains);
    Ok((
        x_train.to_owned(),
        y_train.to_owned(),
        x_test.to_owned(),
        y_test.to_owned(),
    ))
}

/// Cuts a dataset into batches of consecutive columns.
///
/// Batch numbers wrap around, so a loss counting batches across epochs keeps getting data.
/// Trailing examples that do not fill a batch are left out.
pub struct DataLoader {
    features: Tensor,
    labels: Tensor,
    batch_size: usize,
}

impl DataLoader {
    pub fn new(features: Tensor, labels: Tensor, batch_size: usize) -> Result<Self> {
        check_example_counts(&features, &labels)?;
        if batch_size == 0 || batch_size > features.ncols() {
            return Err(Error::InvalidConfig(format!(
                "batch size must be in 1..={}, got {batch_size}",
                features.ncols()
            )));
        }
        Ok(Self {
            features,
            labels,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn size(&self) -> usize {
        self.features.ncols()
    }

    /// Full batches per epoch.
    pub fn num_batches(&self) -> usize {
        self.size() / self.batch_size
    }

    fn columns(&self, batch_number: usize) -> std::ops::Range<usize> {
        let start = (batch_number % self.num_batches()) * self.batch_size;
        start..start + self.batch_size
    }

    pub fn input(&self, batch_number: usize) -> Tensor {
        let columns = self.columns(batch_number);
        self.features.slice(s![.., columns]).to_owned()
    }

    pub fn expected(&self, batch_number: usize) -> Tensor {
        let columns = self.columns(batch_number);
        self.labels.slice(s![.., columns]).to_owned()
    }

    /// Shuffle the examples in place, keeping features and labels paired.
    pub fn reshuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        let (features, labels) = shuffle_columns(&self.features, &self.labels, rng)?;
        self.features = features;
        self.labels = labels;
        Ok(())
    }
}
