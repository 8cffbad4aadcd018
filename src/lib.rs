//! A small multilayer perceptron trained by mini-batch SGD with hand-derived backpropagation.
//!
//! Batches are column-major: every column of a [`Tensor`] is one example.

use std::{collections::HashMap, hash::Hash};

use ndarray::Array2;

pub mod activation;
pub mod config;
pub mod data;
pub mod error;
pub mod idx;
pub mod layer;
pub mod loss;
pub mod metrics;
pub mod network;

pub use error::{Error, Result};
pub use layer::{ActivationLayer, Dropout, Hidden, Layer, Mode, Softmax};
pub use loss::{CrossEntropyLoss, Loss, SoftmaxCrossEntropyLoss};
pub use network::{EpochStats, Network, TrainingHooks};

/// A batch of examples, one example per column.
pub type Tensor = Array2<f32>;

#[macro_export]
macro_rules! assert_rel_eq_arr2 {
    ($actual:expr, $expected:expr) => {
        assert_eq!($actual.shape(), $expected.shape());
        ndarray::Zip::from(&$actual)
            .and(&$expected)
            .for_each(|v, w| {
                assert_relative_eq!(v, w);
            });
    };
    ($actual:expr, $expected:expr, epsilon = $eps:expr) => {
        assert_eq!($actual.shape(), $expected.shape());
        ndarray::Zip::from(&$actual)
            .and(&$expected)
            .for_each(|v, w| {
                assert_relative_eq!(v, w, epsilon = $eps);
            });
    };
}

/// Encode labels to one-hot columns and decode them.
pub struct OneHotEncoder<Label>
where
    Label: Hash + Eq + Clone,
{
    label_to_id: HashMap<Label, usize>,
    id_to_label: Vec<Label>,
}

impl<Label> OneHotEncoder<Label>
where
    Label: Hash + Eq + Clone,
{
    /// Record labels to convert.
    pub fn new(label_kinds: &[Label]) -> Self {
        let label_to_id = label_kinds
            .iter()
            .cloned()
            .enumerate()
            .map(|(id, label)| (label, id))
            .collect();
        Self {
            label_to_id,
            id_to_label: label_kinds.to_vec(),
        }
    }

    pub fn num_labels(&self) -> usize {
        self.id_to_label.len()
    }

    /// Encode labels to a `(n_labels, n_data)` matrix, one one-hot column per label.
    pub fn encode(&self, labels: &[Label]) -> Result<Tensor> {
        let mut one_hot = Tensor::zeros((self.num_labels(), labels.len()));
        for (col, label) in labels.iter().enumerate() {
            let id = self
                .label_to_id
                .get(label)
                .ok_or_else(|| Error::InvalidData(format!("unknown label in column {col}")))?;
            one_hot[[*id, col]] = 1.0;
        }
        Ok(one_hot)
    }

    /// Decode columns to labels.
    /// Decoded label is determined by an argmax of each column.
    pub fn decode(&self, one_hot: &Tensor) -> Result<Vec<Label>> {
        if one_hot.nrows() != self.num_labels() {
            return Err(Error::InvalidShape(format!(
                "{} rows cannot be decoded into {} labels",
                one_hot.nrows(),
                self.num_labels()
            )));
        }
        Ok(one_hot
            .columns()
            .into_iter()
            .map(|column| self.id_to_label[metrics::argmax(column)].clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn encoder() -> OneHotEncoder<String> {
        let label_kinds = vec!["A", "B", "C"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        OneHotEncoder::new(&label_kinds)
    }

    #[test]
    fn encode_labels() {
        let labels = vec!["A", "A", "C", "B", "C"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let one_hot = encoder().encode(&labels).unwrap();
        assert_rel_eq_arr2!(
            arr2(&[
                [1.0, 1.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0, 0.0, 1.0],
            ]),
            one_hot
        );
    }

    #[test]
    fn encode_unknown_label_fails() {
        let labels = vec![String::from("D")];
        assert!(matches!(
            encoder().encode(&labels),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn decode_one_hot() {
        let one_hot = arr2(&[
            [1.0, 0.8, 0.05, 0.0, 0.1],
            [0.0, 0.2, 0.05, 1.0, 0.2],
            [0.0, 0.0, 0.9, 0.0, 0.7],
        ]);
        let labels = encoder().decode(&one_hot).unwrap();
        assert_eq!(
            vec!["A", "A", "C", "B", "C"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>(),
            labels
        );
    }

    #[test]
    fn decode_rejects_wrong_number_of_rows() {
        let one_hot = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        assert!(matches!(
            encoder().decode(&one_hot),
            Err(Error::InvalidShape(_))
        ));
        assert!(matches!(
            encoder().decode(&Tensor::zeros((4, 1))),
            Err(Error::InvalidShape(_))
        ));
    }
}
