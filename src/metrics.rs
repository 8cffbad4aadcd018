//! Scores of predictions against expectations.
//! Used for reporting only, never for gradients.

use ndarray::{ArrayView1, Zip};

use crate::Tensor;

/// Index of the largest element. The first one wins on ties.
pub fn argmax(values: ArrayView1<f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(max_index, max_elem), (index, &elem)| {
            if elem > max_elem {
                (index, elem)
            } else {
                (max_index, max_elem)
            }
        })
        .0
}

/// Fraction of columns whose argmax in `pred` matches the argmax in `expect`.
///
/// Panics if `pred` and `expect` differ in shape. Losses check the shapes before scoring.
pub fn categorical_accuracy(pred: &Tensor, expect: &Tensor) -> f64 {
    assert_eq!(pred.shape(), expect.shape());
    if pred.ncols() == 0 {
        return 0.0;
    }

    let n_corrects = Zip::from(pred.columns())
        .and(expect.columns())
        .fold(0usize, |count, p, e| {
            if argmax(p) == argmax(e) {
                count + 1
            } else {
                count
            }
        });
    n_corrects as f64 / pred.ncols() as f64
}

/// Hellinger similarity of two discrete distributions,
/// `1 - (1/sqrt 2) * sqrt(sum (sqrt p - sqrt q)^2)`.
pub fn hellinger_similarity(p: ArrayView1<f32>, q: ArrayView1<f32>) -> f64 {
    let squared_sum = Zip::from(&p).and(&q).fold(0.0f64, |sum, &p, &q| {
        let diff = (p.max(0.0) as f64).sqrt() - (q.max(0.0) as f64).sqrt();
        sum + diff * diff
    });
    1.0 - squared_sum.sqrt() / std::f64::consts::SQRT_2
}

/// Hellinger similarity between the columns of `pred` and `expect`, averaged over columns.
///
/// Panics if `pred` and `expect` differ in shape.
pub fn hellinger_accuracy(pred: &Tensor, expect: &Tensor) -> f64 {
    assert_eq!(pred.shape(), expect.shape());
    if pred.ncols() == 0 {
        return 0.0;
    }

    let similarity_sum = Zip::from(pred.columns())
        .and(expect.columns())
        .fold(0.0, |sum, p, e| sum + hellinger_similarity(p, e));
    similarity_sum / pred.ncols() as f64
}
