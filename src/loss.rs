//! Terminal layers turning predictions into losses and error gradients.
//!
//! A loss does not know how data is batched. It pulls the expected values for the current
//! batch from a provider registered by the owning network, keyed by its own batch counter,
//! and reports losses and accuracy through callbacks.

use crate::{
    layer::{missing_forward_state, softmax_columns, Layer, Mode},
    metrics, Error, Result, Tensor,
};

/// Receives the `1 x batch_size` row of per-example losses.
pub type LossCallback = Box<dyn FnMut(&Tensor)>;
/// Receives the accuracy of a batch.
pub type AccuracyCallback = Box<dyn FnMut(f64)>;
/// Maps a batch number to the expected values of that batch, if there are any.
pub type ExpectationProvider = Box<dyn FnMut(usize) -> Option<Tensor>>;
/// Scores a prediction against the expected values.
pub type AccuracyFn = fn(&Tensor, &Tensor) -> f64;

pub trait Loss: Layer {
    fn register_loss_callback(&mut self, callback: LossCallback);

    fn register_accuracy_callback(&mut self, callback: AccuracyCallback);

    fn register_expected_values_provider(&mut self, provider: ExpectationProvider);

    /// Number of batches an expectation has been fetched for.
    fn batch_number(&self) -> usize;

    /// A prediction head returns a prediction from `forward` in [`Mode::Infer`] and the
    /// gradient cached by its training `forward` from `backward`. Other losses only
    /// produce gradients from `forward` and their `backward` does nothing.
    fn is_prediction_head(&self) -> bool {
        false
    }
}

/// Callbacks and batch bookkeeping shared by the loss layers.
struct LossState {
    loss_callback: Option<LossCallback>,
    accuracy_callback: Option<AccuracyCallback>,
    expected_values_provider: Option<ExpectationProvider>,
    accuracy: AccuracyFn,
    batch_number: usize,
    mode: Mode,
}

impl LossState {
    fn new() -> Self {
        Self {
            loss_callback: None,
            accuracy_callback: None,
            expected_values_provider: None,
            accuracy: metrics::categorical_accuracy,
            batch_number: 0,
            mode: Mode::default(),
        }
    }

    /// Expected values for the current batch. The batch counter only advances when the
    /// provider has something of the right shape.
    fn expectation(&mut self, prediction: &Tensor) -> Result<Option<Tensor>> {
        let provider = match self.expected_values_provider.as_mut() {
            Some(provider) => provider,
            None => return Ok(None),
        };
        let expected = match provider(self.batch_number) {
            Some(expected) => expected,
            None => return Ok(None),
        };
        if expected.shape() != prediction.shape() {
            return Err(Error::InvalidShape(format!(
                "expected values for batch {} are {:?}, prediction is {:?}",
                self.batch_number,
                expected.shape(),
                prediction.shape()
            )));
        }
        self.batch_number += 1;
        Ok(Some(expected))
    }

    fn report(&mut self, pred: &Tensor, expect: &Tensor) {
        if let Some(callback) = self.loss_callback.as_mut() {
            callback(&cross_entropy(pred, expect));
        }
        if let Some(callback) = self.accuracy_callback.as_mut() {
            callback((self.accuracy)(pred, expect));
        }
    }
}

fn clamp(x: f32) -> f32 {
    if x <= 0.0 {
        f32::MIN_POSITIVE
    } else {
        x
    }
}

/// Per-example cross-entropy `-sum_k expect[k] * ln(pred[k])` as a `1 x batch_size` row.
/// Non-positive predictions are clamped to the smallest positive `f32`.
pub fn cross_entropy(pred: &Tensor, expect: &Tensor) -> Tensor {
    let mut losses = Tensor::zeros((1, pred.ncols()));
    for (col, (p, e)) in pred.columns().into_iter().zip(expect.columns()).enumerate() {
        let product_sum = p
            .iter()
            .zip(e.iter())
            .filter(|&(_, &e)| e != 0.0)
            .fold(0.0, |sum, (&p, &e)| sum + e * clamp(p).ln());
        losses[[0, col]] = -product_sum;
    }
    losses
}

/// `-expect / pred` where `expect` is non-zero, zero elsewhere.
/// Exact for one-hot expectations only.
pub fn cross_entropy_gradient(pred: &Tensor, expect: &Tensor) -> Tensor {
    let mut gradient = Tensor::zeros(pred.raw_dim());
    ndarray::Zip::from(&mut gradient)
        .and(pred)
        .and(expect)
        .for_each(|grad, &p, &e| {
            if e != 0.0 {
                *grad = -e / clamp(p);
            }
        });
    gradient
}

/// Cross-entropy over probabilities produced by an earlier layer, usually [`crate::Softmax`].
pub struct CrossEntropyLoss {
    state: LossState,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self {
            state: LossState::new(),
        }
    }

    /// Report accuracy with `accuracy` instead of [`metrics::categorical_accuracy`].
    pub fn with_accuracy(mut self, accuracy: AccuracyFn) -> Self {
        self.state.accuracy = accuracy;
        self
    }
}

impl Default for CrossEntropyLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for CrossEntropyLoss {
    fn forward(&mut self, prediction: Tensor) -> Result<Option<Tensor>> {
        let expected = match self.state.expectation(&prediction)? {
            Some(expected) => expected,
            None => return Ok(None),
        };
        self.state.report(&prediction, &expected);
        Ok(Some(cross_entropy_gradient(&prediction, &expected)))
    }

    /// The gradient already left through `forward`.
    fn backward(&mut self, _gradient: Tensor, _learning_rate: f32) -> Result<Option<Tensor>> {
        Ok(None)
    }

    fn set_mode(&mut self, mode: Mode) {
        self.state.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.state.mode
    }

    fn as_loss(&self) -> Option<&dyn Loss> {
        Some(self)
    }

    fn as_loss_mut(&mut self) -> Option<&mut dyn Loss> {
        Some(self)
    }
}

impl Loss for CrossEntropyLoss {
    fn register_loss_callback(&mut self, callback: LossCallback) {
        self.state.loss_callback = Some(callback);
    }

    fn register_accuracy_callback(&mut self, callback: AccuracyCallback) {
        self.state.accuracy_callback = Some(callback);
    }

    fn register_expected_values_provider(&mut self, provider: ExpectationProvider) {
        self.state.expected_values_provider = Some(provider);
    }

    fn batch_number(&self) -> usize {
        self.state.batch_number
    }
}

/// Softmax fused with cross-entropy.
///
/// In [`Mode::Infer`] it is a plain softmax classifier head. In [`Mode::Train`] its gradient
/// w.r.t. the raw input is `softmax(input) - expected`.
pub struct SoftmaxCrossEntropyLoss {
    state: LossState,
    gradient: Option<Tensor>,
}

impl SoftmaxCrossEntropyLoss {
    pub fn new() -> Self {
        Self {
            state: LossState::new(),
            gradient: None,
        }
    }

    /// Report accuracy with `accuracy` instead of [`metrics::categorical_accuracy`].
    pub fn with_accuracy(mut self, accuracy: AccuracyFn) -> Self {
        self.state.accuracy = accuracy;
        self
    }
}

impl Default for SoftmaxCrossEntropyLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for SoftmaxCrossEntropyLoss {
    fn forward(&mut self, input: Tensor) -> Result<Option<Tensor>> {
        let output = softmax_columns(&input);
        if self.state.mode == Mode::Infer {
            return Ok(Some(output));
        }

        let expected = match self.state.expectation(&output)? {
            Some(expected) => expected,
            None => return Ok(None),
        };
        self.state.report(&output, &expected);
        let gradient = output - &expected;
        self.gradient = Some(gradient.clone());
        Ok(Some(gradient))
    }

    fn backward(&mut self, _gradient: Tensor, _learning_rate: f32) -> Result<Option<Tensor>> {
        if self.state.mode == Mode::Infer {
            return Ok(None);
        }
        self.gradient
            .take()
            .map(Some)
            .ok_or_else(|| missing_forward_state("softmax cross-entropy"))
    }

    fn set_mode(&mut self, mode: Mode) {
        self.state.mode = mode;
        if mode == Mode::Infer {
            self.gradient = None;
        }
    }

    fn mode(&self) -> Mode {
        self.state.mode
    }

    fn as_loss(&self) -> Option<&dyn Loss> {
        Some(self)
    }

    fn as_loss_mut(&mut self) -> Option<&mut dyn Loss> {
        Some(self)
    }
}

impl Loss for SoftmaxCrossEntropyLoss {
    fn register_loss_callback(&mut self, callback: LossCallback) {
        self.state.loss_callback = Some(callback);
    }

    fn register_accuracy_callback(&mut self, callback: AccuracyCallback) {
        self.state.accuracy_callback = Some(callback);
    }

    fn register_expected_values_provider(&mut self, provider: ExpectationProvider) {
        self.state.expected_values_provider = Some(provider);
    }

    fn batch_number(&self) -> usize {
        self.state.batch_number
    }

    fn is_prediction_head(&self) -> bool {
        true
    }
}
