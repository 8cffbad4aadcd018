mod activation;
mod dropout;
mod hidden;
mod softmax;

pub use activation::ActivationLayer;
pub use dropout::Dropout;
pub use hidden::Hidden;
pub use softmax::{softmax_columns, Softmax};

use crate::{loss::Loss, Error, Result, Tensor};

/// Whether layers retain what their backward pass needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Infer,
}

/// A stateful stage of a network.
///
/// In [`Mode::Train`], `forward` keeps whatever `backward` needs in a slot owned by the layer.
/// `backward` consumes that slot, so every backward call needs a matching forward call.
pub trait Layer {
    /// Transform a batch. Only a [`Loss`] returns `None`, when there is no expectation for
    /// the batch.
    fn forward(&mut self, input: Tensor) -> Result<Option<Tensor>>;

    /// Turn the gradient w.r.t. this layer's output into the gradient w.r.t. its input,
    /// updating trainable parameters with `learning_rate` on the way.
    /// Returns `None` without doing anything in [`Mode::Infer`].
    fn backward(&mut self, gradient: Tensor, learning_rate: f32) -> Result<Option<Tensor>>;

    /// Takes effect on the next forward/backward call. Switching to [`Mode::Infer`] drops
    /// any retained state.
    fn set_mode(&mut self, mode: Mode);

    fn mode(&self) -> Mode;

    fn as_loss(&self) -> Option<&dyn Loss> {
        None
    }

    fn as_loss_mut(&mut self) -> Option<&mut dyn Loss> {
        None
    }

    /// Write parameters to wherever the layer was told to keep them.
    fn store_parameters(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn missing_forward_state(layer: &str) -> Error {
    Error::InvalidState(format!(
        "{layer}: backward called without a preceding forward in train mode"
    ))
}

pub(crate) fn check_same_shape(layer: &str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(Error::InvalidShape(format!(
            "{layer}: expected a {expected:?} gradient, got {actual:?}"
        )));
    }
    Ok(())
}
