use ndarray::Zip;

use crate::{
    activation::Activation,
    layer::{check_same_shape, missing_forward_state, Layer, Mode},
    Result, Tensor,
};

/// Applies an [`Activation`] to every element.
pub struct ActivationLayer<A: Activation> {
    activation: A,
    input: Option<Tensor>,
    mode: Mode,
}

impl<A: Activation> ActivationLayer<A> {
    pub fn new(activation: A) -> Self {
        Self {
            activation,
            input: None,
            mode: Mode::default(),
        }
    }
}

impl<A: Activation> Layer for ActivationLayer<A> {
    fn forward(&mut self, input: Tensor) -> Result<Option<Tensor>> {
        let output = input.mapv(|x| self.activation.compute(x));
        if self.mode == Mode::Train {
            self.input = Some(input);
        }
        Ok(Some(output))
    }

    fn backward(&mut self, mut gradient: Tensor, _learning_rate: f32) -> Result<Option<Tensor>> {
        if self.mode == Mode::Infer {
            return Ok(None);
        }
        let input = self
            .input
            .take()
            .ok_or_else(|| missing_forward_state("activation"))?;
        check_same_shape("activation", input.shape(), gradient.shape())?;

        Zip::from(&mut gradient)
            .and(&input)
            .for_each(|grad, &x| *grad *= self.activation.derivative(x));
        Ok(Some(gradient))
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode == Mode::Infer {
            self.input = None;
        }
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}
