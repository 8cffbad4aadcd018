use ndarray::{Array2, Zip};
use ndarray_rand::rand::{rngs::StdRng, Rng};

use crate::{
    layer::{check_same_shape, missing_forward_state, Layer, Mode},
    Error, Result, Tensor,
};

/// Randomly zeroes elements while training and scales the survivors by `1 / (1 - rate)`.
pub struct Dropout {
    rate: f32,
    scale: f32,
    rng: StdRng,
    // `true` where forward dropped the element; indexed by (row, col).
    mask: Array2<bool>,
    // Set by a training forward pass, consumed by backward.
    pending: bool,
    mode: Mode,
}

impl Dropout {
    /// `rate` must be in `[0, 1)`.
    pub fn new(rate: f32, rng: StdRng) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be in [0, 1), got {rate}"
            )));
        }
        Ok(Self {
            rate,
            scale: 1.0 / (1.0 - rate),
            rng,
            mask: Array2::from_elem((0, 0), false),
            pending: false,
            mode: Mode::default(),
        })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Layer for Dropout {
    fn forward(&mut self, mut input: Tensor) -> Result<Option<Tensor>> {
        if self.mode == Mode::Infer {
            return Ok(Some(input));
        }
        self.pending = true;
        if self.rate <= 0.0 {
            return Ok(Some(input));
        }

        if self.mask.dim() != input.dim() {
            self.mask = Array2::from_elem(input.raw_dim(), false);
        }
        let Self {
            rate,
            scale,
            rng,
            mask,
            ..
        } = self;
        Zip::from(&mut input).and(mask).for_each(|x, dropped| {
            *dropped = rng.gen::<f32>() < *rate;
            if *dropped {
                *x = 0.0;
            } else {
                *x *= *scale;
            }
        });
        Ok(Some(input))
    }

    fn backward(&mut self, mut gradient: Tensor, _learning_rate: f32) -> Result<Option<Tensor>> {
        if self.mode == Mode::Infer {
            return Ok(None);
        }
        if !self.pending {
            return Err(missing_forward_state("dropout"));
        }
        self.pending = false;
        if self.rate <= 0.0 {
            return Ok(Some(gradient));
        }
        check_same_shape("dropout", self.mask.shape(), gradient.shape())?;

        let scale = self.scale;
        Zip::from(&mut gradient)
            .and(&self.mask)
            .for_each(|grad, &dropped| {
                if dropped {
                    *grad = 0.0;
                } else {
                    *grad *= scale;
                }
            });
        Ok(Some(gradient))
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode == Mode::Infer {
            self.pending = false;
        }
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}
