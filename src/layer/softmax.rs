use ndarray::{Array2, Zip};

use crate::{
    layer::{check_same_shape, missing_forward_state, Layer, Mode},
    Result, Tensor,
};

/// Softmax of every column. The column maximum is subtracted before exponentiating.
pub fn softmax_columns(input: &Tensor) -> Tensor {
    let mut output = input.clone();
    for mut column in output.columns_mut() {
        let max_element = column.fold(f32::NEG_INFINITY, |v, &w| v.max(w));
        column.mapv_inplace(|v| (v - max_element).exp());
        let exp_sum = column.sum();
        column /= exp_sum;
    }
    output
}

/// Column-wise softmax. Backward multiplies each gradient column by the softmax Jacobian.
#[derive(Default)]
pub struct Softmax {
    output: Option<Tensor>,
    mode: Mode,
}

impl Softmax {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Softmax {
    fn forward(&mut self, input: Tensor) -> Result<Option<Tensor>> {
        let output = softmax_columns(&input);
        if self.mode == Mode::Train {
            self.output = Some(output.clone());
        }
        Ok(Some(output))
    }

    fn backward(&mut self, gradient: Tensor, _learning_rate: f32) -> Result<Option<Tensor>> {
        if self.mode == Mode::Infer {
            return Ok(None);
        }
        let output = self
            .output
            .take()
            .ok_or_else(|| missing_forward_state("softmax"))?;
        check_same_shape("softmax", output.shape(), gradient.shape())?;

        let rows = output.nrows();
        let mut input_gradient = Tensor::zeros(output.raw_dim());
        Zip::from(input_gradient.columns_mut())
            .and(output.columns())
            .and(gradient.columns())
            .for_each(|mut input_grad, s, grad| {
                // J[i][i] = s_i (1 - s_i), J[i][j] = -s_i s_j
                let jacobian = Array2::from_shape_fn((rows, rows), |(i, j)| {
                    if i == j {
                        s[i] * (1.0 - s[i])
                    } else {
                        -s[i] * s[j]
                    }
                });
                input_grad.assign(&jacobian.dot(&grad));
            });
        Ok(Some(input_gradient))
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode == Mode::Infer {
            self.output = None;
        }
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}
