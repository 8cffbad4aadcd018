/// A pointwise nonlinearity and its derivative.
pub trait Activation {
    fn compute(&self, x: f32) -> f32;

    fn derivative(&self, x: f32) -> f32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Activation for Identity {
    fn compute(&self, x: f32) -> f32 {
        x
    }

    fn derivative(&self, _x: f32) -> f32 {
        1.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

impl Activation for Sigmoid {
    fn compute(&self, x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    fn derivative(&self, x: f32) -> f32 {
        let s = self.compute(x);
        s * (1.0 - s)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

impl Activation for Tanh {
    fn compute(&self, x: f32) -> f32 {
        x.tanh()
    }

    fn derivative(&self, x: f32) -> f32 {
        let t = x.tanh();
        1.0 - t * t
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl Activation for Relu {
    fn compute(&self, x: f32) -> f32 {
        if x > 0.0 {
            x
        } else {
            0.0
        }
    }

    fn derivative(&self, x: f32) -> f32 {
        if x > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

const SQRT_2_OVER_PI: f32 = 0.797_884_6;
const GELU_CUBIC: f32 = 0.044_715;

/// Gaussian error linear unit, tanh approximation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gelu;

impl Gelu {
    fn inner_tanh(x: f32) -> f32 {
        (SQRT_2_OVER_PI * (x + GELU_CUBIC * x * x * x)).tanh()
    }
}

impl Activation for Gelu {
    fn compute(&self, x: f32) -> f32 {
        0.5 * x * (1.0 + Gelu::inner_tanh(x))
    }

    fn derivative(&self, x: f32) -> f32 {
        let t = Gelu::inner_tanh(x);
        let inner_derivative = SQRT_2_OVER_PI * (1.0 + 3.0 * GELU_CUBIC * x * x);
        0.5 * (1.0 + t) + 0.5 * x * (1.0 - t * t) * inner_derivative
    }
}
