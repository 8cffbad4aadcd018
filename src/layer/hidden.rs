use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use ndarray::{Array, Axis};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use crate::{
    layer::{check_same_shape, missing_forward_state, Layer, Mode},
    Error, Result, Tensor,
};

/// Fully connected layer computing `W·X + b`, trained by plain SGD.
pub struct Hidden {
    // out x in
    weights: Tensor,
    // out x 1
    biases: Tensor,
    input: Option<Tensor>,
    mode: Mode,
    name: String,
    storage: Option<PathBuf>,
}

impl Hidden {
    /// Glorot-uniform weights and zero biases.
    ///
    /// Panics if either dimension is zero.
    pub fn new<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        assert!(
            input_dim > 0 && output_dim > 0,
            "hidden layer dimensions must be positive"
        );
        let bound = (6.0 / (input_dim + output_dim) as f32).sqrt();
        let weights = Array::random_using(
            (output_dim, input_dim),
            Uniform::new(-bound, bound),
            rng,
        );
        let biases = Tensor::zeros((output_dim, 1));
        Self::from_parts(weights, biases)
    }

    /// Use given parameters. `biases` must be an `(out, 1)` column matching the rows of
    /// `weights`.
    pub fn with_weights(weights: Tensor, biases: Tensor) -> Result<Self> {
        check_parameters(&weights, &biases)?;
        Ok(Self::from_parts(weights, biases))
    }

    /// Rebuild a layer from the files [`Layer::store_parameters`] wrote into `dir`.
    /// The loaded layer keeps storing into `dir`.
    pub fn load(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let weights = read_matrix(&weights_path(dir, name))?;
        let biases = read_matrix(&biases_path(dir, name))?;
        Ok(Self::with_weights(weights, biases)?
            .named(name)
            .store_in(dir))
    }

    fn from_parts(weights: Tensor, biases: Tensor) -> Self {
        Self {
            weights,
            biases,
            input: None,
            mode: Mode::default(),
            name: String::new(),
            storage: None,
        }
    }

    /// Name used for the parameter files.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Store parameters into `dir` whenever the network asks for it.
    pub fn store_in(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage = Some(dir.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub fn biases(&self) -> &Tensor {
        &self.biases
    }
}

impl Layer for Hidden {
    fn forward(&mut self, input: Tensor) -> Result<Option<Tensor>> {
        if input.nrows() != self.input_dim() {
            return Err(Error::InvalidShape(format!(
                "hidden layer {:?} expects {} input rows, got {}",
                self.name,
                self.input_dim(),
                input.nrows()
            )));
        }

        // (out x in) * (in x m) + (out x 1) = (out x m)
        let mut output = self.weights.dot(&input);
        output += &self.biases;
        if self.mode == Mode::Train {
            self.input = Some(input);
        }
        Ok(Some(output))
    }

    fn backward(&mut self, gradient: Tensor, learning_rate: f32) -> Result<Option<Tensor>> {
        if self.mode == Mode::Infer {
            return Ok(None);
        }
        let input = self
            .input
            .take()
            .ok_or_else(|| missing_forward_state("hidden"))?;
        check_same_shape(
            "hidden",
            &[self.output_dim(), input.ncols()],
            gradient.shape(),
        )?;
        if gradient.ncols() == 0 {
            return Err(Error::InvalidShape("hidden: empty batch".to_owned()));
        }

        let batch_size = gradient.ncols() as f32;
        // (in x out) * (out x m) = (in x m), taken before the weights move.
        let input_gradient = self.weights.t().dot(&gradient);
        let weights_gradient = gradient.dot(&input.t()) / batch_size;
        let biases_gradient = gradient.sum_axis(Axis(1)).insert_axis(Axis(1)) / batch_size;

        self.weights.scaled_add(-learning_rate, &weights_gradient);
        self.biases.scaled_add(-learning_rate, &biases_gradient);
        Ok(Some(input_gradient))
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

    fn store_parameters(&self) -> Result<()> {
        match &self.storage {
            Some(dir) => {
                write_matrix(&weights_path(dir, &self.name), &self.weights)?;
                write_matrix(&biases_path(dir, &self.name), &self.biases)
            }
            None => Ok(()),
        }
    }
}

fn check_parameters(weights: &Tensor, biases: &Tensor) -> Result<()> {
    if weights.is_empty() {
        return Err(Error::InvalidShape("hidden: empty weight matrix".to_owned()));
    }
    if biases.shape() != [weights.nrows(), 1] {
        return Err(Error::InvalidShape(format!(
            "hidden: biases must be {}x1 for {}x{} weights, got {:?}",
            weights.nrows(),
            weights.nrows(),
            weights.ncols(),
            biases.shape()
        )));
    }
    Ok(())
}

fn weights_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("w_{name}.json"))
}

fn biases_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("b_{name}.json"))
}

fn read_matrix(path: &Path) -> Result<Tensor> {
    let file = File::open(path)
        .map_err(|e| Error::InvalidData(format!("failed to open {}: {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::InvalidData(format!("failed to parse {}: {e}", path.display())))
}

fn write_matrix(path: &Path, matrix: &Tensor) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::InvalidData(format!("failed to create {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, matrix)
        .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", path.display())))?;
    writer
        .flush()
        .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use crate::assert_rel_eq_arr2;

    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;
    use ndarray_rand::rand::{rngs::StdRng, SeedableRng};

    fn fixture() -> Hidden {
        let weights = arr2(&[[1.0, -1.0], [0.5, 2.0]]);
        let biases = arr2(&[[0.5], [-1.0]]);
        Hidden::with_weights(weights, biases).unwrap()
    }

    #[test]
    fn layer_forward_backward() {
        let mut layer = fixture();
        layer.set_mode(Mode::Train);
        let inputs = arr2(&[[1.0, 2.0], [3.0, -1.0]]);
        let outputs = layer.forward(inputs).unwrap().unwrap();
        assert_rel_eq_arr2!(outputs, arr2(&[[-1.5, 3.5], [5.5, -2.0]]));

        let gradient = arr2(&[[1.0, 0.0], [0.0, -1.0]]);
        let input_gradient = layer.backward(gradient, 0.1).unwrap().unwrap();
        assert_rel_eq_arr2!(input_gradient, arr2(&[[1.0, -0.5], [-1.0, -2.0]]));
        assert_rel_eq_arr2!(
            layer.weights().clone(),
            arr2(&[[0.95, -1.15], [0.6, 1.95]]),
            epsilon = 1e-6
        );
        assert_rel_eq_arr2!(
            layer.biases().clone(),
            arr2(&[[0.45], [-0.95]]),
            epsilon = 1e-6
        );
    }

    #[test]
    fn forward_adds_bias_to_every_column() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = Hidden::new(4, 3, &mut rng);
        let biases = arr2(&[[0.25], [-1.0], [2.0]]);
        layer = Hidden::with_weights(layer.weights().clone(), biases.clone()).unwrap();

        let inputs = Array::random_using((4, 5), Uniform::new(-1.0, 1.0), &mut rng);
        let outputs = layer.forward(inputs.clone()).unwrap().unwrap();
        let product = layer.weights().dot(&inputs);
        for ((row, col), value) in outputs.indexed_iter() {
            assert_relative_eq!(*value, product[[row, col]] + biases[[row, 0]]);
        }
    }

    #[test]
    fn zero_gradient_keeps_parameters() {
        let mut layer = fixture();
        layer.set_mode(Mode::Train);
        layer.forward(arr2(&[[1.0, 2.0], [3.0, -1.0]])).unwrap();
        layer.backward(Tensor::zeros((2, 2)), 0.5).unwrap();
        assert_rel_eq_arr2!(layer.weights().clone(), arr2(&[[1.0, -1.0], [0.5, 2.0]]));
        assert_rel_eq_arr2!(layer.biases().clone(), arr2(&[[0.5], [-1.0]]));
    }

    #[test]
    fn glorot_initialization() {
        let mut rng = StdRng::seed_from_u64(42);
        let layer = Hidden::new(10, 6, &mut rng);
        let bound = (6.0f32 / 16.0).sqrt();
        assert_eq!(layer.weights().shape(), &[6, 10]);
        assert!(layer.weights().iter().all(|w| w.abs() <= bound));
        assert!(layer.biases().iter().all(|&b| b == 0.0));

        let mut rng = StdRng::seed_from_u64(42);
        let again = Hidden::new(10, 6, &mut rng);
        assert_eq!(layer.weights(), again.weights());
    }

    #[test]
    #[should_panic]
    fn zero_dimension_panics() {
        Hidden::new(0, 3, &mut StdRng::seed_from_u64(0));
    }

    #[test]
    fn backward_without_forward_fails() {
        let mut layer = fixture();
        layer.set_mode(Mode::Train);
        let result = layer.backward(Tensor::zeros((2, 2)), 0.1);
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn backward_twice_fails() {
        let mut layer = fixture();
        layer.set_mode(Mode::Train);
        layer.forward(Tensor::ones((2, 3))).unwrap();
        assert!(layer.backward(Tensor::ones((2, 3)), 0.1).is_ok());
        let result = layer.backward(Tensor::ones((2, 3)), 0.1);
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn infer_mode_retains_nothing() {
        let mut layer = fixture();
        layer.set_mode(Mode::Infer);
        layer.forward(Tensor::ones((2, 3))).unwrap();
        assert_eq!(None, layer.backward(Tensor::ones((2, 3)), 0.1).unwrap());

        layer.set_mode(Mode::Train);
        let result = layer.backward(Tensor::ones((2, 3)), 0.1);
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn rejects_wrong_input_rows() {
        let mut layer = fixture();
        let result = layer.forward(Tensor::ones((3, 1)));
        assert!(matches!(result, Err(Error::InvalidShape(_))));
    }

    #[test]
    fn rejects_mismatched_biases() {
        let result = Hidden::with_weights(Tensor::ones((2, 3)), Tensor::zeros((3, 1)));
        assert!(matches!(result, Err(Error::InvalidShape(_))));
    }

    #[test]
    fn store_and_load_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let layer = fixture().named("layer1").store_in(dir.path());
        layer.store_parameters().unwrap();

        let loaded = Hidden::load(dir.path(), "layer1").unwrap();
        assert_eq!("layer1", loaded.name());
        assert_eq!(layer.weights(), loaded.weights());
        assert_eq!(layer.biases(), loaded.biases());
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Hidden::load(dir.path(), "nothing");
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }
}
