//! JSON description of a network and its training run.
//!
//! ```json
//! {
//!   "seed": 7,
//!   "learning_rate": 0.001,
//!   "batch_size": 200,
//!   "epochs": 10,
//!   "layers": [
//!     { "type": "hidden", "input": 784, "output": 256, "name": "layer1" },
//!     { "type": "activation", "function": "relu" },
//!     { "type": "dropout", "rate": 0.2 },
//!     { "type": "hidden", "input": 256, "output": 10 }
//!   ],
//!   "loss": "softmax_cross_entropy",
//!   "accuracy": "categorical",
//!   "storage": "./data"
//! }
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use ndarray_rand::rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;

use crate::{
    activation::{Gelu, Identity, Relu, Sigmoid, Tanh},
    loss::AccuracyFn,
    metrics, ActivationLayer, CrossEntropyLoss, Dropout, Error, Hidden, Layer, Network, Result,
    Softmax, SoftmaxCrossEntropyLoss,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunction {
    Identity,
    Sigmoid,
    Tanh,
    Relu,
    Gelu,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    /// Unnamed hidden layers are called `layer<position>`, counting from 1.
    Hidden {
        input: usize,
        output: usize,
        #[serde(default)]
        name: Option<String>,
    },
    Activation {
        function: ActivationFunction,
    },
    Dropout {
        rate: f32,
    },
    Softmax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossConfig {
    CrossEntropy,
    SoftmaxCrossEntropy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyConfig {
    #[default]
    Categorical,
    Hellinger,
}

impl AccuracyConfig {
    fn function(self) -> AccuracyFn {
        match self {
            AccuracyConfig::Categorical => metrics::categorical_accuracy,
            AccuracyConfig::Hellinger => metrics::hellinger_accuracy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkConfig {
    /// Seeds weight initialization and dropout.
    #[serde(default)]
    pub seed: u64,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub epochs: usize,
    pub layers: Vec<LayerConfig>,
    pub loss: LossConfig,
    #[serde(default)]
    pub accuracy: AccuracyConfig,
    /// Directory hidden layers store their parameters in after inference.
    #[serde(default)]
    pub storage: Option<PathBuf>,
}

impl NetworkConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NetworkConfig = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::InvalidData(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be positive".to_string()));
        }
        if self.epochs == 0 {
            return Err(invalid("epochs must be positive".to_string()));
        }
        if self.layers.is_empty() {
            return Err(invalid("at least one layer is required".to_string()));
        }

        let mut features: Option<usize> = None;
        for (index, layer) in self.layers.iter().enumerate() {
            match layer {
                LayerConfig::Hidden { input, output, .. } => {
                    if *input == 0 || *output == 0 {
                        return Err(invalid(format!(
                            "layer {index}: hidden dimensions must be positive"
                        )));
                    }
                    if let Some(features) = features {
                        if features != *input {
                            return Err(invalid(format!(
                                "layer {index}: expects {input} inputs but receives {features}"
                            )));
                        }
                    }
                    features = Some(*output);
                }
                LayerConfig::Dropout { rate } if !(0.0..1.0).contains(rate) => {
                    return Err(invalid(format!(
                        "layer {index}: dropout rate must be in [0, 1), got {rate}"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Assemble the layers followed by the loss.
    pub fn build(&self) -> Result<Network> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut network = Network::new();

        for (index, layer) in self.layers.iter().enumerate() {
            let layer: Box<dyn Layer> = match layer {
                LayerConfig::Hidden {
                    input,
                    output,
                    name,
                } => {
                    let name = name.clone().unwrap_or_else(|| format!("layer{}", index + 1));
                    let mut hidden = Hidden::new(*input, *output, &mut rng).named(name);
                    if let Some(dir) = &self.storage {
                        hidden = hidden.store_in(dir.clone());
                    }
                    Box::new(hidden)
                }
                LayerConfig::Activation { function } => match function {
                    ActivationFunction::Identity => Box::new(ActivationLayer::new(Identity)),
                    ActivationFunction::Sigmoid => Box::new(ActivationLayer::new(Sigmoid)),
                    ActivationFunction::Tanh => Box::new(ActivationLayer::new(Tanh)),
                    ActivationFunction::Relu => Box::new(ActivationLayer::new(Relu)),
                    ActivationFunction::Gelu => Box::new(ActivationLayer::new(Gelu)),
                },
                LayerConfig::Dropout { rate } => {
                    let dropout_rng = StdRng::seed_from_u64(rng.gen());
                    Box::new(Dropout::new(*rate, dropout_rng)?)
                }
                LayerConfig::Softmax => Box::new(Softmax::new()),
            };
            network.add_boxed(layer);
        }

        let accuracy = self.accuracy.function();
        match self.loss {
            LossConfig::CrossEntropy => {
                network.add(CrossEntropyLoss::new().with_accuracy(accuracy));
            }
            LossConfig::SoftmaxCrossEntropy => {
                network.add(SoftmaxCrossEntropyLoss::new().with_accuracy(accuracy));
            }
        }
        Ok(network)
    }
}

fn invalid(msg: String) -> Error {
    Error::InvalidConfig(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::Tensor;
    use ndarray::Array;

    const CONFIG: &str = r#"{
        "seed": 7,
        "learning_rate": 0.01,
        "batch_size": 4,
        "epochs": 2,
        "layers": [
            { "type": "hidden", "input": 6, "output": 5, "name": "first" },
            { "type": "activation", "function": "gelu" },
            { "type": "dropout", "rate": 0.2 },
            { "type": "hidden", "input": 5, "output": 3 }
        ],
        "loss": "softmax_cross_entropy",
        "accuracy": "hellinger"
    }"#;

    fn input() -> Tensor {
        Array::from_shape_fn((6, 4), |(r, c)| (r as f32 - c as f32) * 0.3)
    }

    #[test]
    fn parse_config() {
        let config = NetworkConfig::from_json_str(CONFIG).unwrap();
        assert_eq!(7, config.seed);
        assert_eq!(4, config.layers.len());
        assert_eq!(
            LayerConfig::Hidden {
                input: 6,
                output: 5,
                name: Some("first".to_string())
            },
            config.layers[0]
        );
        assert_eq!(
            LayerConfig::Activation {
                function: ActivationFunction::Gelu
            },
            config.layers[1]
        );
        assert_eq!(LossConfig::SoftmaxCrossEntropy, config.loss);
        assert_eq!(AccuracyConfig::Hellinger, config.accuracy);
        assert_eq!(None, config.storage);
    }

    #[test]
    fn accuracy_defaults_to_categorical() {
        let json = r#"{ "learning_rate": 0.1, "batch_size": 1, "epochs": 1,
            "layers": [ { "type": "softmax" } ], "loss": "cross_entropy" }"#;
        let config = NetworkConfig::from_json_str(json).unwrap();
        assert_eq!(AccuracyConfig::Categorical, config.accuracy);
        assert_eq!(0, config.seed);
    }

    #[test]
    fn build_network() {
        let network = NetworkConfig::from_json_str(CONFIG).unwrap().build().unwrap();
        assert_eq!(5, network.len());
        assert!(network.is_trainable());
    }

    #[test]
    fn same_seed_same_network() {
        let config = NetworkConfig::from_json_str(CONFIG).unwrap();
        let first = config.build().unwrap().infer(input()).unwrap();
        let second = config.build().unwrap().infer(input()).unwrap();
        assert_eq!(first, second);
        assert_eq!(&[3, 4], first.shape());
    }

    #[test]
    fn rejects_unchained_hidden_layers() {
        let json = CONFIG.replace(r#""input": 5"#, r#""input": 4"#);
        assert!(matches!(
            NetworkConfig::from_json_str(&json),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_dropout_rate_of_one() {
        let json = CONFIG.replace(r#""rate": 0.2"#, r#""rate": 1.0"#);
        assert!(matches!(
            NetworkConfig::from_json_str(&json),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_unknown_layer_type() {
        let json = CONFIG.replace(r#""type": "dropout""#, r#""type": "pooling""#);
        assert!(matches!(
            NetworkConfig::from_json_str(&json),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_non_positive_learning_rate() {
        let json = CONFIG.replace(r#""learning_rate": 0.01"#, r#""learning_rate": 0.0"#);
        assert!(matches!(
            NetworkConfig::from_json_str(&json),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn hidden_layers_store_in_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NetworkConfig::from_json_str(CONFIG).unwrap();
        config.storage = Some(dir.path().to_path_buf());
        config.build().unwrap().infer(input()).unwrap();

        let first = Hidden::load(dir.path(), "first").unwrap();
        assert_eq!((5, 6), first.weights().dim());
        let last = Hidden::load(dir.path(), "layer4").unwrap();
        assert_eq!((3, 5), last.weights().dim());
    }

    #[test]
    fn read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.json");
        fs::write(&path, CONFIG).unwrap();
        assert_eq!(
            NetworkConfig::from_json_str(CONFIG).unwrap(),
            NetworkConfig::from_file(&path).unwrap()
        );
        assert!(matches!(
            NetworkConfig::from_file(dir.path().join("missing.json")),
            Err(Error::InvalidData(_))
        ));
    }
}
