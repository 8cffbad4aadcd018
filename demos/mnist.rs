use std::{
    cell::RefCell,
    env,
    path::{Path, PathBuf},
    rc::Rc,
};

use ndarray_rand::rand::{rngs::StdRng, SeedableRng};
use sgdnet::{
    config::NetworkConfig,
    data::{rescale, zscore_columns, DataLoader},
    idx,
    metrics::categorical_accuracy,
    EpochStats, Tensor, TrainingHooks,
};

const NUM_LABELS: usize = 10;

const DEFAULT_CONFIG: &str = r#"{
    "seed": 7,
    "learning_rate": 0.001,
    "batch_size": 200,
    "epochs": 100,
    "layers": [
        { "type": "hidden", "input": 784, "output": 768, "name": "layer1" },
        { "type": "activation", "function": "relu" },
        { "type": "hidden", "input": 768, "output": 384, "name": "layer2" },
        { "type": "activation", "function": "relu" },
        { "type": "hidden", "input": 384, "output": 256, "name": "layer3" },
        { "type": "activation", "function": "relu" },
        { "type": "hidden", "input": 256, "output": 10, "name": "layer4" },
        { "type": "activation", "function": "relu" }
    ],
    "loss": "softmax_cross_entropy"
}"#;

struct Mnist {
    loader: DataLoader,
    stats: EpochStats,
}

impl TrainingHooks for Mnist {
    fn expected_batch_results(&mut self, batch_number: usize) -> Option<Tensor> {
        Some(self.loader.expected(batch_number))
    }

    fn on_loss_computation_completed(&mut self, losses: &Tensor) {
        self.stats.record_loss(losses);
    }

    fn on_accuracy_computation_completed(&mut self, accuracy: f64) {
        self.stats.record_accuracy(accuracy);
    }
}

#[derive(Clone, Copy)]
enum Normalization {
    ZScore,
    Rescale,
}

impl Normalization {
    fn parse(name: &str) -> Self {
        match name {
            "zscore" => Normalization::ZScore,
            "rescale" => Normalization::Rescale,
            other => panic!("unknown normalization {other:?}, use zscore or rescale"),
        }
    }

    fn apply(self, images: &mut Tensor) {
        match self {
            Normalization::ZScore => zscore_columns(images),
            Normalization::Rescale => rescale(images, 0.0, 1.0).unwrap(),
        }
    }
}

fn load(dir: &Path, images: &str, labels: &str, normalization: Normalization) -> (Tensor, Tensor) {
    let mut images = idx::load_images(dir.join(images)).unwrap();
    normalization.apply(&mut images);
    let labels = idx::load_labels(dir.join(labels), NUM_LABELS).unwrap();
    (images, labels)
}

// Usage: mnist <dir with the MNIST idx files> [config.json or -] [zscore|rescale]
fn main() {
    let mut args = env::args().skip(1);
    let dir = PathBuf::from(args.next().unwrap_or_else(|| "./data/mnist".to_string()));
    let config = match args.next().filter(|path| path != "-") {
        Some(path) => NetworkConfig::from_file(path).unwrap(),
        None => NetworkConfig::from_json_str(DEFAULT_CONFIG).unwrap(),
    };
    let normalization = args
        .next()
        .map_or(Normalization::ZScore, |name| Normalization::parse(&name));

    let (images, labels) = load(
        &dir,
        "train-images.idx3-ubyte",
        "train-labels.idx1-ubyte",
        normalization,
    );
    let (test_images, test_labels) = load(
        &dir,
        "t10k-images.idx3-ubyte",
        "t10k-labels.idx1-ubyte",
        normalization,
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut loader = DataLoader::new(images, labels, config.batch_size).unwrap();
    loader.reshuffle(&mut rng).unwrap();
    let batches_per_epoch = loader.num_batches();
    let hooks = Rc::new(RefCell::new(Mnist {
        loader,
        stats: EpochStats::new(),
    }));

    let mut network = config.build().unwrap();
    network.connect(Rc::clone(&hooks)).unwrap();

    for epoch in 0..config.epochs {
        for _ in 0..batches_per_epoch {
            let input = hooks.borrow().loader.input(network.batch_count());
            network.train(input, config.learning_rate).unwrap();
        }

        let stats = hooks.borrow_mut().stats.finish_epoch();
        let training_accuracy = stats.average_accuracy().unwrap_or(0.0);
        let prediction = network.infer(test_images.clone()).unwrap();
        let validation_accuracy = categorical_accuracy(&prediction, &test_labels);
        println!(
            "epoch {}   : avg. accuracy: {:.6}   : avg. loss: {:.6}   : validation avg. accuracy: {}",
            epoch,
            training_accuracy,
            stats.average_loss().unwrap_or(f64::NAN),
            validation_accuracy
        );
        if validation_accuracy < training_accuracy {
            println!("potential overfitting. BREAK.");
            break;
        }
        hooks.borrow_mut().loader.reshuffle(&mut rng).unwrap();
    }

    println!("\nDone with training. Checking last validation accuracy.");
    let prediction = network.infer(test_images).unwrap();
    println!(
        "validation : avg. accuracy in validation: {}",
        categorical_accuracy(&prediction, &test_labels)
    );
}
