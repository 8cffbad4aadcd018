use std::{cell::RefCell, path::Path, rc::Rc};

use csv::Reader;
use ndarray_rand::rand::{rngs::StdRng, SeedableRng};
use sgdnet::{
    activation::Relu,
    data::{train_test_split, DataLoader},
    metrics::categorical_accuracy,
    ActivationLayer, EpochStats, Hidden, Network, OneHotEncoder, SoftmaxCrossEntropyLoss, Tensor,
    TrainingHooks,
};

// Load iris dataset available here: https://www.kaggle.com/arshid/iris-flower-dataset
fn load_iris(file_path: impl AsRef<Path>) -> (Vec<Vec<f32>>, Vec<String>) {
    let mut reader = Reader::from_path(file_path).unwrap();
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for row in reader.records() {
        let row = row.unwrap();
        let y = row[4].to_string();
        let features = row
            .into_iter()
            .take(4)
            .map(|r| r.parse().unwrap())
            .collect();
        xs.push(features);
        ys.push(y);
    }
    (xs, ys)
}

struct Iris {
    loader: DataLoader,
    stats: EpochStats,
}

impl TrainingHooks for Iris {
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

fn main() {
    let (xs, ys) = load_iris("./IRIS.csv");
    let labels = vec!["Iris-setosa", "Iris-versicolor", "Iris-virginica"]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    let encoder = OneHotEncoder::new(&labels);

    // One example per column.
    let n = xs.len();
    let features = Tensor::from_shape_vec((n, 4), xs.into_iter().flatten().collect())
        .unwrap()
        .reversed_axes();
    let targets = encoder.encode(&ys).unwrap();

    let mut rng = StdRng::seed_from_u64(0);
    let (x_train, y_train, x_test, y_test) =
        train_test_split(&features, &targets, 0.25, &mut rng).unwrap();

    let batch_size = 16;
    let loader = DataLoader::new(x_train, y_train, batch_size).unwrap();
    let batches_per_epoch = loader.num_batches();
    let hooks = Rc::new(RefCell::new(Iris {
        loader,
        stats: EpochStats::new(),
    }));

    let mut network = Network::new();
    network
        .add(Hidden::new(4, 10, &mut rng))
        .add(ActivationLayer::new(Relu))
        .add(Hidden::new(10, 10, &mut rng))
        .add(ActivationLayer::new(Relu))
        .add(Hidden::new(10, 3, &mut rng))
        .add(SoftmaxCrossEntropyLoss::new());
    network.connect(Rc::clone(&hooks)).unwrap();

    let epochs = 3000;
    for epoch in 0..epochs {
        for _ in 0..batches_per_epoch {
            let input = hooks.borrow().loader.input(network.batch_count());
            network.train(input, 1e-2).unwrap();
        }

        let stats = hooks.borrow_mut().stats.finish_epoch();
        if epoch % 10 == 0 {
            println!(
                "epoch {}: avg. loss = {:.6}, avg. accuracy = {:.4}",
                epoch,
                stats.average_loss().unwrap_or(f64::NAN),
                stats.average_accuracy().unwrap_or(f64::NAN)
            );
        }
        hooks.borrow_mut().loader.reshuffle(&mut rng).unwrap();
    }

    let y_pred = network.infer(x_test).unwrap();
    println!("accuracy: {}", categorical_accuracy(&y_pred, &y_test));
    println!("{:?}", encoder.decode(&y_pred).unwrap());
}
