use std::{cell::RefCell, rc::Rc};

use crate::{
    layer::{Layer, Mode},
    loss::Loss,
    Error, Result, Tensor,
};

/// What a network needs from whoever drives its training.
pub trait TrainingHooks {
    /// Expected output for the `batch_number`-th batch the loss sees, or `None` to skip it.
    fn expected_batch_results(&mut self, batch_number: usize) -> Option<Tensor>;

    /// Receives the `1 x batch_size` row of per-example losses.
    fn on_loss_computation_completed(&mut self, losses: &Tensor) {
        println!("Avg. loss: {}", losses.mean().unwrap_or(f32::NAN));
    }

    fn on_accuracy_computation_completed(&mut self, accuracy: f64) {
        println!("Accuracy: {}", accuracy);
    }
}

/// An ordered stack of layers ending in a [`Loss`].
#[derive(Default)]
pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    batch_count: usize,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, layer: impl Layer + 'static) -> &mut Self {
        self.add_boxed(Box::new(layer))
    }

    pub fn add_boxed(&mut self, layer: Box<dyn Layer>) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// Number of batches trained so far.
    pub fn batch_count(&self) -> usize {
        self.batch_count
    }

    /// At least two layers, the last of which is a loss.
    pub fn is_trainable(&self) -> bool {
        self.layers.len() >= 2 && self.loss().is_some()
    }

    fn loss(&self) -> Option<&dyn Loss> {
        self.layers.last().and_then(|layer| layer.as_loss())
    }

    fn loss_mut(&mut self) -> Option<&mut dyn Loss> {
        self.layers.last_mut().and_then(|layer| layer.as_loss_mut())
    }

    /// Let `hooks` supply expected values to the terminal loss and receive its reports.
    pub fn connect<H>(&mut self, hooks: Rc<RefCell<H>>) -> Result<()>
    where
        H: TrainingHooks + 'static,
    {
        let loss = self
            .loss_mut()
            .ok_or_else(|| Error::InvalidConfig("the last layer is not a loss".to_string()))?;

        let provider = Rc::clone(&hooks);
        loss.register_expected_values_provider(Box::new(move |batch_number| {
            provider.borrow_mut().expected_batch_results(batch_number)
        }));
        let reporter = Rc::clone(&hooks);
        loss.register_loss_callback(Box::new(move |losses| {
            reporter.borrow_mut().on_loss_computation_completed(losses)
        }));
        loss.register_accuracy_callback(Box::new(move |accuracy| {
            hooks.borrow_mut().on_accuracy_computation_completed(accuracy)
        }));
        Ok(())
    }

    fn set_mode(&mut self, mode: Mode) {
        for layer in self.layers.iter_mut() {
            layer.set_mode(mode);
        }
    }

    /// One step of gradient descent on `input`.
    ///
    /// Returns `Ok(false)` without updating anything when the loss has no expected values
    /// for this batch. Whenever no step is taken the layers are put back into
    /// [`Mode::Infer`], dropping anything the forward pass cached.
    pub fn train(&mut self, input: Tensor, learning_rate: f32) -> Result<bool> {
        if !self.is_trainable() {
            return Err(Error::InvalidConfig(format!(
                "training needs at least two layers ending in a loss, got {} layer(s)",
                self.layers.len()
            )));
        }
        if input.ncols() == 0 {
            return Err(Error::InvalidShape(
                "cannot train on a batch without examples".to_string(),
            ));
        }
        self.set_mode(Mode::Train);

        let stepped = self.step(input, learning_rate);
        match stepped {
            Ok(true) => self.batch_count += 1,
            _ => self.set_mode(Mode::Infer),
        }
        stepped
    }

    fn step(&mut self, input: Tensor, learning_rate: f32) -> Result<bool> {
        let mut output = input;
        for (index, layer) in self.layers.iter_mut().enumerate() {
            output = match layer.forward(output)? {
                Some(output) => output,
                None if layer.as_loss().is_some() => return Ok(false),
                None => {
                    return Err(Error::InvalidState(format!(
                        "layer {index} returned no output"
                    )))
                }
            };
        }

        // The loss forward already produced the gradient. Only a prediction head hands it
        // back again from backward.
        let last = self.layers.len() - 1;
        let mut gradient = output;
        for (index, layer) in self.layers.iter_mut().enumerate().rev() {
            let is_plain_loss = layer
                .as_loss()
                .map_or(false, |loss| !loss.is_prediction_head());
            if index == last && is_plain_loss {
                continue;
            }
            gradient = layer.backward(gradient, learning_rate)?.ok_or_else(|| {
                Error::InvalidState(format!("layer {index} returned no gradient in train mode"))
            })?;
        }
        Ok(true)
    }

    /// Predict on `input`, then let every layer store its parameters.
    pub fn infer(&mut self, input: Tensor) -> Result<Tensor> {
        self.set_mode(Mode::Infer);

        let mut output = input;
        for (index, layer) in self.layers.iter_mut().enumerate() {
            if let Some(loss) = layer.as_loss() {
                if !loss.is_prediction_head() {
                    break;
                }
            }
            output = layer.forward(output)?.ok_or_else(|| {
                Error::InvalidState(format!("layer {index} returned no prediction"))
            })?;
        }

        for layer in self.layers.iter() {
            layer.store_parameters()?;
        }
        Ok(output)
    }
}

/// Sums of the losses and accuracies reported during an epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochStats {
    loss_sum: f64,
    loss_batches: usize,
    accuracy_sum: f64,
    accuracy_batches: usize,
}

impl EpochStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the mean of a batch's per-example losses.
    pub fn record_loss(&mut self, losses: &Tensor) {
        if let Some(mean) = losses.mean() {
            self.loss_sum += mean as f64;
            self.loss_batches += 1;
        }
    }

    pub fn record_accuracy(&mut self, accuracy: f64) {
        self.accuracy_sum += accuracy;
        self.accuracy_batches += 1;
    }

    pub fn average_loss(&self) -> Option<f64> {
        (self.loss_batches > 0).then(|| self.loss_sum / self.loss_batches as f64)
    }

    pub fn average_accuracy(&self) -> Option<f64> {
        (self.accuracy_batches > 0).then(|| self.accuracy_sum / self.accuracy_batches as f64)
    }

    /// Return the stats so far and start a new epoch.
    pub fn finish_epoch(&mut self) -> EpochStats {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use crate::{
        activation::Relu, assert_rel_eq_arr2, ActivationLayer, CrossEntropyLoss, Hidden, Softmax,
        SoftmaxCrossEntropyLoss,
    };

    use super::*;
    use approx::assert_relative_eq;

    struct Fixed {
        expected: Tensor,
        until: usize,
        stats: EpochStats,
    }

    impl TrainingHooks for Fixed {
        fn expected_batch_results(&mut self, batch_number: usize) -> Option<Tensor> {
            (batch_number < self.until).then(|| self.expected.clone())
        }

        fn on_loss_computation_completed(&mut self, losses: &Tensor) {
            self.stats.record_loss(losses);
        }

        fn on_accuracy_computation_completed(&mut self, accuracy: f64) {
            self.stats.record_accuracy(accuracy);
        }
    }

    fn hooks(until: usize) -> Rc<RefCell<Fixed>> {
        Rc::new(RefCell::new(Fixed {
            expected: arr2(&[[1.0, 0.0], [0.0, 1.0]]),
            until,
            stats: EpochStats::new(),
        }))
    }

    fn hidden() -> Hidden {
        Hidden::with_weights(arr2(&[[0.5, -0.5], [0.25, 1.0]]), Tensor::zeros((2, 1))).unwrap()
    }

    #[test]
    fn single_layer_is_not_trainable() {
        let mut network = Network::new();
        network.add(hidden());
        assert!(!network.is_trainable());

        let result = network.train(Tensor::eye(2), 0.1);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert_eq!(0, network.batch_count());
        // Nothing was switched to training.
        assert_eq!(Mode::Infer, network.layers()[0].mode());
    }

    #[test]
    fn last_layer_must_be_a_loss() {
        let mut network = Network::new();
        network.add(hidden()).add(Softmax::new());
        assert!(!network.is_trainable());
        assert!(network.train(Tensor::eye(2), 0.1).is_err());
        assert!(matches!(
            network.connect(hooks(1)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn train_counts_batches_and_reports() {
        let mut network = Network::new();
        network.add(hidden()).add(SoftmaxCrossEntropyLoss::new());
        let hooks = hooks(2);
        network.connect(Rc::clone(&hooks)).unwrap();

        assert!(network.train(Tensor::eye(2), 0.5).unwrap());
        assert!(network.train(Tensor::eye(2), 0.5).unwrap());
        assert!(!network.train(Tensor::eye(2), 0.5).unwrap());
        assert_eq!(2, network.batch_count());

        let stats = hooks.borrow_mut().stats.finish_epoch();
        assert!(stats.average_loss().unwrap() > 0.0);
        assert!(stats.average_accuracy().is_some());
        assert_eq!(None, hooks.borrow().stats.average_loss());
    }

    #[test]
    fn skipped_batch_leaves_weights_alone() {
        let mut network = Network::new();
        network.add(hidden()).add(SoftmaxCrossEntropyLoss::new());
        network.connect(hooks(0)).unwrap();

        let before = network.infer(Tensor::eye(2)).unwrap();
        assert!(!network.train(Tensor::eye(2), 0.5).unwrap());
        let after = network.infer(Tensor::eye(2)).unwrap();
        assert_eq!(before, after);
        assert_eq!(0, network.batch_count());
    }

    #[test]
    fn infer_stops_before_plain_loss() {
        let mut network = Network::new();
        network
            .add(hidden())
            .add(ActivationLayer::new(Relu))
            .add(Softmax::new())
            .add(CrossEntropyLoss::new());
        network.connect(hooks(1)).unwrap();

        let prediction = network.infer(Tensor::eye(2)).unwrap();
        for sum in prediction.sum_axis(ndarray::Axis(0)).iter() {
            assert_relative_eq!(1.0, *sum, epsilon = 1e-6);
        }
    }

    #[test]
    fn infer_through_prediction_head_is_softmax() {
        let mut network = Network::new();
        network.add(hidden()).add(SoftmaxCrossEntropyLoss::new());
        let prediction = network.infer(Tensor::eye(2)).unwrap();
        assert_rel_eq_arr2!(
            arr2(&[[0.5621765, 0.18242553], [0.4378235, 0.8175745]]),
            prediction,
            epsilon = 1e-6
        );
    }

    #[test]
    fn plain_loss_pipeline_trains() {
        let mut network = Network::new();
        network
            .add(hidden())
            .add(Softmax::new())
            .add(CrossEntropyLoss::new());
        let hooks = hooks(5);
        network.connect(Rc::clone(&hooks)).unwrap();

        let mut losses = Vec::new();
        for _ in 0..5 {
            assert!(network.train(Tensor::eye(2), 0.5).unwrap());
            losses.push(hooks.borrow_mut().stats.finish_epoch().average_loss().unwrap());
        }
        assert_eq!(5, network.batch_count());
        for pair in losses.windows(2) {
            assert!(pair[1] < pair[0], "losses {losses:?}");
        }
    }

    #[test]
    fn skipped_batch_drops_cached_state() {
        let mut network = Network::new();
        network
            .add(hidden())
            .add(ActivationLayer::new(Relu))
            .add(SoftmaxCrossEntropyLoss::new());
        network.connect(hooks(0)).unwrap();

        assert!(!network.train(Tensor::eye(2), 0.5).unwrap());
        // Infer mode is what clears the cached inputs and masks.
        for layer in network.layers() {
            assert_eq!(Mode::Infer, layer.mode());
        }
    }

    #[test]
    fn empty_batch_is_rejected_before_the_loss_sees_it() {
        let mut network = Network::new();
        network.add(hidden()).add(SoftmaxCrossEntropyLoss::new());
        let hooks = hooks(3);
        network.connect(Rc::clone(&hooks)).unwrap();

        let result = network.train(Tensor::zeros((2, 0)), 0.5);
        assert!(matches!(result, Err(Error::InvalidShape(_))));
        assert_eq!(0, network.batch_count());
        let loss = network.layers().last().and_then(|layer| layer.as_loss()).unwrap();
        assert_eq!(0, loss.batch_number());
        assert_eq!(None, hooks.borrow().stats.average_loss());

        assert!(network.train(Tensor::eye(2), 0.5).unwrap());
        assert_eq!(1, network.batch_count());
        let loss = network.layers().last().and_then(|layer| layer.as_loss()).unwrap();
        assert_eq!(1, loss.batch_number());
    }

    #[test]
    fn epoch_stats_average() {
        let mut stats = EpochStats::new();
        assert_eq!(None, stats.average_loss());
        stats.record_loss(&arr2(&[[1.0, 3.0]]));
        stats.record_loss(&arr2(&[[4.0]]));
        stats.record_accuracy(0.5);
        stats.record_accuracy(1.0);
        assert_relative_eq!(3.0, stats.average_loss().unwrap());
        assert_relative_eq!(0.75, stats.average_accuracy().unwrap());

        stats.record_loss(&Tensor::zeros((1, 0)));
        assert_relative_eq!(3.0, stats.average_loss().unwrap());
    }
}
