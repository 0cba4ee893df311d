//! Classifier head trained on frozen embeddings
//!
//! A dense ReLU layer followed by a bias-free dense output layer. Both use
//! variance-scaling (fan-in) initialisation.

use burn::{
    config::Config,
    module::Module,
    nn::{Initializer, Linear, LinearConfig, Relu},
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// Architecture of the classifier head
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// Length of the input embeddings
    pub embedding_dim: usize,

    /// Number of output classes
    pub num_classes: usize,

    /// Width of the hidden layer
    #[config(default = "100")]
    pub hidden_units: usize,
}

impl ClassifierConfig {
    /// Initialize a new classifier head on `device`
    pub fn init<B: Backend>(&self, device: &B::Device) -> CreatureClassifier<B> {
        let initializer = Initializer::KaimingNormal {
            gain: 1.0,
            fan_out_only: false,
        };

        let hidden = LinearConfig::new(self.embedding_dim, self.hidden_units)
            .with_initializer(initializer.clone())
            .init(device);
        let output = LinearConfig::new(self.hidden_units, self.num_classes)
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);

        CreatureClassifier {
            hidden,
            activation: Relu::new(),
            output,
        }
    }
}

/// Dense classifier over flattened embeddings
#[derive(Module, Debug)]
pub struct CreatureClassifier<B: Backend> {
    hidden: Linear<B>,
    activation: Relu,
    output: Linear<B>,
}

impl<B: Backend> CreatureClassifier<B> {
    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Embeddings of shape [batch_size, embedding_dim]
    ///
    /// # Returns
    /// * Logits of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.hidden.forward(x);
        let x = self.activation.forward(x);
        self.output.forward(x)
    }

    /// Forward pass with softmax, giving class probabilities
    pub fn forward_softmax(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    /// Get the expected embedding length
    pub fn embedding_dim(&self) -> usize {
        self.hidden.weight.val().dims()[0]
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.output.weight.val().dims()[1]
    }
}
