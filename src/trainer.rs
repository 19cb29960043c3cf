use tracing::info;

use crate::{
    error::{ModelError, Result},
    model::{Chain, DeepModel},
    utils::mean_squared_error,
    Float,
};

/// Layer-wise contrastive-divergence training over a whole model.
///
/// Every call to [`Trainer::train`] runs an upward pass on the sample and
/// then, pair by pair from the bottom, a reconstruction chain followed by a
/// weight update. Pair `i` is updated before pair `i + 1` reuses data layer
/// `i + 1` as its bottom.
pub struct Trainer<'model> {
    model: &'model mut DeepModel,

    learning_rate: Float,
    gibbs_steps: usize,
    chain: Chain,

    /// iteration counter
    k: usize,
}

impl<'model> Trainer<'model> {
    pub fn builder(model: &mut DeepModel) -> TrainerBuilder<'_> {
        TrainerBuilder::new(model)
    }

    pub fn model(&mut self) -> &mut DeepModel {
        &mut *self.model
    }

    pub fn steps(&self) -> usize {
        self.k
    }

    /// One training step on `data`. Returns the mean squared difference
    /// between the data and the bottom layer's reconstruction probabilities.
    pub fn train(&mut self, data: &[Float]) -> Result<Float> {
        self.model.pass_up(data)?;

        for pair in 0..self.model.convolve_layers().len() {
            self.model
                .reconstruct_pair(pair, self.gibbs_steps, self.chain)?;
            self.model.train_pair(pair, self.learning_rate)?;
        }

        let bottom = self.model.data_layer(0).ok_or(ModelError::EmptyModel)?;
        let error = if self.model.convolve_layers().is_empty() {
            0.0
        } else {
            mean_squared_error(
                bottom.activations().as_slice()?,
                bottom.generated_probabilities().as_slice()?,
            )
        };

        self.k += 1;
        info!(step = self.k, reconstruction_error = error, "trained");
        Ok(error)
    }
}

pub struct TrainerBuilder<'model> {
    model: &'model mut DeepModel,

    learning_rate: Float,
    gibbs_steps: usize,
    chain: Chain,
}

impl<'model> TrainerBuilder<'model> {
    fn new(model: &'model mut DeepModel) -> Self {
        Self {
            model,

            learning_rate: 0.01,
            gibbs_steps: 1,
            chain: Chain::Contrastive,
        }
    }

    /// default: 0.01
    pub fn learning_rate(mut self, value: Float) -> Self {
        self.learning_rate = value;
        self
    }

    /// alternating down/up passes per reconstruction
    ///
    /// default: 1
    pub fn gibbs_steps(mut self, value: usize) -> Self {
        self.gibbs_steps = value;
        self
    }

    /// default: Chain::Contrastive
    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    pub fn build(self) -> Result<Trainer<'model>> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ModelError::InvalidParameter {
                name: "learning_rate",
                value: self.learning_rate,
            });
        }
        ModelError::check_count("gibbs_steps", self.gibbs_steps)?;

        Ok(Trainer::<'model> {
            model: self.model,
            learning_rate: self.learning_rate,
            gibbs_steps: self.gibbs_steps,
            chain: self.chain,
            k: 0,
        })
    }
}
