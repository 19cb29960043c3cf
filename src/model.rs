use tracing::debug;

use crate::{
    error::{ModelError, Result},
    layers::{ConvolveLayer, DataLayer},
    Float,
};

/// Base seed for the per-unit random fields of a model built with
/// [`DeepModel::new`].
pub const DEFAULT_FIELD_SEED: u64 = 5489;

/// Where the reconstruction chain of a layer pair starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Chain {
    /// Restart from the data-driven sample of the top layer on every step.
    #[default]
    Contrastive,
    /// Resume from the top layer's newest remembered reconstruction and
    /// remember the new one afterwards.
    Persistent,
}

// DeepModel owns a stack of data layers and the convolve layers between
// them: convolve layer i connects data layer i (bottom) to data layer i + 1
// (top). Passes chain the pairs strictly one after another.
#[derive(Debug, Clone)]
pub struct DeepModel {
    data_layers: Vec<DataLayer>,
    convolve_layers: Vec<ConvolveLayer>,
    field_seed: u64,
}

impl Default for DeepModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DeepModel {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_FIELD_SEED)
    }

    /// Each data layer's random field is seeded from `field_seed` and the
    /// layer's position, so no two layers share streams.
    pub fn with_seed(field_seed: u64) -> Self {
        Self {
            data_layers: Vec::new(),
            convolve_layers: Vec::new(),
            field_seed,
        }
    }

    /// Appends a data layer on top of the stack. Compatibility with its
    /// neighbours is only checked when a pass runs.
    pub fn add_data_layer(&mut self, depth: usize, width: usize, height: usize) {
        let seed = self
            .field_seed
            .wrapping_add(self.data_layers.len() as u64);
        self.data_layers
            .push(DataLayer::new(depth, width, height, seed));
    }

    pub fn add_convolve_layer(
        &mut self,
        num_neuron: usize,
        neuron_depth: usize,
        neuron_width: usize,
        neuron_height: usize,
        seed: u64,
    ) {
        let mut layer = ConvolveLayer::new(num_neuron, neuron_depth, neuron_width, neuron_height);
        layer.randomize_params(seed);
        self.convolve_layers.push(layer);
    }

    pub fn data_layers(&self) -> &[DataLayer] {
        &self.data_layers
    }
    pub fn data_layer(&self, index: usize) -> Option<&DataLayer> {
        self.data_layers.get(index)
    }
    pub fn data_layer_mut(&mut self, index: usize) -> Option<&mut DataLayer> {
        self.data_layers.get_mut(index)
    }
    pub fn convolve_layers(&self) -> &[ConvolveLayer] {
        &self.convolve_layers
    }
    pub fn convolve_layer(&self, index: usize) -> Option<&ConvolveLayer> {
        self.convolve_layers.get(index)
    }
    pub fn convolve_layer_mut(&mut self, index: usize) -> Option<&mut ConvolveLayer> {
        self.convolve_layers.get_mut(index)
    }

    /// Checks the layer counts and that every convolve layer bridges its
    /// two data layers.
    pub fn validate(&self) -> Result<()> {
        if self.data_layers.is_empty() {
            return Err(ModelError::EmptyModel);
        }
        if self.data_layers.len() != self.convolve_layers.len() + 1 {
            return Err(ModelError::StructuralInconsistency {
                data_layers: self.data_layers.len(),
                convolve_layers: self.convolve_layers.len(),
            });
        }
        for (i, conv) in self.convolve_layers.iter().enumerate() {
            let bottom = self.data_layers[i].extent();
            let top = self.data_layers[i + 1].extent();
            conv.check_bridge(bottom, top)?;
        }
        Ok(())
    }

    fn adjacent(layers: &mut [DataLayer], bottom: usize) -> (&mut DataLayer, &mut DataLayer) {
        let (lower, upper) = layers.split_at_mut(bottom + 1);
        (&mut lower[bottom], &mut upper[0])
    }

    /// Loads `data` into the bottom layer and samples every layer above it,
    /// bottom to top.
    pub fn pass_up(&mut self, data: &[Float]) -> Result<()> {
        self.validate()?;
        self.data_layers[0].set_data(data)?;

        for (i, conv) in self.convolve_layers.iter().enumerate() {
            debug!(pair = i, "model pass up");
            let (bottom, top) = Self::adjacent(&mut self.data_layers, i);
            let (prob, sample, rng) = top.upward_targets();
            conv.pass_up(&bottom.activations, prob, sample, rng)?;
        }
        Ok(())
    }

    /// Generates from the current top-layer state down to the bottom layer,
    /// leaving each layer's reconstruction in its generated buffers.
    pub fn pass_down(&mut self) -> Result<()> {
        self.validate()?;
        self.data_layers
            .last_mut()
            .ok_or(ModelError::EmptyModel)?
            .generate_from_activations()?;

        for (i, conv) in self.convolve_layers.iter().enumerate().rev() {
            debug!(pair = i, "model pass down");
            let (bottom, top) = Self::adjacent(&mut self.data_layers, i);
            let (prob, sample, rng) = bottom.generated_targets();
            conv.pass_down(&top.generated, prob, sample, rng)?;
        }
        Ok(())
    }

    /// Runs the reconstruction chain of pair `index` for `steps` alternating
    /// down/up passes. Reads the top layer's live state (or memory), writes
    /// only the generated buffers of both layers.
    pub fn reconstruct_pair(&mut self, index: usize, steps: usize, chain: Chain) -> Result<()> {
        self.validate()?;
        let pairs = self.convolve_layers.len();
        let conv = self
            .convolve_layers
            .get(index)
            .ok_or(ModelError::NoSuchPair { index, pairs })?;
        let (bottom, top) = Self::adjacent(&mut self.data_layers, index);

        match chain {
            Chain::Contrastive => top.generate_from_activations()?,
            Chain::Persistent => top.generate_from_memory()?,
        }

        for step in 0..steps {
            debug!(pair = index, step, "gibbs step");
            let (prob, sample, rng) = bottom.generated_targets();
            conv.pass_down(&top.generated, prob, sample, rng)?;

            let (prob, sample, rng) = top.generated_targets();
            conv.pass_up(&bottom.generated, prob, sample, rng)?;
        }

        if chain == Chain::Persistent {
            top.remember_generated()?;
        }
        Ok(())
    }

    /// Applies one contrastive-divergence update to convolve layer `index`
    /// from the statistics currently held by its two data layers.
    pub fn train_pair(&mut self, index: usize, learning_rate: Float) -> Result<()> {
        self.validate()?;
        let pairs = self.convolve_layers.len();
        let conv = self
            .convolve_layers
            .get_mut(index)
            .ok_or(ModelError::NoSuchPair { index, pairs })?;
        conv.train(
            &self.data_layers[index],
            &self.data_layers[index + 1],
            learning_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::{Chain, DeepModel};
    use crate::{utils::sigmoid, ModelError};

    fn two_layer_model() -> DeepModel {
        let mut model = DeepModel::new();
        model.add_data_layer(1, 4, 4);
        model.add_data_layer(2, 3, 3);
        model.add_convolve_layer(2, 1, 2, 2, 42);
        model
    }

    fn three_layer_model() -> DeepModel {
        let mut model = DeepModel::with_seed(9);
        model.add_data_layer(1, 6, 6);
        model.add_data_layer(3, 4, 4);
        model.add_data_layer(2, 3, 3);
        model.add_convolve_layer(3, 1, 3, 3, 1);
        model.add_convolve_layer(2, 3, 2, 2, 2);
        model
    }

    fn checker(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i % 2) as f32).collect()
    }

    #[test]
    fn pass_up_matches_hand_computed_reference() {
        let mut model = two_layer_model();
        model
            .convolve_layer_mut(0)
            .unwrap()
            .set_weights(&[1.0; 8])
            .unwrap();

        let data: Vec<f32> = (0..16).map(|i| 0.1 * i as f32).collect();
        model.pass_up(&data).unwrap();

        let patch_sums = [[1.0, 1.4, 1.8], [2.6, 3.0, 3.4], [4.2, 4.6, 5.0]];
        let top = model.data_layer(1).unwrap();
        for n in 0..2 {
            for x in 0..3 {
                for y in 0..3 {
                    assert_abs_diff_eq!(
                        top.probabilities().get(n, x, y).unwrap(),
                        sigmoid(patch_sums[x][y]),
                        epsilon = 1e-6
                    );
                    let s = top.activations().get(n, x, y).unwrap();
                    assert!(s == 0.0 || s == 1.0);
                }
            }
        }
        assert_eq!(model.data_layer(0).unwrap().activations().to_vec().unwrap(), data);
    }

    #[test]
    fn pass_up_rejects_wrong_data_length() {
        let mut model = two_layer_model();
        assert_eq!(
            model.pass_up(&[0.0; 15]),
            Err(ModelError::ShapeMismatch {
                what: "volume values",
                expected: 16,
                actual: 15
            })
        );
    }

    #[test]
    fn passes_require_consistent_structure() {
        let mut model = DeepModel::new();
        assert_eq!(model.pass_down(), Err(ModelError::EmptyModel));

        model.add_data_layer(1, 4, 4);
        model.add_data_layer(2, 3, 3);
        assert_eq!(
            model.pass_up(&[0.0; 16]),
            Err(ModelError::StructuralInconsistency {
                data_layers: 2,
                convolve_layers: 0
            })
        );

        // the bottom layer is untouched when validation fails
        assert!(model.data_layer(0).unwrap().activations().is_valid());
    }

    #[test]
    fn incompatible_neighbours_fail_before_any_pair_runs() {
        let mut model = DeepModel::new();
        model.add_data_layer(1, 4, 4);
        model.add_data_layer(2, 3, 3);
        model.add_data_layer(2, 3, 3);
        model.add_convolve_layer(2, 1, 2, 2, 1);
        model.add_convolve_layer(2, 2, 2, 2, 2);

        let err = model.pass_up(&checker(16)).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { what: "top width", .. }));
        let top = model.data_layer(1).unwrap();
        assert!(top.probabilities().as_slice().unwrap().iter().all(|p| *p == 0.0));
    }

    #[test]
    fn kernel_wider_than_bottom_is_rejected() {
        let mut model = DeepModel::new();
        model.add_data_layer(1, 1, 4);
        model.add_data_layer(1, 0, 3);
        model.add_convolve_layer(1, 1, 2, 2, 1);

        assert_eq!(
            model.pass_up(&[1.0; 4]).unwrap_err(),
            ModelError::ShapeMismatch {
                what: "kernel width vs bottom width",
                expected: 2,
                actual: 1,
            }
        );
        assert!(model.pass_down().is_err());
        assert!(model.validate().is_err());
    }

    #[test]
    fn pass_up_is_deterministic_for_a_seed() {
        let mut a = three_layer_model();
        let mut b = three_layer_model();
        a.pass_up(&checker(36)).unwrap();
        b.pass_up(&checker(36)).unwrap();

        for (la, lb) in a.data_layers().iter().zip(b.data_layers()) {
            assert_eq!(la.probabilities().as_slice(), lb.probabilities().as_slice());
            assert_eq!(la.activations().as_slice(), lb.activations().as_slice());
        }
    }

    #[test]
    fn chain_pass_down_populates_bottom_generated() {
        let mut model = three_layer_model();
        model.pass_up(&checker(36)).unwrap();
        model.pass_down().unwrap();

        let top = model.data_layer(2).unwrap();
        assert_eq!(
            top.generated().as_slice().unwrap(),
            top.activations().as_slice().unwrap()
        );

        let bottom = model.data_layer(0).unwrap();
        let probs = bottom.generated_probabilities().as_slice().unwrap();
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        // sigmoid(0) everywhere would mean nothing flowed down
        assert!(probs.iter().any(|p| (*p - 0.5).abs() > 1e-6));
        assert!(bottom
            .generated()
            .as_slice()
            .unwrap()
            .iter()
            .all(|s| *s == 0.0 || *s == 1.0));
    }

    #[test]
    fn single_layer_model_passes_are_trivial() {
        let mut model = DeepModel::new();
        model.add_data_layer(1, 2, 2);
        model.pass_up(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        model.pass_down().unwrap();
        assert_eq!(
            model.data_layer(0).unwrap().generated().as_slice().unwrap(),
            &[1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn reconstruction_leaves_positive_statistics_alone() {
        let mut model = two_layer_model();
        model.pass_up(&checker(16)).unwrap();
        let positive = model.data_layer(1).unwrap().activations().to_vec().unwrap();

        model.reconstruct_pair(0, 2, Chain::Contrastive).unwrap();
        let top = model.data_layer(1).unwrap();
        assert_eq!(top.activations().to_vec().unwrap(), positive);
        assert!(top.generated_probabilities().is_valid());
        assert!(model.data_layer(0).unwrap().generated().is_valid());
        assert!(top.memory().is_empty());
    }

    #[test]
    fn persistent_chain_remembers_reconstructions() {
        let mut model = two_layer_model();
        model.pass_up(&checker(16)).unwrap();
        model.reconstruct_pair(0, 1, Chain::Persistent).unwrap();
        model.reconstruct_pair(0, 1, Chain::Persistent).unwrap();

        let top = model.data_layer(1).unwrap();
        assert_eq!(top.memory().len(), 2);
        assert_eq!(
            top.memory().latest().unwrap().as_slice().unwrap(),
            top.generated().as_slice().unwrap()
        );
    }

    #[test]
    fn pair_index_out_of_range_is_rejected() {
        let mut model = two_layer_model();
        model.pass_up(&checker(16)).unwrap();
        assert_eq!(
            model.reconstruct_pair(1, 1, Chain::Contrastive),
            Err(ModelError::NoSuchPair { index: 1, pairs: 1 })
        );
        assert!(model.train_pair(1, 0.1).is_err());
    }
}
