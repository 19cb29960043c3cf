//! Convolutional connection between two data layers.
//!
//! Each neuron owns one 3-D kernel spanning the full depth of the layer
//! below. Going up, neuron `n` is applied at every valid position of the
//! bottom volume (no padding, top position anchored at the top-left of its
//! receptive field) and produces depth slice `n` of the top volume. Going
//! down, every bottom unit collects the transposed contributions of all
//! neurons and all top positions whose receptive field covers it.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{ModelError, Result},
    kernel,
    layers::DataLayer,
    rng::RandomUnitField,
    utils::fill_standard_normal,
    vol::{Extent, Volume},
    Float,
};

/// Shape of the 4-D weight tensor [num_neuron, depth, width, height].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelShape {
    pub num_neuron: usize,
    pub depth: usize,
    pub width: usize,
    pub height: usize,
}

impl KernelShape {
    pub fn new(num_neuron: usize, depth: usize, width: usize, height: usize) -> Self {
        Self {
            num_neuron,
            depth,
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        self.num_neuron * self.depth * self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self, n: usize, d: usize, u: usize, v: usize) -> usize {
        ((n * self.depth + d) * self.width + u) * self.height + v
    }

    pub fn coords(&self, index: usize) -> (usize, usize, usize, usize) {
        let v = index % self.height;
        let rest = index / self.height;
        let u = rest % self.width;
        let rest = rest / self.width;
        (rest / self.depth, rest % self.depth, u, v)
    }

    /// Extent of the volume produced by a valid convolution over `bottom`,
    /// or `None` when the kernel is empty or does not fit.
    pub fn top_extent(&self, bottom: Extent) -> Option<Extent> {
        if self.is_empty() {
            return None;
        }
        Some(Extent::new(
            self.num_neuron,
            bottom.width.checked_sub(self.width)? + 1,
            bottom.height.checked_sub(self.height)? + 1,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ConvolveLayer {
    shape: KernelShape,
    weights: Vec<Float>,
}

impl ConvolveLayer {
    /// Allocates a zeroed weight tensor. Call [`ConvolveLayer::randomize_params`]
    /// before use.
    pub fn new(
        num_neuron: usize,
        neuron_depth: usize,
        neuron_width: usize,
        neuron_height: usize,
    ) -> Self {
        let shape = KernelShape::new(num_neuron, neuron_depth, neuron_width, neuron_height);
        Self {
            shape,
            weights: vec![0.0; shape.len()],
        }
    }

    pub fn shape(&self) -> KernelShape {
        self.shape
    }

    pub fn neuron_num(&self) -> usize {
        self.shape.num_neuron
    }

    pub fn weights(&self) -> &[Float] {
        &self.weights
    }

    pub fn weight(&self, n: usize, d: usize, u: usize, v: usize) -> Float {
        self.weights[self.shape.index(n, d, u, v)]
    }

    pub fn set_weights(&mut self, values: &[Float]) -> Result<()> {
        ModelError::check("weight tensor", self.weights.len(), values.len())?;
        self.weights.copy_from_slice(values);
        Ok(())
    }

    /// Draws every weight from N(0, 1). The same seed always produces the
    /// same tensor.
    pub fn randomize_params(&mut self, seed: u64) {
        fill_standard_normal(&mut self.weights, seed);
    }

    /// Checks that this layer connects `bottom` to `top`: the kernel depth
    /// matches the bottom depth, the neuron count matches the top depth and
    /// the top is exactly the valid-convolution extent of the bottom.
    pub fn check_bridge(&self, bottom: Extent, top: Extent) -> Result<()> {
        ModelError::check_count("neuron count", self.shape.num_neuron)?;
        ModelError::check_count("neuron depth", self.shape.depth)?;
        ModelError::check_count("kernel width", self.shape.width)?;
        ModelError::check_count("kernel height", self.shape.height)?;

        ModelError::check("neuron count vs top depth", self.shape.num_neuron, top.depth)?;
        ModelError::check("neuron depth vs bottom depth", self.shape.depth, bottom.depth)?;

        if bottom.width < self.shape.width {
            return Err(ModelError::ShapeMismatch {
                what: "kernel width vs bottom width",
                expected: self.shape.width,
                actual: bottom.width,
            });
        }
        if bottom.height < self.shape.height {
            return Err(ModelError::ShapeMismatch {
                what: "kernel height vs bottom height",
                expected: self.shape.height,
                actual: bottom.height,
            });
        }

        ModelError::check("top width", bottom.width - self.shape.width + 1, top.width)?;
        ModelError::check("top height", bottom.height - self.shape.height + 1, top.height)
    }

    /// Upward (recognition) pass. Overwrites `top_prob` with the logistic
    /// activation of every top unit and `top_sample` with a Bernoulli draw
    /// from it.
    pub fn pass_up(
        &self,
        bottom: &Volume,
        top_prob: &mut Volume,
        top_sample: &mut Volume,
        rng: &mut RandomUnitField,
    ) -> Result<()> {
        let bottom_extent = bottom.extent();
        self.check_bridge(bottom_extent, top_prob.extent())?;

        // read-only captures
        let bottom = bottom.read_only()?;
        let weights = &self.weights[..];
        let shape = self.shape;

        debug!(?bottom_extent, top_extent = ?top_prob.extent(), "pass up");

        kernel::sample_units(top_prob, top_sample, rng, |n, x, y| {
            let mut sum = 0.0;
            for d in 0..shape.depth {
                for u in 0..shape.width {
                    for v in 0..shape.height {
                        sum += bottom[bottom_extent.index(d, x + u, y + v)]
                            * weights[shape.index(n, d, u, v)];
                    }
                }
            }
            sum
        })
    }

    /// Downward (generative) pass. Bottom unit `(d, x, y)` sums
    /// `w[n, d, u, v] * top[n, x - u, y - v]` over every neuron and every
    /// kernel offset whose top position lies inside the top volume.
    pub fn pass_down(
        &self,
        top: &Volume,
        bottom_prob: &mut Volume,
        bottom_sample: &mut Volume,
        rng: &mut RandomUnitField,
    ) -> Result<()> {
        let top_extent = top.extent();
        self.check_bridge(bottom_prob.extent(), top_extent)?;

        let top = top.read_only()?;
        let weights = &self.weights[..];
        let shape = self.shape;

        debug!(?top_extent, bottom_extent = ?bottom_prob.extent(), "pass down");

        kernel::sample_units(bottom_prob, bottom_sample, rng, |d, x, y| {
            let mut sum = 0.0;
            for n in 0..shape.num_neuron {
                for u in 0..shape.width.min(x + 1) {
                    let tx = x - u;
                    if tx >= top_extent.width {
                        continue;
                    }
                    for v in 0..shape.height.min(y + 1) {
                        let ty = y - v;
                        if ty >= top_extent.height {
                            continue;
                        }
                        sum += weights[shape.index(n, d, u, v)]
                            * top[top_extent.index(n, tx, ty)];
                    }
                }
            }
            sum
        })
    }

    /// Contrastive-divergence update.
    ///
    /// Positive statistics pair `bottom.activations` with `top.probabilities`
    /// (the data-driven pass); negative statistics pair `bottom.generated`
    /// with `top.generated_probabilities` (the reconstruction). Weights are
    /// shared across positions, so each weight moves by the co-activation
    /// difference averaged over all top positions, scaled by `learning_rate`.
    pub fn train(
        &mut self,
        bottom: &DataLayer,
        top: &DataLayer,
        learning_rate: Float,
    ) -> Result<()> {
        if !learning_rate.is_finite() {
            return Err(ModelError::InvalidParameter {
                name: "learning_rate",
                value: learning_rate,
            });
        }

        let bottom_extent = bottom.extent();
        let top_extent = top.extent();
        self.check_bridge(bottom_extent, top_extent)?;

        let bottom_pos = bottom.activations().read_only()?;
        let top_pos = top.probabilities().read_only()?;
        let bottom_neg = bottom.generated().read_only()?;
        let top_neg = top.generated_probabilities().read_only()?;

        let positions = (top_extent.width * top_extent.height).max(1);
        let scale = learning_rate / positions as Float;
        let shape = self.shape;

        debug!(?shape, learning_rate, "train");

        self.weights
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, weight)| {
                let (n, d, u, v) = shape.coords(i);
                let mut positive = 0.0;
                let mut negative = 0.0;
                for x in 0..top_extent.width {
                    for y in 0..top_extent.height {
                        let b = bottom_extent.index(d, x + u, y + v);
                        let t = top_extent.index(n, x, y);
                        positive += bottom_pos[b] * top_pos[t];
                        negative += bottom_neg[b] * top_neg[t];
                    }
                }
                *weight += scale * (positive - negative);
            });

        Ok(())
    }
}
