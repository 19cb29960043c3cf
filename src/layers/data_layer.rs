use crate::{
    error::Result,
    rng::RandomUnitField,
    vol::{Extent, Volume},
    Float,
};

/// Number of past states each data layer keeps in its memory ring.
pub const MEMORY_SIZE: usize = 4;

/// Fixed-capacity history of sampled states. All slots are allocated up
/// front; once full, the oldest entry is overwritten.
#[derive(Debug, Clone)]
pub struct Memory {
    slots: Vec<Volume>,
    next: usize,
    len: usize,
}

impl Memory {
    fn new(extent: Extent) -> Self {
        Self {
            slots: (0..MEMORY_SIZE).map(|_| Volume::zeros(extent)).collect(),
            next: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, state: &Volume) -> Result<()> {
        self.slots[self.next].copy_from(state)?;
        self.next = (self.next + 1) % self.capacity();
        self.len = (self.len + 1).min(self.capacity());
        Ok(())
    }

    /// `age` 0 is the most recent entry.
    pub fn get(&self, age: usize) -> Option<&Volume> {
        if age >= self.len {
            return None;
        }
        let cap = self.capacity();
        Some(&self.slots[(self.next + cap - 1 - age) % cap])
    }

    pub fn latest(&self) -> Option<&Volume> {
        self.get(0)
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Volume> {
        (0..self.len).filter_map(move |age| self.get(age))
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.len = 0;
    }
}

// DataLayer holds one level of the model: the live state, the scratch
// buffers written by passes, a short history and the per-unit random
// streams used to sample it. Every buffer has the extent given at
// construction.
#[derive(Debug, Clone)]
pub struct DataLayer {
    /// live sampled state (or observed data on the bottom layer)
    pub(crate) activations: Volume,
    /// probabilities from the last upward pass into this layer
    pub(crate) probabilities: Volume,
    /// sample reconstructed by a downward pass
    pub(crate) generated: Volume,
    pub(crate) generated_probabilities: Volume,

    pub(crate) memory: Memory,
    pub(crate) rng_field: RandomUnitField,
}

impl DataLayer {
    pub fn new(depth: usize, width: usize, height: usize, seed: u64) -> Self {
        let extent = Extent::new(depth, width, height);
        Self {
            activations: Volume::zeros(extent),
            probabilities: Volume::zeros(extent),
            generated: Volume::zeros(extent),
            generated_probabilities: Volume::zeros(extent),
            memory: Memory::new(extent),
            rng_field: RandomUnitField::new(extent, seed),
        }
    }

    pub fn extent(&self) -> Extent {
        self.activations.extent()
    }

    /// Replaces the live state with `values`, laid out (depth, width, height)
    /// with height varying fastest.
    pub fn set_data(&mut self, values: &[Float]) -> Result<()> {
        self.activations.replace(values)
    }

    pub fn activations(&self) -> &Volume {
        &self.activations
    }
    pub fn probabilities(&self) -> &Volume {
        &self.probabilities
    }
    pub fn generated(&self) -> &Volume {
        &self.generated
    }
    pub fn generated_probabilities(&self) -> &Volume {
        &self.generated_probabilities
    }
    pub fn memory(&self) -> &Memory {
        &self.memory
    }
    pub fn rng_field(&self) -> &RandomUnitField {
        &self.rng_field
    }
    pub fn rng_field_mut(&mut self) -> &mut RandomUnitField {
        &mut self.rng_field
    }

    /// Pushes the live state into the memory ring.
    pub fn remember(&mut self) -> Result<()> {
        self.memory.push(&self.activations)
    }

    pub(crate) fn generate_from_activations(&mut self) -> Result<()> {
        self.generated.copy_from(&self.activations)
    }

    /// Resumes the generated chain from the newest remembered state, or from
    /// the live state when nothing was remembered yet.
    pub(crate) fn generate_from_memory(&mut self) -> Result<()> {
        match self.memory.latest() {
            Some(state) => self.generated.copy_from(state),
            None => self.generated.copy_from(&self.activations),
        }
    }

    pub(crate) fn remember_generated(&mut self) -> Result<()> {
        self.memory.push(&self.generated)
    }

    /// Outputs of a pass into this layer from below: (probabilities, live
    /// sample, random field).
    pub(crate) fn upward_targets(&mut self) -> (&mut Volume, &mut Volume, &mut RandomUnitField) {
        (
            &mut self.probabilities,
            &mut self.activations,
            &mut self.rng_field,
        )
    }

    /// Outputs written into the generated buffers, either by a downward
    /// pass or by the upward half of a reconstruction chain. The live
    /// sample is left alone so the positive statistics survive.
    pub(crate) fn generated_targets(
        &mut self,
    ) -> (&mut Volume, &mut Volume, &mut RandomUnitField) {
        (
            &mut self.generated_probabilities,
            &mut self.generated,
            &mut self.rng_field,
        )
    }
}
