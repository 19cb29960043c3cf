use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{error::Result, vol::Extent, Float};

/// One independent uniform stream per unit of a volume.
///
/// Every stream is a ChaCha8 generator keyed by the field seed and selected
/// by the unit's linear index, so a unit draws the same sequence no matter
/// how a parallel pass schedules it. Streams are never shared between units
/// and reseeding only happens on request.
#[derive(Debug, Clone)]
pub struct RandomUnitField {
    extent: Extent,
    seed: u64,
    streams: Vec<ChaCha8Rng>,
}

impl RandomUnitField {
    pub fn new(extent: Extent, seed: u64) -> Self {
        Self {
            extent,
            seed,
            streams: Self::streams_for(extent, seed),
        }
    }

    fn streams_for(extent: Extent, seed: u64) -> Vec<ChaCha8Rng> {
        (0..extent.len())
            .map(|index| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(index as u64);
                rng
            })
            .collect()
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Restarts every stream from the beginning of the sequence for `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.streams = Self::streams_for(self.extent, seed);
    }

    /// Rewinds every stream to its first draw.
    pub fn reset(&mut self) {
        self.reseed(self.seed);
    }

    /// Draws the next sample in [0, 1) from the stream of unit `(d, x, y)`.
    pub fn next_uniform(&mut self, d: usize, x: usize, y: usize) -> Result<Float> {
        let index = self.extent.checked_index(d, x, y)?;
        Ok(self.streams[index].gen::<Float>())
    }

    pub(crate) fn streams_mut(&mut self) -> &mut [ChaCha8Rng] {
        &mut self.streams
    }
}
