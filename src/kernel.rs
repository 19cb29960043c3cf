//! Data-parallel dispatch shared by the upward and downward passes.
//!
//! A pass is described by a pure function from a unit coordinate to the
//! unit's weighted input. The dispatcher evaluates it once per unit of the
//! output extent, applies the logistic activation and samples the unit from
//! its own random stream. Outputs are write-only: they are discarded before
//! the dispatch and become readable again only after every unit is written.

use rand::Rng;
use rayon::prelude::*;
use tracing::trace;

use crate::{
    error::Result,
    rng::RandomUnitField,
    utils::{bernoulli, sigmoid},
    vol::Volume,
    Float,
};

pub(crate) fn sample_units<F>(
    prob: &mut Volume,
    sample: &mut Volume,
    rng: &mut RandomUnitField,
    weighted_input: F,
) -> Result<()>
where
    F: Fn(usize, usize, usize) -> Float + Sync,
{
    let extent = prob.extent();
    extent.ensure_matches("sample buffer", sample.extent())?;
    extent.ensure_matches("random field", rng.extent())?;

    trace!(?extent, "dispatching stochastic units");

    let prob_out = prob.write_only();
    let sample_out = sample.write_only();
    prob_out
        .par_iter_mut()
        .zip(sample_out.par_iter_mut())
        .zip(rng.streams_mut().par_iter_mut())
        .enumerate()
        .for_each(|(i, ((p, s), stream))| {
            let (d, x, y) = extent.coords(i);
            let activation = sigmoid(weighted_input(d, x, y));
            *p = activation;
            *s = bernoulli(activation, stream.gen::<Float>());
        });

    prob.sync_to_device();
    sample.sync_to_device();
    Ok(())
}
