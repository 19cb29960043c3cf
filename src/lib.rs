//! Convolutional restricted Boltzmann machine stack.
//!
//! A [`DeepModel`] is an ordered stack of [`DataLayer`]s connected by
//! [`ConvolveLayer`]s. [`DeepModel::pass_up`] samples each layer from the one
//! below it, [`DeepModel::pass_down`] generates each layer from the one above
//! it, and [`Trainer`] drives contrastive-divergence updates. Every pass is
//! a data-parallel sweep over the units of one volume.

mod error;
mod kernel;
mod layers;
mod model;
mod rng;
mod trainer;
mod utils;
mod vol;

pub use error::*;
pub use layers::*;
pub use model::*;
pub use rng::*;
pub use trainer::*;
pub use utils::*;
pub use vol::*;

pub type Float = f32;
