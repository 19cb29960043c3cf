mod conv_layer;
mod data_layer;

pub use conv_layer::*;
pub use data_layer::*;
