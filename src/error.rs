use thiserror::Error;

use crate::{vol::Extent, Float};

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(
        "model has {data_layers} data layers and {convolve_layers} convolve layers, \
         expected exactly one more data layer than convolve layers"
    )]
    StructuralInconsistency {
        data_layers: usize,
        convolve_layers: usize,
    },

    #[error("model has no data layers")]
    EmptyModel,

    #[error("no layer pair {index}, model has {pairs}")]
    NoSuchPair { index: usize, pairs: usize },

    #[error("volume contents were invalidated and have not been rewritten")]
    StaleRead,

    #[error("unit ({d}, {x}, {y}) lies outside {extent:?}")]
    OutOfRange {
        d: usize,
        x: usize,
        y: usize,
        extent: Extent,
    },

    #[error("invalid value {value} for {name}")]
    InvalidParameter { name: &'static str, value: Float },

    #[error("{name} must be at least 1, got {value}")]
    InvalidCount { name: &'static str, value: usize },
}

impl ModelError {
    pub(crate) fn check(what: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(ModelError::ShapeMismatch {
                what,
                expected,
                actual,
            })
        }
    }

    pub(crate) fn check_count(name: &'static str, value: usize) -> Result<()> {
        if value == 0 {
            Err(ModelError::InvalidCount { name, value })
        } else {
            Ok(())
        }
    }
}
