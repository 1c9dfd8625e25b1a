use thiserror::Error;

use crate::node::{DType, NodeInput};

#[derive(Debug, Error)]
pub enum CtcError {
    #[error("{input} must be {expected} instead of {found}")]
    TypeMismatch {
        input: NodeInput,
        expected: DType,
        found: DType,
    },

    #[error("gradient of input {position} ({input}) is undefined: WarpCTC only differentiates the activations")]
    UnsupportedGradient { position: usize, input: NodeInput },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("view (offset {offset}, extent {extent}) addresses past a buffer of {len} elements")]
    ViewOutOfBounds {
        offset: usize,
        extent: usize,
        len: usize,
    },

    #[error("invalid ctc batch: {0}")]
    InvalidBatch(String),

    #[error("warpctc failed with status {status}: {message}")]
    Native { status: i32, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}
