use std::io;

use derive_more::Display;
use thiserror::Error;

use crate::ComponentKind;

pub type NnetResult<T> = Result<T, NnetError>;

#[derive(Debug, Error)]
pub enum NnetError {
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("'{kind}' in network parameters (weight explosion, try lower learning rate?)")]
    NumericalDivergence { kind: Divergence },

    #[error("unimplemented access to parameters of updatable component {index} {kind}")]
    UnsupportedCapability { index: usize, kind: ComponentKind },

    #[error("stream format error: {0}")]
    StreamFormat(String),

    #[error("dropout retention {0} is not in (0, 1]")]
    InvalidRetention(f32),

    #[error("invalid prototype line {line:?}: {reason}")]
    Proto { line: String, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl NnetError {
    pub(crate) fn stream(message: impl Into<String>) -> Self {
        Self::StreamFormat(message.into())
    }

    pub(crate) fn proto(line: &str, reason: impl Into<String>) -> Self {
        Self::Proto {
            line: line.trim().to_owned(),
            reason: reason.into(),
        }
    }
}

/// Violations of the network's shape invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error(
        "dimension mismatch: component {index} output-dim {output_dim}, \
         next component input-dim {input_dim}"
    )]
    DimensionMismatch {
        index: usize,
        output_dim: usize,
        input_dim: usize,
    },

    #[error(
        "buffer count mismatch: {forward} forward and {backward} backward buffers \
         for {n_components} components"
    )]
    BufferCount {
        n_components: usize,
        forward: usize,
        backward: usize,
    },

    #[error("{kind} expects {expected} input columns, got {actual}")]
    InputDim {
        kind: ComponentKind,
        expected: usize,
        actual: usize,
    },

    #[error("{kind} expects {expected} gradient columns, got {actual}")]
    DiffDim {
        kind: ComponentKind,
        expected: usize,
        actual: usize,
    },

    #[error("{kind} got {diff_rows} gradient rows for {input_rows} input rows")]
    FrameCount {
        kind: ComponentKind,
        input_rows: usize,
        diff_rows: usize,
    },

    #[error("{kind} requires equal dims, got input-dim {input_dim}, output-dim {output_dim}")]
    ComponentDims {
        kind: ComponentKind,
        input_dim: usize,
        output_dim: usize,
    },

    #[error("component index {index} out of range ({n_components} components)")]
    IndexOutOfRange { index: usize, n_components: usize },

    #[error("parameter vector has {actual} values, expected {expected}")]
    ParamCount { expected: usize, actual: usize },

    #[error("parallel component has no nested networks, or one of them is empty")]
    EmptyNested,

    #[error(
        "nested networks have input-dim {input_dim}, output-dim {output_dim}, \
         expected input-dim {expected_input_dim}, output-dim {expected_output_dim}"
    )]
    NestedDims {
        input_dim: usize,
        output_dim: usize,
        expected_input_dim: usize,
        expected_output_dim: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Divergence {
    #[display("inf")]
    Inf,
    #[display("nan")]
    NaN,
}
