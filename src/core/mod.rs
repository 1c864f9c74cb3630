//! Core parts of the algorithms, operating on a component sequence and its buffers.

pub mod buffer_pool;
pub mod check;
pub mod param_codec;

pub use buffer_pool::{Boundary, BufferPool};

mod back_propagation;
mod forward;

pub use back_propagation::*;
pub use forward::*;
