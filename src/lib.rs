pub use faer;

mod activation;
pub mod component;
pub mod core;
mod error;
mod nnet;
mod pretty_print;
pub mod stream;
mod train_options;

pub use activation::*;
pub use component::{
    AffineTransform, Component, ComponentKind, Dropout, Gradient, LinearTransform,
    Nonlinearity, ParallelComponent, ProtoTokens, Softmax, UpdatableComponent, VectorizedWeights,
    init_component, read_component, write_component,
};
pub use crate::core::{Boundary, BufferPool};
pub use error::*;
pub use nnet::*;
pub use pretty_print::*;
pub use train_options::*;

pub(crate) mod utils;
