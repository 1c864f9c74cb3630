use faer::prelude::*;

use crate::{NnetResult, utils::copy_into_cols};

use super::{Component, ComponentKind};

/// Row-wise softmax.
///
/// The backward pass hands the output gradient through unchanged, which is the gradient at the
/// input when the loss is cross-entropy and `output_diff = output - target`.
#[derive(Debug, Clone)]
pub struct Softmax {
    dim: usize,
}

impl Softmax {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Component for Softmax {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Softmax
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn duplicate(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn propagate_fnc(&mut self, input: MatRef<f32>, mut output: MatMut<f32>) -> NnetResult<()> {
        for i in 0..input.nrows() {
            let max = (0..input.ncols())
                .map(|j| input[(i, j)])
                .fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for j in 0..input.ncols() {
                let e = f32::exp(input[(i, j)] - max);
                output[(i, j)] = e;
                sum += e;
            }
            for j in 0..input.ncols() {
                output[(i, j)] /= sum;
            }
        }
        Ok(())
    }

    fn backpropagate_fnc(
        &mut self,
        _input: MatRef<f32>,
        _output: MatRef<f32>,
        output_diff: MatRef<f32>,
        input_diff: MatMut<f32>,
    ) -> NnetResult<()> {
        copy_into_cols(input_diff, 0, output_diff);
        Ok(())
    }
}
