use faer::prelude::*;

use crate::{
    ActivationFunction, DynActivationFunction, NnetResult,
    activation_functions::{Sigmoid, Tanh},
};

use super::{Component, ComponentKind};

/// Element-wise activation, `output = phi(input)`.
/// Backpropagation reads only the kept output.
#[derive(Debug, Clone)]
pub struct Nonlinearity {
    dim: usize,
    phi: DynActivationFunction,
}

impl Nonlinearity {
    pub fn new<Phi: ActivationFunction>(dim: usize) -> Self {
        Self {
            dim,
            phi: DynActivationFunction::new::<Phi>(),
        }
    }

    pub fn sigmoid(dim: usize) -> Self {
        Self::new::<Sigmoid>(dim)
    }

    pub fn tanh(dim: usize) -> Self {
        Self::new::<Tanh>(dim)
    }

    pub fn phi(&self) -> DynActivationFunction {
        self.phi
    }
}

impl Component for Nonlinearity {
    fn kind(&self) -> ComponentKind {
        self.phi.kind()
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
            for j in 0..input.ncols() {
                output[(i, j)] = self.phi.apply(input[(i, j)]);
            }
        }
        Ok(())
    }

    fn backpropagate_fnc(
        &mut self,
        _input: MatRef<f32>,
        output: MatRef<f32>,
        output_diff: MatRef<f32>,
        mut input_diff: MatMut<f32>,
    ) -> NnetResult<()> {
        for i in 0..output.nrows() {
            for j in 0..output.ncols() {
                input_diff[(i, j)] =
                    output_diff[(i, j)] * self.phi.deriv_from_output(output[(i, j)]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn sigmoid_backprop_scales_by_derivative() {
        let mut sigmoid = Nonlinearity::sigmoid(2);
        let input = Mat::from_fn(1, 2, |_, j| j as f32);
        let mut output = Mat::zeros(0, 0);
        sigmoid.propagate(input.as_ref(), &mut output).unwrap();
        assert_relative_eq!(output[(0, 0)], 0.5);
        let diff = Mat::from_fn(1, 2, |_, _| 1.0f32);
        let mut input_diff = Mat::zeros(0, 0);
        sigmoid
            .backpropagate(input.as_ref(), output.as_ref(), diff.as_ref(), &mut input_diff)
            .unwrap();
        assert_relative_eq!(input_diff[(0, 0)], 0.25);
        let y = output[(0, 1)];
        assert_relative_eq!(input_diff[(0, 1)], y * (1.0 - y), epsilon = 1e-6);
    }
}
