use faer::prelude::*;

/// Read-only view of the buffers at one layer boundary.
///
/// Boundary 0 is the network input, boundary `i + 1` is the output of component `i`.
#[derive(Debug, Clone, Copy)]
pub struct Boundary<'a> {
    pub index: usize,
    pub activation: MatRef<'a, f32>,
    pub diff: MatRef<'a, f32>,
}

/// Buffers one backward step of component `index` reads and writes.
pub(crate) struct BackwardStep<'a> {
    pub(crate) input: &'a Mat<f32>,
    pub(crate) output: &'a Mat<f32>,
    pub(crate) output_diff: &'a Mat<f32>,
    pub(crate) input_diff: &'a mut Mat<f32>,
}

/// Forward activations and backward gradients, one of each per layer boundary.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    propagate: Vec<Mat<f32>>,
    backpropagate: Vec<Mat<f32>>,
}

impl BufferPool {
    /// Buffers for a network of `n_components` components.
    pub fn new(n_components: usize) -> Self {
        let mut buffers = Self::default();
        buffers.resize(n_components);
        buffers
    }

    /// Keeps existing buffers, new ones start as 0 x 0.
    pub fn resize(&mut self, n_components: usize) {
        self.propagate
            .resize_with(n_components + 1, || Mat::zeros(0, 0));
        self.backpropagate
            .resize_with(n_components + 1, || Mat::zeros(0, 0));
    }

    pub fn n_propagate(&self) -> usize {
        self.propagate.len()
    }

    pub fn n_backpropagate(&self) -> usize {
        self.backpropagate.len()
    }

    pub fn boundary(&self, index: usize) -> Option<Boundary<'_>> {
        Some(Boundary {
            index,
            activation: self.propagate.get(index)?.as_ref(),
            diff: self.backpropagate.get(index)?.as_ref(),
        })
    }

    pub(crate) fn activation(&self, index: usize) -> MatRef<'_, f32> {
        self.propagate[index].as_ref()
    }

    pub(crate) fn activation_mut(&mut self, index: usize) -> &mut Mat<f32> {
        &mut self.propagate[index]
    }

    pub(crate) fn diff(&self, index: usize) -> MatRef<'_, f32> {
        self.backpropagate[index].as_ref()
    }

    pub(crate) fn diff_mut(&mut self, index: usize) -> &mut Mat<f32> {
        &mut self.backpropagate[index]
    }

    /// Input and output buffers of component `index` in the forward pass.
    pub(crate) fn forward_step(&mut self, index: usize) -> (&Mat<f32>, &mut Mat<f32>) {
        let (lower, upper) = self.propagate.split_at_mut(index + 1);
        (&lower[index], &mut upper[0])
    }

    pub(crate) fn backward_step(&mut self, index: usize) -> BackwardStep<'_> {
        let (lower, upper) = self.backpropagate.split_at_mut(index + 1);
        BackwardStep {
            input: &self.propagate[index],
            output: &self.propagate[index + 1],
            output_diff: &upper[0],
            input_diff: &mut lower[index],
        }
    }

    /// The two buffers feedforward alternates between, as `(source, destination)` for component
    /// `index`: the source is buffer `(index - 1) % 2`, the destination buffer `index % 2`.
    pub(crate) fn aux_step(&mut self, index: usize) -> (&Mat<f32>, &mut Mat<f32>) {
        let (first, rest) = self.propagate.split_at_mut(1);
        let (first, second) = (&mut first[0], &mut rest[0]);
        match index % 2 {
            0 => (&*second, first),
            _ => (&*first, second),
        }
    }

    /// Shrinks the feedforward buffers back to 0 x 0.
    pub(crate) fn release_aux(&mut self) {
        for buffer in self.propagate.iter_mut().take(2) {
            *buffer = Mat::zeros(0, 0);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.propagate.clear();
        self.backpropagate.clear();
        self.resize(0);
    }
}
