use std::time::Instant;

use faer::prelude::*;
use log::trace;

use crate::{
    Component, NnetResult,
    core::{BufferPool, check::check_buffer_count, buffer_pool::BackwardStep},
    utils::copy_mat,
};

/// Backward pass over the activations of the preceding `propagate`.
///
/// Each updatable component is updated right after its own backward step, from the
/// activation at its input and the gradient at its output. The input gradient is left in
/// buffer 0.
pub fn backpropagate(
    components: &mut [Box<dyn Component>],
    buffers: &mut BufferPool,
    output_diff: MatRef<f32>,
) -> NnetResult<()> {
    check_buffer_count(components.len(), buffers)?;
    copy_mat(buffers.diff_mut(components.len()), output_diff);
    for (i, component) in components.iter_mut().enumerate().rev() {
        let start = log::log_enabled!(log::Level::Trace).then(Instant::now);
        let BackwardStep {
            input,
            output,
            output_diff,
            input_diff,
        } = buffers.backward_step(i);
        component.backpropagate(
            input.as_ref(),
            output.as_ref(),
            output_diff.as_ref(),
            input_diff,
        )?;
        if let Some(updatable) = component.as_updatable_mut() {
            updatable.update(input.as_ref(), output_diff.as_ref())?;
        }
        if let Some(start) = start {
            trace!("[{i}] {} backpropagate {:?}", component.kind(), start.elapsed());
        }
    }
    Ok(())
}
