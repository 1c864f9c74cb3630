use std::time::Instant;

use faer::prelude::*;
use log::trace;

use crate::{
    Component, NnetResult,
    core::{BufferPool, check::check_buffer_count},
    utils::copy_mat,
};

/// Training-mode forward pass: every boundary activation is kept for the backward pass.
/// The output is left in buffer `components.len()`.
pub fn propagate(
    components: &mut [Box<dyn Component>],
    buffers: &mut BufferPool,
    input: MatRef<f32>,
) -> NnetResult<()> {
    check_buffer_count(components.len(), buffers)?;
    copy_mat(buffers.activation_mut(0), input);
    for (i, component) in components.iter_mut().enumerate() {
        let start = log::log_enabled!(log::Level::Trace).then(Instant::now);
        let (src, dst) = buffers.forward_step(i);
        component.propagate(src.as_ref(), dst)?;
        if let Some(start) = start {
            trace!("[{i}] {} propagate {:?}", component.kind(), start.elapsed());
        }
    }
    Ok(())
}

/// Inference-mode forward pass.
///
/// Intermediate results alternate between buffers 0 and 1, which are shrunk back to 0 x 0
/// before returning.
pub fn feedforward(
    components: &mut [Box<dyn Component>],
    buffers: &mut BufferPool,
    input: MatRef<f32>,
) -> NnetResult<Mat<f32>> {
    let mut output = Mat::zeros(0, 0);
    match components {
        [] => copy_mat(&mut output, input),
        [component] => component.propagate(input, &mut output)?,
        [first, middle @ .., last] => {
            check_buffer_count(middle.len() + 2, buffers)?;
            let result = feedforward_chain(
                first.as_mut(),
                middle,
                last.as_mut(),
                buffers,
                input,
                &mut output,
            );
            buffers.release_aux();
            result?;
        }
    }
    Ok(output)
}

fn feedforward_chain(
    first: &mut dyn Component,
    middle: &mut [Box<dyn Component>],
    last: &mut dyn Component,
    buffers: &mut BufferPool,
    input: MatRef<f32>,
    output: &mut Mat<f32>,
) -> NnetResult<()> {
    first.propagate(input, buffers.activation_mut(0))?;
    for (i, component) in (1..).zip(middle.iter_mut()) {
        let (src, dst) = buffers.aux_step(i);
        component.propagate(src.as_ref(), dst)?;
    }
    let (src, _) = buffers.aux_step(middle.len() + 1);
    last.propagate(src.as_ref(), output)
}
