use crate::{
    Component, Divergence, NnetError, NnetResult, StructuralError,
    core::{BufferPool, param_codec},
};

pub fn check_buffer_count(
    n_components: usize,
    buffers: &BufferPool,
) -> Result<(), StructuralError> {
    let (forward, backward) = (buffers.n_propagate(), buffers.n_backpropagate());
    if forward != n_components + 1 || backward != n_components + 1 {
        return Err(StructuralError::BufferCount {
            n_components,
            forward,
            backward,
        });
    }
    Ok(())
}

pub fn check_dims(components: &[Box<dyn Component>]) -> Result<(), StructuralError> {
    for (index, pair) in components.windows(2).enumerate() {
        let (output_dim, input_dim) = (pair[0].output_dim(), pair[1].input_dim());
        if output_dim != input_dim {
            return Err(StructuralError::DimensionMismatch {
                index,
                output_dim,
                input_dim,
            });
        }
    }
    Ok(())
}

pub fn check_structures(components: &[Box<dyn Component>]) -> Result<(), StructuralError> {
    components.iter().try_for_each(|c| c.check_structure())
}

/// A single probe over all parameters, the sum of the flattened vector.
pub fn check_finite(components: &[Box<dyn Component>]) -> NnetResult<()> {
    let sum: f32 = param_codec::params(components).into_iter().sum();
    if sum.is_infinite() {
        return Err(NnetError::NumericalDivergence {
            kind: Divergence::Inf,
        });
    }
    if sum.is_nan() {
        return Err(NnetError::NumericalDivergence {
            kind: Divergence::NaN,
        });
    }
    Ok(())
}

pub fn check(components: &[Box<dyn Component>], buffers: &BufferPool) -> NnetResult<()> {
    check_buffer_count(components.len(), buffers)?;
    check_dims(components)?;
    check_structures(components)?;
    check_finite(components)
}
