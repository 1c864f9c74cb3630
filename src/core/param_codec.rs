//! Flat views of the parameters of a component sequence.
//!
//! Updatable components are walked in order and their blobs concatenated. Non-updatable
//! components contribute nothing.

use crate::{Component, NnetError, NnetResult, component::check_param_count};

pub fn num_params(components: &[Box<dyn Component>]) -> usize {
    components
        .iter()
        .filter_map(|c| c.as_updatable())
        .map(|u| u.num_params())
        .sum()
}

pub fn params(components: &[Box<dyn Component>]) -> Vec<f32> {
    let mut params = Vec::with_capacity(num_params(components));
    for updatable in components.iter().filter_map(|c| c.as_updatable()) {
        updatable.params(&mut params);
    }
    params
}

pub fn gradient(components: &[Box<dyn Component>]) -> Vec<f32> {
    let mut gradient = Vec::with_capacity(num_params(components));
    for updatable in components.iter().filter_map(|c| c.as_updatable()) {
        updatable.gradient(&mut gradient);
    }
    gradient
}

/// The length is checked before any component is touched.
pub fn set_params(components: &mut [Box<dyn Component>], params: &[f32]) -> NnetResult<()> {
    check_param_count(num_params(components), params.len())?;
    let mut rest = params;
    for updatable in components.iter_mut().filter_map(|c| c.as_updatable_mut()) {
        let (head, tail) = rest.split_at(updatable.num_params());
        updatable.set_params(head)?;
        rest = tail;
    }
    Ok(())
}

/// Total weight count, or the first updatable component without vectorized weights.
fn weights_len(components: &[Box<dyn Component>]) -> NnetResult<usize> {
    let mut len = 0usize;
    for (index, c) in components.iter().enumerate() {
        if !c.is_updatable() {
            continue;
        }
        match c.as_vectorized() {
            Some(vectorized) => len += vectorized.weights_len(),
            None => {
                return Err(NnetError::UnsupportedCapability {
                    index,
                    kind: c.kind(),
                });
            }
        }
    }
    Ok(len)
}

pub fn weights(components: &[Box<dyn Component>]) -> NnetResult<Vec<f32>> {
    let mut weights = Vec::with_capacity(weights_len(components)?);
    for vectorized in components.iter().filter_map(|c| c.as_vectorized()) {
        vectorized.weights(&mut weights);
    }
    Ok(weights)
}

/// All-or-nothing: capability and length are checked before any component is touched.
pub fn set_weights(components: &mut [Box<dyn Component>], weights: &[f32]) -> NnetResult<()> {
    check_param_count(weights_len(components)?, weights.len())?;
    let mut rest = weights;
    for vectorized in components.iter_mut().filter_map(|c| c.as_vectorized_mut()) {
        let (head, tail) = rest.split_at(vectorized.weights_len());
        vectorized.set_weights(head)?;
        rest = tail;
    }
    Ok(())
}
