use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use faer::prelude::*;
use log::{debug, info, warn};

use crate::{
    Component, ComponentKind, NnetError, NnetResult, PrettyPrintBuffers, PrettyPrintGradient,
    PrettyPrintTopology, StructuralError, TrainOptions,
    component::{check_retention, init_component, read_component, write_component},
    core::{Boundary, BufferPool, check, param_codec},
    stream,
};

/// An ordered chain of components trained as one pipeline.
///
/// Matrices hold one frame per row. The network owns its components and the buffers of the
/// training passes: `propagate` keeps the activation at every layer boundary, and
/// `backpropagate` uses them to compute gradients and update the updatable components on
/// the way back.
#[derive(Debug)]
pub struct Nnet {
    components: Vec<Box<dyn Component>>,
    buffers: BufferPool,
    opts: TrainOptions,
}

impl Default for Nnet {
    fn default() -> Self {
        Self::new()
    }
}

/// Deep copy, with fresh buffers.
impl Clone for Nnet {
    fn clone(&self) -> Self {
        Self {
            components: self.components.iter().map(|c| c.duplicate()).collect(),
            buffers: BufferPool::new(self.components.len()),
            opts: self.opts,
        }
    }
}

impl Nnet {
    pub fn new() -> Self {
        Self::with_train_options(TrainOptions::default())
    }

    pub fn with_train_options(opts: TrainOptions) -> Self {
        Self {
            components: Vec::new(),
            buffers: BufferPool::new(0),
            opts,
        }
    }

    /// Builds a network from components, checking that their dims chain.
    pub fn from_components(
        components: impl IntoIterator<Item = Box<dyn Component>>,
    ) -> NnetResult<Self> {
        let mut nnet = Self::new();
        for component in components {
            nnet.append_component(component)?;
        }
        Ok(nnet)
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Input dim of the first component, `None` for an empty network.
    pub fn input_dim(&self) -> Option<usize> {
        self.components.first().map(|c| c.input_dim())
    }

    /// Output dim of the last component, `None` for an empty network.
    pub fn output_dim(&self) -> Option<usize> {
        self.components.last().map(|c| c.output_dim())
    }

    fn check_index(&self, index: usize) -> NnetResult<()> {
        match index < self.components.len() {
            true => Ok(()),
            false => Err(StructuralError::IndexOutOfRange {
                index,
                n_components: self.components.len(),
            }
            .into()),
        }
    }

    pub fn component(&self, index: usize) -> NnetResult<&dyn Component> {
        self.check_index(index)?;
        Ok(self.components[index].as_ref())
    }

    pub fn component_mut(&mut self, index: usize) -> NnetResult<&mut dyn Component> {
        self.check_index(index)?;
        Ok(self.components[index].as_mut())
    }

    pub fn components(&self) -> &[Box<dyn Component>] {
        &self.components
    }

    /// Buffers at layer boundary `index`, `0..=n_components()`.
    pub fn boundary(&self, index: usize) -> Option<Boundary<'_>> {
        self.buffers.boundary(index)
    }

    /// Training-mode forward pass.
    pub fn propagate(&mut self, input: MatRef<f32>) -> NnetResult<MatRef<'_, f32>> {
        crate::core::propagate(&mut self.components, &mut self.buffers, input)?;
        Ok(self.buffers.activation(self.components.len()))
    }

    /// Backward pass, updating every updatable component on the way.
    /// Must follow a `propagate` on the same frames.
    pub fn backpropagate(&mut self, output_diff: MatRef<f32>) -> NnetResult<MatRef<'_, f32>> {
        crate::core::backpropagate(&mut self.components, &mut self.buffers, output_diff)?;
        Ok(self.buffers.diff(0))
    }

    /// Inference-mode forward pass. Does not keep intermediate activations.
    pub fn feedforward(&mut self, input: MatRef<f32>) -> NnetResult<Mat<f32>> {
        crate::core::feedforward(&mut self.components, &mut self.buffers, input)
    }

    fn broadcast_train_options(&self, component: &mut dyn Component) {
        if let Some(updatable) = component.as_updatable_mut() {
            updatable.set_train_options(&self.opts);
        }
    }

    /// Appends a component and checks the network.
    /// On error the component stays appended.
    pub fn append_component(&mut self, mut component: Box<dyn Component>) -> NnetResult<()> {
        self.broadcast_train_options(component.as_mut());
        debug!(
            "appending component {} {}",
            self.components.len(),
            component.kind()
        );
        self.components.push(component);
        self.buffers.resize(self.components.len());
        self.check()
    }

    /// Appends a deep copy of every component of `other`.
    pub fn append_nnet(&mut self, other: &Nnet) -> NnetResult<()> {
        for component in &other.components {
            self.append_component(component.duplicate())?;
        }
        Ok(())
    }

    /// Replaces component `index`, dropping the old one.
    pub fn set_component(
        &mut self,
        index: usize,
        mut component: Box<dyn Component>,
    ) -> NnetResult<()> {
        self.check_index(index)?;
        self.broadcast_train_options(component.as_mut());
        debug!(
            "replacing component {index} {} with {}",
            self.components[index].kind(),
            component.kind()
        );
        self.components[index] = component;
        self.buffers.resize(self.components.len());
        self.check()
    }

    /// Removes and drops component `index`.
    pub fn remove_component(&mut self, index: usize) -> NnetResult<()> {
        self.check_index(index)?;
        let component = self.components.remove(index);
        debug!("removed component {index} {}", component.kind());
        self.buffers.resize(self.components.len());
        self.check()
    }

    /// Destroys every component.
    pub fn clear(&mut self) {
        self.components.clear();
        self.buffers.clear();
    }

    /// Replaces `self` with a deep copy of `other`.
    pub fn assign(&mut self, other: &Nnet) -> NnetResult<()> {
        *self = other.clone();
        self.check()
    }

    /// Deep copy, checked.
    pub fn try_clone(&self) -> NnetResult<Self> {
        let nnet = self.clone();
        nnet.check()?;
        Ok(nnet)
    }

    pub fn num_params(&self) -> usize {
        param_codec::num_params(&self.components)
    }

    /// Parameters of all updatable components, in component order.
    pub fn params(&self) -> Vec<f32> {
        param_codec::params(&self.components)
    }

    pub fn set_params(&mut self, params: &[f32]) -> NnetResult<()> {
        param_codec::set_params(&mut self.components, params)
    }

    /// Most recent update directions, laid out like `params`.
    pub fn gradient(&self) -> Vec<f32> {
        param_codec::gradient(&self.components)
    }

    /// Weight matrices (row-major) and biases, in component order.
    ///
    /// Fails with `UnsupportedCapability` if an updatable component does not expose its
    /// weights that way.
    pub fn weights(&self) -> NnetResult<Vec<f32>> {
        param_codec::weights(&self.components)
    }

    /// Inverse of `weights`. Nothing is written if any component or the length is rejected.
    pub fn set_weights(&mut self, weights: &[f32]) -> NnetResult<()> {
        param_codec::set_weights(&mut self.components, weights)
    }

    /// Buffer counts, dim chaining, then finiteness of the parameters.
    pub fn check(&self) -> NnetResult<()> {
        check::check(&self.components, &self.buffers)
    }

    pub fn train_options(&self) -> &TrainOptions {
        &self.opts
    }

    /// Stores `opts` and hands a copy to every updatable component.
    pub fn set_train_options(&mut self, opts: TrainOptions) {
        debug!("setting train options: {opts}");
        self.opts = opts;
        for component in &mut self.components {
            if let Some(updatable) = component.as_updatable_mut() {
                updatable.set_train_options(&opts);
            }
        }
    }

    /// Sets the retention of every top-level dropout component.
    pub fn set_dropout_retention(&mut self, retention: f32) -> NnetResult<()> {
        check_retention(retention)?;
        for (i, component) in self.components.iter_mut().enumerate() {
            if let Some(dropout) = component.as_dropout_mut() {
                let old = dropout.retention();
                dropout.set_retention(retention)?;
                info!("setting dropout-retention in component {i} from {old} to {retention}");
            }
        }
        Ok(())
    }

    /// Appends one component per prototype line.
    ///
    /// Blank lines and the `<NnetProto>` / `</NnetProto>` sentinels are skipped.
    pub fn init(&mut self, r: &mut dyn BufRead) -> NnetResult<()> {
        for line in r.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line == "<NnetProto>" || line == "</NnetProto>" {
                continue;
            }
            debug!("{line}");
            self.append_component(init_component(line)?)?;
        }
        self.check()
    }

    pub fn init_from_reader(r: &mut dyn BufRead) -> NnetResult<Self> {
        let mut nnet = Self::new();
        nnet.init(r)?;
        Ok(nnet)
    }

    pub fn init_from_str(proto: &str) -> NnetResult<Self> {
        Self::init_from_reader(&mut proto.as_bytes())
    }

    pub fn init_from_path(path: impl AsRef<Path>) -> NnetResult<Self> {
        let mut r = BufReader::new(File::open(path)?);
        Self::init_from_reader(&mut r)
    }

    /// Appends the components of a model stream.
    ///
    /// Reads up to `</Nnet>`, or to the end of the stream if it does not open with `<Nnet>`.
    /// The learn rate is then reset to 0 and broadcast. A malformed stream leaves the network
    /// unchanged.
    pub fn read(&mut self, r: &mut dyn BufRead, binary: bool) -> NnetResult<()> {
        let components = self.read_components(r, binary)?;
        self.components.extend(components);
        self.buffers.resize(self.components.len());
        self.set_train_options(self.opts.with_learn_rate(0.0));
        self.check()
    }

    fn read_components(
        &self,
        r: &mut dyn BufRead,
        binary: bool,
    ) -> NnetResult<Vec<Box<dyn Component>>> {
        let mut components: Vec<Box<dyn Component>> = Vec::new();
        let mut opened = false;
        let mut first = true;
        loop {
            if stream::at_eof(r, binary)? {
                if opened {
                    return Err(NnetError::stream("missing </Nnet>"));
                }
                break;
            }
            let token = stream::read_token(r, binary)?;
            if first && token == "<Nnet>" {
                opened = true;
                first = false;
                continue;
            }
            first = false;
            if token == "</Nnet>" {
                break;
            }
            let kind = ComponentKind::from_marker(&token)
                .ok_or_else(|| NnetError::stream(format!("unknown component marker {token}")))?;
            let component = read_component(kind, r, binary)?;
            let previous = components.last().map(|c| c.output_dim());
            match previous.or(self.output_dim()) {
                Some(output_dim) if output_dim != component.input_dim() => {
                    return Err(NnetError::stream(format!(
                        "dimensionality mismatch: previous layer output-dim {output_dim}, \
                         current layer {kind} input-dim {}",
                        component.input_dim()
                    )));
                }
                _ => (),
            }
            components.push(component);
        }
        Ok(components)
    }

    pub fn read_from(r: &mut dyn BufRead, binary: bool) -> NnetResult<Self> {
        let mut nnet = Self::new();
        nnet.read(r, binary)?;
        Ok(nnet)
    }

    /// Reads a model file, binary if it starts with the binary header.
    pub fn read_from_path(path: impl AsRef<Path>) -> NnetResult<Self> {
        let path = path.as_ref();
        let mut r = BufReader::new(File::open(path)?);
        let binary = stream::read_binary_header(&mut r)?;
        let nnet = Self::read_from(&mut r, binary)?;
        if nnet.is_empty() {
            warn!("the network {} is empty", path.display());
        }
        Ok(nnet)
    }

    pub fn write(&self, w: &mut dyn Write, binary: bool) -> NnetResult<()> {
        self.check()?;
        stream::write_token(w, binary, "<Nnet>")?;
        stream::write_newline(w, binary)?;
        for component in &self.components {
            write_component(component.as_ref(), w, binary)?;
        }
        stream::write_token(w, binary, "</Nnet>")?;
        stream::write_newline(w, binary)
    }

    pub fn write_to_path(&self, path: impl AsRef<Path>, binary: bool) -> NnetResult<()> {
        let mut w = BufWriter::new(File::create(path)?);
        if binary {
            stream::write_binary_header(&mut w)?;
        }
        self.write(&mut w, binary)?;
        w.flush()?;
        Ok(())
    }

    /// Topology, dims and parameter statistics.
    pub fn info(&self) -> String {
        PrettyPrintTopology::new(&self.components).to_string()
    }

    pub fn info_gradient(&self) -> String {
        PrettyPrintGradient::new(&self.components).to_string()
    }

    /// Statistics of the activations kept by the last `propagate`.
    pub fn info_propagate(&self) -> String {
        PrettyPrintBuffers::forward(&self.components, &self.buffers).to_string()
    }

    /// Statistics of the gradients kept by the last `backpropagate`.
    pub fn info_backpropagate(&self) -> String {
        PrettyPrintBuffers::backward(&self.components, &self.buffers).to_string()
    }
}
