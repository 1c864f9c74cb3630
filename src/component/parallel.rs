use std::{
    fmt::Write as _,
    io::{BufRead, Write},
    iter,
};

use faer::prelude::*;
use rayon::prelude::*;

use crate::{
    Nnet, NnetError, NnetResult, StructuralError, TrainOptions,
    core::check::{check_dims, check_structures},
    stream,
    utils::{copy_into_cols, ranges},
};

use super::{Component, ComponentKind, Gradient, ProtoTokens, UpdatableComponent, check_param_count};

/// Nested networks side by side, each reading its own range of input columns and writing its
/// own range of output columns.
#[derive(Debug, Clone)]
pub struct ParallelComponent {
    input_dim: usize,
    output_dim: usize,
    nested: Vec<Nnet>,
    opts: TrainOptions,
}

impl ParallelComponent {
    pub fn new(nested: Vec<Nnet>) -> NnetResult<Self> {
        if nested.is_empty() || nested.iter().any(Nnet::is_empty) {
            return Err(StructuralError::EmptyNested.into());
        }
        Ok(Self {
            input_dim: nested.iter().filter_map(Nnet::input_dim).sum(),
            output_dim: nested.iter().filter_map(Nnet::output_dim).sum(),
            nested,
            opts: TrainOptions::default(),
        })
    }

    /// Dims only, the nested networks are filled in by `read_data` or `init_data`.
    pub(crate) fn unfilled(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            nested: Vec::new(),
            opts: TrainOptions::default(),
        }
    }

    pub fn nested(&self) -> &[Nnet] {
        &self.nested
    }

    /// Nested dims that no longer add up are reported by `check` and by the next pass.
    pub fn nested_mut(&mut self) -> &mut [Nnet] {
        &mut self.nested
    }

    fn input_ranges(&self) -> Vec<(usize, usize)> {
        ranges(self.nested.iter().map(|nnet| nnet.input_dim().unwrap_or(0)))
    }

    fn output_ranges(&self) -> Vec<(usize, usize)> {
        ranges(self.nested.iter().map(|nnet| nnet.output_dim().unwrap_or(0)))
    }

    /// The nested networks are non-empty, chain internally, and their dims add up to ours.
    fn check_nested(&self) -> Result<(), StructuralError> {
        if self.nested.is_empty() || self.nested.iter().any(Nnet::is_empty) {
            return Err(StructuralError::EmptyNested);
        }
        for nnet in &self.nested {
            check_dims(nnet.components())?;
            check_structures(nnet.components())?;
        }
        let input_dim: usize = self.nested.iter().filter_map(Nnet::input_dim).sum();
        let output_dim: usize = self.nested.iter().filter_map(Nnet::output_dim).sum();
        if (input_dim, output_dim) != (self.input_dim, self.output_dim) {
            return Err(StructuralError::NestedDims {
                input_dim,
                output_dim,
                expected_input_dim: self.input_dim,
                expected_output_dim: self.output_dim,
            });
        }
        Ok(())
    }

    fn nested_report(&self, report: impl Fn(&Nnet) -> String) -> String {
        let mut out = String::new();
        for (i, nnet) in self.nested.iter().enumerate() {
            let _ = write!(out, "\n  nested_network #{} {{\n{}}}", i + 1, report(nnet));
        }
        out
    }
}

impl Component for ParallelComponent {
    fn kind(&self) -> ComponentKind {
        ComponentKind::ParallelComponent
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn duplicate(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn propagate_fnc(&mut self, input: MatRef<f32>, mut output: MatMut<f32>) -> NnetResult<()> {
        self.check_nested()?;
        let input_ranges = self.input_ranges();
        let output_ranges = self.output_ranges();
        let outputs = self
            .nested
            .par_iter_mut()
            .zip(input_ranges.par_iter())
            .map(|(nnet, &(offset, len))| {
                nnet.propagate(input.subcols(offset, len))
                    .map(|output| output.to_owned())
            })
            .collect::<NnetResult<Vec<Mat<f32>>>>()?;
        for (nested_output, &(offset, _)) in iter::zip(&outputs, &output_ranges) {
            copy_into_cols(output.rb_mut(), offset, nested_output.as_ref());
        }
        Ok(())
    }

    fn backpropagate_fnc(
        &mut self,
        _input: MatRef<f32>,
        _output: MatRef<f32>,
        output_diff: MatRef<f32>,
        mut input_diff: MatMut<f32>,
    ) -> NnetResult<()> {
        self.check_nested()?;
        let input_ranges = self.input_ranges();
        let output_ranges = self.output_ranges();
        let input_diffs = self
            .nested
            .par_iter_mut()
            .zip(output_ranges.par_iter())
            .map(|(nnet, &(offset, len))| {
                nnet.backpropagate(output_diff.subcols(offset, len))
                    .map(|input_diff| input_diff.to_owned())
            })
            .collect::<NnetResult<Vec<Mat<f32>>>>()?;
        for (nested_diff, &(offset, _)) in iter::zip(&input_diffs, &input_ranges) {
            copy_into_cols(input_diff.rb_mut(), offset, nested_diff.as_ref());
        }
        Ok(())
    }

    fn as_updatable(&self) -> Option<&dyn UpdatableComponent> {
        Some(self)
    }

    fn as_updatable_mut(&mut self) -> Option<&mut dyn UpdatableComponent> {
        Some(self)
    }

    fn write_data(&self, w: &mut dyn Write, binary: bool) -> NnetResult<()> {
        stream::write_token(w, binary, "<NestedNnetCount>")?;
        stream::write_dim(w, binary, self.nested.len())?;
        stream::write_newline(w, binary)?;
        for (i, nnet) in self.nested.iter().enumerate() {
            stream::write_token(w, binary, "<NestedNnet>")?;
            stream::write_dim(w, binary, i + 1)?;
            stream::write_newline(w, binary)?;
            nnet.write(w, binary)?;
        }
        stream::write_token(w, binary, "</ParallelComponent>")?;
        stream::write_newline(w, binary)
    }

    fn read_data(&mut self, r: &mut dyn BufRead, binary: bool) -> NnetResult<()> {
        stream::expect_token(r, binary, "<NestedNnetCount>")?;
        let count = stream::read_dim(r, binary)?;
        let mut nested = Vec::with_capacity(count);
        for _ in 0..count {
            stream::expect_token(r, binary, "<NestedNnet>")?;
            let _index = stream::read_dim(r, binary)?;
            let mut nnet = Nnet::new();
            nnet.read(r, binary)?;
            nested.push(nnet);
        }
        stream::expect_token(r, binary, "</ParallelComponent>")?;
        self.nested = nested;
        self.check_nested()
            .map_err(|error| NnetError::stream(error.to_string()))
    }

    fn init_data(&mut self, tokens: &mut ProtoTokens) -> NnetResult<()> {
        let mut nested = Vec::new();
        while let Some(token) = tokens.next_token() {
            match token {
                "<NestedNnetProto>" => {
                    for path in tokens.list("</NestedNnetProto>")? {
                        nested.push(Nnet::init_from_path(path)?);
                    }
                }
                "<NestedNnetFilename>" => {
                    for path in tokens.list("</NestedNnetFilename>")? {
                        nested.push(Nnet::read_from_path(path)?);
                    }
                }
                _ => return Err(tokens.unexpected(token)),
            }
        }
        self.nested = nested;
        self.check_nested()
            .map_err(|error| tokens.error(error.to_string()))
    }

    fn check_structure(&self) -> Result<(), StructuralError> {
        self.check_nested()
    }

    fn info(&self) -> String {
        self.nested_report(Nnet::info)
    }

    fn info_gradient(&self) -> String {
        self.nested_report(Nnet::info_gradient)
    }

    fn info_propagate(&self) -> String {
        self.nested_report(Nnet::info_propagate)
    }

    fn info_backpropagate(&self) -> String {
        self.nested_report(Nnet::info_backpropagate)
    }
}

impl UpdatableComponent for ParallelComponent {
    fn num_params(&self) -> usize {
        self.nested.iter().map(Nnet::num_params).sum()
    }

    fn params(&self, out: &mut Vec<f32>) {
        for nnet in &self.nested {
            out.extend(nnet.params());
        }
    }

    fn set_params(&mut self, params: &[f32]) -> NnetResult<()> {
        check_param_count(self.num_params(), params.len())?;
        let mut rest = params;
        for nnet in &mut self.nested {
            let (head, tail) = rest.split_at(nnet.num_params());
            nnet.set_params(head)?;
            rest = tail;
        }
        Ok(())
    }

    fn gradient(&self, out: &mut Vec<f32>) {
        for nnet in &self.nested {
            out.extend(nnet.gradient());
        }
    }

    /// The nested gradients of the most recent backward pass.
    fn compute_gradient(&self, input: MatRef<f32>, _output_diff: MatRef<f32>) -> Gradient {
        let mut values = Vec::with_capacity(self.num_params());
        self.gradient(&mut values);
        Gradient::new(values, input.nrows())
    }

    /// Nested networks update themselves during their own backward pass.
    fn apply_gradient(&mut self, gradient: &Gradient) -> NnetResult<()> {
        check_param_count(self.num_params(), gradient.len())
    }

    fn update(&mut self, _input: MatRef<f32>, _output_diff: MatRef<f32>) -> NnetResult<()> {
        Ok(())
    }

    fn train_options(&self) -> &TrainOptions {
        &self.opts
    }

    fn set_train_options(&mut self, opts: &TrainOptions) {
        self.opts = *opts;
        for nnet in &mut self.nested {
            nnet.set_train_options(*opts);
        }
    }
}
