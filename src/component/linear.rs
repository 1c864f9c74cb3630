use std::io::{BufRead, Write};

use faer::{linalg::matmul::matmul, prelude::*};

use crate::{
    MomentStatistics, NnetResult, TrainOptions, stream,
    utils::{extend_row_major, fill_row_major},
};

use super::{
    Component, ComponentKind, Gradient, ProtoTokens, UpdatableComponent,
    affine::{linearity_gradient, random_linearity, unknown_data_token, update_linearity},
    check_param_count,
};

/// Fully connected layer without bias.
#[derive(Debug, Clone)]
pub struct LinearTransform {
    linearity: Mat<f32>,
    linearity_corr: Mat<f32>,
    learn_rate_coef: f32,
    opts: TrainOptions,
}

impl LinearTransform {
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            linearity: Mat::zeros(output_dim, input_dim),
            linearity_corr: Mat::zeros(output_dim, input_dim),
            learn_rate_coef: 1.0,
            opts: TrainOptions::default(),
        }
    }

    pub fn from_linearity(linearity: Mat<f32>) -> Self {
        let mut linear = Self::new(linearity.ncols(), linearity.nrows());
        linear.linearity = linearity;
        linear
    }

    pub fn linearity(&self) -> MatRef<'_, f32> {
        self.linearity.as_ref()
    }
}

impl Component for LinearTransform {
    fn kind(&self) -> ComponentKind {
        ComponentKind::LinearTransform
    }

    fn input_dim(&self) -> usize {
        self.linearity.ncols()
    }

    fn output_dim(&self) -> usize {
        self.linearity.nrows()
    }

    fn duplicate(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }

    fn propagate_fnc(&mut self, input: MatRef<f32>, output: MatMut<f32>) -> NnetResult<()> {
        matmul(
            output,
            faer::Accum::Replace,
            input,
            self.linearity.as_ref().transpose(),
            1.0,
            Par::Seq,
        );
        Ok(())
    }

    fn backpropagate_fnc(
        &mut self,
        _input: MatRef<f32>,
        _output: MatRef<f32>,
        output_diff: MatRef<f32>,
        input_diff: MatMut<f32>,
    ) -> NnetResult<()> {
        matmul(
            input_diff,
            faer::Accum::Replace,
            output_diff,
            self.linearity.as_ref(),
            1.0,
            Par::Seq,
        );
        Ok(())
    }

    fn as_updatable(&self) -> Option<&dyn UpdatableComponent> {
        Some(self)
    }

    fn as_updatable_mut(&mut self) -> Option<&mut dyn UpdatableComponent> {
        Some(self)
    }

    fn write_data(&self, w: &mut dyn Write, binary: bool) -> NnetResult<()> {
        stream::write_token(w, binary, "<LearnRateCoef>")?;
        stream::write_f32(w, binary, self.learn_rate_coef)?;
        stream::write_matrix(w, binary, self.linearity.as_ref())
    }

    fn read_data(&mut self, r: &mut dyn BufRead, binary: bool) -> NnetResult<()> {
        while stream::peek_is_token(r, binary)? {
            let token = stream::read_token(r, binary)?;
            match token.as_str() {
                "<LearnRateCoef>" => self.learn_rate_coef = stream::read_f32(r, binary)?,
                _ => return Err(unknown_data_token(self.kind(), &token)),
            }
        }
        let (output_dim, input_dim) = (self.output_dim(), self.input_dim());
        self.linearity = stream::read_matrix(r, binary, output_dim, input_dim)?;
        self.linearity_corr = Mat::zeros(output_dim, input_dim);
        Ok(())
    }

    fn init_data(&mut self, tokens: &mut ProtoTokens) -> NnetResult<()> {
        let mut param_stddev = 0.1f32;
        while let Some(token) = tokens.next_token() {
            match token {
                "<ParamStddev>" => param_stddev = tokens.value(token)?,
                "<LearnRateCoef>" => self.learn_rate_coef = tokens.value(token)?,
                _ => return Err(tokens.unexpected(token)),
            }
        }
        self.linearity =
            random_linearity(self.output_dim(), self.input_dim(), param_stddev, tokens)?;
        Ok(())
    }

    fn info(&self) -> String {
        format!(
            "\n  linearity {}",
            MomentStatistics::from_mat(self.linearity.as_ref())
        )
    }

    fn info_gradient(&self) -> String {
        format!(
            "\n  linearity_grad {}, lr-coef {}",
            MomentStatistics::from_mat(self.linearity_corr.as_ref()),
            self.learn_rate_coef,
        )
    }
}

impl UpdatableComponent for LinearTransform {
    fn num_params(&self) -> usize {
        self.linearity.nrows() * self.linearity.ncols()
    }

    fn params(&self, out: &mut Vec<f32>) {
        extend_row_major(out, self.linearity.as_ref());
    }

    fn set_params(&mut self, params: &[f32]) -> NnetResult<()> {
        check_param_count(self.num_params(), params.len())?;
        fill_row_major(self.linearity.as_mut(), params);
        Ok(())
    }

    fn gradient(&self, out: &mut Vec<f32>) {
        extend_row_major(out, self.linearity_corr.as_ref());
    }

    fn compute_gradient(&self, input: MatRef<f32>, output_diff: MatRef<f32>) -> Gradient {
        let mut values = Vec::with_capacity(self.num_params());
        linearity_gradient(input, output_diff, &mut values);
        Gradient::new(values, input.nrows())
    }

    fn apply_gradient(&mut self, gradient: &Gradient) -> NnetResult<()> {
        check_param_count(self.num_params(), gradient.len())?;
        update_linearity(
            self.linearity.as_mut(),
            self.linearity_corr.as_mut(),
            gradient,
            &self.opts,
            self.opts.learn_rate * self.learn_rate_coef,
            gradient.frames() as f32,
        );
        Ok(())
    }

    fn train_options(&self) -> &TrainOptions {
        &self.opts
    }

    fn set_train_options(&mut self, opts: &TrainOptions) {
        self.opts = *opts;
    }
}
