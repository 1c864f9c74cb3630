use std::io::{BufRead, Write};

use faer::{linalg::matmul::matmul, prelude::*};
use rand_distr::{Distribution, Normal};

use crate::{
    MomentStatistics, NnetError, NnetResult, TrainOptions, stream,
    utils::{extend_col, extend_row_major, fill_col, fill_row_major},
};

use super::{
    Component, ComponentKind, Gradient, ProtoTokens, UpdatableComponent, VectorizedWeights,
    check_param_count,
};

/// Fully connected layer, `output = input * linearity^T + bias`.
#[derive(Debug, Clone)]
pub struct AffineTransform {
    /// `output_dim` x `input_dim`.
    linearity: Mat<f32>,
    bias: Col<f32>,
    /// Momentum-smoothed update directions.
    linearity_corr: Mat<f32>,
    bias_corr: Col<f32>,
    learn_rate_coef: f32,
    bias_learn_rate_coef: f32,
    opts: TrainOptions,
}

impl AffineTransform {
    /// Zero weights and bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            linearity: Mat::zeros(output_dim, input_dim),
            bias: Col::zeros(output_dim),
            linearity_corr: Mat::zeros(output_dim, input_dim),
            bias_corr: Col::zeros(output_dim),
            learn_rate_coef: 1.0,
            bias_learn_rate_coef: 1.0,
            opts: TrainOptions::default(),
        }
    }

    pub fn from_parts(linearity: Mat<f32>, bias: Col<f32>) -> NnetResult<Self> {
        check_param_count(linearity.nrows(), bias.nrows())?;
        let mut affine = Self::new(linearity.ncols(), linearity.nrows());
        affine.linearity = linearity;
        affine.bias = bias;
        Ok(affine)
    }

    pub fn linearity(&self) -> MatRef<'_, f32> {
        self.linearity.as_ref()
    }

    pub fn bias(&self) -> ColRef<'_, f32> {
        self.bias.as_ref()
    }

    pub fn learn_rate_coef(&self) -> f32 {
        self.learn_rate_coef
    }

    pub fn bias_learn_rate_coef(&self) -> f32 {
        self.bias_learn_rate_coef
    }

    pub fn set_learn_rate_coefs(&mut self, learn_rate_coef: f32, bias_learn_rate_coef: f32) {
        self.learn_rate_coef = learn_rate_coef;
        self.bias_learn_rate_coef = bias_learn_rate_coef;
    }

    fn linearity_len(&self) -> usize {
        self.linearity.nrows() * self.linearity.ncols()
    }
}

/// Appends `output_diff^T * input`, row-major.
pub(super) fn linearity_gradient(
    input: MatRef<f32>,
    output_diff: MatRef<f32>,
    out: &mut Vec<f32>,
) {
    let mut grad = Mat::<f32>::zeros(output_diff.ncols(), input.ncols());
    // grad = diff^T * input;
    matmul(
        grad.as_mut(),
        faer::Accum::Replace,
        output_diff.transpose(),
        input,
        1.0,
        Par::Seq,
    );
    extend_row_major(out, grad.as_ref());
}

/// Momentum, L2 and L1 regularization, then the step itself.
pub(super) fn update_linearity(
    mut linearity: MatMut<f32>,
    mut corr: MatMut<f32>,
    grad: &[f32],
    opts: &TrainOptions,
    learn_rate: f32,
    frames: f32,
) {
    let (nrows, ncols) = (linearity.nrows(), linearity.ncols());
    debug_assert!(grad.len() == nrows * ncols);
    for i in 0..nrows {
        for j in 0..ncols {
            corr[(i, j)] = opts.momentum * corr[(i, j)] + grad[i * ncols + j];
        }
    }
    if opts.l2_penalty != 0.0 {
        let decay = 1.0 - learn_rate * opts.l2_penalty * frames;
        for i in 0..nrows {
            for j in 0..ncols {
                linearity[(i, j)] *= decay;
            }
        }
    }
    if opts.l1_penalty != 0.0 {
        let l1 = learn_rate * opts.l1_penalty * frames;
        for i in 0..nrows {
            for j in 0..ncols {
                let w = linearity[(i, j)];
                if w == 0.0 {
                    continue;
                }
                let l1_signed = if w > 0.0 { l1 } else { -l1 };
                let after = w - learn_rate * corr[(i, j)] - l1_signed;
                // Crossing zero clamps the weight to zero and drops its update.
                if (after > 0.0) != (w > 0.0) {
                    linearity[(i, j)] = 0.0;
                    corr[(i, j)] = 0.0;
                } else {
                    linearity[(i, j)] -= l1_signed;
                }
            }
        }
    }
    for i in 0..nrows {
        for j in 0..ncols {
            linearity[(i, j)] -= learn_rate * corr[(i, j)];
        }
    }
}

/// Gaussian weights with standard deviation `stddev`.
pub(super) fn random_linearity(
    output_dim: usize,
    input_dim: usize,
    stddev: f32,
    tokens: &ProtoTokens,
) -> NnetResult<Mat<f32>> {
    let normal = Normal::new(0.0f32, stddev)
        .map_err(|error| tokens.error(format!("<ParamStddev> {stddev}: {error}")))?;
    let mut rng = rand::rng();
    Ok(Mat::from_fn(output_dim, input_dim, |_, _| {
        normal.sample(&mut rng)
    }))
}

pub(super) fn unknown_data_token(kind: ComponentKind, token: &str) -> NnetError {
    NnetError::stream(format!("unknown token {token} in {kind}"))
}

impl Component for AffineTransform {
    fn kind(&self) -> ComponentKind {
        ComponentKind::AffineTransform
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

    fn propagate_fnc(&mut self, input: MatRef<f32>, mut output: MatMut<f32>) -> NnetResult<()> {
        // output = input * W^T;
        matmul(
            output.rb_mut(),
            faer::Accum::Replace,
            input,
            self.linearity.as_ref().transpose(),
            1.0,
            Par::Seq,
        );
        // output += b;
        for i in 0..output.nrows() {
            for j in 0..output.ncols() {
                output[(i, j)] += self.bias[j];
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
        // input_diff = output_diff * W;
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

    fn as_vectorized(&self) -> Option<&dyn VectorizedWeights> {
        Some(self)
    }

    fn as_vectorized_mut(&mut self) -> Option<&mut dyn VectorizedWeights> {
        Some(self)
    }

    fn write_data(&self, w: &mut dyn Write, binary: bool) -> NnetResult<()> {
        stream::write_token(w, binary, "<LearnRateCoef>")?;
        stream::write_f32(w, binary, self.learn_rate_coef)?;
        stream::write_token(w, binary, "<BiasLearnRateCoef>")?;
        stream::write_f32(w, binary, self.bias_learn_rate_coef)?;
        stream::write_matrix(w, binary, self.linearity.as_ref())?;
        stream::write_vector(w, binary, &self.params_bias())
    }

    fn read_data(&mut self, r: &mut dyn BufRead, binary: bool) -> NnetResult<()> {
        while stream::peek_is_token(r, binary)? {
            let token = stream::read_token(r, binary)?;
            match token.as_str() {
                "<LearnRateCoef>" => self.learn_rate_coef = stream::read_f32(r, binary)?,
                "<BiasLearnRateCoef>" => {
                    self.bias_learn_rate_coef = stream::read_f32(r, binary)?
                }
                _ => return Err(unknown_data_token(self.kind(), &token)),
            }
        }
        let (output_dim, input_dim) = (self.output_dim(), self.input_dim());
        self.linearity = stream::read_matrix(r, binary, output_dim, input_dim)?;
        let bias = stream::read_vector(r, binary, output_dim)?;
        fill_col(self.bias.as_mut(), &bias);
        self.linearity_corr = Mat::zeros(output_dim, input_dim);
        self.bias_corr = Col::zeros(output_dim);
        Ok(())
    }

    fn init_data(&mut self, tokens: &mut ProtoTokens) -> NnetResult<()> {
        let mut param_stddev = 0.1f32;
        let mut bias_mean = -2.0f32;
        let mut bias_range = 2.0f32;
        while let Some(token) = tokens.next_token() {
            match token {
                "<ParamStddev>" => param_stddev = tokens.value(token)?,
                "<BiasMean>" => bias_mean = tokens.value(token)?,
                "<BiasRange>" => bias_range = tokens.value(token)?,
                "<LearnRateCoef>" => self.learn_rate_coef = tokens.value(token)?,
                "<BiasLearnRateCoef>" => self.bias_learn_rate_coef = tokens.value(token)?,
                _ => return Err(tokens.unexpected(token)),
            }
        }
        self.linearity =
            random_linearity(self.output_dim(), self.input_dim(), param_stddev, tokens)?;
        self.bias = Col::from_fn(self.output_dim(), |_| {
            bias_mean + (rand::random::<f32>() - 0.5) * bias_range
        });
        Ok(())
    }

    fn info(&self) -> String {
        format!(
            "\n  linearity {}\n  bias {}",
            MomentStatistics::from_mat(self.linearity.as_ref()),
            MomentStatistics::from_col(self.bias.as_ref()),
        )
    }

    fn info_gradient(&self) -> String {
        format!(
            "\n  linearity_grad {}, lr-coef {}\n  bias_grad {}, lr-coef {}",
            MomentStatistics::from_mat(self.linearity_corr.as_ref()),
            self.learn_rate_coef,
            MomentStatistics::from_col(self.bias_corr.as_ref()),
            self.bias_learn_rate_coef,
        )
    }
}

impl AffineTransform {
    fn params_bias(&self) -> Vec<f32> {
        let mut bias = Vec::with_capacity(self.bias.nrows());
        extend_col(&mut bias, self.bias.as_ref());
        bias
    }

    fn set_flat(&mut self, values: &[f32]) -> NnetResult<()> {
        check_param_count(self.linearity_len() + self.bias.nrows(), values.len())?;
        let (linearity, bias) = values.split_at(self.linearity_len());
        fill_row_major(self.linearity.as_mut(), linearity);
        fill_col(self.bias.as_mut(), bias);
        Ok(())
    }

    fn extend_flat(&self, out: &mut Vec<f32>) {
        extend_row_major(out, self.linearity.as_ref());
        extend_col(out, self.bias.as_ref());
    }
}

impl UpdatableComponent for AffineTransform {
    fn num_params(&self) -> usize {
        self.linearity_len() + self.bias.nrows()
    }

    fn params(&self, out: &mut Vec<f32>) {
        self.extend_flat(out);
    }

    fn set_params(&mut self, params: &[f32]) -> NnetResult<()> {
        self.set_flat(params)
    }

    fn gradient(&self, out: &mut Vec<f32>) {
        extend_row_major(out, self.linearity_corr.as_ref());
        extend_col(out, self.bias_corr.as_ref());
    }

    fn compute_gradient(&self, input: MatRef<f32>, output_diff: MatRef<f32>) -> Gradient {
        let mut values = Vec::with_capacity(self.num_params());
        linearity_gradient(input, output_diff, &mut values);
        // db = column sums of diff;
        values.extend((0..output_diff.ncols()).map(|j| {
            (0..output_diff.nrows())
                .map(|i| output_diff[(i, j)])
                .sum::<f32>()
        }));
        Gradient::new(values, input.nrows())
    }

    fn apply_gradient(&mut self, gradient: &Gradient) -> NnetResult<()> {
        check_param_count(self.num_params(), gradient.len())?;
        let learn_rate = self.opts.learn_rate * self.learn_rate_coef;
        let bias_learn_rate = self.opts.learn_rate * self.bias_learn_rate_coef;
        let (linearity_grad, bias_grad) = gradient.split_at(self.linearity_len());
        update_linearity(
            self.linearity.as_mut(),
            self.linearity_corr.as_mut(),
            linearity_grad,
            &self.opts,
            learn_rate,
            gradient.frames() as f32,
        );
        for (i, &db) in bias_grad.iter().enumerate() {
            self.bias_corr[i] = self.opts.momentum * self.bias_corr[i] + db;
            self.bias[i] -= bias_learn_rate * self.bias_corr[i];
        }
        Ok(())
    }

    fn train_options(&self) -> &TrainOptions {
        &self.opts
    }

    fn set_train_options(&mut self, opts: &TrainOptions) {
        self.opts = *opts;
    }
}

impl VectorizedWeights for AffineTransform {
    fn weights_len(&self) -> usize {
        self.linearity_len() + self.bias.nrows()
    }

    fn weights(&self, out: &mut Vec<f32>) {
        self.extend_flat(out);
    }

    fn set_weights(&mut self, weights: &[f32]) -> NnetResult<()> {
        self.set_flat(weights)
    }
}
