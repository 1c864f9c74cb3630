use std::io::{BufRead, Write};

use faer::prelude::*;
use rand::Rng;

use crate::{NnetError, NnetResult, StructuralError, stream, utils::resize_mat};

use super::{Component, ComponentKind, ProtoTokens};

/// Zeroes each activation with probability `1 - retention` and scales the survivors by
/// `1 / retention`.
#[derive(Debug, Clone)]
pub struct Dropout {
    dim: usize,
    retention: f32,
    /// Mask of the most recent forward pass.
    mask: Mat<f32>,
}

pub(crate) fn check_retention(retention: f32) -> NnetResult<f32> {
    match retention > 0.0 && retention <= 1.0 {
        true => Ok(retention),
        false => Err(NnetError::InvalidRetention(retention)),
    }
}

impl Dropout {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            retention: 0.5,
            mask: Mat::zeros(0, 0),
        }
    }

    pub fn retention(&self) -> f32 {
        self.retention
    }

    pub fn set_retention(&mut self, retention: f32) -> NnetResult<()> {
        self.retention = check_retention(retention)?;
        Ok(())
    }
}

impl Component for Dropout {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Dropout
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
        resize_mat(&mut self.mask, input.nrows(), input.ncols());
        let scale = 1.0 / self.retention;
        let mut rng = rand::rng();
        for i in 0..input.nrows() {
            for j in 0..input.ncols() {
                let keep = rng.random::<f32>() < self.retention;
                self.mask[(i, j)] = if keep { scale } else { 0.0 };
                output[(i, j)] = input[(i, j)] * self.mask[(i, j)];
            }
        }
        Ok(())
    }

    fn backpropagate_fnc(
        &mut self,
        input: MatRef<f32>,
        _output: MatRef<f32>,
        output_diff: MatRef<f32>,
        mut input_diff: MatMut<f32>,
    ) -> NnetResult<()> {
        if self.mask.nrows() != output_diff.nrows() {
            return Err(StructuralError::FrameCount {
                kind: self.kind(),
                input_rows: self.mask.nrows(),
                diff_rows: output_diff.nrows(),
            }
            .into());
        }
        for i in 0..input.nrows() {
            for j in 0..input.ncols() {
                input_diff[(i, j)] = output_diff[(i, j)] * self.mask[(i, j)];
            }
        }
        Ok(())
    }

    fn as_dropout_mut(&mut self) -> Option<&mut Dropout> {
        Some(self)
    }

    fn write_data(&self, w: &mut dyn Write, binary: bool) -> NnetResult<()> {
        stream::write_token(w, binary, "<DropoutRetention>")?;
        stream::write_f32(w, binary, self.retention)?;
        stream::write_newline(w, binary)
    }

    fn read_data(&mut self, r: &mut dyn BufRead, binary: bool) -> NnetResult<()> {
        stream::expect_token(r, binary, "<DropoutRetention>")?;
        let retention = stream::read_f32(r, binary)?;
        self.retention =
            check_retention(retention).map_err(|error| NnetError::stream(error.to_string()))?;
        Ok(())
    }

    fn init_data(&mut self, tokens: &mut ProtoTokens) -> NnetResult<()> {
        while let Some(token) = tokens.next_token() {
            match token {
                "<DropoutRetention>" => {
                    let retention = tokens.value(token)?;
                    self.retention = check_retention(retention)
                        .map_err(|error| tokens.error(error.to_string()))?;
                }
                _ => return Err(tokens.unexpected(token)),
            }
        }
        Ok(())
    }

    fn info(&self) -> String {
        format!("dropout-retention {}", self.retention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_is_zero_or_scaled() {
        let mut dropout = Dropout::new(50);
        dropout.set_retention(0.25).unwrap();
        let input = Mat::from_fn(4, 50, |_, _| 1.0f32);
        let mut output = Mat::zeros(0, 0);
        dropout.propagate(input.as_ref(), &mut output).unwrap();
        for i in 0..4 {
            for j in 0..50 {
                assert!(output[(i, j)] == 0.0 || output[(i, j)] == 4.0);
            }
        }
        let mut input_diff = Mat::zeros(0, 0);
        dropout
            .backpropagate(input.as_ref(), output.as_ref(), input.as_ref(), &mut input_diff)
            .unwrap();
        assert_eq!(input_diff, output);
    }

    #[test]
    fn full_retention_is_identity() {
        let mut dropout = Dropout::new(3);
        dropout.set_retention(1.0).unwrap();
        let input = Mat::from_fn(2, 3, |i, j| (i * 3 + j) as f32);
        let mut output = Mat::zeros(0, 0);
        dropout.propagate(input.as_ref(), &mut output).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn retention_out_of_range_is_rejected() {
        let mut dropout = Dropout::new(3);
        assert!(matches!(
            dropout.set_retention(0.0),
            Err(NnetError::InvalidRetention(_))
        ));
        assert!(dropout.set_retention(1.5).is_err());
        assert_eq!(dropout.retention(), 0.5);
    }
}
