//! Layers a network is built from, and the factories that create them from streams and
//! prototype lines.

mod affine;
mod dropout;
mod linear;
mod nonlinearity;
mod parallel;
mod softmax;

pub use affine::*;
pub use dropout::*;
pub use linear::*;
pub use nonlinearity::*;
pub use parallel::*;
pub use softmax::*;

pub(crate) use dropout::check_retention;

use std::{
    fmt::{self, Debug, Display},
    io::{BufRead, Write},
    str::{FromStr, SplitWhitespace},
};

use derive_more::{Deref, DerefMut};
use faer::prelude::*;

use crate::{
    NnetError, NnetResult, StructuralError, TrainOptions, stream,
    utils::resize_mat,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    AffineTransform,
    LinearTransform,
    Sigmoid,
    Tanh,
    Softmax,
    Dropout,
    ParallelComponent,
}

impl ComponentKind {
    pub const ALL: [Self; 7] = [
        Self::AffineTransform,
        Self::LinearTransform,
        Self::Sigmoid,
        Self::Tanh,
        Self::Softmax,
        Self::Dropout,
        Self::ParallelComponent,
    ];

    /// The token that opens a component record, e.g. `<AffineTransform>`.
    pub fn marker(self) -> &'static str {
        match self {
            Self::AffineTransform => "<AffineTransform>",
            Self::LinearTransform => "<LinearTransform>",
            Self::Sigmoid => "<Sigmoid>",
            Self::Tanh => "<Tanh>",
            Self::Softmax => "<Softmax>",
            Self::Dropout => "<Dropout>",
            Self::ParallelComponent => "<ParallelComponent>",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.marker() == marker)
    }

    /// Creates a component of this kind with default contents.
    pub fn new_component(
        self,
        input_dim: usize,
        output_dim: usize,
    ) -> NnetResult<Box<dyn Component>> {
        let same_dims = || match input_dim == output_dim {
            true => Ok(input_dim),
            false => Err(StructuralError::ComponentDims {
                kind: self,
                input_dim,
                output_dim,
            }),
        };
        Ok(match self {
            Self::AffineTransform => Box::new(AffineTransform::new(input_dim, output_dim)),
            Self::LinearTransform => Box::new(LinearTransform::new(input_dim, output_dim)),
            Self::Sigmoid => Box::new(Nonlinearity::sigmoid(same_dims()?)),
            Self::Tanh => Box::new(Nonlinearity::tanh(same_dims()?)),
            Self::Softmax => Box::new(Softmax::new(same_dims()?)),
            Self::Dropout => Box::new(Dropout::new(same_dims()?)),
            Self::ParallelComponent => {
                Box::new(ParallelComponent::unfilled(input_dim, output_dim))
            }
        })
    }
}

impl Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// A layer of a network.
///
/// Matrices hold one frame per row. Implementors provide `propagate_fnc` and
/// `backpropagate_fnc`, which may assume the shapes have been checked and the output matrix has
/// been sized; callers go through `propagate` and `backpropagate`.
pub trait Component: Send + Debug {
    fn kind(&self) -> ComponentKind;

    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// Deep copy.
    fn duplicate(&self) -> Box<dyn Component>;

    fn propagate_fnc(&mut self, input: MatRef<f32>, output: MatMut<f32>) -> NnetResult<()>;

    fn backpropagate_fnc(
        &mut self,
        input: MatRef<f32>,
        output: MatRef<f32>,
        output_diff: MatRef<f32>,
        input_diff: MatMut<f32>,
    ) -> NnetResult<()>;

    fn propagate(&mut self, input: MatRef<f32>, output: &mut Mat<f32>) -> NnetResult<()> {
        if input.ncols() != self.input_dim() {
            return Err(StructuralError::InputDim {
                kind: self.kind(),
                expected: self.input_dim(),
                actual: input.ncols(),
            }
            .into());
        }
        resize_mat(output, input.nrows(), self.output_dim());
        self.propagate_fnc(input, output.as_mut())
    }

    fn backpropagate(
        &mut self,
        input: MatRef<f32>,
        output: MatRef<f32>,
        output_diff: MatRef<f32>,
        input_diff: &mut Mat<f32>,
    ) -> NnetResult<()> {
        if output_diff.ncols() != self.output_dim() {
            return Err(StructuralError::DiffDim {
                kind: self.kind(),
                expected: self.output_dim(),
                actual: output_diff.ncols(),
            }
            .into());
        }
        if output_diff.nrows() != input.nrows() || output.nrows() != input.nrows() {
            return Err(StructuralError::FrameCount {
                kind: self.kind(),
                input_rows: input.nrows(),
                diff_rows: output_diff.nrows(),
            }
            .into());
        }
        resize_mat(input_diff, input.nrows(), self.input_dim());
        self.backpropagate_fnc(input, output, output_diff, input_diff.as_mut())
    }

    /// Consistency of whatever the component holds beyond its own dims.
    fn check_structure(&self) -> Result<(), StructuralError> {
        Ok(())
    }

    fn is_updatable(&self) -> bool {
        self.as_updatable().is_some()
    }

    fn as_updatable(&self) -> Option<&dyn UpdatableComponent> {
        None
    }

    fn as_updatable_mut(&mut self) -> Option<&mut dyn UpdatableComponent> {
        None
    }

    fn as_vectorized(&self) -> Option<&dyn VectorizedWeights> {
        None
    }

    fn as_vectorized_mut(&mut self) -> Option<&mut dyn VectorizedWeights> {
        None
    }

    fn as_dropout_mut(&mut self) -> Option<&mut Dropout> {
        None
    }

    /// Writes the kind-specific part of the record.
    fn write_data(&self, _w: &mut dyn Write, _binary: bool) -> NnetResult<()> {
        Ok(())
    }

    /// Reads the kind-specific part of the record.
    fn read_data(&mut self, _r: &mut dyn BufRead, _binary: bool) -> NnetResult<()> {
        Ok(())
    }

    /// Consumes the kind-specific `<Key> value` pairs of a prototype line.
    fn init_data(&mut self, tokens: &mut ProtoTokens) -> NnetResult<()> {
        match tokens.next_token() {
            Some(token) => Err(tokens.unexpected(token)),
            None => Ok(()),
        }
    }

    fn info(&self) -> String {
        String::new()
    }

    fn info_gradient(&self) -> String {
        String::new()
    }

    /// Buffer statistics of nested networks, if any.
    fn info_propagate(&self) -> String {
        String::new()
    }

    fn info_backpropagate(&self) -> String {
        String::new()
    }
}

/// A component with trainable parameters.
pub trait UpdatableComponent {
    fn num_params(&self) -> usize;

    /// Appends the parameters to `out`.
    fn params(&self, out: &mut Vec<f32>);

    /// `params.len()` must equal `num_params()`.
    fn set_params(&mut self, params: &[f32]) -> NnetResult<()>;

    /// Appends the most recent update direction to `out`, laid out like `params`.
    fn gradient(&self, out: &mut Vec<f32>);

    /// Gradient of the parameters given the input and the output gradient of a pass.
    /// Does not touch the parameters.
    fn compute_gradient(&self, input: MatRef<f32>, output_diff: MatRef<f32>) -> Gradient;

    /// Updates the parameters from a gradient under the current training options.
    /// A gradient whose length is not `num_params` is rejected before anything changes.
    fn apply_gradient(&mut self, gradient: &Gradient) -> NnetResult<()>;

    fn update(&mut self, input: MatRef<f32>, output_diff: MatRef<f32>) -> NnetResult<()> {
        let gradient = self.compute_gradient(input, output_diff);
        self.apply_gradient(&gradient)
    }

    fn train_options(&self) -> &TrainOptions;

    fn set_train_options(&mut self, opts: &TrainOptions);
}

/// Weights as one row-major weight matrix followed by the bias.
pub trait VectorizedWeights {
    fn weights_len(&self) -> usize;

    /// Appends the weights to `out`.
    fn weights(&self, out: &mut Vec<f32>);

    /// `weights.len()` must equal `weights_len()`.
    fn set_weights(&mut self, weights: &[f32]) -> NnetResult<()>;
}

/// Flat gradient of one updatable component, and the number of frames it was summed over.
#[derive(Debug, Clone, PartialEq, Deref, DerefMut)]
pub struct Gradient {
    #[deref]
    #[deref_mut]
    values: Vec<f32>,
    frames: usize,
}

impl Gradient {
    pub fn new(values: Vec<f32>, frames: usize) -> Self {
        Self { values, frames }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

pub(crate) fn check_param_count(expected: usize, actual: usize) -> NnetResult<()> {
    match expected == actual {
        true => Ok(()),
        false => Err(StructuralError::ParamCount { expected, actual }.into()),
    }
}

/// Whitespace-separated tokens of one prototype line.
pub struct ProtoTokens<'a> {
    line: &'a str,
    tokens: SplitWhitespace<'a>,
}

impl<'a> ProtoTokens<'a> {
    pub fn new(line: &'a str) -> Self {
        Self {
            line,
            tokens: line.split_whitespace(),
        }
    }

    pub fn line(&self) -> &'a str {
        self.line
    }

    pub fn next_token(&mut self) -> Option<&'a str> {
        self.tokens.next()
    }

    /// Parses the value following `key`.
    pub fn value<T: FromStr>(&mut self, key: &str) -> NnetResult<T> {
        let token = self
            .next_token()
            .ok_or_else(|| self.error(format!("missing value for {key}")))?;
        token
            .parse()
            .map_err(|_| self.error(format!("invalid value {token:?} for {key}")))
    }

    /// Collects tokens up to the closing `terminator`.
    pub fn list(&mut self, terminator: &str) -> NnetResult<Vec<&'a str>> {
        let mut items = Vec::new();
        loop {
            match self.next_token() {
                Some(token) if token == terminator => return Ok(items),
                Some(token) => items.push(token),
                None => return Err(self.error(format!("missing {terminator}"))),
            }
        }
    }

    pub fn error(&self, reason: impl Into<String>) -> NnetError {
        NnetError::proto(self.line, reason)
    }

    pub fn unexpected(&self, token: &str) -> NnetError {
        self.error(format!("unknown token {token}"))
    }
}

/// Writes one component record: marker, output dim, input dim, data.
pub fn write_component(
    component: &dyn Component,
    w: &mut dyn Write,
    binary: bool,
) -> NnetResult<()> {
    stream::write_token(w, binary, component.kind().marker())?;
    stream::write_dim(w, binary, component.output_dim())?;
    stream::write_dim(w, binary, component.input_dim())?;
    stream::write_newline(w, binary)?;
    component.write_data(w, binary)
}

/// Reads the rest of a component record whose marker has already been consumed.
pub fn read_component(
    kind: ComponentKind,
    r: &mut dyn BufRead,
    binary: bool,
) -> NnetResult<Box<dyn Component>> {
    let output_dim = stream::read_dim(r, binary)?;
    let input_dim = stream::read_dim(r, binary)?;
    let mut component = kind
        .new_component(input_dim, output_dim)
        .map_err(|error| NnetError::stream(format!("{kind}: {error}")))?;
    component.read_data(r, binary)?;
    Ok(component)
}

/// Creates a component from a prototype line,
/// `<Marker> <InputDim> N <OutputDim> M [<Key> value]...`.
pub fn init_component(line: &str) -> NnetResult<Box<dyn Component>> {
    let mut tokens = ProtoTokens::new(line);
    let marker = tokens
        .next_token()
        .ok_or_else(|| tokens.error("empty line"))?;
    let kind = ComponentKind::from_marker(marker)
        .ok_or_else(|| tokens.error(format!("unknown component marker {marker}")))?;
    let mut input_dim = None;
    let mut output_dim = None;
    let (input_dim, output_dim) = loop {
        if let (Some(input_dim), Some(output_dim)) = (input_dim, output_dim) {
            break (input_dim, output_dim);
        }
        match tokens.next_token() {
            Some("<InputDim>") => input_dim = Some(tokens.value::<usize>("<InputDim>")?),
            Some("<OutputDim>") => output_dim = Some(tokens.value::<usize>("<OutputDim>")?),
            Some(token) => return Err(tokens.unexpected(token)),
            None => return Err(tokens.error("missing <InputDim> or <OutputDim>")),
        }
    };
    let mut component = kind
        .new_component(input_dim, output_dim)
        .map_err(|error| tokens.error(error.to_string()))?;
    component.init_data(&mut tokens)?;
    Ok(component)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_round_trip() {
        for kind in ComponentKind::ALL {
            assert_eq!(ComponentKind::from_marker(kind.marker()), Some(kind));
            assert_eq!(kind.to_string(), kind.marker());
        }
        assert_eq!(ComponentKind::from_marker("<Nnet>"), None);
    }

    #[test]
    fn activations_require_equal_dims() {
        let err = ComponentKind::Sigmoid.new_component(3, 4).unwrap_err();
        assert!(matches!(
            err,
            NnetError::Structural(StructuralError::ComponentDims { .. })
        ));
    }

    #[test]
    fn proto_dims_in_any_order() {
        let c = init_component("<Sigmoid> <OutputDim> 4 <InputDim> 4").unwrap();
        assert_eq!((c.kind(), c.input_dim(), c.output_dim()), (ComponentKind::Sigmoid, 4, 4));
    }

    #[test]
    fn proto_errors_name_the_line() {
        for line in [
            "<Bogus> <InputDim> 2 <OutputDim> 2",
            "<Softmax> <InputDim> 2",
            "<Softmax> <InputDim> two <OutputDim> 2",
            "<Softmax> <InputDim> 2 <OutputDim> 2 <ParamStddev> 0.1",
        ] {
            let err = init_component(line).unwrap_err();
            let NnetError::Proto { line: reported, .. } = err else {
                panic!("{line}: {err}");
            };
            assert_eq!(reported, line);
        }
    }

    #[test]
    fn propagate_rejects_wrong_input_dim() {
        let mut c = ComponentKind::Tanh.new_component(3, 3).unwrap();
        let mut out = Mat::zeros(0, 0);
        let err = c.propagate(Mat::<f32>::zeros(2, 4).as_ref(), &mut out).unwrap_err();
        assert!(matches!(
            err,
            NnetError::Structural(StructuralError::InputDim { expected: 3, actual: 4, .. })
        ));
    }
}
