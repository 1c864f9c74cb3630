use approx::assert_relative_eq;
use faer::prelude::*;

use nnet::{
    AffineTransform, Component, ComponentKind, Divergence, Dropout, LinearTransform, Nnet,
    NnetError, Nonlinearity, ParallelComponent, Softmax, StructuralError, TrainOptions,
};

fn row(values: &[f32]) -> Mat<f32> {
    Mat::from_fn(1, values.len(), |_, j| values[j])
}

fn row_values(mat: MatRef<f32>) -> Vec<f32> {
    (0..mat.ncols()).map(|j| mat[(0, j)]).collect()
}

/// `out_j = in_j` for the first two inputs of three.
fn selector() -> AffineTransform {
    let linearity = Mat::from_fn(2, 3, |i, j| if i == j { 1.0 } else { 0.0 });
    AffineTransform::from_parts(linearity, Col::zeros(2)).unwrap()
}

fn small_nnet() -> Nnet {
    Nnet::from_components([
        Box::new(AffineTransform::new(3, 4)) as Box<dyn Component>,
        Box::new(Nonlinearity::sigmoid(4)),
        Box::new(AffineTransform::new(4, 2)),
        Box::new(Softmax::new(2)),
    ])
    .unwrap()
}

fn random_nnet() -> Nnet {
    Nnet::init_from_str(
        "<NnetProto>
         <AffineTransform> <InputDim> 3 <OutputDim> 4 <ParamStddev> 0.5 <BiasMean> 0 <BiasRange> 1
         <Tanh> <InputDim> 4 <OutputDim> 4
         <AffineTransform> <InputDim> 4 <OutputDim> 2
         <Softmax> <InputDim> 2 <OutputDim> 2
         </NnetProto>",
    )
    .unwrap()
}

fn boundary_counts(nnet: &Nnet) -> usize {
    (0..).take_while(|&i| nnet.boundary(i).is_some()).count()
}

#[test]
fn buffers_follow_component_count() {
    let mut nnet = Nnet::new();
    assert_eq!(boundary_counts(&nnet), 1);
    nnet.append_component(Box::new(AffineTransform::new(3, 4)))
        .unwrap();
    nnet.append_component(Box::new(Nonlinearity::tanh(4)))
        .unwrap();
    assert_eq!(boundary_counts(&nnet), 3);
    nnet.remove_component(1).unwrap();
    assert_eq!(boundary_counts(&nnet), 2);
    nnet.clear();
    assert_eq!(boundary_counts(&nnet), 1);
    assert_eq!((nnet.input_dim(), nnet.output_dim()), (None, None));
}

#[test]
fn append_rejects_mismatched_dims() {
    let mut nnet = Nnet::new();
    nnet.append_component(Box::new(AffineTransform::new(3, 5)))
        .unwrap();
    let err = nnet
        .append_component(Box::new(Nonlinearity::sigmoid(4)))
        .unwrap_err();
    assert!(matches!(
        err,
        NnetError::Structural(StructuralError::DimensionMismatch {
            index: 0,
            output_dim: 5,
            input_dim: 4,
        })
    ));
}

#[test]
fn component_index_out_of_range() {
    let mut nnet = small_nnet();
    assert!(nnet.component(3).is_ok());
    assert!(matches!(
        nnet.component(4),
        Err(NnetError::Structural(StructuralError::IndexOutOfRange { .. }))
    ));
    assert!(nnet.remove_component(9).is_err());
    assert!(
        nnet.set_component(9, Box::new(Softmax::new(2)))
            .is_err()
    );
}

#[test]
fn set_component_replaces() {
    let mut nnet = small_nnet();
    nnet.set_component(1, Box::new(Nonlinearity::tanh(4)))
        .unwrap();
    assert_eq!(nnet.component(1).unwrap().kind(), ComponentKind::Tanh);
    assert_eq!(nnet.n_components(), 4);
}

#[test]
fn empty_network_is_identity() {
    let mut nnet = Nnet::new();
    let output = nnet.propagate(row(&[1.0, 2.0, 3.0]).as_ref()).unwrap();
    assert_eq!(row_values(output), [1.0, 2.0, 3.0]);
    let input_diff = nnet
        .backpropagate(row(&[0.1, 0.2, 0.3]).as_ref())
        .unwrap();
    assert_eq!(row_values(input_diff), [0.1, 0.2, 0.3]);
    let output = nnet.feedforward(row(&[4.0, 5.0]).as_ref()).unwrap();
    assert_eq!(row_values(output.as_ref()), [4.0, 5.0]);
}

#[test]
fn single_affine_selects() {
    let mut nnet = Nnet::from_components([Box::new(selector()) as Box<dyn Component>]).unwrap();
    let output = nnet.propagate(row(&[1.0, 2.0, 3.0]).as_ref()).unwrap();
    assert_eq!(row_values(output), [1.0, 2.0]);
    let output = nnet.feedforward(row(&[1.0, 2.0, 3.0]).as_ref()).unwrap();
    assert_eq!(row_values(output.as_ref()), [1.0, 2.0]);
}

#[test]
fn feedforward_matches_propagate() {
    let input = Mat::from_fn(5, 3, |i, j| (i as f32 - 2.0) * 0.3 + j as f32 * 0.1);
    for n_components in 1..=4 {
        let mut nnet = random_nnet();
        while nnet.n_components() > n_components {
            nnet.remove_component(nnet.n_components() - 1).unwrap();
        }
        let propagated = nnet.propagate(input.as_ref()).unwrap().to_owned();
        let fed = nnet.feedforward(input.as_ref()).unwrap();
        assert_eq!(
            (fed.nrows(), fed.ncols()),
            (propagated.nrows(), propagated.ncols()),
            "{n_components} components"
        );
        for i in 0..fed.nrows() {
            for j in 0..fed.ncols() {
                assert_relative_eq!(fed[(i, j)], propagated[(i, j)], epsilon = 1e-6);
            }
        }
        if n_components > 1 {
            for index in [0, 1] {
                let activation = nnet.boundary(index).unwrap().activation;
                assert_eq!((activation.nrows(), activation.ncols()), (0, 0));
            }
        }
    }
}

#[test]
fn propagate_keeps_every_boundary() {
    let mut nnet = random_nnet();
    let input = Mat::from_fn(2, 3, |i, j| (i + j) as f32);
    nnet.propagate(input.as_ref()).unwrap();
    let dims = [3, 4, 4, 2, 2];
    for (index, dim) in dims.into_iter().enumerate() {
        let activation = nnet.boundary(index).unwrap().activation;
        assert_eq!((activation.nrows(), activation.ncols()), (2, dim));
    }
    let output = nnet.boundary(4).unwrap().activation;
    for i in 0..2 {
        assert_relative_eq!(output[(i, 0)] + output[(i, 1)], 1.0, epsilon = 1e-6);
    }
    assert!(nnet.info_propagate().contains("<Softmax>"));
}

#[test]
fn propagate_rejects_wrong_width() {
    let mut nnet = random_nnet();
    let err = nnet.propagate(row(&[1.0, 2.0]).as_ref()).unwrap_err();
    assert!(matches!(
        err,
        NnetError::Structural(StructuralError::InputDim { expected: 3, actual: 2, .. })
    ));
}

#[test]
fn backpropagate_updates_affine() {
    let opts = TrainOptions::default().with_learn_rate(0.5);
    let mut nnet = Nnet::with_train_options(opts);
    nnet.append_component(Box::new(selector())).unwrap();

    nnet.propagate(row(&[1.0, 2.0, 3.0]).as_ref()).unwrap();
    let input_diff = nnet.backpropagate(row(&[0.1, 0.2]).as_ref()).unwrap();
    let input_diff = row_values(input_diff);
    for (got, want) in input_diff.iter().zip([0.1, 0.2, 0.0]) {
        assert_relative_eq!(*got, want, epsilon = 1e-6);
    }

    let params = nnet.params();
    let want = [0.95, -0.1, -0.15, -0.1, 0.8, -0.3, -0.05, -0.1];
    assert_eq!(params.len(), want.len());
    for (got, want) in params.iter().zip(want) {
        assert_relative_eq!(*got, want, epsilon = 1e-6);
    }

    let gradient = nnet.gradient();
    let want = [0.1, 0.2, 0.3, 0.2, 0.4, 0.6, 0.1, 0.2];
    for (got, want) in gradient.iter().zip(want) {
        assert_relative_eq!(*got, want, epsilon = 1e-6);
    }
    assert!(nnet.info_gradient().contains("linearity_grad"));
    assert!(nnet.info_backpropagate().contains("<AffineTransform>"));
}

#[test]
fn param_counts() {
    let nnet = small_nnet();
    assert_eq!(nnet.num_params(), 3 * 4 + 4 + 4 * 2 + 2);
    assert_eq!(nnet.params().len(), nnet.num_params());
    assert_eq!(nnet.gradient().len(), nnet.num_params());
}

#[test]
fn set_params_checks_length() {
    let mut nnet = random_nnet();
    let err = nnet.set_params(&[0.0; 3]).unwrap_err();
    assert!(matches!(
        err,
        NnetError::Structural(StructuralError::ParamCount { .. })
    ));
    let params: Vec<f32> = (0..nnet.num_params()).map(|i| i as f32 * 0.01).collect();
    nnet.set_params(&params).unwrap();
    assert_eq!(nnet.params(), params);
}

#[test]
fn weights_round_trip() {
    let mut nnet = random_nnet();
    let before = nnet.params();
    let weights = nnet.weights().unwrap();
    assert_eq!(weights, before);
    nnet.set_weights(&weights).unwrap();
    assert_eq!(nnet.params(), before);
}

#[test]
fn weights_unsupported_for_linear_transform() {
    let mut nnet = Nnet::from_components([
        Box::new(AffineTransform::new(2, 3)) as Box<dyn Component>,
        Box::new(LinearTransform::new(3, 2)),
    ])
    .unwrap();
    let err = nnet.weights().unwrap_err();
    assert!(matches!(
        err,
        NnetError::UnsupportedCapability {
            index: 1,
            kind: ComponentKind::LinearTransform,
        }
    ));
    let before = nnet.params();
    assert!(nnet.set_weights(&vec![1.0; 2 * 3 + 3]).is_err());
    assert_eq!(nnet.params(), before);
}

#[test]
fn divergence_is_detected() {
    let mut nnet = random_nnet();
    let mut params = nnet.params();
    params[0] = f32::NAN;
    nnet.set_params(&params).unwrap();
    assert!(matches!(
        nnet.check(),
        Err(NnetError::NumericalDivergence { kind: Divergence::NaN })
    ));
    params[0] = f32::INFINITY;
    nnet.set_params(&params).unwrap();
    assert!(matches!(
        nnet.check(),
        Err(NnetError::NumericalDivergence { kind: Divergence::Inf })
    ));
}

#[test]
fn copies_are_independent() {
    let original = random_nnet();
    let mut copy = original.try_clone().unwrap();
    let zeros = vec![0.0; copy.num_params()];
    copy.set_params(&zeros).unwrap();
    assert_ne!(original.params(), zeros);

    let mut assigned = Nnet::new();
    assigned.assign(&original).unwrap();
    assert_eq!(assigned.params(), original.params());
    assert_eq!(boundary_counts(&assigned), original.n_components() + 1);
}

#[test]
fn append_nnet_concatenates() {
    let mut head = Nnet::from_components([Box::new(AffineTransform::new(3, 4)) as Box<dyn Component>])
        .unwrap();
    let tail = Nnet::from_components([
        Box::new(Nonlinearity::sigmoid(4)) as Box<dyn Component>,
        Box::new(AffineTransform::new(4, 2)),
    ])
    .unwrap();
    head.append_nnet(&tail).unwrap();
    assert_eq!(head.n_components(), 3);
    assert_eq!(head.output_dim(), Some(2));
    assert_eq!(tail.n_components(), 2);
}

#[test]
fn train_options_reach_components() {
    let mut nnet = small_nnet();
    let opts = TrainOptions {
        learn_rate: 0.1,
        momentum: 0.9,
        ..TrainOptions::default()
    };
    nnet.set_train_options(opts);
    assert_eq!(nnet.train_options(), &opts);
    for component in nnet.components() {
        if let Some(updatable) = component.as_updatable() {
            assert_eq!(updatable.train_options(), &opts);
        }
    }

    nnet.append_component(Box::new(AffineTransform::new(2, 2)))
        .unwrap();
    let appended = nnet.component(4).unwrap().as_updatable().unwrap();
    assert_eq!(appended.train_options(), &opts);
}

#[test]
fn reading_resets_learn_rate() {
    let mut written = Vec::new();
    small_nnet().write(&mut written, false).unwrap();
    let nnet = Nnet::read_from(&mut written.as_slice(), false).unwrap();
    assert_eq!(nnet.train_options().learn_rate, 0.0);
    let affine = nnet.component(0).unwrap().as_updatable().unwrap();
    assert_eq!(affine.train_options().learn_rate, 0.0);
}

#[test]
fn binary_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("final.nnet");
    let nnet = random_nnet();
    nnet.write_to_path(&path, true).unwrap();
    let read = Nnet::read_from_path(&path).unwrap();
    assert_eq!(read.n_components(), nnet.n_components());
    assert_eq!(read.params(), nnet.params());
    for (a, b) in read.components().iter().zip(nnet.components()) {
        assert_eq!(a.kind(), b.kind());
    }
}

#[test]
fn text_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("final.nnet.txt");
    let mut nnet = random_nnet();
    nnet.append_component(Box::new(Dropout::new(2))).unwrap();
    nnet.write_to_path(&path, false).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("<Nnet>"));
    assert!(text.contains("<DropoutRetention>"));

    let read = Nnet::read_from_path(&path).unwrap();
    assert_eq!(read.n_components(), 5);
    assert_eq!(read.params(), nnet.params());
}

#[test]
fn stream_without_nnet_token_reads_to_end() {
    let mut written = Vec::new();
    small_nnet().write(&mut written, false).unwrap();
    let text = String::from_utf8(written).unwrap();
    let inner = text
        .trim()
        .strip_prefix("<Nnet>")
        .unwrap()
        .strip_suffix("</Nnet>")
        .unwrap()
        .to_owned();
    let nnet = Nnet::read_from(&mut inner.as_bytes(), false).unwrap();
    assert_eq!(nnet.n_components(), 4);
}

#[test]
fn missing_closing_token_is_an_error() {
    let mut written = Vec::new();
    small_nnet().write(&mut written, false).unwrap();
    let text = String::from_utf8(written).unwrap();
    let truncated = text.trim().strip_suffix("</Nnet>").unwrap();
    let err = Nnet::read_from(&mut truncated.as_bytes(), false).unwrap_err();
    assert!(matches!(err, NnetError::StreamFormat(_)));
}

#[test]
fn failed_read_leaves_network_unchanged() {
    let mut nnet = Nnet::new();
    let text = "<Nnet>\n<Sigmoid> 2 2\n<Bogus> 2 2\n</Nnet>\n";
    assert!(nnet.read(&mut text.as_bytes(), false).is_err());
    assert_eq!(nnet.n_components(), 0);
    nnet.check().unwrap();

    let mut nnet = small_nnet();
    let text = "<Nnet>\n<Softmax> 2 2\n<Tanh> 3 3\n</Nnet>\n";
    assert!(nnet.read(&mut text.as_bytes(), false).is_err());
    assert_eq!(nnet.n_components(), 4);
    nnet.check().unwrap();
    nnet.propagate(row(&[1.0, 2.0, 3.0]).as_ref()).unwrap();
}

#[test]
fn read_appends_to_existing_components() {
    let mut nnet = small_nnet();
    let text = "<Nnet>\n<Softmax> 2 2\n</Nnet>\n";
    nnet.read(&mut text.as_bytes(), false).unwrap();
    assert_eq!(nnet.n_components(), 5);
    assert_eq!(boundary_counts(&nnet), 6);

    let text = "<Nnet>\n<Tanh> 3 3\n</Nnet>\n";
    assert!(nnet.read(&mut text.as_bytes(), false).is_err());
    assert_eq!(nnet.n_components(), 5);
}

#[test]
fn unknown_marker_is_an_error() {
    let text = "<Nnet>\n<Bogus> 2 2\n</Nnet>\n";
    let err = Nnet::read_from(&mut text.as_bytes(), false).unwrap_err();
    assert!(matches!(err, NnetError::StreamFormat(message) if message.contains("<Bogus>")));
}

#[test]
fn mismatched_stream_dims_are_an_error() {
    let text = "<Nnet>\n<Sigmoid> 3 3\n<Tanh> 4 4\n</Nnet>\n";
    let err = Nnet::read_from(&mut text.as_bytes(), false).unwrap_err();
    assert!(matches!(err, NnetError::StreamFormat(message) if message.contains("mismatch")));
}

#[test]
fn proto_init_builds_topology() {
    let nnet = random_nnet();
    let kinds: Vec<_> = nnet.components().iter().map(|c| c.kind()).collect();
    assert_eq!(
        kinds,
        [
            ComponentKind::AffineTransform,
            ComponentKind::Tanh,
            ComponentKind::AffineTransform,
            ComponentKind::Softmax,
        ]
    );
    assert_eq!((nnet.input_dim(), nnet.output_dim()), (Some(3), Some(2)));
    assert!(nnet.info().contains("linearity"));
}

#[test]
fn proto_init_rejects_bad_chain() {
    let err = Nnet::init_from_str(
        "<AffineTransform> <InputDim> 3 <OutputDim> 4\n<Sigmoid> <InputDim> 5 <OutputDim> 5\n",
    )
    .unwrap_err();
    assert!(matches!(
        err,
        NnetError::Structural(StructuralError::DimensionMismatch { .. })
    ));
}

#[test]
fn dropout_retention_is_set_and_checked() {
    let mut nnet = Nnet::from_components([
        Box::new(AffineTransform::new(3, 4)) as Box<dyn Component>,
        Box::new(Dropout::new(4)),
        Box::new(AffineTransform::new(4, 2)),
    ])
    .unwrap();
    nnet.set_dropout_retention(0.8).unwrap();
    assert!(matches!(
        nnet.set_dropout_retention(0.0),
        Err(NnetError::InvalidRetention(_))
    ));
    assert!(matches!(
        nnet.set_dropout_retention(1.5),
        Err(NnetError::InvalidRetention(_))
    ));

    let mut written = Vec::new();
    nnet.write(&mut written, false).unwrap();
    let text = String::from_utf8(written).unwrap();
    assert!(text.contains("<DropoutRetention> 0.8"));
}

fn parallel_nnet() -> Nnet {
    let half = || {
        let linearity = Mat::from_fn(2, 2, |i, j| if i == j { 2.0 } else { 0.0 });
        let affine = AffineTransform::from_parts(linearity, Col::zeros(2)).unwrap();
        Nnet::from_components([Box::new(affine) as Box<dyn Component>]).unwrap()
    };
    let parallel = ParallelComponent::new(vec![half(), half()]).unwrap();
    Nnet::from_components([Box::new(parallel) as Box<dyn Component>]).unwrap()
}

#[test]
fn parallel_splits_columns() {
    let mut nnet = parallel_nnet();
    assert_eq!((nnet.input_dim(), nnet.output_dim()), (Some(4), Some(4)));
    assert_eq!(nnet.num_params(), 2 * (4 + 2));

    let output = nnet
        .propagate(row(&[1.0, 2.0, 3.0, 4.0]).as_ref())
        .unwrap();
    assert_eq!(row_values(output), [2.0, 4.0, 6.0, 8.0]);

    nnet.set_train_options(TrainOptions::default().with_learn_rate(0.0));
    let input_diff = nnet
        .backpropagate(row(&[0.1, 0.2, 0.3, 0.4]).as_ref())
        .unwrap();
    let input_diff = row_values(input_diff);
    for (got, want) in input_diff.iter().zip([0.2, 0.4, 0.6, 0.8]) {
        assert_relative_eq!(*got, want, epsilon = 1e-6);
    }
}

#[test]
fn parallel_round_trip() {
    let nnet = parallel_nnet();
    for binary in [false, true] {
        let mut written = Vec::new();
        nnet.write(&mut written, binary).unwrap();
        let read = Nnet::read_from(&mut written.as_slice(), binary).unwrap();
        assert_eq!(read.n_components(), 1);
        assert_eq!(read.params(), nnet.params());
        assert_eq!(read.component(0).unwrap().kind(), ComponentKind::ParallelComponent);
    }
}

#[test]
fn parallel_rejects_empty_nested() {
    assert!(ParallelComponent::new(Vec::new()).is_err());
    assert!(ParallelComponent::new(vec![Nnet::new()]).is_err());
}

#[test]
fn parallel_reports_stale_nested_dims() {
    let nested = || {
        Nnet::from_components([
            Box::new(AffineTransform::new(2, 2)) as Box<dyn Component>,
            Box::new(Nonlinearity::sigmoid(2)),
        ])
        .unwrap()
    };
    let mut parallel = ParallelComponent::new(vec![nested(), nested()]).unwrap();
    parallel.nested_mut()[0]
        .set_component(1, Box::new(AffineTransform::new(2, 3)))
        .unwrap();
    let mut nnet = Nnet::new();
    let err = nnet.append_component(Box::new(parallel)).unwrap_err();
    assert!(matches!(
        err,
        NnetError::Structural(StructuralError::NestedDims {
            output_dim: 5,
            expected_output_dim: 4,
            ..
        })
    ));
    assert!(matches!(
        nnet.check(),
        Err(NnetError::Structural(StructuralError::NestedDims { .. }))
    ));
    let err = nnet
        .propagate(row(&[1.0, 2.0, 3.0, 4.0]).as_ref())
        .unwrap_err();
    assert!(matches!(
        err,
        NnetError::Structural(StructuralError::NestedDims { .. })
    ));
}
