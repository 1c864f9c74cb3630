use std::fmt::{self, Debug};

use crate::ComponentKind;

/// A squashing function applied element-wise by a `Nonlinearity`.
pub trait ActivationFunction: Send + Sync + 'static {
    const KIND: ComponentKind;

    fn apply(x: f32) -> f32;

    /// Derivative at the point where the function returned `y`.
    fn deriv_from_output(y: f32) -> f32;
}

/// An `ActivationFunction` chosen at runtime, e.g. from a component marker.
#[derive(Clone, Copy)]
pub struct DynActivationFunction {
    kind: ComponentKind,
    apply: fn(f32) -> f32,
    deriv_from_output: fn(f32) -> f32,
}

impl DynActivationFunction {
    pub fn new<Phi: ActivationFunction>() -> Self {
        Self {
            kind: Phi::KIND,
            apply: Phi::apply,
            deriv_from_output: Phi::deriv_from_output,
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn apply(&self, x: f32) -> f32 {
        (self.apply)(x)
    }

    pub fn deriv_from_output(&self, y: f32) -> f32 {
        (self.deriv_from_output)(y)
    }
}

impl Debug for DynActivationFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DynActivationFunction({})", self.kind)
    }
}

impl PartialEq for DynActivationFunction {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

pub mod activation_functions {
    use super::ActivationFunction;
    use crate::ComponentKind;

    /// `1 / (1 + e^-x)`
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Sigmoid;

    impl ActivationFunction for Sigmoid {
        const KIND: ComponentKind = ComponentKind::Sigmoid;

        fn apply(x: f32) -> f32 {
            1.0 / (1.0 + (-x).exp())
        }

        fn deriv_from_output(y: f32) -> f32 {
            y * (1.0 - y)
        }
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Tanh;

    impl ActivationFunction for Tanh {
        const KIND: ComponentKind = ComponentKind::Tanh;

        fn apply(x: f32) -> f32 {
            x.tanh()
        }

        fn deriv_from_output(y: f32) -> f32 {
            1.0 - y * y
        }
    }
}
