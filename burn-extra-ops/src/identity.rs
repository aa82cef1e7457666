//! Identity module implementation

use burn::prelude::*;

/// Identity module that returns input unchanged.
///
/// Used wherever a stage has to keep its slot in a module list without transforming
/// the feature map, e.g. a pass-through channel projection or the first decoder stage.
#[derive(Module, Debug)]
pub struct Identity<B: Backend> {
    _phantom: std::marker::PhantomData<B>,
}

impl<B: Backend> Identity<B> {
    /// Create new Identity module
    pub const fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }

    /// Forward pass (identity function)
    pub const fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        input
    }
}

impl<B: Backend> Default for Identity<B> {
    fn default() -> Self {
        Self::new()
    }
}
