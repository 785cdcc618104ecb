//! Composable transform pipeline.
//!
//! The `Transform<I, O>` trait represents a stateless operation converting
//! an input of type `I` to an output of type `O`. Multiple steps chain via
//! `.then(...)` into a single, inlined pipeline. The geometric transforms in
//! this crate all implement `Transform<Frame, Frame>` so an image and its
//! box set always move through a step together.

pub mod augmentation;
pub mod frame;
pub mod geometric;
pub mod photometric;

use anyhow::{Context, Result};
use std::marker::PhantomData;

pub trait Transform<I, O>: Send + Sync {
    /// Applies the transformation to the input.
    fn apply(&self, input: I) -> Result<O>;

    #[inline]
    fn then<T, M>(self, next: T) -> Chain<Self, T, O>
    where
        Self: Sized,
        T: Transform<O, M>,
        O: Send,
        M: Send,
    {
        Chain {
            first: self,
            second: next,
            _marker: PhantomData,
        }
    }
}

/// A chain of two transforms (`A` -> `B`).
/// - `PhantomData<M>` enforces intermediate type alignment.
#[derive(Debug)]
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _marker: PhantomData<fn() -> M>,
}

impl<A, B, M> Chain<A, B, M> {
    /// Use [`Transform::then`] for better ergonomics; `Chain::new` helps
    /// when building pipelines dynamically.
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _marker: PhantomData,
        }
    }
}

impl<I, M, O, A, B> Transform<I, O> for Chain<A, B, M>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Send,
{
    fn apply(&self, input: I) -> Result<O> {
        self.first
            .apply(input)
            .and_then(|mid| self.second.apply(mid))
            .with_context(|| {
                format!(
                    "Transform chain failed: {} → {}",
                    std::any::type_name::<A>(),
                    std::any::type_name::<B>(),
                )
            })
    }
}
