//! Build steps from plain closures, without declaring a `Work` struct.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::StepError;
use crate::step::{Step, Work};

type DynRun<I, O> =
    Arc<dyn Fn(CancellationToken, I) -> BoxFuture<'static, Result<O, StepError>> + Send + Sync>;

/// A step whose work is a closure over `(ctx, input)`.
pub struct FnWork<I, O> {
    name: String,
    run: DynRun<I, O>,
}

impl<I, O> Work for FnWork<I, O>
where
    I: Clone + Default + Send + Sync + 'static,
    O: Clone + Default + Send + Sync + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(
        &self,
        ctx: CancellationToken,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, StepError>> + Send {
        (self.run)(ctx, input)
    }
}

/// Construct a step from an async closure over `(ctx, input)`.
pub fn from_fn<I, O, F, Fut>(name: impl Into<String>, f: F) -> Step<FnWork<I, O>>
where
    I: Clone + Default + Send + Sync + 'static,
    O: Clone + Default + Send + Sync + 'static,
    F: Fn(CancellationToken, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, StepError>> + Send + 'static,
{
    Step::new(FnWork {
        name: name.into(),
        run: Arc::new(move |ctx, input| Box::pin(f(ctx, input))),
    })
}

/// A step that only produces output; its input is `()`.
pub fn producer<O, F, Fut>(name: impl Into<String>, f: F) -> Step<FnWork<(), O>>
where
    O: Clone + Default + Send + Sync + 'static,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, StepError>> + Send + 'static,
{
    from_fn(name, move |ctx, _: ()| f(ctx))
}

/// A step that only consumes input; its output is `()`.
pub fn consumer<I, F, Fut>(name: impl Into<String>, f: F) -> Step<FnWork<I, ()>>
where
    I: Clone + Default + Send + Sync + 'static,
    F: Fn(CancellationToken, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    from_fn(name, f)
}

/// A step that synchronously transforms its input into its output; it
/// never fails.
pub fn adapter<I, O, F>(name: impl Into<String>, f: F) -> Step<FnWork<I, O>>
where
    I: Clone + Default + Send + Sync + 'static,
    O: Clone + Default + Send + Sync + 'static,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    from_fn(name, move |_ctx, input| {
        let output = f(input);
        async move { Ok(output) }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
