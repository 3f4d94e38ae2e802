//! Stage: a whole workflow exposed as a single step.
//!
//! A stage seeds its inner workflow from the stage input, runs it to
//! termination, and assembles the stage output from the inner steps'
//! outputs. Inner run errors surface as the stage step's error, so a
//! nested failure gates downstreams like any other step failure.

use tokio_util::sync::CancellationToken;

use crate::error::StepError;
use crate::step::Work;
use crate::workflow::Workflow;

type SeedFn<I> = Box<dyn Fn(I) + Send + Sync>;
type CollectFn<O> = Box<dyn Fn(&mut O) + Send + Sync>;

/// A workflow wrapped as a step. `I` seeds the inner steps' inputs and
/// `O` is assembled from their outputs; both closures capture the inner
/// step handles directly.
pub struct Stage<I, O> {
    name: String,
    workflow: Workflow,
    seed: Option<SeedFn<I>>,
    collect: Option<CollectFn<O>>,
}

impl<I, O> Stage<I, O> {
    /// Wrap `workflow` under the given display name.
    pub fn new(name: impl Into<String>, workflow: Workflow) -> Self {
        Self {
            name: name.into(),
            workflow,
            seed: None,
            collect: None,
        }
    }

    /// Distribute the stage input onto inner steps before the inner run.
    pub fn with_seed<F>(mut self, seed: F) -> Self
    where
        F: Fn(I) + Send + Sync + 'static,
    {
        self.seed = Some(Box::new(seed));
        self
    }

    /// Assemble the stage output from inner steps after the inner run.
    pub fn with_collect<F>(mut self, collect: F) -> Self
    where
        F: Fn(&mut O) + Send + Sync + 'static,
    {
        self.collect = Some(Box::new(collect));
        self
    }

    /// The wrapped workflow, e.g. for inspection via
    /// [`dep`](Workflow::dep).
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }
}

impl<I, O> Work for Stage<I, O>
where
    I: Clone + Default + Send + Sync + 'static,
    O: Clone + Default + Send + Sync + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn run(&self, ctx: CancellationToken, input: I) -> Result<O, StepError> {
        if let Some(seed) = &self.seed {
            seed(input);
        }
        self.workflow
            .run(&ctx)
            .await
            .map_err(|err| StepError::Source(Box::new(err)))?;
        let mut output = O::default();
        if let Some(collect) = &self.collect {
            collect(&mut output);
        }
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::step;
    use crate::func::from_fn;
    use crate::status::StepStatus;
    use crate::step::Step;

    #[tokio::test]
    async fn test_stage_runs_inner_workflow() {
        let double = from_fn("double", |_ctx, n: i64| async move {
            Ok::<_, StepError>(n * 2)
        });
        let add_one = from_fn("add-one", |_ctx, n: i64| async move {
            Ok::<_, StepError>(n + 1)
        });

        let mut inner = Workflow::new();
        inner.add(step(&add_one).direct_depends_on(&double));

        let stage = {
            let double = double.clone();
            let add_one = add_one.clone();
            Stage::<i64, i64>::new("double-then-add", inner)
                .with_seed(move |n| double.set_input(n))
                .with_collect(move |out| *out = add_one.output().unwrap_or_default())
        };

        let outer_step = Step::new(stage);
        outer_step.set_input(20);

        let mut outer = Workflow::new();
        outer.add(step(&outer_step));
        outer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(outer_step.status(), StepStatus::Succeeded);
        assert_eq!(outer_step.output(), Some(41));
    }

    #[tokio::test]
    async fn test_stage_surfaces_inner_failure() {
        let broken = from_fn("broken", |_ctx, _: ()| async {
            Err::<(), _>(StepError::msg("inner boom"))
        });
        let mut inner = Workflow::new();
        inner.add(step(&broken));

        let outer_step = Step::new(Stage::<(), ()>::new("stage", inner));
        let mut outer = Workflow::new();
        outer.add(step(&outer_step));

        let err = outer.run(&CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("inner boom"));
        assert_eq!(outer_step.status(), StepStatus::Failed);
    }
}
