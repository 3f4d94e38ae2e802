//! Fluent construction of dependency sub-graphs.
//!
//! [`step`] opens a builder for a single depender; [`steps`] registers a
//! group of mutually-independent steps. Both produce a [`Dependency`]
//! accepted by [`Workflow::add`](crate::workflow::Workflow::add).
//!
//! Flow closures capture the eventual step handles, so a builder can be
//! constructed inside loops without the classic captured-index pitfall.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dependency::{Dependency, Flow, Link};
use crate::error::StepError;
use crate::retry::RetryPolicy;
use crate::step::{Step, StepRef, Work};

/// Anything [`Workflow::add`](crate::workflow::Workflow::add) accepts.
pub trait IntoDependency {
    fn into_dependency(self) -> Dependency;
}

impl IntoDependency for Dependency {
    fn into_dependency(self) -> Dependency {
        self
    }
}

// ---------------------------------------------------------------------------
// Single-step builder
// ---------------------------------------------------------------------------

/// Open a builder declaring dependencies and configuration for `target`.
pub fn step<W: Work>(target: &Step<W>) -> StepBuilder<W> {
    StepBuilder {
        step: target.clone(),
        links: Vec::new(),
    }
}

/// Builder for one depender's incoming links and configuration.
pub struct StepBuilder<W: Work> {
    step: Step<W>,
    links: Vec<Link>,
}

impl<W: Work> StepBuilder<W> {
    /// Typed dependency with an adapter converting the upstream's output
    /// into this step's input. The adapter runs after the upstream
    /// terminates and immediately before this step's work, in link order.
    pub fn depends_on<U, F>(mut self, upstream: &Step<U>, adapt: F) -> Self
    where
        U: Work,
        F: Fn(&CancellationToken, U::Output, &mut W::Input) -> Result<(), StepError>
            + Send
            + Sync
            + 'static,
    {
        let up = upstream.clone();
        let down = self.step.clone();
        let flow: Flow = Arc::new(move |ctx| {
            let output = up.output_or_default();
            down.with_input(|input| adapt(ctx, output, input))
        });
        self.links.push(Link {
            upstream: Some(upstream.to_ref()),
            flow: Some(flow),
        });
        self
    }

    /// Dependency where the upstream's output type equals this step's
    /// input type; the flow overwrites the whole input slot.
    pub fn direct_depends_on<U>(mut self, upstream: &Step<U>) -> Self
    where
        U: Work<Output = W::Input>,
    {
        let up = upstream.clone();
        let down = self.step.clone();
        let flow: Flow = Arc::new(move |_ctx| {
            down.with_input(|input| *input = up.output_or_default());
            Ok(())
        });
        self.links.push(Link {
            upstream: Some(upstream.to_ref()),
            flow: Some(flow),
        });
        self
    }

    /// Ordering-only dependency: the upstream still runs first, but no
    /// data flows.
    pub fn after(mut self, upstream: impl Into<StepRef>) -> Self {
        self.links.push(Link {
            upstream: Some(upstream.into()),
            flow: None,
        });
        self
    }

    /// Input seed: mutates this step's input in link order, like a
    /// dependency on an empty upstream.
    pub fn input<F>(mut self, seed: F) -> Self
    where
        F: Fn(&mut W::Input) -> Result<(), StepError> + Send + Sync + 'static,
    {
        let down = self.step.clone();
        let flow: Flow = Arc::new(move |_ctx| down.with_input(|input| seed(input)));
        self.links.push(Link {
            upstream: None,
            flow: Some(flow),
        });
        self
    }

    /// Set the whole-step deadline (outside of retries).
    pub fn timeout(self, timeout: Duration) -> Self {
        self.step.set_timeout(timeout);
        self
    }

    /// Set the condition deciding run-vs-cancel from upstream statuses.
    pub fn condition<F>(self, condition: F) -> Self
    where
        F: Fn(&[StepRef]) -> bool + Send + Sync + 'static,
    {
        self.step.set_condition(condition);
        self
    }

    /// Set the when predicate deciding run-vs-skip from the environment.
    pub fn when<F>(self, when: F) -> Self
    where
        F: Fn(&CancellationToken) -> bool + Send + Sync + 'static,
    {
        self.step.set_when(when);
        self
    }

    /// Set the retry policy.
    pub fn retry(self, policy: RetryPolicy) -> Self {
        self.step.set_retry(policy);
        self
    }
}

impl<W: Work> IntoDependency for StepBuilder<W> {
    fn into_dependency(self) -> Dependency {
        let mut graph = Dependency::default();
        graph.add_links(self.step.to_ref(), self.links);
        graph
    }
}

// ---------------------------------------------------------------------------
// Step-group builder
// ---------------------------------------------------------------------------

/// Register a group of mutually-independent steps; they run in parallel
/// unless `after` adds ordering edges.
pub fn steps<I, S>(members: I) -> StepsBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<StepRef>,
{
    StepsBuilder {
        members: members.into_iter().map(Into::into).collect(),
        links: Vec::new(),
    }
}

/// Builder for a group of steps sharing the same ordering edges.
pub struct StepsBuilder {
    members: Vec<StepRef>,
    links: Vec<Link>,
}

impl StepsBuilder {
    /// Ordering-only dependency applied to every member of the group.
    pub fn after(mut self, upstream: impl Into<StepRef>) -> Self {
        self.links.push(Link {
            upstream: Some(upstream.into()),
            flow: None,
        });
        self
    }
}

impl IntoDependency for StepsBuilder {
    fn into_dependency(self) -> Dependency {
        let mut graph = Dependency::default();
        for member in self.members {
            graph.add_links(member, self.links.clone());
        }
        graph
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
