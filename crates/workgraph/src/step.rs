//! Step handles: the user-facing typed [`Step`] and the erased [`StepRef`]
//! the scheduler works with.
//!
//! The scheduler must treat every node uniformly while users keep typed
//! producer/consumer signatures. [`Work`] carries the typed signature;
//! [`Step`] owns the input/output slots plus the scheduling state (status,
//! condition, when, retry, timeout); [`StepRef`] erases the types and
//! exposes only what the scheduler needs. The typed facets are reached
//! exclusively through link flow closures built by the
//! [`builder`](crate::builder) module.

use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::condition::Condition;
use crate::error::StepError;
use crate::retry::RetryPolicy;
use crate::status::StepStatus;
use crate::when::When;

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// A unit of computation schedulable as a workflow step.
///
/// `Input` is assembled from upstream outputs (through link flow actions)
/// before `run` is invoked; `Output` becomes visible to downstream steps
/// after a successful `run`. Both must be `Default` because a step gated
/// by [`condition::always`](crate::condition::always) may observe a failed
/// upstream that produced no output.
pub trait Work: Send + Sync + 'static {
    /// Input assembled from upstream outputs before `run` is invoked.
    type Input: Clone + Default + Send + Sync + 'static;
    /// Output made visible to downstream steps after a successful `run`.
    type Output: Clone + Default + Send + Sync + 'static;

    /// Display name of the step; defaults to the bare type name.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }

    /// The main operation. `ctx` is the ambient cancellation context;
    /// long-running work should observe it.
    fn run(
        &self,
        ctx: CancellationToken,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, StepError>> + Send;
}

// ---------------------------------------------------------------------------
// Base state
// ---------------------------------------------------------------------------

/// Per-step scheduling configuration.
#[derive(Default)]
struct StepConfig {
    condition: Option<Condition>,
    when: Option<When>,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
}

/// Shared node storage behind a [`Step`] handle.
struct StepCore<W: Work> {
    work: W,
    status: RwLock<StepStatus>,
    config: RwLock<StepConfig>,
    input: Mutex<W::Input>,
    output: Mutex<Option<W::Output>>,
}

// ---------------------------------------------------------------------------
// Erased node surface
// ---------------------------------------------------------------------------

/// Scheduler-facing surface of a step: identity, status, config and the
/// type-erased `Do`. The typed facets stay behind link flow closures.
pub(crate) trait StepNode: Send + Sync {
    fn name(&self) -> String;
    fn status(&self) -> StepStatus;
    fn set_status(&self, status: StepStatus);
    fn condition(&self) -> Option<Condition>;
    fn when(&self) -> Option<When>;
    fn retry(&self) -> Option<RetryPolicy>;
    fn timeout(&self) -> Option<Duration>;
    fn do_step(
        self: Arc<Self>,
        ctx: CancellationToken,
    ) -> BoxFuture<'static, Result<(), StepError>>;
}

impl<W: Work> StepNode for StepCore<W> {
    fn name(&self) -> String {
        self.work.name()
    }

    fn status(&self) -> StepStatus {
        *self.status.read()
    }

    fn set_status(&self, status: StepStatus) {
        *self.status.write() = status;
    }

    fn condition(&self) -> Option<Condition> {
        self.config.read().condition.clone()
    }

    fn when(&self) -> Option<When> {
        self.config.read().when.clone()
    }

    fn retry(&self) -> Option<RetryPolicy> {
        self.config.read().retry.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.read().timeout
    }

    fn do_step(
        self: Arc<Self>,
        ctx: CancellationToken,
    ) -> BoxFuture<'static, Result<(), StepError>> {
        Box::pin(async move {
            let input = self.input.lock().clone();
            let output = self.work.run(ctx, input).await?;
            *self.output.lock() = Some(output);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Typed handle to a workflow step. Cloning is cheap; clones refer to the
/// same underlying node, and node identity (not value) keys the graph.
pub struct Step<W: Work> {
    core: Arc<StepCore<W>>,
}

impl<W: Work> Clone for Step<W> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<W: Work> Step<W> {
    /// Wrap `work` into a schedulable step with `Pending` status and
    /// default-initialized input.
    pub fn new(work: W) -> Self {
        Self {
            core: Arc::new(StepCore {
                work,
                status: RwLock::new(StepStatus::Pending),
                config: RwLock::new(StepConfig::default()),
                input: Mutex::new(W::Input::default()),
                output: Mutex::new(None),
            }),
        }
    }

    /// Display name of the step.
    pub fn name(&self) -> String {
        self.core.work.name()
    }

    /// Current status.
    pub fn status(&self) -> StepStatus {
        self.core.status()
    }

    /// Replace the input slot. Typically used to seed root steps before a
    /// run; links overwrite or amend it while the workflow executes.
    pub fn set_input(&self, input: W::Input) {
        *self.core.input.lock() = input;
    }

    /// Snapshot of the current input slot.
    pub fn input(&self) -> W::Input {
        self.core.input.lock().clone()
    }

    /// Mutate the input slot in place. Flow closures use this to apply
    /// upstream outputs in link order.
    pub(crate) fn with_input<R>(&self, f: impl FnOnce(&mut W::Input) -> R) -> R {
        f(&mut self.core.input.lock())
    }

    /// Output of the last successful run, if any.
    pub fn output(&self) -> Option<W::Output> {
        self.core.output.lock().clone()
    }

    /// Output of the last successful run, or the default value when the
    /// step has not produced one (e.g. it failed before completing).
    pub(crate) fn output_or_default(&self) -> W::Output {
        self.core.output.lock().clone().unwrap_or_default()
    }

    /// Set the condition deciding run-vs-cancel from upstream statuses.
    pub fn set_condition<F>(&self, condition: F)
    where
        F: Fn(&[StepRef]) -> bool + Send + Sync + 'static,
    {
        self.core.config.write().condition = Some(Arc::new(condition));
    }

    /// Set the when predicate deciding run-vs-skip from the environment.
    pub fn set_when<F>(&self, when: F)
    where
        F: Fn(&CancellationToken) -> bool + Send + Sync + 'static,
    {
        self.core.config.write().when = Some(Arc::new(when));
    }

    /// Set the retry policy. Without one the step runs a single attempt.
    pub fn set_retry(&self, policy: RetryPolicy) {
        self.core.config.write().retry = Some(policy);
    }

    /// Set the whole-step deadline, applied outside of retries.
    pub fn set_timeout(&self, timeout: Duration) {
        self.core.config.write().timeout = Some(timeout);
    }

    /// Configured retry policy, if any.
    pub fn retry(&self) -> Option<RetryPolicy> {
        self.core.retry()
    }

    /// Configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.core.timeout()
    }

    /// Erased handle for this step, usable as a graph key and inside
    /// condition predicates.
    pub fn to_ref(&self) -> StepRef {
        StepRef {
            node: self.core.clone(),
        }
    }
}

impl<W: Work> fmt::Debug for Step<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name(), self.status())
    }
}

impl<W: Work> From<&Step<W>> for StepRef {
    fn from(step: &Step<W>) -> Self {
        step.to_ref()
    }
}

// ---------------------------------------------------------------------------
// StepRef
// ---------------------------------------------------------------------------

/// Erased reference to a step: what the scheduler, the dependency graph,
/// conditions and the error map see. Equality and hashing use node
/// identity, so a `StepRef` can key maps across clones.
#[derive(Clone)]
pub struct StepRef {
    pub(crate) node: Arc<dyn StepNode>,
}

impl StepRef {
    /// Display name of the step.
    pub fn name(&self) -> String {
        self.node.name()
    }

    /// Current status.
    pub fn status(&self) -> StepStatus {
        self.node.status()
    }

    pub(crate) fn set_status(&self, status: StepStatus) {
        self.node.set_status(status);
    }

    pub(crate) fn condition(&self) -> Option<Condition> {
        self.node.condition()
    }

    pub(crate) fn when(&self) -> Option<When> {
        self.node.when()
    }

    pub(crate) fn retry(&self) -> Option<RetryPolicy> {
        self.node.retry()
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.node.timeout()
    }

    pub(crate) fn do_step(
        &self,
        ctx: CancellationToken,
    ) -> BoxFuture<'static, Result<(), StepError>> {
        Arc::clone(&self.node).do_step(ctx)
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.node) as *const () as usize
    }
}

impl PartialEq for StepRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for StepRef {}

impl Hash for StepRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name(), self.status())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
