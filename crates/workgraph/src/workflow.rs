//! Workflow: preflight validation and the tick-driven scheduler.
//!
//! # Execution flow
//!
//! 1. `run` takes the non-blocking run-lock and, if a workflow-level when
//!    predicate rejects the environment, marks every step `Skipped`.
//! 2. Preflight asserts a clean initial state and rejects cyclic graphs.
//! 3. Each tick scans pending steps; a step whose upstreams all
//!    terminated is gated through its condition (cancel), its when
//!    predicate (skip), and the concurrency lease, then spawned as its
//!    own task.
//! 4. A spawned task applies its links' flow actions in insertion order,
//!    invokes the step's work under the optional timeout and retry
//!    policy, records the result in the error map, and signals the
//!    scheduler to tick again.
//! 5. The loop ends when every step is terminal; `run` then waits for the
//!    task tracker so no task outlives it.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::builder::IntoDependency;
use crate::condition;
use crate::dependency::{Dependency, Link};
use crate::error::{CycleError, FlowError, InitStatusError, RunError, StepError, WorkflowError};
use crate::retry;
use crate::status::StepStatus;
use crate::step::StepRef;
use crate::when::When;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A collection of connected steps forming a directed acyclic graph.
///
/// Steps execute in topological order; outputs flow from upstreams to the
/// inputs of dependers through link flow actions. A workflow is
/// single-shot: after a run terminates, call [`reset`](Self::reset)
/// (re-applying options) before running again.
pub struct Workflow {
    deps: Dependency,
    /// `Some` once a run initialized it; doubles as the has-run marker.
    errs: Arc<RwLock<Option<WorkflowError>>>,
    when: Option<When>,
    max_concurrency: Mutex<Option<usize>>,
    running: tokio::sync::Mutex<()>,
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

impl Workflow {
    /// An empty workflow.
    pub fn new() -> Self {
        Self {
            deps: Dependency::default(),
            errs: Arc::new(RwLock::new(None)),
            when: None,
            max_concurrency: Mutex::new(None),
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Merge a sub-graph into the workflow. Additive and idempotent in
    /// membership: links append in order, steps register once.
    pub fn add(&mut self, sub: impl IntoDependency) -> &mut Self {
        self.deps.merge(sub.into_dependency());
        self
    }

    /// Cap the number of concurrently running steps. A step must acquire
    /// a lease before entering `Running` and releases it when its task
    /// terminates. Cleared by [`reset`](Self::reset).
    pub fn with_max_concurrency(&mut self, n: usize) -> &mut Self {
        *self.max_concurrency.lock() = Some(n);
        self
    }

    /// Workflow-level when predicate, evaluated once at the top of `run`;
    /// when it returns false every step is marked `Skipped` and the run
    /// returns successfully.
    pub fn with_when<F>(&mut self, when: F) -> &mut Self
    where
        F: Fn(&CancellationToken) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(when));
        self
    }

    /// Snapshot copy of the dependency graph for inspection.
    pub fn dep(&self) -> Dependency {
        self.deps.clone()
    }

    /// True iff every step is in a terminal status.
    pub fn is_terminated(&self) -> bool {
        self.deps.steps().all(|s| s.status().is_terminated())
    }

    /// Error map of the last run, or `None` while the workflow has not
    /// run or every step that ran succeeded.
    pub fn err(&self) -> Option<WorkflowError> {
        let errs = self.errs.read();
        match errs.as_ref() {
            Some(map) if !map.is_nil() => Some(map.clone()),
            _ => None,
        }
    }

    /// Reset every step to `Pending` and discard the error map, keeping
    /// the graph intact. Options must be re-applied afterwards. Fails
    /// with [`RunError::IsRunning`] while a run is in flight.
    pub fn reset(&self) -> Result<(), RunError> {
        let _guard = self.running.try_lock().map_err(|_| RunError::IsRunning)?;
        for step in self.deps.steps() {
            step.set_status(StepStatus::Pending);
        }
        *self.errs.write() = None;
        *self.max_concurrency.lock() = None;
        Ok(())
    }

    /// Run the workflow to termination and return `Ok(())` iff every step
    /// that ran succeeded. Blocks the caller; step tasks run concurrently
    /// on the ambient tokio runtime. `ctx` propagates to every step's
    /// work; cancellation does not abort in-flight tasks, the scheduler
    /// always waits for them.
    pub async fn run(&self, ctx: &CancellationToken) -> Result<(), RunError> {
        let _guard = self.running.try_lock().map_err(|_| RunError::IsRunning)?;

        if let Some(when) = &self.when {
            if !when(ctx) {
                for step in self.deps.steps() {
                    step.set_status(StepStatus::Skipped);
                }
                tracing::debug!("workflow-level when rejected, all steps skipped");
                return Ok(());
            }
        }

        self.preflight()?;
        *self.errs.write() = Some(WorkflowError::default());

        let cap = *self.max_concurrency.lock();
        let lease = cap.map(|n| Arc::new(Semaphore::new(n)));
        // Buffered to the step count so any task can publish termination
        // without blocking.
        let (signal_tx, mut signal_rx) = mpsc::channel::<()>(self.deps.len().max(1));
        let tracker = TaskTracker::new();

        tracing::debug!(steps = self.deps.len(), "workflow run started");

        self.tick(ctx, &signal_tx, lease.as_ref(), &tracker).await;
        while !self.is_terminated() {
            if signal_rx.recv().await.is_none() {
                break;
            }
            self.tick(ctx, &signal_tx, lease.as_ref(), &tracker).await;
        }
        tracker.close();
        tracker.wait().await;

        let errs = self.errs.read();
        match errs.as_ref() {
            Some(map) if !map.is_nil() => {
                tracing::debug!(failed = map.len(), "workflow run terminated with failures");
                Err(RunError::Workflow(map.clone()))
            }
            _ => {
                tracing::debug!("workflow run terminated");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Preflight
    // -----------------------------------------------------------------------

    /// Validate the initial state: the workflow has not run, every step is
    /// `Pending`, and the graph is acyclic. Statuses are untouched, so
    /// every step is still `Pending` on return.
    fn preflight(&self) -> Result<(), RunError> {
        if self.errs.read().is_some() {
            return Err(RunError::HasRun);
        }

        let unexpected: Vec<StepRef> = self
            .deps
            .steps()
            .filter(|s| s.status() != StepStatus::Pending)
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(RunError::UnexpectedInitStatus(InitStatusError(unexpected)));
        }

        // Iterative topological scan: mark a step scanned once every
        // upstream is scanned; stop when a full pass marks nothing new.
        let mut scanned: HashSet<StepRef> = HashSet::with_capacity(self.deps.len());
        loop {
            let mut progressed = false;
            for step in self.deps.steps() {
                if scanned.contains(step) {
                    continue;
                }
                if self
                    .deps
                    .upstreams_of(step)
                    .iter()
                    .all(|u| scanned.contains(u))
                {
                    scanned.insert(step.clone());
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        // Anything not scanned lies on or downstream of a cycle.
        if scanned.len() != self.deps.len() {
            let mut cycle: HashMap<StepRef, Vec<StepRef>> = HashMap::new();
            for step in self.deps.steps() {
                if scanned.contains(step) {
                    continue;
                }
                let offending: Vec<StepRef> = self
                    .deps
                    .upstreams_of(step)
                    .into_iter()
                    .filter(|u| !scanned.contains(u))
                    .collect();
                cycle.insert(step.clone(), offending);
            }
            return Err(RunError::CycleDependency(CycleError(cycle)));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// One scheduler pass: promote every pending step whose upstreams all
    /// terminated. Does not block on running steps; it may block on the
    /// concurrency lease, which is the intended back-pressure.
    async fn tick(
        &self,
        ctx: &CancellationToken,
        signal: &mpsc::Sender<()>,
        lease: Option<&Arc<Semaphore>>,
        tracker: &TaskTracker,
    ) {
        'steps: for step in self.deps.steps() {
            if step.status() != StepStatus::Pending {
                continue;
            }
            let upstreams = self.deps.upstreams_of(step);
            for upstream in &upstreams {
                if !upstream.status().is_terminated() {
                    continue 'steps;
                }
            }

            let cond = step
                .condition()
                .unwrap_or_else(condition::default_condition);
            if !cond(&upstreams) {
                step.set_status(StepStatus::Canceled);
                tracing::debug!(step = %step, "condition rejected, step canceled");
                let _ = signal.try_send(());
                continue;
            }

            if let Some(when) = step.when() {
                if !when(ctx) {
                    step.set_status(StepStatus::Skipped);
                    tracing::debug!(step = %step, "when rejected, step skipped");
                    let _ = signal.try_send(());
                    continue;
                }
            }

            let permit = match lease {
                Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    // The semaphore is never closed during a run.
                    Err(_) => return,
                },
                None => None,
            };

            step.set_status(StepStatus::Running);
            tracing::debug!(step = %step, "step running");

            let step = step.clone();
            let links = self.deps.links_of(&step).to_vec();
            let errs = Arc::clone(&self.errs);
            let ctx = ctx.clone();
            let signal = signal.clone();
            tracker.spawn(async move {
                let err = execute_step(&step, links, ctx).await.err().map(Arc::new);
                if let Some(map) = errs.write().as_mut() {
                    map.insert(step.clone(), err.clone());
                }
                match &err {
                    Some(err) => {
                        step.set_status(StepStatus::Failed);
                        tracing::debug!(step = %step, error = %err, "step failed");
                    }
                    None => {
                        step.set_status(StepStatus::Succeeded);
                        tracing::debug!(step = %step, "step succeeded");
                    }
                }
                drop(permit);
                let _ = signal.send(()).await;
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Step execution
// ---------------------------------------------------------------------------

/// Run one step to completion: flows plus work, under the step's optional
/// timeout and retry policy.
async fn execute_step(
    step: &StepRef,
    links: Vec<Link>,
    ctx: CancellationToken,
) -> Result<(), StepError> {
    let (ctx, deadline) = match step.timeout() {
        Some(timeout) => (ctx.child_token(), Some((Instant::now() + timeout, timeout))),
        None => (ctx, None),
    };

    let attempt = make_attempt(step.clone(), links, ctx.clone(), deadline);

    match step.retry() {
        None => {
            let mut attempt = attempt;
            attempt().await
        }
        Some(policy) => {
            retry::run_with_retry(&policy, &ctx, attempt, deadline.map(|(at, _)| at)).await
        }
    }
}

/// One deadline-bounded invocation of the step's flows and work. The
/// derived context is canceled when the deadline fires so nested work
/// observes it.
fn make_attempt(
    step: StepRef,
    links: Vec<Link>,
    ctx: CancellationToken,
    deadline: Option<(Instant, Duration)>,
) -> impl FnMut() -> BoxFuture<'static, Result<(), StepError>> {
    move || {
        let step = step.clone();
        let links = links.clone();
        let ctx = ctx.clone();
        Box::pin(async move {
            let work = run_once(step, links, ctx.clone());
            match deadline {
                Some((at, timeout)) => match tokio::time::timeout_at(at, work).await {
                    Ok(result) => result,
                    Err(_) => {
                        ctx.cancel();
                        Err(StepError::Timeout(timeout))
                    }
                },
                None => work.await,
            }
        })
    }
}

/// One attempt: apply flow actions in link insertion order, then invoke
/// the step's work. Both are panic-safe; a panic is reified as an error
/// and never tears down the scheduler.
async fn run_once(step: StepRef, links: Vec<Link>, ctx: CancellationToken) -> Result<(), StepError> {
    for link in &links {
        if let Some(upstream) = &link.upstream {
            // Data flows only out of steps that actually ran, so that
            // always-gated dependers can observe partial results.
            match upstream.status() {
                StepStatus::Succeeded | StepStatus::Failed => {}
                _ => continue,
            }
        }
        let Some(flow) = &link.flow else {
            continue;
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| flow(&ctx)));
        let flow_err = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => Some(StepError::Panic(panic_message(panic))),
        };
        if let Some(err) = flow_err {
            return Err(StepError::Flow(FlowError {
                from: link.upstream.as_ref().map(StepRef::name),
                source: Box::new(err),
            }));
        }
    }

    match AssertUnwindSafe(step.do_step(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(StepError::Panic(panic_message(panic))),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
