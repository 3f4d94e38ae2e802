//! Error types: per-step failures, flow failures, the aggregate workflow
//! error map, and the structural sentinels returned by `run`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::step::StepRef;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Error produced while executing a single step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Free-form failure message.
    #[error("{0}")]
    Message(String),

    /// A wrapped error from inside a step's work.
    #[error("{0}")]
    Source(Box<dyn std::error::Error + Send + Sync>),

    /// The step body panicked; the panic was captured and reified.
    #[error("step panicked: {0}")]
    Panic(String),

    /// The step exceeded its configured timeout.
    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    /// The ambient context was canceled while the step ran.
    #[error("step canceled")]
    Canceled,

    /// A link's flow action failed while feeding this step's input.
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl StepError {
    /// Shorthand for a free-form message error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for StepError {
    fn from(source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Source(source)
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

// ---------------------------------------------------------------------------
// FlowError
// ---------------------------------------------------------------------------

/// Failure of a link's data-flow action. The depender's work is not
/// invoked; the flow error is recorded as the depender's result. `from`
/// names the upstream the data was flowing out of, `None` for input-seed
/// links.
#[derive(Debug)]
pub struct FlowError {
    pub from: Option<String>,
    pub source: Box<StepError>,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.from {
            Some(name) => write!(f, "flow from '{name}' failed: {}", self.source),
            None => write!(f, "input flow failed: {}", self.source),
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

// ---------------------------------------------------------------------------
// WorkflowError (aggregate error map)
// ---------------------------------------------------------------------------

/// Aggregate result of a workflow run: one entry per step that entered
/// `Running`, mapping to that step's final error (`None` for success).
/// Steps that never ran (`Canceled`, `Skipped`) have no entry.
///
/// Callers should use [`is_nil`](Self::is_nil) rather than entry counting
/// to decide whether the run failed.
#[derive(Debug, Clone, Default)]
pub struct WorkflowError {
    entries: HashMap<StepRef, Option<Arc<StepError>>>,
}

impl WorkflowError {
    pub(crate) fn insert(&mut self, step: StepRef, err: Option<Arc<StepError>>) {
        self.entries.insert(step, err);
    }

    /// True iff every recorded step finished without error.
    pub fn is_nil(&self) -> bool {
        self.entries.values().all(Option::is_none)
    }

    /// Final error of `step`. Outer `None` means the step never entered
    /// `Running`; `Some(None)` means it ran and succeeded.
    pub fn get(&self, step: &StepRef) -> Option<Option<Arc<StepError>>> {
        self.entries.get(step).cloned()
    }

    /// Number of steps that entered `Running`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff no step entered `Running`.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate all recorded steps with their final errors.
    pub fn iter(&self) -> impl Iterator<Item = (&StepRef, Option<&StepError>)> {
        self.entries.iter().map(|(step, err)| (step, err.as_deref()))
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (step, err) in &self.entries {
            if let Some(err) = err {
                writeln!(f, "{} [{}]: {}", step.name(), step.status(), err)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for WorkflowError {}

// ---------------------------------------------------------------------------
// Structural errors
// ---------------------------------------------------------------------------

/// Steps whose status was not `Pending` when a run started.
#[derive(Debug, Clone)]
pub struct InitStatusError(pub(crate) Vec<StepRef>);

impl InitStatusError {
    /// The offending steps.
    pub fn steps(&self) -> &[StepRef] {
        &self.0
    }
}

impl fmt::Display for InitStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "unexpected initial step status:")?;
        for step in &self.0 {
            writeln!(f, "{} [{}]", step.name(), step.status())?;
        }
        Ok(())
    }
}

/// Steps on or downstream of a dependency cycle, each mapped to the
/// upstreams that kept it from being scheduled.
#[derive(Debug, Clone)]
pub struct CycleError(pub(crate) HashMap<StepRef, Vec<StepRef>>);

impl CycleError {
    /// The steps caught in (or downstream of) the cycle.
    pub fn steps(&self) -> impl Iterator<Item = &StepRef> {
        self.0.keys()
    }

    /// The unschedulable upstreams of `step`, if `step` is part of the
    /// reported cycle.
    pub fn offending_upstreams(&self, step: &StepRef) -> Option<&[StepRef]> {
        self.0.get(step).map(Vec::as_slice)
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "following steps introduce a cycle dependency:")?;
        for (step, upstreams) in &self.0 {
            let names: Vec<String> = upstreams.iter().map(StepRef::name).collect();
            writeln!(f, "{}: [{}]", step.name(), names.join(", "))?;
        }
        Ok(())
    }
}

/// Error surface of [`Workflow::run`](crate::workflow::Workflow::run) and
/// [`Workflow::reset`](crate::workflow::Workflow::reset).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The workflow is already running; wait for it to terminate.
    #[error("workflow is running, wait for it to terminate")]
    IsRunning,

    /// The workflow has already run; inspect `err()` and `reset()` it
    /// before running again.
    #[error("workflow has already run; check err() and call reset() before running again")]
    HasRun,

    /// Preflight found steps that were not `Pending`.
    #[error("{0}")]
    UnexpectedInitStatus(InitStatusError),

    /// Preflight found a dependency cycle.
    #[error("{0}")]
    CycleDependency(CycleError),

    /// The run terminated and at least one step failed.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::from_fn;
    use crate::status::StepStatus;

    fn fixture(name: &'static str) -> StepRef {
        from_fn(name, |_ctx, _: ()| async { Ok(()) }).to_ref()
    }

    #[test]
    fn test_workflow_error_is_nil() {
        let mut map = WorkflowError::default();
        assert!(map.is_nil());

        map.insert(fixture("ok"), None);
        assert!(map.is_nil());

        map.insert(fixture("bad"), Some(Arc::new(StepError::msg("boom"))));
        assert!(!map.is_nil());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_workflow_error_display_lists_failures_only() {
        let ok = fixture("ok");
        ok.set_status(StepStatus::Succeeded);
        let bad = fixture("bad");
        bad.set_status(StepStatus::Failed);

        let mut map = WorkflowError::default();
        map.insert(ok, None);
        map.insert(bad, Some(Arc::new(StepError::msg("boom"))));

        let rendered = map.to_string();
        assert!(rendered.contains("bad [Failed]: boom"));
        assert!(!rendered.contains("ok ["));
    }

    #[test]
    fn test_flow_error_display() {
        let err = FlowError {
            from: Some("producer".to_string()),
            source: Box::new(StepError::msg("bad conversion")),
        };
        assert_eq!(err.to_string(), "flow from 'producer' failed: bad conversion");

        let seeded = FlowError {
            from: None,
            source: Box::new(StepError::msg("invalid seed")),
        };
        assert_eq!(seeded.to_string(), "input flow failed: invalid seed");
    }

    #[test]
    fn test_cycle_error_display() {
        let a = fixture("a");
        let b = fixture("b");
        let mut cycle = HashMap::new();
        cycle.insert(a.clone(), vec![b.clone()]);
        let err = CycleError(cycle);
        assert!(err.to_string().contains("a: [b]"));
        assert_eq!(err.offending_upstreams(&a), Some(&[b][..]));
    }

    #[test]
    fn test_step_error_conversions() {
        let err: StepError = "plain".into();
        assert_eq!(err.to_string(), "plain");

        let io: Box<dyn std::error::Error + Send + Sync> =
            Box::new(std::io::Error::other("disk gone"));
        let err = StepError::from(io);
        assert!(err.to_string().contains("disk gone"));
    }
}
