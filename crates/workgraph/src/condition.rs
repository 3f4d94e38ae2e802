//! Condition predicates: decide run-vs-cancel from upstream outcomes.
//!
//! A condition is a pure predicate over a step's upstreams. The scheduler
//! evaluates it only after every upstream has reached a terminal status;
//! returning `false` marks the step `Canceled`.

use std::sync::Arc;

use crate::status::StepStatus;
use crate::step::StepRef;

/// Predicate over the terminal statuses of a step's upstreams.
pub type Condition = Arc<dyn Fn(&[StepRef]) -> bool + Send + Sync>;

/// Runs regardless of upstream outcomes.
pub fn always(_upstreams: &[StepRef]) -> bool {
    true
}

/// Default gate: every upstream `Succeeded` or `Skipped`.
pub fn succeeded(upstreams: &[StepRef]) -> bool {
    upstreams
        .iter()
        .all(|u| matches!(u.status(), StepStatus::Succeeded | StepStatus::Skipped))
}

/// At least one upstream `Failed` and none `Canceled`.
pub fn failed(upstreams: &[StepRef]) -> bool {
    upstreams.iter().any(|u| u.status() == StepStatus::Failed)
        && !upstreams.iter().any(|u| u.status() == StepStatus::Canceled)
}

/// Every upstream `Succeeded`, `Failed` or `Skipped`; rejects on any
/// `Canceled` upstream.
pub fn succeeded_or_failed(upstreams: &[StepRef]) -> bool {
    upstreams.iter().all(|u| {
        matches!(
            u.status(),
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    })
}

/// Never runs.
pub fn never(_upstreams: &[StepRef]) -> bool {
    false
}

pub(crate) fn default_condition() -> Condition {
    Arc::new(succeeded)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::from_fn;

    fn with_status(status: StepStatus) -> StepRef {
        let step = from_fn("fixture", |_ctx, _: ()| async { Ok(()) });
        let node = step.to_ref();
        node.set_status(status);
        node
    }

    #[test]
    fn test_empty_upstreams() {
        assert!(always(&[]));
        assert!(succeeded(&[]));
        assert!(succeeded_or_failed(&[]));
        assert!(!failed(&[]));
        assert!(!never(&[]));
    }

    #[test]
    fn test_always_ignores_outcomes() {
        let ups = [
            with_status(StepStatus::Failed),
            with_status(StepStatus::Canceled),
        ];
        assert!(always(&ups));
    }

    #[test]
    fn test_succeeded_accepts_skipped() {
        let ups = [
            with_status(StepStatus::Succeeded),
            with_status(StepStatus::Skipped),
        ];
        assert!(succeeded(&ups));
    }

    #[test]
    fn test_succeeded_rejects_failed_and_canceled() {
        assert!(!succeeded(&[with_status(StepStatus::Failed)]));
        assert!(!succeeded(&[with_status(StepStatus::Canceled)]));
    }

    #[test]
    fn test_failed_needs_a_failure() {
        assert!(!failed(&[with_status(StepStatus::Succeeded)]));
        assert!(failed(&[
            with_status(StepStatus::Succeeded),
            with_status(StepStatus::Failed),
        ]));
    }

    #[test]
    fn test_failed_rejects_canceled() {
        assert!(!failed(&[
            with_status(StepStatus::Failed),
            with_status(StepStatus::Canceled),
        ]));
    }

    #[test]
    fn test_succeeded_or_failed_rejects_only_canceled() {
        assert!(succeeded_or_failed(&[
            with_status(StepStatus::Succeeded),
            with_status(StepStatus::Failed),
            with_status(StepStatus::Skipped),
        ]));
        assert!(!succeeded_or_failed(&[with_status(StepStatus::Canceled)]));
    }

    #[test]
    fn test_conditions_are_pure() {
        let ups = [with_status(StepStatus::Failed)];
        assert_eq!(failed(&ups), failed(&ups));
        assert_eq!(succeeded(&ups), succeeded(&ups));
    }
}
