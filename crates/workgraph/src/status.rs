//! Step lifecycle statuses.

use std::fmt;

/// Lifecycle status of a step within a workflow run.
///
/// Transitions are monotonic toward a terminal status:
///
/// ```text
/// Pending -> Running  -> Succeeded | Failed
/// Pending -> Canceled   (condition rejected the upstream outcomes)
/// Pending -> Skipped    (a when predicate rejected the environment)
/// ```
///
/// `Canceled` and `Skipped` are distinct: `Canceled` means upstream state
/// disqualified the step and propagates through the default condition,
/// while `Skipped` means the environment disqualified it and is treated by
/// the default condition the same as `Succeeded`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StepStatus {
    /// Initial status; the step has not been promoted yet.
    #[default]
    Pending,
    /// The step's work is executing.
    Running,
    /// The step's work returned without error.
    Succeeded,
    /// The step's work returned an error.
    Failed,
    /// The step's condition rejected its upstream outcomes.
    Canceled,
    /// A when predicate rejected the ambient environment.
    Skipped,
}

impl StepStatus {
    /// Whether the status is terminal. A terminated step never changes
    /// status again within a run.
    pub fn is_terminated(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Canceled | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "Pending",
            StepStatus::Running => "Running",
            StepStatus::Succeeded => "Succeeded",
            StepStatus::Failed => "Failed",
            StepStatus::Canceled => "Canceled",
            StepStatus::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_pending() {
        assert_eq!(StepStatus::default(), StepStatus::Pending);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StepStatus::Pending.is_terminated());
        assert!(!StepStatus::Running.is_terminated());
        assert!(StepStatus::Succeeded.is_terminated());
        assert!(StepStatus::Failed.is_terminated());
        assert!(StepStatus::Canceled.is_terminated());
        assert!(StepStatus::Skipped.is_terminated());
    }

    #[test]
    fn test_display() {
        assert_eq!(StepStatus::Pending.to_string(), "Pending");
        assert_eq!(StepStatus::Skipped.to_string(), "Skipped");
    }
}
