//! When predicates: environment-driven skip gates.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Predicate over the ambient cancellation context, evaluated after a
/// step's condition passes. Returning `false` marks the step `Skipped`
/// without running it. Steps without a when predicate always pass.
pub type When = Arc<dyn Fn(&CancellationToken) -> bool + Send + Sync>;

/// Skip unconditionally.
pub fn skip(_ctx: &CancellationToken) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
