//! Dependency graph: each step mapped to its ordered incoming links.
//!
//! This mapping is the scheduler's sole source of truth about the
//! topology. Links preserve the order the user added them in; iteration
//! order over steps is unspecified, and scheduler logic must not depend
//! on it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::StepError;
use crate::step::StepRef;

/// Data-flow action attached to a link. Captures the typed upstream and
/// depender handles and performs the type-directed copy into the
/// depender's input slot.
pub(crate) type Flow = Arc<dyn Fn(&CancellationToken) -> Result<(), StepError> + Send + Sync>;

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// An incoming edge of a step. A link with no upstream is an input seed:
/// it is never waited on, and its flow runs unconditionally.
#[derive(Clone)]
pub struct Link {
    pub(crate) upstream: Option<StepRef>,
    pub(crate) flow: Option<Flow>,
}

impl Link {
    /// The upstream this link waits on; `None` for input-seed links.
    pub fn upstream(&self) -> Option<&StepRef> {
        self.upstream.as_ref()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("upstream", &self.upstream.as_ref().map(StepRef::name))
            .field("has_flow", &self.flow.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dependency
// ---------------------------------------------------------------------------

/// Mapping from each step to its ordered list of incoming links.
#[derive(Clone, Default)]
pub struct Dependency {
    deps: HashMap<StepRef, Vec<Link>>,
}

impl Dependency {
    /// Append `links` to `step`'s entry, registering `step` and every
    /// referenced upstream as members.
    pub(crate) fn add_links(&mut self, step: StepRef, links: Vec<Link>) {
        self.register_upstreams(&links);
        self.deps.entry(step).or_default().extend(links);
    }

    fn register_upstreams(&mut self, links: &[Link]) {
        for link in links {
            if let Some(upstream) = &link.upstream {
                self.deps.entry(upstream.clone()).or_default();
            }
        }
    }

    /// Merge `other` into this graph, appending links in their insertion
    /// order. An upstream appearing only as a link target becomes a
    /// member with no incoming links.
    pub fn merge(&mut self, other: Dependency) {
        for (step, links) in other.deps {
            self.add_links(step, links);
        }
    }

    /// All member steps; iteration order is unspecified.
    pub fn steps(&self) -> impl Iterator<Item = &StepRef> {
        self.deps.keys()
    }

    /// Ordered upstream steps of `step` (input-seed links filtered out).
    pub fn upstreams_of(&self, step: &StepRef) -> Vec<StepRef> {
        self.deps
            .get(step)
            .map(|links| links.iter().filter_map(|l| l.upstream.clone()).collect())
            .unwrap_or_default()
    }

    /// Every step that has at least one link from `step`. Linear scan;
    /// not on a hot path.
    pub fn downstreams_of(&self, step: &StepRef) -> Vec<StepRef> {
        self.deps
            .iter()
            .filter(|(_, links)| links.iter().any(|l| l.upstream.as_ref() == Some(step)))
            .map(|(s, _)| s.clone())
            .collect()
    }

    /// The ordered incoming links of `step`.
    pub fn links_of(&self, step: &StepRef) -> &[Link] {
        self.deps.get(step).map_or(&[], Vec::as_slice)
    }

    /// Whether `step` is a member of the graph.
    pub fn contains(&self, step: &StepRef) -> bool {
        self.deps.contains_key(step)
    }

    /// Number of member steps.
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    /// True iff the graph has no steps.
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.deps.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
