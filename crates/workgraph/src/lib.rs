//! In-process workflow engine: steps arranged as a directed acyclic
//! graph with typed data flow, conditional execution, retry with
//! backoff, timeouts, and workflow-level concurrency limits.
//!
//! - `status` -- step lifecycle statuses
//! - `condition` -- run-vs-cancel predicates over upstream statuses
//! - `when` -- run-vs-skip predicates over the ambient context
//! - `retry` -- backoff configuration and the bounded retry harness
//! - `step` -- the [`Work`] trait, typed [`Step`] handles, erased [`StepRef`]
//! - `dependency` -- the step-to-incoming-links graph
//! - `builder` -- fluent construction of dependency sub-graphs
//! - `error` -- step, flow, and workflow error types
//! - `workflow` -- preflight and the tick-driven scheduler
//! - `func` -- steps from plain closures
//! - `stage` -- a workflow wrapped as a single step
//!
//! # Example
//!
//! ```
//! use tokio_util::sync::CancellationToken;
//! use workgraph::{Workflow, from_fn, step};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let concat = from_fn("concat", |_ctx, parts: Vec<String>| async move {
//!     Ok(parts.concat())
//! });
//! let upper = from_fn("to-upper", |_ctx, s: String| async move {
//!     Ok(s.to_uppercase())
//! });
//!
//! let mut wf = Workflow::new();
//! wf.add(step(&upper).direct_depends_on(&concat));
//!
//! concat.set_input(vec!["hello".into(), ",".into(), "world".into()]);
//! wf.run(&CancellationToken::new()).await.unwrap();
//! assert_eq!(upper.output().as_deref(), Some("HELLO,WORLD"));
//! # });
//! ```

pub mod builder;
pub mod condition;
pub mod dependency;
pub mod error;
pub mod func;
pub mod retry;
pub mod stage;
pub mod status;
pub mod step;
pub mod when;
pub mod workflow;

pub use builder::{IntoDependency, StepBuilder, StepsBuilder, step, steps};
pub use condition::Condition;
pub use dependency::{Dependency, Link};
pub use error::{CycleError, FlowError, InitStatusError, RunError, StepError, WorkflowError};
pub use func::{FnWork, adapter, consumer, from_fn, producer};
pub use retry::{ExponentialBackoff, RetryPolicy, StopPredicate};
pub use stage::Stage;
pub use status::StepStatus;
pub use step::{Step, StepRef, Work};
pub use when::When;
pub use workflow::Workflow;
