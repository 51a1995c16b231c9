//! # Background Jobs
//!
//! Bounded-retry job execution for work that must not block the caller, such
//! as the package conversion check.
//!
//! ```text
//! Queued -> Running -> Succeeded | Skipped | Failed
//!              |
//!              +-> Retrying -> Running ...
//!              +-> DeadLettered -> (requeue) -> Queued
//! ```

pub mod dead_letter;
pub mod retry;
pub mod runner;
pub mod state;

pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use retry::RetryPolicy;
pub use runner::{JobHandler, JobId, JobOutcome, JobRunner, JobStatus, RunnerOptions};
pub use state::{determine_target_state, JobEvent, JobState};
