//! # Taskweave Engine
//!
//! The scheduling and execution core: when should a task run, who gets to
//! run it, and how one execution is driven to a durable outcome.
//!
//! ```text
//! Scheduler (tokio interval)
//!   └── due scan → Runner.claim_work (conditional update, one winner)
//!         └── Runner.execute_claimed
//!               ├── ExecutionPolicy (defaults + bounds from config blob)
//!               ├── attempt loop: AgentPipeline under per-attempt deadline
//!               ├── retry with cancellable delay
//!               ├── on exhaustion: failure-requeue decision
//!               └── finalize Run + Task in one transaction
//! ```
//!
//! The schedule calculator (`trigger`) is pure; the claim is the only
//! cross-process mutual-exclusion mechanism and lives in the store's
//! conditional update.

pub mod policy;
pub mod runner;
pub mod scheduler;
pub mod trigger;

pub use policy::ExecutionPolicy;
pub use runner::{RequeueDecision, Runner};
pub use scheduler::Scheduler;
pub use trigger::{Trigger, compute_next_due, parse_timezone};
