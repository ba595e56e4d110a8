//! # Taskweave Core
//!
//! Shared foundation for the Taskweave engine: configuration, the error
//! type, the Task/Run data model, and the collaborator traits the engine
//! consumes (chat completion client).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::TaskweaveConfig;
pub use error::{Result, TaskweaveError};
pub use traits::ChatClient;
pub use types::{
    AgentStep, AsyncStatus, AttemptLog, Run, RunStatus, Task, TaskState, TriggerKind,
    TriggerSource, WorkKind,
};
