//! Task and Run definitions — the core data model for scheduled work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskweaveError};

/// A unit of recurring or one-off work, owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: String,
    /// Owning user. All mutations are scoped to this owner.
    pub owner_id: String,
    /// Optional group the task belongs to.
    pub group_id: Option<String>,
    /// Human-readable name.
    pub name: String,
    /// Free-text description of the work.
    pub description: String,
    /// What kind of output the work produces.
    pub kind: WorkKind,
    /// Optional data source hint consumed by the planning stage.
    pub input_source: Option<String>,
    /// Optional reporting rule consumed by the planning stage.
    pub report_rule: Option<String>,
    /// When/how the task triggers.
    pub trigger_type: TriggerKind,
    /// Trigger payload — interpretation depends on `trigger_type`:
    /// absolute timestamp, `HH:MM`, or integer hours.
    pub trigger_value: String,
    /// IANA timezone name the trigger is evaluated in.
    pub timezone: String,
    /// Next computed due instant. Always `None` for manual triggers.
    pub next_due_at: Option<DateTime<Utc>>,
    /// Execution lifecycle status.
    pub async_status: AsyncStatus,
    /// Board status (`todo`/`done`).
    pub status: TaskState,
    /// Last time an execution finished.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Free-form summary of the last result.
    pub result_summary: Option<String>,
    /// Serialized execution-policy blob (see `ExecutionPolicy`).
    pub config_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new idle task with no schedule computed yet.
    pub fn new(
        owner_id: &str,
        name: &str,
        kind: WorkKind,
        trigger_type: TriggerKind,
        trigger_value: &str,
        timezone: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            group_id: None,
            name: name.to_string(),
            description: String::new(),
            kind,
            input_source: None,
            report_rule: None,
            trigger_type,
            trigger_value: trigger_value.to_string(),
            timezone: timezone.to_string(),
            next_due_at: None,
            async_status: AsyncStatus::Idle,
            status: TaskState::Todo,
            last_run_at: None,
            result_summary: None,
            config_json: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// What kind of output a task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    General,
    Report,
    Analysis,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::General => "general",
            WorkKind::Report => "report",
            WorkKind::Analysis => "analysis",
        }
    }

    /// Tolerant parse for stored rows; unknown kinds read as `general`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "report" => WorkKind::Report,
            "analysis" => WorkKind::Analysis,
            _ => WorkKind::General,
        }
    }
}

/// Closed set of trigger kinds. The trigger payload stays in
/// `Task::trigger_value`; the schedule calculator parses it per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Once,
    Daily,
    IntervalHours,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Once => "once",
            TriggerKind::Daily => "daily",
            TriggerKind::IntervalHours => "interval_hours",
        }
    }

    /// Strict parse used at API boundaries. Empty input means manual.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "manual" => Ok(TriggerKind::Manual),
            "once" => Ok(TriggerKind::Once),
            "daily" => Ok(TriggerKind::Daily),
            "interval_hours" => Ok(TriggerKind::IntervalHours),
            other => Err(TaskweaveError::Validation(format!(
                "unsupported trigger type '{other}'"
            ))),
        }
    }

    /// Tolerant parse for stored rows; unknown kinds read as `manual`
    /// (which never auto-runs).
    pub fn from_str_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or(TriggerKind::Manual)
    }
}

/// Execution lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncStatus {
    Idle,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl AsyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncStatus::Idle => "idle",
            AsyncStatus::Scheduled => "scheduled",
            AsyncStatus::Running => "running",
            AsyncStatus::Completed => "completed",
            AsyncStatus::Failed => "failed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "scheduled" => AsyncStatus::Scheduled,
            "running" => AsyncStatus::Running,
            "completed" => AsyncStatus::Completed,
            "failed" => AsyncStatus::Failed,
            _ => AsyncStatus::Idle,
        }
    }
}

/// Board status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Todo,
    Done,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Todo => "todo",
            TaskState::Done => "done",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "done" => TaskState::Done,
            _ => TaskState::Todo,
        }
    }
}

/// Where an execution was initiated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Scheduler,
    Batch,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Scheduler => "scheduler",
            TriggerSource::Batch => "batch",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "scheduler" => TriggerSource::Scheduler,
            "batch" => TriggerSource::Batch,
            _ => TriggerSource::Manual,
        }
    }
}

/// Status of one execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }
}

/// An immutable (once finalized) record of one execution of a Task.
///
/// Created at claim time with status `running`; finalized exactly once by
/// the runner inside the same transaction that updates the owning task.
/// The trace is append-only while running and sealed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub task_id: String,
    pub owner_id: String,
    pub group_id: Option<String>,
    pub trigger_source: TriggerSource,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Human summary of the outcome.
    pub summary: String,
    /// Final answer text produced by the pipeline.
    pub final_answer: String,
    /// Confidence score in 0.0–1.0.
    pub confidence: f64,
    /// Trace payload: per-attempt logs, resolved policy, pipeline steps,
    /// next-actions, evidence, and the requeue decision on failure.
    pub trace: serde_json::Value,
}

impl Run {
    /// Open a fresh `running` record for a claimed task.
    pub fn begin(task: &Task, source: TriggerSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            owner_id: task.owner_id.clone(),
            group_id: task.group_id.clone(),
            trigger_source: source,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            summary: String::new(),
            final_answer: String::new(),
            confidence: 0.0,
            trace: serde_json::Value::Null,
        }
    }
}

/// One stage's output within a run trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStep {
    /// Stage name ("planner", "researcher", "critic", "synthesizer").
    pub agent: String,
    /// What the stage was asked to do.
    pub purpose: String,
    /// The stage's output text.
    pub output: String,
    /// Wall-clock cost of the stage's model call.
    pub duration_ms: u64,
}

/// One attempt entry in a run trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptLog {
    /// 1-based attempt number.
    pub attempt: u32,
    pub duration_ms: u64,
    /// "completed" or "failed".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl AttemptLog {
    pub fn completed(attempt: u32, duration_ms: u64, summary: &str) -> Self {
        Self {
            attempt,
            duration_ms,
            status: "completed".into(),
            error: None,
            summary: Some(summary.to_string()),
        }
    }

    pub fn failed(attempt: u32, duration_ms: u64, error: &str) -> Self {
        Self {
            attempt,
            duration_ms,
            status: "failed".into(),
            error: Some(error.to_string()),
            summary: None,
        }
    }
}
