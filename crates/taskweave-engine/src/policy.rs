//! Execution policy — the validated, bounded configuration parsed from a
//! task's stored configuration blob.
//!
//! One pass at the boundary: every field absent, malformed, or out of
//! range silently falls back to its default, so internal code never
//! re-checks presence or ranges. Recomputed fresh on every execution.

use serde::Serialize;
use serde_json::Value;

use taskweave_pipeline::ExecutionMode;

/// Resolved execution policy. Serialized (camelCase) into the run trace.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPolicy {
    pub execution_mode: ExecutionMode,
    /// Per-attempt deadline, 30–1800s.
    pub timeout_seconds: u64,
    /// Extra attempts after the first, 0–5.
    pub max_retries: u32,
    /// Wait between attempts, 0–120s.
    pub retry_delay_seconds: u64,
    /// Whether results are archived to the task's group.
    #[serde(rename = "archiveToCompany")]
    pub archive_to_group: bool,
    /// Whether an exhausted execution may requeue the task.
    pub queue_retry_on_failure: bool,
    /// Window for counting prior failures, 5–1440 minutes.
    pub retry_window_minutes: i64,
    /// Failure-cycle budget within the window, 1–20.
    pub max_failure_cycles: i64,
}

impl ExecutionPolicy {
    /// Parse a policy from the raw configuration blob. `has_group`
    /// drives the archive default.
    pub fn resolve(raw: &str, has_group: bool) -> Self {
        let doc: Value = serde_json::from_str(raw).unwrap_or(Value::Null);

        let execution_mode = match doc.get("executionMode").and_then(|v| v.as_str()) {
            Some("parallel") => ExecutionMode::Parallel,
            _ => ExecutionMode::Serial,
        };

        Self {
            execution_mode,
            timeout_seconds: int_in_range(&doc, "timeoutSeconds", 30, 1800, 180) as u64,
            max_retries: int_in_range(&doc, "maxRetries", 0, 5, 1) as u32,
            retry_delay_seconds: int_in_range(&doc, "retryDelaySeconds", 0, 120, 3) as u64,
            archive_to_group: doc
                .get("archiveToCompany")
                .and_then(|v| v.as_bool())
                .unwrap_or(has_group),
            queue_retry_on_failure: doc
                .get("queueRetryOnFailure")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            retry_window_minutes: int_in_range(&doc, "retryWindowMinutes", 5, 1440, 60),
            max_failure_cycles: int_in_range(&doc, "maxFailureCycles", 1, 20, 3),
        }
    }

    /// Total attempts the runner will make.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Read an integer field; out-of-range and malformed values fall back to
/// the default rather than clamping.
fn int_in_range(doc: &Value, key: &str, min: i64, max: i64, default: i64) -> i64 {
    doc.get(key)
        .and_then(|v| v.as_i64())
        .filter(|n| *n >= min && *n <= max)
        .unwrap_or(default)
}
