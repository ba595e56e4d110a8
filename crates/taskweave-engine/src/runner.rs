//! Runner — drives one claimed task to completion.
//!
//! Exposes exactly two entry points: `claim_work` (the exclusive-claim
//! protocol) and `execute_claimed` (the attempt/retry/timeout loop with
//! transactional finalize). Both the scheduler and direct "run now"
//! callers go through the same pair.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

use taskweave_core::error::{Result, TaskweaveError};
use taskweave_core::types::{
    AsyncStatus, AttemptLog, Run, RunStatus, Task, TaskState, TriggerKind, TriggerSource,
};
use taskweave_pipeline::{AgentPipeline, PipelineInput, PipelineResult};
use taskweave_store::TaskStore;

use crate::policy::ExecutionPolicy;
use crate::trigger;

/// The requeue decision recorded into a failed run's trace.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueDecision {
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Which failure cycle this would be within the retry window.
    pub cycle: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
    pub max_failure_cycles: i64,
}

/// Executes claimed tasks against the pipeline and persists the outcome.
pub struct Runner {
    store: Arc<TaskStore>,
    pipeline: Arc<AgentPipeline>,
}

impl Runner {
    pub fn new(store: Arc<TaskStore>, pipeline: Arc<AgentPipeline>) -> Self {
        Self { store, pipeline }
    }

    /// The exclusive-claim protocol: confirm ownership and existence,
    /// then attempt the conditional status flip. A lost race returns
    /// `(task, false)` without error; only a missing task or a store
    /// failure is an error. On success the returned task is the
    /// post-claim snapshot.
    pub fn claim_work(&self, task_id: &str, owner_id: &str) -> Result<(Task, bool)> {
        let task = self
            .store
            .get_task_for_owner(task_id, owner_id)?
            .ok_or_else(|| TaskweaveError::NotFound(format!("task {task_id}")))?;

        if !self.store.claim_task(task_id, owner_id)? {
            return Ok((task, false));
        }

        let claimed = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| TaskweaveError::NotFound(format!("task {task_id}")))?;
        Ok((claimed, true))
    }

    /// Execute a claimed task to completion: attempt loop under the
    /// policy's per-attempt deadline, retry with bounded delay, then
    /// finalize the Run and the Task together in one transaction.
    ///
    /// When the finalized Run is `failed` this returns an error carrying
    /// the persisted failure reason; the Run and Task were still durably
    /// updated. Only a store failure during finalize means nothing
    /// durable happened, in which case the caller may retry the save,
    /// not the pipeline.
    pub async fn execute_claimed(
        &self,
        cancel: &CancellationToken,
        task: Task,
        source: TriggerSource,
    ) -> Result<Run> {
        let policy = ExecutionPolicy::resolve(&task.config_json, task.group_id.is_some());
        let mut run = Run::begin(&task, source);
        self.store.insert_run(&run)?;

        tracing::info!(
            "▶ Executing task '{}' ({}) via {} [{} mode, {}s timeout, {} retries]",
            task.name,
            task.id,
            source.as_str(),
            policy.execution_mode.as_str(),
            policy.timeout_seconds,
            policy.max_retries,
        );

        let input = PipelineInput::from_task(&task);
        let mut attempts: Vec<AttemptLog> = Vec::new();
        let mut outcome: Option<PipelineResult> = None;
        let mut last_error = String::new();

        for attempt in 1..=policy.total_attempts() {
            let started = Instant::now();
            let result = timeout(
                Duration::from_secs(policy.timeout_seconds),
                self.pipeline.execute(&input, policy.execution_mode),
            )
            .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(Ok(res)) => {
                    attempts.push(AttemptLog::completed(attempt, duration_ms, &res.summary));
                    outcome = Some(res);
                    break;
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    attempts.push(AttemptLog::failed(attempt, duration_ms, &last_error));
                }
                Err(_) => {
                    // Deadline exceeded, classified distinctly so trace
                    // consumers can tell slow dependencies from logic errors.
                    last_error = format!("execution timeout after {}s", policy.timeout_seconds);
                    attempts.push(AttemptLog::failed(attempt, duration_ms, &last_error));
                }
            }

            tracing::warn!(
                "Attempt {}/{} failed for task {}: {}",
                attempt,
                policy.total_attempts(),
                task.id,
                last_error
            );

            if attempt == policy.total_attempts() || cancel.is_cancelled() {
                break;
            }

            // Cancellable wait before the next attempt.
            let cancelled = tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(policy.retry_delay_seconds)) => false,
                _ = cancel.cancelled() => true,
            };
            if cancelled {
                tracing::info!("Cancelled during retry wait for task {}", task.id);
                break;
            }
        }

        let now = Utc::now();
        let policy_json = serde_json::to_value(&policy).unwrap_or(serde_json::Value::Null);
        let mut task = task;
        run.finished_at = Some(now);
        task.last_run_at = Some(now);
        task.updated_at = now;

        match outcome {
            Some(res) => {
                let retries = attempts.len().saturating_sub(1);
                let summary = if retries > 0 {
                    format!("retried {retries} times; {}", res.summary)
                } else {
                    res.summary.clone()
                };

                run.status = RunStatus::Completed;
                run.summary = summary.clone();
                run.final_answer = res.final_answer;
                run.confidence = res.confidence;
                run.trace = json!({
                    "attempts": attempts,
                    "policy": policy_json,
                    "steps": res.steps,
                    "nextActions": res.next_actions,
                    "evidence": res.evidence,
                });

                // Recompute the schedule; a fired once-trigger is cleared.
                let next = if task.trigger_type == TriggerKind::Once {
                    None
                } else {
                    trigger::compute_next_due(
                        task.trigger_type,
                        &task.trigger_value,
                        &task.timezone,
                        now,
                    )
                    .unwrap_or_else(|e| {
                        tracing::warn!("Next-due recompute failed for task {}: {}", task.id, e);
                        None
                    })
                };
                task.next_due_at = next;
                task.async_status = if task.next_due_at.is_some() {
                    AsyncStatus::Scheduled
                } else {
                    AsyncStatus::Completed
                };
                task.status = TaskState::Done;
                task.result_summary = Some(summary);
            }
            None => {
                let summary = format!("execution failed: {last_error}");
                let decision = self.decide_requeue(&task, &policy, now)?;

                run.status = RunStatus::Failed;
                run.summary = summary.clone();
                run.trace = json!({
                    "attempts": attempts,
                    "policy": policy_json,
                    "retryQueue": &decision,
                });

                if decision.queued {
                    task.next_due_at = decision.retry_at;
                    task.async_status = AsyncStatus::Scheduled;
                    tracing::info!(
                        "↻ Task {} requeued (cycle {}/{}) for {:?}",
                        task.id,
                        decision.cycle,
                        decision.max_failure_cycles,
                        decision.retry_at,
                    );
                } else {
                    task.next_due_at = None;
                    task.async_status = AsyncStatus::Failed;
                    tracing::warn!(
                        "✖ Task {} failed terminally: {} ({})",
                        task.id,
                        last_error,
                        decision.reason.as_deref().unwrap_or("no requeue"),
                    );
                }
                task.status = TaskState::Todo;
                task.result_summary = Some(summary);
            }
        }

        self.store.finalize(&run, &task)?;

        if run.status == RunStatus::Failed {
            return Err(TaskweaveError::Execution(run.summary));
        }
        tracing::info!(
            "✔ Task '{}' completed (confidence {:.2})",
            task.name,
            run.confidence
        );
        Ok(run)
    }

    /// Decide whether an exhausted execution reschedules the task for a
    /// later cycle or fails terminally.
    fn decide_requeue(
        &self,
        task: &Task,
        policy: &ExecutionPolicy,
        now: DateTime<Utc>,
    ) -> Result<RequeueDecision> {
        let refuse = |reason: &str, cycle: i64| RequeueDecision {
            queued: false,
            reason: Some(reason.to_string()),
            cycle,
            retry_at: None,
            max_failure_cycles: policy.max_failure_cycles,
        };

        if !policy.queue_retry_on_failure {
            return Ok(refuse("queue retry disabled", 0));
        }
        if task.trigger_type == TriggerKind::Manual {
            return Ok(refuse("manual trigger", 0));
        }

        let window_start = now - ChronoDuration::minutes(policy.retry_window_minutes);
        let prior = self.store.count_failed_runs_since(&task.id, window_start)?;
        let cycle = prior + 1;
        if cycle > policy.max_failure_cycles {
            return Ok(refuse("failure cycles exceeded", cycle));
        }

        let delay = policy.retry_delay_seconds.max(1);
        Ok(RequeueDecision {
            queued: true,
            reason: None,
            cycle,
            retry_at: Some(now + ChronoDuration::seconds(delay as i64)),
            max_failure_cycles: policy.max_failure_cycles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskweave_core::traits::ChatClient;
    use taskweave_core::types::WorkKind;

    /// Fails the first `fail_first` calls hard, then succeeds.
    struct FlakyClient {
        fail_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for FlakyClient {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn chat(&self, _s: &str, _u: &str, _t: f32) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(TaskweaveError::EmptyResponse("flaky".into()))
            } else {
                Ok("{\"summary\": \"all good\", \"finalAnswer\": \"answer\", \
                    \"confidence\": 0.8}"
                    .into())
            }
        }
    }

    /// Never answers — used to exercise the per-attempt deadline.
    struct StuckClient;

    #[async_trait]
    impl ChatClient for StuckClient {
        fn name(&self) -> &str {
            "stuck"
        }
        async fn chat(&self, _s: &str, _u: &str, _t: f32) -> Result<String> {
            std::future::pending().await
        }
    }

    fn failing_runner(store: Arc<TaskStore>) -> Runner {
        let client = Arc::new(FlakyClient {
            fail_first: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        Runner::new(store, Arc::new(AgentPipeline::new(Some(client), 0.7)))
    }

    fn degraded_runner(store: Arc<TaskStore>) -> Runner {
        Runner::new(store, Arc::new(AgentPipeline::new(None, 0.7)))
    }

    fn make_task(store: &TaskStore, trigger: TriggerKind, value: &str, config: &str) -> Task {
        let mut task = Task::new("u1", "nightly digest", WorkKind::Report, trigger, value, "UTC");
        task.config_json = config.to_string();
        store.save_task(&task).unwrap();
        task
    }

    #[test]
    fn test_claim_work_exclusive() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let runner = degraded_runner(store.clone());
        let task = make_task(&store, TriggerKind::Daily, "09:00", "");

        let (claimed, ok) = runner.claim_work(&task.id, "u1").unwrap();
        assert!(ok);
        assert_eq!(claimed.async_status, AsyncStatus::Running);

        // Second claim loses the race without erroring.
        let (_, ok2) = runner.claim_work(&task.id, "u1").unwrap();
        assert!(!ok2);

        // Unknown task is an error, not a lost race.
        assert!(runner.claim_work("ghost", "u1").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_produces_exact_attempts() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let runner = failing_runner(store.clone());
        let task = make_task(
            &store,
            TriggerKind::Daily,
            "09:00",
            r#"{"maxRetries": 2, "queueRetryOnFailure": false}"#,
        );

        let err = runner
            .execute_claimed(&CancellationToken::new(), task.clone(), TriggerSource::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskweaveError::Execution(_)));

        let run = &store.list_runs(&task.id, 10).unwrap()[0];
        assert_eq!(run.status, RunStatus::Failed);
        let attempts = run.trace["attempts"].as_array().unwrap();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a["status"] == "failed"));
        assert_eq!(run.trace["retryQueue"]["queued"], false);
        assert_eq!(run.trace["retryQueue"]["reason"], "queue retry disabled");

        let task = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.async_status, AsyncStatus::Failed);
        assert!(task.next_due_at.is_none());
        assert_eq!(task.status, TaskState::Todo);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_requeues_within_budget() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let runner = failing_runner(store.clone());
        let task = make_task(&store, TriggerKind::Daily, "09:00", r#"{"maxRetries": 0}"#);

        let _ = runner
            .execute_claimed(&CancellationToken::new(), task.clone(), TriggerSource::Scheduler)
            .await
            .unwrap_err();

        let run = &store.list_runs(&task.id, 10).unwrap()[0];
        assert_eq!(run.trace["retryQueue"]["queued"], true);
        assert_eq!(run.trace["retryQueue"]["cycle"], 1);

        let task = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.async_status, AsyncStatus::Scheduled);
        assert!(task.next_due_at.is_some());
        assert_eq!(task.status, TaskState::Todo);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cycles_exhausted_refuses_requeue() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let runner = failing_runner(store.clone());
        let task = make_task(
            &store,
            TriggerKind::Daily,
            "09:00",
            r#"{"maxRetries": 0, "maxFailureCycles": 1}"#,
        );

        // One prior failed run inside the retry window.
        let mut prior = Run::begin(&task, TriggerSource::Scheduler);
        prior.status = RunStatus::Failed;
        prior.finished_at = Some(Utc::now() - ChronoDuration::minutes(5));
        store.insert_run(&prior).unwrap();
        store.finalize(&prior, &task).unwrap();

        let _ = runner
            .execute_claimed(&CancellationToken::new(), task.clone(), TriggerSource::Scheduler)
            .await
            .unwrap_err();

        let runs = store.list_runs(&task.id, 10).unwrap();
        let run = runs.iter().find(|r| r.id != prior.id).unwrap();
        assert_eq!(run.trace["retryQueue"]["queued"], false);
        assert_eq!(run.trace["retryQueue"]["reason"], "failure cycles exceeded");
        assert_eq!(run.trace["retryQueue"]["cycle"], 2);

        let task = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.async_status, AsyncStatus::Failed);
        assert!(task.next_due_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_never_requeues() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let runner = failing_runner(store.clone());
        let task = make_task(&store, TriggerKind::Manual, "", r#"{"maxRetries": 0}"#);

        let _ = runner
            .execute_claimed(&CancellationToken::new(), task.clone(), TriggerSource::Manual)
            .await
            .unwrap_err();

        let run = &store.list_runs(&task.id, 10).unwrap()[0];
        assert_eq!(run.trace["retryQueue"]["queued"], false);
        assert_eq!(run.trace["retryQueue"]["reason"], "manual trigger");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_once_clears_schedule() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let runner = degraded_runner(store.clone());
        let task = make_task(&store, TriggerKind::Once, "2026-01-01 08:00", "");

        let run = runner
            .execute_claimed(&CancellationToken::new(), task.clone(), TriggerSource::Scheduler)
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.trace.get("steps").is_some());

        let task = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.async_status, AsyncStatus::Completed);
        assert!(task.next_due_at.is_none());
        assert_eq!(task.status, TaskState::Done);
        assert!(task.result_summary.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_daily_reschedules() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let runner = degraded_runner(store.clone());
        let task = make_task(&store, TriggerKind::Daily, "09:00", "");

        runner
            .execute_claimed(&CancellationToken::new(), task.clone(), TriggerSource::Scheduler)
            .await
            .unwrap();

        let task = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(task.async_status, AsyncStatus::Scheduled);
        assert!(task.next_due_at.unwrap() > Utc::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_prefixes_summary() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        // First chat call fails hard (attempt 1), the rest succeed.
        let client = Arc::new(FlakyClient {
            fail_first: 1,
            calls: AtomicUsize::new(0),
        });
        let runner = Runner::new(
            store.clone(),
            Arc::new(AgentPipeline::new(Some(client), 0.7)),
        );
        let task = make_task(&store, TriggerKind::Daily, "09:00", r#"{"maxRetries": 2}"#);

        let run = runner
            .execute_claimed(&CancellationToken::new(), task, TriggerSource::Manual)
            .await
            .unwrap();
        assert!(run.summary.starts_with("retried 1 times;"));
        let attempts = run.trace["attempts"].as_array().unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0]["status"], "failed");
        assert_eq!(attempts[1]["status"], "completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_classified_distinctly() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let runner = Runner::new(
            store.clone(),
            Arc::new(AgentPipeline::new(Some(Arc::new(StuckClient)), 0.7)),
        );
        let task = make_task(
            &store,
            TriggerKind::Daily,
            "09:00",
            r#"{"maxRetries": 0, "timeoutSeconds": 30, "queueRetryOnFailure": false}"#,
        );

        let err = runner
            .execute_claimed(&CancellationToken::new(), task.clone(), TriggerSource::Manual)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("execution timeout after 30s"));

        let run = &store.list_runs(&task.id, 10).unwrap()[0];
        let attempts = run.trace["attempts"].as_array().unwrap();
        assert_eq!(
            attempts[0]["error"].as_str().unwrap(),
            "execution timeout after 30s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retrying() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let runner = failing_runner(store.clone());
        let task = make_task(&store, TriggerKind::Daily, "09:00", r#"{"maxRetries": 5}"#);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let _ = runner
            .execute_claimed(&cancel, task.clone(), TriggerSource::Manual)
            .await
            .unwrap_err();

        // Only the first attempt ran; the rest were abandoned.
        let run = &store.list_runs(&task.id, 10).unwrap()[0];
        assert_eq!(run.trace["attempts"].as_array().unwrap().len(), 1);
        assert_eq!(run.status, RunStatus::Failed);
    }
}
