//! # Taskweave Pipeline
//!
//! Four-role orchestration over a single task description:
//! Planner → Researcher/Critic → Synthesizer. The Researcher and Critic
//! stages run back-to-back in serial mode (Critic sees the research) or
//! concurrently in parallel mode (both work from the plan alone).
//!
//! The pipeline never fails just because a model call failed: with no
//! backend configured every stage emits a labeled degraded placeholder,
//! and a configured call that errors is absorbed into a degraded fallback
//! text. Only an empty response (zero choices) is a hard error.

pub mod extract;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use taskweave_core::error::{Result, TaskweaveError};
use taskweave_core::traits::ChatClient;
use taskweave_core::types::{AgentStep, Task};

/// Substituted when the synthesizer reports no usable confidence.
pub const FALLBACK_CONFIDENCE: f64 = 0.72;

const PLANNER_SYSTEM: &str = "You are the planner of a task execution team. \
     From the task brief, produce a short execution plan: numbered milestones, \
     each with concrete acceptance criteria. Be specific and brief.";

const RESEARCHER_SYSTEM: &str = "You are the researcher of a task execution team. \
     Given an execution plan, gather the supporting evidence, data points, and \
     risk notes the plan depends on. List each item on its own line.";

const CRITIC_SYSTEM: &str = "You are the critic of a task execution team. \
     Review the material for gaps, conflicts, and unrealistic steps, and \
     propose a fix for every problem you find.";

const SYNTHESIZER_SYSTEM: &str = "You are the synthesizer of a task execution team. \
     Combine the plan, research, and critique into one result. Respond with \
     exactly one JSON object with the keys: summary (string), finalAnswer \
     (string), confidence (number between 0 and 1), nextActions (array of \
     strings), evidence (array of strings). No other text.";

/// How the Researcher and Critic stages are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Serial,
    Parallel,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Serial => "serial",
            ExecutionMode::Parallel => "parallel",
        }
    }
}

/// The task-derived brief the pipeline works from.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub name: String,
    pub kind: String,
    pub description: String,
    pub input_source: Option<String>,
    pub report_rule: Option<String>,
}

impl PipelineInput {
    pub fn from_task(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            kind: task.kind.as_str().to_string(),
            description: task.description.clone(),
            input_source: task.input_source.clone(),
            report_rule: task.report_rule.clone(),
        }
    }
}

/// The structured result of one pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Ordered stage outputs for the run trace.
    pub steps: Vec<AgentStep>,
    pub summary: String,
    pub final_answer: String,
    pub confidence: f64,
    pub next_actions: Vec<String>,
    pub evidence: Vec<String>,
}

/// The four-role pipeline. Holds the optional chat backend; with `None`
/// every stage degrades to a placeholder instead of failing.
pub struct AgentPipeline {
    client: Option<Arc<dyn ChatClient>>,
    temperature: f32,
}

impl AgentPipeline {
    pub fn new(client: Option<Arc<dyn ChatClient>>, temperature: f32) -> Self {
        Self {
            client,
            temperature,
        }
    }

    /// Drive all four stages and assemble the structured result.
    pub async fn execute(
        &self,
        input: &PipelineInput,
        mode: ExecutionMode,
    ) -> Result<PipelineResult> {
        let plan = self
            .call_stage(
                "planner",
                "draft execution plan",
                PLANNER_SYSTEM,
                planner_user(input),
            )
            .await?;

        let (research, critique) = match mode {
            ExecutionMode::Serial => {
                let research = self
                    .call_stage(
                        "researcher",
                        "gather evidence and risks",
                        RESEARCHER_SYSTEM,
                        researcher_user(&plan.output),
                    )
                    .await?;
                let critique = self
                    .call_stage(
                        "critic",
                        "review plan and research",
                        CRITIC_SYSTEM,
                        critic_user(&plan.output, Some(&research.output)),
                    )
                    .await?;
                (research, critique)
            }
            ExecutionMode::Parallel => {
                // Both stages work from the plan alone; the join barrier
                // waits for both, and the first hard error is propagated
                // only after both calls have finished. The sibling is not
                // cancelled early.
                let (research, critique) = tokio::join!(
                    self.call_stage(
                        "researcher",
                        "gather evidence and risks",
                        RESEARCHER_SYSTEM,
                        researcher_user(&plan.output),
                    ),
                    self.call_stage(
                        "critic",
                        "review plan",
                        CRITIC_SYSTEM,
                        critic_user(&plan.output, None),
                    ),
                );
                (research?, critique?)
            }
        };

        let synthesis = self
            .call_stage(
                "synthesizer",
                "produce structured result",
                SYNTHESIZER_SYSTEM,
                synthesizer_user(&plan.output, &research.output, &critique.output),
            )
            .await?;

        Ok(assemble_result(vec![plan, research, critique, synthesis]))
    }

    /// Run one stage: a single request/response exchange with its own
    /// wall-clock measurement. Model failures become degraded fallback
    /// text; only `EmptyResponse` propagates.
    async fn call_stage(
        &self,
        agent: &str,
        purpose: &str,
        system_prompt: &str,
        user_prompt: String,
    ) -> Result<AgentStep> {
        let started = Instant::now();
        let output = match &self.client {
            None => format!("[degraded] {agent}: no model backend configured"),
            Some(client) => match client.chat(system_prompt, &user_prompt, self.temperature).await
            {
                Ok(text) => extract::sanitize(&text),
                Err(e @ TaskweaveError::EmptyResponse(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("{} stage call failed, degrading: {}", agent, e);
                    format!("[degraded] {agent} call failed: {e}")
                }
            },
        };
        Ok(AgentStep {
            agent: agent.to_string(),
            purpose: purpose.to_string(),
            output,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn planner_user(input: &PipelineInput) -> String {
    let mut prompt = format!(
        "Task: {}\nType: {}\nDescription: {}",
        input.name, input.kind, input.description
    );
    if let Some(source) = &input.input_source {
        prompt.push_str(&format!("\nInput source: {source}"));
    }
    if let Some(rule) = &input.report_rule {
        prompt.push_str(&format!("\nReport rule: {rule}"));
    }
    prompt.push_str("\n\nDraft the execution plan.");
    prompt
}

fn researcher_user(plan: &str) -> String {
    format!("Execution plan:\n{plan}\n\nCollect the supporting evidence and risk notes.")
}

fn critic_user(plan: &str, research: Option<&str>) -> String {
    match research {
        Some(research) => format!(
            "Execution plan:\n{plan}\n\nResearch notes:\n{research}\n\nReview both for gaps and conflicts, and propose fixes."
        ),
        None => format!("Execution plan:\n{plan}\n\nReview it for gaps and conflicts, and propose fixes."),
    }
}

fn synthesizer_user(plan: &str, research: &str, critique: &str) -> String {
    format!(
        "Execution plan:\n{plan}\n\nResearch notes:\n{research}\n\nCritique:\n{critique}\n\nProduce the final JSON result."
    )
}

/// Build the structured result from the synthesizer's output, applying
/// the documented fallbacks for missing fields.
fn assemble_result(steps: Vec<AgentStep>) -> PipelineResult {
    let synthesis = &steps[steps.len() - 1].output;
    let parsed = extract::first_json_object(synthesis);

    let str_field = |key: &str| -> String {
        parsed
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .map(extract::sanitize)
            .unwrap_or_default()
    };
    let list_field = |key: &str| -> Vec<String> {
        let items = parsed
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        extract::clean_list(items)
    };

    let mut final_answer = str_field("finalAnswer");
    if final_answer.trim().is_empty() {
        final_answer = synthesis.clone();
    }
    let mut summary = str_field("summary");
    if summary.trim().is_empty() {
        summary = extract::clip(&final_answer, 200);
    }
    let confidence = parsed
        .as_ref()
        .and_then(|v| v.get("confidence"))
        .and_then(|v| v.as_f64())
        .filter(|c| *c > 0.0)
        .unwrap_or(FALLBACK_CONFIDENCE)
        .clamp(0.0, 1.0);

    PipelineResult {
        summary,
        final_answer,
        confidence,
        next_actions: list_field("nextActions"),
        evidence: list_field("evidence"),
        steps,
    }
}
