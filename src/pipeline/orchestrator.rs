//! Pipeline state machine.
//!
//! Runs Store → Extract → Summarize strictly in order. Each stage invocation
//! is bounded by a timeout and retried under the `RetryPolicy` when its error
//! is retryable. A terminal failure ends the execution; earlier stages are
//! not rolled back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::StageError;
use crate::pipeline::context::PipelineContext;

/// Identifies one of the three stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    StoreEmail,
    ExtractAttachments,
    SummarizeEmail,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreEmail => "store_email",
            Self::ExtractAttachments => "extract_attachments",
            Self::SummarizeEmail => "summarize_email",
        }
    }

    /// State the machine is in while this stage runs.
    pub fn state(&self) -> PipelineState {
        match self {
            Self::StoreEmail => PipelineState::StoringEmail,
            Self::ExtractAttachments => PipelineState::ExtractingAttachments,
            Self::SummarizeEmail => PipelineState::SummarizingEmail,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of pipeline work.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Consume the context and return it enriched.
    async fn run(&self, ctx: PipelineContext) -> Result<PipelineContext, StageError>;
}

/// State of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    StoringEmail,
    ExtractingAttachments,
    SummarizingEmail,
    Succeeded,
    Failed,
}

impl PipelineState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        use PipelineState::*;

        matches!(
            (self, target),
            (Pending, StoringEmail)
                | (StoringEmail, ExtractingAttachments)
                | (ExtractingAttachments, SummarizingEmail)
                | (SummarizingEmail, Succeeded)
                | (StoringEmail, Failed)
                | (ExtractingAttachments, Failed)
                | (SummarizingEmail, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::StoringEmail => "storing_email",
            Self::ExtractingAttachments => "extracting_attachments",
            Self::SummarizingEmail => "summarizing_email",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Upper bound on a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Per-stage retry policy: bounded attempts with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_rate: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            backoff_rate: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), capped at `MAX_RETRY_DELAY`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.initial_interval.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.backoff_rate.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
}

/// Attempt count for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempts {
    pub stage: StageKind,
    pub attempts: u32,
}

/// Outcome of one pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// Context as returned by the last successful stage.
    pub context: PipelineContext,
    pub transitions: Vec<StateTransition>,
    pub attempts: Vec<StageAttempts>,
    /// Terminal failure message, if any.
    pub error: Option<String>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    pub fn attempts_for(&self, stage: StageKind) -> u32 {
        self.attempts
            .iter()
            .find(|a| a.stage == stage)
            .map_or(0, |a| a.attempts)
    }

    pub fn final_state(&self) -> PipelineState {
        self.transitions
            .last()
            .map_or(PipelineState::Pending, |t| t.to)
    }
}

/// Tracks state and transition history for one execution.
struct ExecutionTracker {
    state: PipelineState,
    transitions: Vec<StateTransition>,
}

impl ExecutionTracker {
    fn new() -> Self {
        Self {
            state: PipelineState::Pending,
            transitions: Vec::new(),
        }
    }

    fn transition_to(&mut self, target: PipelineState, reason: Option<String>) {
        if !self.state.can_transition_to(target) {
            // Stage order is fixed, so this only trips on a wiring bug.
            warn!(from = %self.state, to = %target, "Unexpected pipeline transition");
        }
        self.transitions.push(StateTransition {
            from: self.state,
            to: target,
            timestamp: Utc::now(),
            reason,
        });
        self.state = target;
    }
}

/// Drives the three stages for one notification at a time.
pub struct Orchestrator {
    stages: Vec<Arc<dyn Stage>>,
    retry: RetryPolicy,
    stage_timeout: Duration,
}

impl Orchestrator {
    /// Stages run in the given order: store, extract, summarize.
    pub fn new(
        store: Arc<dyn Stage>,
        extract: Arc<dyn Stage>,
        summarize: Arc<dyn Stage>,
    ) -> Self {
        Self {
            stages: vec![store, extract, summarize],
            retry: RetryPolicy::default(),
            stage_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Run one execution with a fresh id.
    pub async fn run(&self, ctx: PipelineContext) -> ExecutionReport {
        self.run_with_id(Uuid::new_v4(), ctx).await
    }

    /// Run one execution to completion. Never panics on stage failure;
    /// the report carries the outcome.
    pub async fn run_with_id(&self, execution_id: Uuid, mut ctx: PipelineContext) -> ExecutionReport {
        let mut tracker = ExecutionTracker::new();
        let mut attempts = Vec::with_capacity(self.stages.len());

        info!(
            execution_id = %execution_id,
            destination = %ctx.destination,
            message_id = %ctx.message_id,
            "Pipeline execution started"
        );

        for stage in &self.stages {
            let kind = stage.kind();
            tracker.transition_to(kind.state(), None);

            let (result, used) = self.invoke_with_retry(stage.as_ref(), &ctx).await;
            attempts.push(StageAttempts {
                stage: kind,
                attempts: used,
            });

            match result {
                Ok(next) => ctx = next,
                Err(e) => {
                    let message = format!("{kind}: {e}");
                    error!(
                        execution_id = %execution_id,
                        stage = %kind,
                        attempts = used,
                        class = e.class(),
                        error = %e,
                        "Pipeline execution failed"
                    );
                    tracker.transition_to(PipelineState::Failed, Some(message.clone()));
                    return ExecutionReport {
                        execution_id,
                        status: ExecutionStatus::Failed,
                        context: ctx,
                        transitions: tracker.transitions,
                        attempts,
                        error: Some(message),
                    };
                }
            }
        }

        tracker.transition_to(PipelineState::Succeeded, None);
        info!(
            execution_id = %execution_id,
            destination = %ctx.destination,
            message_id = %ctx.message_id,
            "Pipeline execution succeeded"
        );
        ExecutionReport {
            execution_id,
            status: ExecutionStatus::Succeeded,
            context: ctx,
            transitions: tracker.transitions,
            attempts,
            error: None,
        }
    }

    /// Invoke a stage until it succeeds, fails terminally, or runs out of attempts.
    async fn invoke_with_retry(
        &self,
        stage: &dyn Stage,
        ctx: &PipelineContext,
    ) -> (Result<PipelineContext, StageError>, u32) {
        let kind = stage.kind();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.stage_timeout, stage.run(ctx.clone())).await
            {
                Ok(result) => result,
                Err(_) => Err(StageError::Timeout {
                    stage: kind.to_string(),
                    timeout: self.stage_timeout,
                }),
            };

            match result {
                Ok(next) => return (Ok(next), attempt),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        stage = %kind,
                        attempt,
                        class = e.class(),
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Stage failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}
