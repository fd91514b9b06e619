//! Asynchronous pipeline trigger.
//!
//! Decouples the receipt hook from pipeline work: notifications are queued
//! on a bounded channel and a dispatcher task starts one independent
//! execution per notification. Executions are not ordered relative to
//! each other.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::TriggerError;
use crate::mail::event::InboundNotification;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::orchestrator::{ExecutionReport, Orchestrator};

/// Queue capacity before `submit` waits for the dispatcher.
const QUEUE_CAPACITY: usize = 256;
/// Buffered reports per subscriber.
const REPORT_CAPACITY: usize = 64;

struct Job {
    execution_id: Uuid,
    ctx: PipelineContext,
}

/// Cloneable handle for starting pipeline executions.
#[derive(Clone)]
pub struct PipelineTrigger {
    tx: mpsc::Sender<Job>,
    reports: broadcast::Sender<ExecutionReport>,
}

impl PipelineTrigger {
    /// Validate a notification and queue one execution for it.
    pub async fn submit(&self, notification: &InboundNotification) -> Result<Uuid, TriggerError> {
        let ctx = PipelineContext::try_from(notification)?;
        let execution_id = Uuid::new_v4();
        debug!(
            execution_id = %execution_id,
            destination = %ctx.destination,
            message_id = %ctx.message_id,
            "Queueing pipeline execution"
        );
        self.tx
            .send(Job { execution_id, ctx })
            .await
            .map_err(|_| TriggerError::Closed)?;
        Ok(execution_id)
    }

    /// Receive the report of every execution finished after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionReport> {
        self.reports.subscribe()
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Pipeline execution task aborted");
    }
}

/// Spawn the dispatcher task.
///
/// The task ends once every `PipelineTrigger` clone is dropped and every
/// queued or running execution has finished.
pub fn spawn_pipeline_trigger(orchestrator: Arc<Orchestrator>) -> (PipelineTrigger, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_CAPACITY);
    let (reports, _) = broadcast::channel(REPORT_CAPACITY);
    let report_tx = reports.clone();

    let handle = tokio::spawn(async move {
        info!("Pipeline trigger started");
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                job = rx.recv() => {
                    let Some(job) = job else { break };
                    let orchestrator = Arc::clone(&orchestrator);
                    let report_tx = report_tx.clone();
                    running.spawn(async move {
                        let report = orchestrator.run_with_id(job.execution_id, job.ctx).await;
                        if let Some(message) = &report.error {
                            error!(
                                execution_id = %report.execution_id,
                                state = %report.final_state(),
                                error = %message,
                                "Pipeline execution ended in failure"
                            );
                        } else {
                            info!(execution_id = %report.execution_id, "Pipeline execution finished");
                        }
                        // No subscribers is fine.
                        let _ = report_tx.send(report);
                    });
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    log_join(joined);
                }
            }
        }

        info!(in_flight = running.len(), "Pipeline trigger draining");
        while let Some(joined) = running.join_next().await {
            log_join(joined);
        }
        info!("Pipeline trigger shut down");
    });

    (PipelineTrigger { tx, reports }, handle)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{MailError, StageError};
    use crate::pipeline::orchestrator::{ExecutionStatus, Stage, StageKind};

    struct PassStage(StageKind);

    #[async_trait]
    impl Stage for PassStage {
        fn kind(&self) -> StageKind {
            self.0
        }

        async fn run(&self, ctx: PipelineContext) -> Result<PipelineContext, StageError> {
            Ok(ctx)
        }
    }

    fn orchestrator() -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            Arc::new(PassStage(StageKind::StoreEmail)),
            Arc::new(PassStage(StageKind::ExtractAttachments)),
            Arc::new(PassStage(StageKind::SummarizeEmail)),
        ))
    }

    fn notification(message_id: &str) -> InboundNotification {
        serde_json::from_value(serde_json::json!({
            "mail": { "destination": ["a@x.com"], "messageId": message_id },
            "receipt": { "action": { "bucketName": "inbox", "objectKey": "incoming/x" } }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn each_submission_gets_a_report() {
        let (trigger, _handle) = spawn_pipeline_trigger(orchestrator());
        let mut reports = trigger.subscribe();

        let first = trigger.submit(&notification("m1")).await.unwrap();
        let second = trigger.submit(&notification("m2")).await.unwrap();
        assert_ne!(first, second);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
                .await
                .expect("report in time")
                .unwrap();
            assert_eq!(report.status, ExecutionStatus::Succeeded);
            seen.push(report.execution_id);
        }
        seen.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn invalid_notification_is_rejected_up_front() {
        let (trigger, _handle) = spawn_pipeline_trigger(orchestrator());
        let mut bad = notification("m1");
        bad.mail.destination.clear();

        let err = trigger.submit(&bad).await.unwrap_err();
        assert!(matches!(err, TriggerError::Rejected(MailError::MissingField(_))));
    }

    #[tokio::test]
    async fn dispatcher_stops_when_handles_drop() {
        let (trigger, handle) = spawn_pipeline_trigger(orchestrator());
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dispatcher exits")
            .unwrap();
    }

    /// Stage that holds the execution long enough to still be running at shutdown.
    struct SlowStage(StageKind, Duration);

    #[async_trait]
    impl Stage for SlowStage {
        fn kind(&self) -> StageKind {
            self.0
        }

        async fn run(&self, mut ctx: PipelineContext) -> Result<PipelineContext, StageError> {
            tokio::time::sleep(self.1).await;
            ctx.processed = true;
            Ok(ctx)
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_executions() {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(PassStage(StageKind::StoreEmail)),
            Arc::new(PassStage(StageKind::ExtractAttachments)),
            Arc::new(SlowStage(StageKind::SummarizeEmail, Duration::from_millis(200))),
        ));
        let (trigger, handle) = spawn_pipeline_trigger(orchestrator);
        let mut reports = trigger.subscribe();

        let id = trigger.submit(&notification("m1")).await.unwrap();
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dispatcher exits")
            .unwrap();

        // The report was sent before the dispatcher returned.
        let report = reports.try_recv().unwrap();
        assert_eq!(report.execution_id, id);
        assert_eq!(report.status, ExecutionStatus::Succeeded);
        assert!(report.context.processed);
    }
}
