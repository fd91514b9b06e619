//! Incoming-mail processing pipeline.
//!
//! Every admitted message flows through three stages, in order:
//! 1. `StoreEmailStage` moves the raw document to its canonical key and creates the record
//! 2. `ExtractAttachmentsStage` saves attachment parts and strips them from the document
//! 3. `SummarizeStage` optionally summarizes the body, then marks the record processed
//!
//! The `Orchestrator` sequences them with per-stage timeout and retry, and
//! `spawn_pipeline_trigger` runs one execution per inbound notification.

pub mod attachments;
pub mod context;
pub mod orchestrator;
pub mod store_email;
pub mod summarize;
pub mod trigger;

pub use attachments::ExtractAttachmentsStage;
pub use context::{ObjectRef, PipelineContext, SummaryOutcome};
pub use orchestrator::{
    ExecutionReport, ExecutionStatus, Orchestrator, PipelineState, RetryPolicy, Stage,
    StageAttempts, StageKind, StateTransition,
};
pub use store_email::StoreEmailStage;
pub use summarize::SummarizeStage;
pub use trigger::{PipelineTrigger, spawn_pipeline_trigger};

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::llm::LlmProvider;
use crate::mail::keys::KeyLayout;
use crate::store::{MetadataStore, ObjectStore};

/// Shared dependencies of the three stages.
#[derive(Clone)]
pub struct PipelineDeps {
    pub objects: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub summarizer: Option<Arc<dyn LlmProvider>>,
    pub layout: KeyLayout,
    pub keep_original_copy: bool,
}

/// Wire the standard three-stage orchestrator.
pub fn build_orchestrator(deps: PipelineDeps, config: &PipelineConfig) -> Orchestrator {
    let store = StoreEmailStage::new(
        Arc::clone(&deps.objects),
        Arc::clone(&deps.metadata),
        deps.layout.clone(),
    )
    .with_original_copy(deps.keep_original_copy);
    let extract = ExtractAttachmentsStage::new(
        Arc::clone(&deps.objects),
        Arc::clone(&deps.metadata),
        deps.layout,
    );
    let summarize = SummarizeStage::new(deps.objects, deps.metadata, deps.summarizer);

    Orchestrator::new(Arc::new(store), Arc::new(extract), Arc::new(summarize))
        .with_retry_policy(config.retry.clone())
        .with_stage_timeout(config.stage_timeout)
}
