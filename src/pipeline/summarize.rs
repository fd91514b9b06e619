//! Summarization stage: optional AI summary, then mark the record processed.
//!
//! Summarization is best effort. Parse, provider and summary-write failures
//! become `SummaryOutcome::Failed`; the record is marked processed either way.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::error::{LlmError, StageError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::mime;
use crate::pipeline::context::{PipelineContext, SummaryOutcome};
use crate::pipeline::orchestrator::{Stage, StageKind};
use crate::store::{MetadataStore, ObjectStore};

/// Output token limit of the summary request.
pub const TOKEN_LIMIT: u32 = 4096;
/// Average characters per token used for budget estimates.
pub const AVG_CHARS_PER_TOKEN: f64 = 3.25;
/// Characters reserved for the prompt wrapper.
pub const SAFETY_MARGIN: usize = 1000;
/// Maximum body characters sent for summarization (12312).
pub const CHARACTER_LIMIT: usize =
    (TOKEN_LIMIT as f64 * AVG_CHARS_PER_TOKEN) as usize - SAFETY_MARGIN;

/// Wrap body text in the fixed summary instruction.
pub fn summary_prompt(text: &str) -> String {
    format!(
        "Please provide a summary of the following email content. \
         Do not add any information that is not mentioned in the text.\n\
         <text>\n{text}\n</text>\n"
    )
}

/// Estimated prompt size in tokens.
pub fn estimate_tokens(prompt: &str) -> usize {
    (prompt.len() as f64 / AVG_CHARS_PER_TOKEN) as usize
}

pub struct SummarizeStage {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    summarizer: Option<Arc<dyn LlmProvider>>,
}

impl SummarizeStage {
    /// `summarizer == None` means no provider is configured; every
    /// requested summary then fails softly.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        summarizer: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            objects,
            metadata,
            summarizer,
        }
    }

    /// Call the provider and validate its output.
    async fn request_summary(&self, body: &str) -> Result<String, LlmError> {
        let provider = self.summarizer.as_ref().ok_or(LlmError::NotConfigured)?;

        let prompt = summary_prompt(body);
        info!(
            model = provider.model_name(),
            estimated_tokens = estimate_tokens(&prompt),
            "Requesting summary"
        );
        debug!(prompt = %prompt, "Summary prompt");

        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(0.0)
            .with_max_tokens(TOKEN_LIMIT);
        let response = provider.complete(request).await?;

        let text = response.content.trim();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: provider.model_name().to_string(),
                reason: "empty summary".to_string(),
            });
        }
        debug!(
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Summary received"
        );
        Ok(text.to_string())
    }

    /// Produce and persist a summary. Only the record lookup and blob fetch
    /// propagate. A record that already carries a summary is left as is.
    async fn summarize(&self, ctx: &PipelineContext) -> Result<SummaryOutcome, StageError> {
        let existing = self
            .metadata
            .get_mail(&ctx.destination, &ctx.message_id)
            .await?
            .and_then(|record| record.summary_text);
        if let Some(text) = existing {
            debug!(message_id = %ctx.message_id, "Summary already stored");
            return Ok(SummaryOutcome::Completed { text });
        }

        let stored = ctx.stored_object()?;
        let raw = self.objects.get(&stored.bucket, &stored.key).await?;

        let body = match mime::body_text(&raw, &stored.key) {
            Ok(body) => mime::normalize_body(&body, CHARACTER_LIMIT),
            Err(e) => {
                error!(message_id = %ctx.message_id, error = %e, "Failed to parse email for summary");
                return Ok(SummaryOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let text = match self.request_summary(&body).await {
            Ok(text) => text,
            Err(e) => {
                error!(message_id = %ctx.message_id, error = %e, "Summarization failed");
                return Ok(SummaryOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        if let Err(e) = self
            .metadata
            .set_summary(&ctx.destination, &ctx.message_id, &text)
            .await
        {
            error!(message_id = %ctx.message_id, error = %e, "Failed to save summary");
            return Ok(SummaryOutcome::Failed {
                reason: e.to_string(),
            });
        }

        Ok(SummaryOutcome::Completed { text })
    }
}

#[async_trait]
impl Stage for SummarizeStage {
    fn kind(&self) -> StageKind {
        StageKind::SummarizeEmail
    }

    async fn run(&self, mut ctx: PipelineContext) -> Result<PipelineContext, StageError> {
        let wants_summary = self
            .metadata
            .get_address(&ctx.destination)
            .await?
            .is_some_and(|address| address.summarize_emails);

        let outcome = if wants_summary {
            self.summarize(&ctx).await?
        } else {
            debug!(destination = %ctx.destination, "Summary not requested");
            SummaryOutcome::Skipped
        };

        self.metadata
            .mark_processed(&ctx.destination, &ctx.message_id)
            .await?;

        info!(
            destination = %ctx.destination,
            message_id = %ctx.message_id,
            summary = ?outcome,
            "Email processed"
        );
        ctx.summary = Some(outcome);
        ctx.processed = true;
        Ok(ctx)
    }
}
