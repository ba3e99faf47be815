use crate::cache::IdentifierCache;
use crate::error::{Error, Result};
use crate::pipeline::{PipelineContext, Step, StepOutcome};
use crate::queue::{IGNORE_CACHE_ATTRIBUTE, Message};
use async_trait::async_trait;
use std::sync::Arc;

/// Looks the record up in Tracksys
///
/// Halts the pipeline for records Tracksys does not know. Messages carrying
/// the `ignore-cache` attribute are looked up regardless of the identifier
/// cache, for records published after the last reload.
pub struct TracksysExtractStep {
    cache: Arc<IdentifierCache>,
}

impl TracksysExtractStep {
    /// Create the step over a shared cache
    pub fn new(cache: Arc<IdentifierCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Step for TracksysExtractStep {
    fn name(&self) -> &'static str {
        "Tracksys extract"
    }

    async fn process(
        &self,
        message: &mut Message,
        _context: PipelineContext,
    ) -> Result<StepOutcome> {
        let Some(id) = message.record_id() else {
            tracing::error!("No identifier attribute located for document, no tracksys lookup possible");
            return Err(Error::MissingIdentifier);
        };

        if message.has_attribute(IGNORE_CACHE_ATTRIBUTE) {
            tracing::info!(record_id = %id, "Marked to ignore tracksys cache, getting details");
        } else if self.cache.contains(id).await? {
            tracing::info!(record_id = %id, "Located in tracksys cache, getting details");
        } else {
            return Ok(StepOutcome::Halt);
        }

        let item = self.cache.lookup(id).await?;
        Ok(StepOutcome::Proceed(PipelineContext::Item(item)))
    }
}
