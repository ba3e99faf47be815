use crate::document;
use crate::error::Result;
use crate::pipeline::{PipelineContext, Step, StepOutcome};
use crate::queue::Message;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Replaces configured fields with fixed values
///
/// Every existing occurrence of each field is removed before the new value
/// is appended, so running the step twice yields the same document.
pub struct FieldRewriteStep {
    fields: BTreeMap<String, String>,
}

impl FieldRewriteStep {
    /// Create a step rewriting `fields` (name to value)
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    /// Apply the rewrite to a document
    pub fn rewrite(&self, doc: &str) -> String {
        let removed = self
            .fields
            .keys()
            .fold(doc.to_string(), |doc, name| document::remove_field(&doc, name));
        self.fields
            .iter()
            .fold(removed, |doc, (name, value)| document::append_field(&doc, name, value))
    }
}

#[async_trait]
impl Step for FieldRewriteStep {
    fn name(&self) -> &'static str {
        "Field rewrite"
    }

    async fn process(
        &self,
        message: &mut Message,
        context: PipelineContext,
    ) -> Result<StepOutcome> {
        if !self.fields.is_empty() {
            let rewritten = self.rewrite(message.payload_text()?);
            message.set_payload(rewritten);
        }
        Ok(StepOutcome::Proceed(context))
    }
}
