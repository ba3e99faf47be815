use crate::document;
use crate::error::{Error, Result};
use crate::pipeline::{PipelineContext, Step, StepOutcome};
use crate::queue::Message;
use async_trait::async_trait;

const STEP_NAME: &str = "Partial digitized";

/// Field holding one physical barcode per copy
pub const BARCODE_FIELD: &str = "barcode_e_stored";

/// Field appended to partially digitized records
pub const PARTIAL_FIELD: &str = "digitized_f_stored";

const PARTIAL_VALUE: &str = "partial";

/// Marks records where only some physical copies are digitized
pub struct PartialDigitizedStep;

#[async_trait]
impl Step for PartialDigitizedStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    async fn process(
        &self,
        message: &mut Message,
        context: PipelineContext,
    ) -> Result<StepOutcome> {
        let item = context.item(STEP_NAME)?;
        let doc = message.payload_text()?;

        let barcodes = document::extract_fields(doc, BARCODE_FIELD).len();
        if barcodes == 0 {
            return Err(Error::NoBarcodes(
                message.record_id().unwrap_or_default().to_string(),
            ));
        }

        let digitized = item.items.len();
        tracing::debug!(barcodes, digitized, "Comparing barcodes to digitized parts");

        if barcodes != digitized {
            tracing::info!(
                record_id = message.record_id().unwrap_or_default(),
                barcodes,
                digitized,
                "Marking as partially digitized"
            );
            let marked = document::append_field(doc, PARTIAL_FIELD, PARTIAL_VALUE);
            message.set_payload(marked);
        }

        Ok(StepOutcome::Proceed(context))
    }
}
