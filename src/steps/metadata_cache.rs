//! Digital content metadata cache
//!
//! Writes a JSON description of the item's digitized parts to the blob store
//! and records the public URL of that document on the Solr record. In `sirsi`
//! mode the document lists every part under the catalog key; in `pid` mode it
//! describes the first part alone.

use crate::blob::BlobStore;
use crate::config::{MetadataCacheConfig, ServiceMode};
use crate::document;
use crate::error::{Error, Result};
use crate::pipeline::{PipelineContext, Step, StepOutcome};
use crate::queue::Message;
use crate::tracksys::{TracksysItem, TracksysPart};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

const STEP_NAME: &str = "Metadata cache";

/// Field receiving the URL of the cached metadata document
pub const METADATA_URL_FIELD: &str = "digital_content_service_url_e_stored";

#[derive(Debug, Serialize)]
struct MetadataDocument {
    id: String,
    parts: Vec<MetadataPart>,
}

#[derive(Debug, Serialize)]
struct MetadataPart {
    manifest_url: String,
    label: String,
    pid: String,
    thumb_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ocr_url: Option<String>,
    pdf_url: String,
    oembed_url: String,
}

/// Publishes per-item metadata documents
pub struct MetadataCacheStep {
    store: Arc<dyn BlobStore>,
    config: MetadataCacheConfig,
    mode: ServiceMode,
}

impl MetadataCacheStep {
    /// Create the step writing through `store`
    pub fn new(store: Arc<dyn BlobStore>, config: MetadataCacheConfig, mode: ServiceMode) -> Self {
        Self {
            store,
            config,
            mode,
        }
    }

    fn part(&self, part: &TracksysPart, pdf_root: &str) -> MetadataPart {
        let ocr_url = part.ocr_candidate.then(|| {
            tracing::info!(pid = %part.pid, "Part is an OCR candidate");
            format!("{}/{}", self.config.ocr_root.trim_end_matches('/'), part.pid)
        });
        MetadataPart {
            manifest_url: part.backend_iiif_manifest_url.clone(),
            label: part.call_number.clone(),
            pid: part.pid.clone(),
            thumb_url: part.thumbnail_url.clone(),
            ocr_url,
            pdf_url: format!("{}/{}", pdf_root.trim_end_matches('/'), part.pid),
            oembed_url: format!("{}/{}", self.config.oembed_root.trim_end_matches('/'), part.pid),
        }
    }

    /// Key and JSON body of the metadata document for an item
    pub fn render(&self, item: &TracksysItem) -> Result<(String, Vec<u8>)> {
        let Some(first) = item.items.first() else {
            return Err(Error::NoParts(item.sirsi_id.clone()));
        };

        match self.mode {
            ServiceMode::Sirsi => {
                let doc = MetadataDocument {
                    id: item.sirsi_id.clone(),
                    parts: item
                        .items
                        .iter()
                        .map(|p| self.part(p, &item.pdf_service_root))
                        .collect(),
                };
                Ok((item.sirsi_id.clone(), serde_json::to_vec(&doc)?))
            }
            ServiceMode::Pid => {
                let part = self.part(first, &first.pdf_service_root);
                Ok((normalize_id(&first.pid), serde_json::to_vec(&part)?))
            }
        }
    }

    /// Public URL under which a key is served
    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.root_url.trim_end_matches('/'),
            self.store.bucket(),
            key
        )
    }
}

/// Make a pid safe for use as an object key
fn normalize_id(pid: &str) -> String {
    pid.replace(':', "_")
}

#[async_trait]
impl Step for MetadataCacheStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    async fn process(
        &self,
        message: &mut Message,
        context: PipelineContext,
    ) -> Result<StepOutcome> {
        let item = context.item(STEP_NAME)?;
        let (key, body) = self.render(item)?;

        self.store.put(&key, body, "application/json").await?;
        tracing::info!(key = %key, bucket = self.store.bucket(), "Metadata cache entry written");

        let url = self.public_url(&key);
        let updated = document::append_field(message.payload_text()?, METADATA_URL_FIELD, &url);
        message.set_payload(updated);

        Ok(StepOutcome::Proceed(context))
    }
}
