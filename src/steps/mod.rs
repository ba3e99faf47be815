//! Concrete pipeline steps
//!
//! The service runs, in order: field rewrite, Tracksys extract, Tracksys
//! enrich, partial digitized and (when a bucket is configured) metadata cache.

mod field_rewrite;
mod metadata_cache;
mod partial_digitized;
mod tracksys_enrich;
mod tracksys_extract;

pub use field_rewrite::FieldRewriteStep;
pub use metadata_cache::{METADATA_URL_FIELD, MetadataCacheStep};
pub use partial_digitized::{BARCODE_FIELD, PARTIAL_FIELD, PartialDigitizedStep};
pub use tracksys_enrich::TracksysEnrichStep;
pub use tracksys_extract::TracksysExtractStep;

use crate::blob::BlobStore;
use crate::cache::IdentifierCache;
use crate::config::Config;
use crate::fetch::HttpFetcher;
use crate::pipeline::Pipeline;
use std::sync::Arc;

/// Assemble the standard enrichment pipeline
///
/// `blob_store` is only used when the configuration enables the metadata
/// cache.
pub fn standard_pipeline(
    config: &Config,
    cache: Arc<IdentifierCache>,
    fetcher: HttpFetcher,
    blob_store: Option<Arc<dyn BlobStore>>,
) -> Pipeline {
    let mut pipeline = Pipeline::new();

    if !config.rewrite_fields.is_empty() {
        pipeline.push(Box::new(FieldRewriteStep::new(config.rewrite_fields.clone())));
    }
    pipeline.push(Box::new(TracksysExtractStep::new(cache)));
    pipeline.push(Box::new(TracksysEnrichStep::new(
        fetcher,
        config.rights_url.clone(),
    )));
    pipeline.push(Box::new(PartialDigitizedStep));

    if let (Some(mc), Some(store)) = (&config.metadata_cache, blob_store) {
        pipeline.push(Box::new(MetadataCacheStep::new(
            store,
            mc.clone(),
            config.tracksys.mode,
        )));
    }

    tracing::info!(steps = ?pipeline.step_names(), "Pipeline assembled");
    pipeline
}
