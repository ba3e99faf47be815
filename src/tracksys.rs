//! Tracksys wire protocol
//!
//! Tracksys exposes three read endpoints used by the worker:
//! - a directory of every identifier it holds digitized content for
//!   (comma separated text, or `{"items": [...]}` in `sirsi` mode)
//! - a detail record per identifier, listing its digitized parts
//! - a per-part record carrying the OCR eligibility flag (`sirsi` mode)

use crate::cache::IdentifierSource;
use crate::config::{ServiceMode, TracksysConfig};
use crate::error::Result;
use crate::fetch::HttpFetcher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A Tracksys item: one catalog record and its digitized parts
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TracksysItem {
    /// Catalog key of the record
    #[serde(rename = "sirsiId", default)]
    pub sirsi_id: String,
    /// Root of the PDF service for this record, empty when unavailable
    #[serde(rename = "pdfServiceRoot", default)]
    pub pdf_service_root: String,
    /// Collection the record belongs to
    #[serde(default)]
    pub collection: String,
    /// Digitized parts
    #[serde(alias = "Items", default)]
    pub items: Vec<TracksysPart>,
}

/// A digitized part (scanned volume, file set) of a Tracksys item
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracksysPart {
    /// Persistent identifier of the part
    #[serde(default)]
    pub pid: String,
    /// Call number (used as the display label)
    #[serde(default)]
    pub call_number: String,
    /// Physical barcode
    #[serde(default)]
    pub barcode: String,
    /// Rights statement URI
    #[serde(rename = "rsURI", default)]
    pub rs_uri: String,
    /// Rights statement permitted uses
    #[serde(default)]
    pub rs_uses: Vec<String>,
    /// URL of the rights wrapper
    #[serde(default)]
    pub rights_wrapper_url: String,
    /// Rights wrapper text
    #[serde(default)]
    pub rights_wrapper_text: String,
    /// IIIF manifest URL
    #[serde(rename = "backendIIIFManifestUrl", default)]
    pub backend_iiif_manifest_url: String,
    /// Thumbnail URL
    #[serde(default)]
    pub thumbnail_url: String,
    /// Per-part PDF service root (single-pid records)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pdf_service_root: String,
    /// Set from the per-part lookup, never present in the detail response
    #[serde(skip)]
    pub ocr_candidate: bool,
}

/// Per-part record from the pid endpoint
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TracksysPidItem {
    /// Internal Tracksys id
    #[serde(default)]
    pub id: u32,
    /// Persistent identifier
    #[serde(default)]
    pub pid: String,
    /// Object type
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Availability policy name
    #[serde(default)]
    pub availability_policy: String,
    /// OCR hint
    #[serde(default)]
    pub ocr_hint: String,
    /// Whether the part should be offered for OCR
    #[serde(default)]
    pub ocr_candidate: bool,
    /// OCR language hint
    #[serde(default)]
    pub ocr_language_hint: String,
}

/// Directory response in `sirsi` mode
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TracksysKnown {
    /// Every identifier Tracksys knows
    #[serde(default)]
    pub items: Vec<String>,
}

/// HTTP client for the Tracksys service
#[derive(Clone, Debug)]
pub struct TracksysClient {
    fetcher: HttpFetcher,
    config: TracksysConfig,
}

impl TracksysClient {
    /// Create a client over a shared fetcher
    pub fn new(fetcher: HttpFetcher, config: TracksysConfig) -> Self {
        Self { fetcher, config }
    }

    /// Decode a directory body according to the deployment mode
    pub fn parse_directory(mode: ServiceMode, body: &[u8]) -> Result<Vec<String>> {
        let ids = match mode {
            ServiceMode::Sirsi => serde_json::from_slice::<TracksysKnown>(body)?.items,
            ServiceMode::Pid => String::from_utf8_lossy(body)
                .split(',')
                .map(|t| t.trim().to_string())
                .collect(),
        };
        Ok(ids)
    }

    async fn part_details(&self, pid: &str) -> Result<TracksysPidItem> {
        let body = self.fetcher.get(&self.config.pid_url(pid)).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl IdentifierSource for TracksysClient {
    async fn directory(&self) -> Result<Vec<String>> {
        let url = self.config.directory_url();
        let body = self.fetcher.get(&url).await?;
        let ids = Self::parse_directory(self.config.mode, &body)?;
        tracing::info!(url = %url, count = ids.len(), "Received identifier directory");
        Ok(ids)
    }

    async fn details(&self, id: &str) -> Result<TracksysItem> {
        let body = self.fetcher.get(&self.config.details_url(id)).await?;
        let mut item: TracksysItem = serde_json::from_slice(&body).inspect_err(|e| {
            tracing::error!(record_id = %id, error = %e, "Failed to decode tracksys item");
        })?;

        if self.config.mode == ServiceMode::Sirsi {
            // any failed part lookup fails the whole item
            let lookups = item
                .items
                .iter()
                .filter(|part| !part.pid.is_empty())
                .map(|part| self.part_details(&part.pid));
            let parts = futures::future::try_join_all(lookups).await?;

            for pid_item in parts {
                if let Some(part) = item.items.iter_mut().find(|p| p.pid == pid_item.pid) {
                    part.ocr_candidate = pid_item.ocr_candidate;
                }
            }
        }

        Ok(item)
    }
}
