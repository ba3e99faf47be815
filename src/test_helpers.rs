//! Shared fixtures for unit tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::cache::IdentifierSource;
use crate::error::{Error, Result};
use crate::tracksys::{TracksysItem, TracksysPart};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory [`IdentifierSource`] that counts directory fetches
pub(crate) struct StaticSource {
    ids: Mutex<Vec<String>>,
    items: HashMap<String, TracksysItem>,
    directory_calls: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl StaticSource {
    pub(crate) fn new<const N: usize>(ids: [&str; N]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            items: HashMap::new(),
            directory_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_item(mut self, id: &str, item: TracksysItem) -> Self {
        self.items.insert(id.to_string(), item);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn set_ids<const N: usize>(&self, ids: [&str; N]) {
        *self.ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn directory_calls(&self) -> usize {
        self.directory_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentifierSource for StaticSource {
    async fn directory(&self) -> Result<Vec<String>> {
        self.directory_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Other("directory unavailable".into()));
        }
        Ok(self.ids.lock().unwrap().clone())
    }

    async fn details(&self, id: &str) -> Result<TracksysItem> {
        self.items.get(id).cloned().ok_or_else(|| Error::HttpStatus {
            url: format!("static://details/{id}"),
            status: 404,
            body: String::new(),
        })
    }
}

/// A Tracksys item with `parts` numbered parts and no PDF service
pub(crate) fn sample_item(id: &str, parts: usize) -> TracksysItem {
    TracksysItem {
        sirsi_id: id.to_string(),
        pdf_service_root: String::new(),
        collection: String::new(),
        items: (1..=parts)
            .map(|n| TracksysPart {
                pid: format!("uva-lib:{id}-{n}"),
                call_number: format!("MSS {id} v.{n}"),
                barcode: format!("X{id}{n:03}"),
                thumbnail_url: format!("https://iiif.example.org/uva-lib:{id}-{n}/thumb.jpg"),
                backend_iiif_manifest_url: format!("https://iiifman.example.org/pid/uva-lib:{id}-{n}"),
                rights_wrapper_url: format!("https://rights.example.org/wrapper/uva-lib:{id}-{n}"),
                rights_wrapper_text: "Copyright the Rector and Visitors".to_string(),
                ..Default::default()
            })
            .collect(),
    }
}

/// A minimal Solr document with one barcode field per entry
pub(crate) fn solr_doc(id: &str, barcodes: &[&str]) -> String {
    let mut doc = format!("<doc><field name=\"id\">{id}</field>");
    for barcode in barcodes {
        doc.push_str(&format!("<field name=\"barcode_e_stored\">{barcode}</field>"));
    }
    doc.push_str("</doc>");
    doc
}
