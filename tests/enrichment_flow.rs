//! End-to-end enrichment of a block of messages
//!
//! Tracksys, the rights service and the PDF service are served by wiremock;
//! the queues and the blob store are the in-memory backends.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tracksys_enrich::{
    BatchCoordinator, BlobStore, HttpFetcher, IdentifierCache, MemoryBlobStore, MemoryQueue,
    Message, MessageQueue, Service, ServiceOptions, TracksysClient, standard_pipeline,
};
use wiremock::MockServer;

struct Harness {
    server: MockServer,
    queue: Arc<MemoryQueue>,
    store: Arc<MemoryBlobStore>,
}

impl Harness {
    async fn start() -> Self {
        let server = MockServer::start().await;
        let pdf_root = format!("{}/pdf", server.uri());

        mount_json(&server, "/api/published/virgo", directory(&["u100", "u200", "u300"])).await;

        mount_json(&server, "/api/sirsi/u100", item_details("u100", 1, &pdf_root)).await;
        mount_json(&server, "/api/pid/uva-lib:u100-1", pid_details("uva-lib:u100-1", true)).await;
        mount_text(&server, "/api/rights/uva-lib:u100-1", "uva").await;
        mount_text(&server, "/pdf/uva-lib:u100-1/status", "READY").await;

        mount_json(&server, "/api/sirsi/u200", item_details("u200", 2, "")).await;
        mount_json(&server, "/api/pid/uva-lib:u200-1", pid_details("uva-lib:u200-1", false)).await;
        mount_json(&server, "/api/pid/uva-lib:u200-2", pid_details("uva-lib:u200-2", false)).await;
        mount_text(&server, "/api/rights/uva-lib:u200-1", "public").await;

        // listed in the directory but the detail endpoint is broken
        mount_status(&server, "/api/sirsi/u300", 500).await;

        Self {
            server,
            queue: Arc::new(MemoryQueue::new()),
            store: Arc::new(MemoryBlobStore::new("virgo4-content")),
        }
    }

    async fn coordinator(&self) -> (BatchCoordinator, ServiceOptions) {
        let config = config_from(&test_env(&self.server));
        let options = ServiceOptions::from(&config);

        let fetcher = HttpFetcher::new(
            config.tracksys.timeout,
            config.workers,
            config.tracksys.retry.clone(),
        )
        .unwrap();
        let client = TracksysClient::new(fetcher.clone(), config.tracksys.clone());
        let cache = IdentifierCache::new(Arc::new(client), config.cache.clone())
            .await
            .unwrap();

        let store: Arc<dyn BlobStore> = self.store.clone();
        let pipeline = standard_pipeline(&config, Arc::new(cache), fetcher, Some(store));

        let queue: Arc<dyn MessageQueue> = self.queue.clone();
        let in_queue = queue.queue_handle(&options.in_queue).await.unwrap();
        let out_queue = queue.queue_handle(&options.out_queue).await.unwrap();
        let coordinator = BatchCoordinator::new(
            1,
            queue,
            in_queue,
            out_queue,
            Arc::new(pipeline),
            options.batch_size,
            options.wait_timeout,
        );
        (coordinator, options)
    }

    async fn push(&self, id: &str, barcodes: &[&str]) {
        self.queue
            .push(
                "virgo4-ingest-tracksys-enrich",
                Message::new(solr_doc(id, barcodes)).with_attribute("id", id),
            )
            .await;
    }

    async fn receive(&self, options: &ServiceOptions) -> Vec<Message> {
        let handle = self.queue.queue_handle(&options.in_queue).await.unwrap();
        self.queue
            .batch_get(&handle, 10, Duration::from_millis(10))
            .await
            .unwrap()
    }

    async fn published(&self, id: &str) -> String {
        self.queue
            .published("virgo4-ingest-solr-update")
            .await
            .into_iter()
            .find(|m| m.record_id() == Some(id))
            .map(|m| m.payload_text().unwrap().to_string())
            .unwrap_or_else(|| panic!("{id} was not published"))
    }
}

#[tokio::test]
async fn block_is_enriched_published_and_acknowledged() {
    let harness = Harness::start().await;
    let (coordinator, options) = harness.coordinator().await;

    harness.push("u100", &["Xu100001"]).await;
    harness.push("u200", &["Xu200001", "Xu200002", "Xu200003"]).await;
    harness.push("u300", &[]).await;
    harness.push("u999", &[]).await;

    let messages = harness.receive(&options).await;
    let report = coordinator.process_block(messages).await.unwrap();

    assert_eq!(report.received, 4);
    assert_eq!(report.enriched, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.enrich_failed, 1);
    assert_eq!(report.published, 4);
    assert_eq!(report.deleted, 4);
    assert_eq!(harness.queue.in_flight().await, 0);

    let u100 = harness.published("u100").await;
    assert!(u100.contains("<field name=\"data_source_f_stored\">tracksys</field>"));
    assert!(u100.contains("<field name=\"format_f_stored\">Online</field>"));
    assert!(u100.contains("<field name=\"feature_f_stored\">pdf_service</field>"));
    assert!(u100.contains("<field name=\"policy_f_stored\">uva</field>"));
    assert!(u100.contains(&format!(
        "<field name=\"pdf_download_url_e_stored\">{}/pdf/uva-lib:u100-1/download</field>",
        harness.server.uri()
    )));
    assert!(u100.contains(
        "<field name=\"digital_content_service_url_e_stored\">https://s3.example.org/virgo4-content/u100</field>"
    ));
    assert!(!u100.contains("digitized_f_stored"));
    assert!(u100.ends_with("</doc>"));

    let u200 = harness.published("u200").await;
    assert!(u200.contains("<field name=\"alternate_id_str_stored\">uva-lib:u200-2</field>"));
    assert!(u200.contains("<field name=\"digitized_f_stored\">partial</field>"));
    assert!(!u200.contains("policy_f_stored"));
    assert!(!u200.contains("pdf_download_url_e_stored"));

    // failed enrichment forwards the rewritten but otherwise untouched document
    let u300 = harness.published("u300").await;
    assert!(u300.contains("data_source_f_stored"));
    assert!(!u300.contains("format_f_stored"));

    // unknown to Tracksys: rewritten, never enriched
    let u999 = harness.published("u999").await;
    assert_eq!(
        u999,
        "<doc><field name=\"id\">u999</field><field name=\"data_source_f_stored\">tracksys</field></doc>"
    );

    let cached = harness.store.get("u100").await.expect("metadata document written");
    let json: serde_json::Value = serde_json::from_slice(&cached).unwrap();
    assert_eq!(json["id"], "u100");
    assert_eq!(json["parts"][0]["ocr_url"], "https://ocr.example.org/uva-lib:u100-1");
    assert!(harness.store.get("u200").await.is_some());
    assert!(harness.store.get("u300").await.is_none());
}

#[tokio::test]
async fn publish_rejections_leave_messages_for_redelivery() {
    let harness = Harness::start().await;
    let (coordinator, options) = harness.coordinator().await;

    harness.push("u100", &["Xu100001"]).await;
    harness.push("u999", &[]).await;
    harness.queue.reject_put("u100").await;

    let messages = harness.receive(&options).await;
    let report = coordinator.process_block(messages).await.unwrap();

    assert_eq!(report.published, 1);
    assert_eq!(report.publish_failed, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(harness.queue.in_flight().await, 1);
    assert!(
        harness
            .queue
            .published("virgo4-ingest-solr-update")
            .await
            .iter()
            .all(|m| m.record_id() == Some("u999"))
    );
}

#[tokio::test]
async fn ignore_cache_attribute_enriches_records_missing_from_the_directory() {
    let harness = Harness::start().await;
    let pdf_root = format!("{}/pdf", harness.server.uri());
    mount_json(&harness.server, "/api/sirsi/u400", item_details("u400", 1, &pdf_root)).await;
    mount_json(&harness.server, "/api/pid/uva-lib:u400-1", pid_details("uva-lib:u400-1", false)).await;
    mount_text(&harness.server, "/api/rights/uva-lib:u400-1", "public").await;
    mount_status(&harness.server, "/pdf/uva-lib:u400-1/status", 404).await;

    let (coordinator, options) = harness.coordinator().await;
    harness
        .queue
        .push(
            "virgo4-ingest-tracksys-enrich",
            Message::new(solr_doc("u400", &["Xu400001"]))
                .with_attribute("id", "u400")
                .with_attribute("ignore-cache", "true"),
        )
        .await;

    let messages = harness.receive(&options).await;
    let report = coordinator.process_block(messages).await.unwrap();
    assert_eq!(report.enriched, 1);

    let u400 = harness.published("u400").await;
    assert!(u400.contains("<field name=\"format_f_stored\">Online</field>"));
    assert!(!u400.contains("pdf_download_url_e_stored"));
}

#[tokio::test]
async fn service_drains_the_inbound_queue() {
    let harness = Harness::start().await;
    let env = test_env(&harness.server);
    let config = config_from(&env);

    let fetcher = HttpFetcher::new(config.tracksys.timeout, 2, config.tracksys.retry.clone())
        .unwrap();
    let client = TracksysClient::new(fetcher.clone(), config.tracksys.clone());
    let cache = IdentifierCache::new(Arc::new(client), config.cache.clone())
        .await
        .unwrap();
    let pipeline = standard_pipeline(&config, Arc::new(cache), fetcher, None);

    for n in 0..15 {
        harness.push(&format!("u9{n:02}"), &[]).await;
    }
    harness.push("u200", &["Xu200001", "Xu200002"]).await;

    let mut options = ServiceOptions::from(&config);
    options.wait_timeout = Duration::from_millis(200);
    let service = Service::new(options, harness.queue.clone(), pipeline);
    let handle = tokio::spawn(service.run());

    let mut published = 0;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        published = harness.queue.published("virgo4-ingest-solr-update").await.len();
        if published == 16 && harness.queue.in_flight().await == 0 {
            break;
        }
    }
    handle.abort();

    assert_eq!(published, 16);
    assert_eq!(harness.queue.in_flight().await, 0);
    let u200 = harness.published("u200").await;
    assert!(u200.contains("<field name=\"format_f_stored\">Online</field>"));
    assert!(!u200.contains("digitized_f_stored"));
    assert!(harness.store.is_empty().await);
}
