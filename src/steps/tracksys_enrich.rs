use crate::document::{self, field_tag_set};
use crate::error::Result;
use crate::fetch::HttpFetcher;
use crate::pipeline::{PipelineContext, Step, StepOutcome};
use crate::queue::Message;
use crate::tracksys::{TracksysItem, TracksysPart};
use async_trait::async_trait;

const STEP_NAME: &str = "Tracksys enrich";

/// Collection whose barcodes are published as despined
const DESPINED_COLLECTION: &str = "Gannon Collection";

/// Policy value that does not need a facet
const PUBLIC_POLICY: &str = "public";

/// Appends digital object facets derived from the Tracksys item
pub struct TracksysEnrichStep {
    fetcher: HttpFetcher,
    rights_url: String,
}

impl TracksysEnrichStep {
    /// Create the step; `rights_url` is the base of the rights service
    pub fn new(fetcher: HttpFetcher, rights_url: String) -> Self {
        Self {
            fetcher,
            rights_url: rights_url.trim_end_matches('/').to_string(),
        }
    }

    /// Access policy of the first part with a pid, unless it is public
    async fn policy_facets(&self, item: &TracksysItem) -> Result<Vec<String>> {
        let Some(part) = item.items.iter().find(|p| !p.pid.is_empty()) else {
            return Ok(Vec::new());
        };

        let url = format!("{}/{}", self.rights_url, part.pid);
        let policy = self.fetcher.get_text(&url).await.inspect_err(|e| {
            tracing::error!(url = %url, error = %e, "Rights lookup failed");
        })?;

        if policy == PUBLIC_POLICY {
            Ok(Vec::new())
        } else {
            Ok(vec![policy])
        }
    }

    /// Download URL of a ready PDF, for single part items only
    ///
    /// Any failure talking to the PDF service means no PDF.
    async fn pdf_download_url(&self, item: &TracksysItem) -> Option<String> {
        let [part] = item.items.as_slice() else {
            return None;
        };
        if item.pdf_service_root.is_empty() {
            return None;
        }

        let root = item.pdf_service_root.trim_end_matches('/');
        let status_url = format!("{root}/{}/status", part.pid);
        match self.fetcher.get_text(&status_url).await {
            Ok(status) if status == "READY" => Some(format!("{root}/{}/download", part.pid)),
            Ok(status) => {
                tracing::debug!(pid = %part.pid, status = %status, "PDF not ready");
                None
            }
            Err(e) => {
                tracing::debug!(pid = %part.pid, error = %e, "PDF status unavailable");
                None
            }
        }
    }
}

/// Render every enrichment field for an item
pub fn enrichment_markup(
    item: &TracksysItem,
    policy: &[String],
    pdf_download: Option<&str>,
) -> String {
    let mut features = vec!["availability", "iiif", "dl_metadata", "rights_wrapper"];
    if !item.pdf_service_root.is_empty() {
        features.push("pdf_service");
    }

    let non_empty = |v: &str| -> Vec<String> {
        if v.is_empty() { Vec::new() } else { vec![v.to_string()] }
    };

    let despined: Vec<&str> = if item.collection == DESPINED_COLLECTION {
        part_values(item, |p| p.barcode.as_str())
    } else {
        Vec::new()
    };

    let mut markup = String::new();
    markup.push_str(&field_tag_set("format_f_stored", &["Online"]));
    markup.push_str(&field_tag_set("feature_f_stored", &features));
    markup.push_str(&field_tag_set("source_f_stored", &["UVA Library Digital Repository"]));
    markup.push_str(&field_tag_set("marc_display_f_stored", &["true"]));
    markup.push_str(&field_tag_set(
        "additional_collection_f_stored",
        &non_empty(&item.collection),
    ));
    markup.push_str(&field_tag_set(
        "individual_call_number_a",
        &part_values(item, |p| p.call_number.as_str()),
    ));
    markup.push_str(&field_tag_set("thumbnail_url_a", &part_values(item, |p| p.thumbnail_url.as_str())));
    markup.push_str(&field_tag_set(
        "rights_wrapper_url_a",
        &part_values(item, |p| p.rights_wrapper_url.as_str()),
    ));
    markup.push_str(&field_tag_set(
        "rights_wrapper_a",
        &part_values(item, |p| p.rights_wrapper_text.as_str()),
    ));
    markup.push_str(&field_tag_set("pdf_url_a", &non_empty(&item.pdf_service_root)));
    markup.push_str(&field_tag_set("policy_f_stored", policy));
    markup.push_str(&field_tag_set("despined_barcodes_a", &despined));
    if let Some(url) = pdf_download {
        markup.push_str(&field_tag_set("pdf_download_url_e_stored", &[url]));
    }
    markup.push_str(&field_tag_set("alternate_id_str_stored", &part_values(item, |p| p.pid.as_str())));
    markup
}

fn part_values<'a, F>(item: &'a TracksysItem, field: F) -> Vec<&'a str>
where
    F: Fn(&'a TracksysPart) -> &'a str,
{
    item.items
        .iter()
        .map(field)
        .filter(|v| !v.is_empty())
        .collect()
}

#[async_trait]
impl Step for TracksysEnrichStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    async fn process(
        &self,
        message: &mut Message,
        context: PipelineContext,
    ) -> Result<StepOutcome> {
        let item = context.item(STEP_NAME)?;

        let pdf_download = self.pdf_download_url(item).await;
        let policy = self.policy_facets(item).await?;

        let markup = enrichment_markup(item, &policy, pdf_download.as_deref());
        let enriched = document::append_markup(message.payload_text()?, &markup);
        message.set_payload(enriched);

        Ok(StepOutcome::Proceed(context))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::Error;
    use crate::test_helpers::sample_item;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn step_for(server: &MockServer) -> TracksysEnrichStep {
        let fetcher = HttpFetcher::new(
            Duration::from_secs(5),
            2,
            RetryConfig {
                max_attempts: 3,
                backoff: Duration::from_millis(10),
            },
        )
        .unwrap();
        TracksysEnrichStep::new(fetcher, format!("{}/api/rights/", server.uri()))
    }

    async fn mount_rights(server: &MockServer, pid: &str, policy: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/api/rights/{pid}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(policy))
            .mount(server)
            .await;
    }

    #[test]
    fn markup_contains_fixed_and_per_part_facets() {
        let mut item = sample_item("u1", 2);
        item.pdf_service_root = String::new();
        let markup = enrichment_markup(&item, &[], None);

        assert!(markup.starts_with("<field name=\"format_f_stored\">Online</field>"));
        assert!(markup.contains("<field name=\"feature_f_stored\">rights_wrapper</field>"));
        assert!(!markup.contains("pdf_service"));
        assert!(!markup.contains("pdf_url_a"));
        assert!(markup.contains("<field name=\"marc_display_f_stored\">true</field>"));
        assert_eq!(markup.matches("individual_call_number_a").count(), 2);
        assert!(markup.ends_with(
            "<field name=\"alternate_id_str_stored\">uva-lib:u1-1</field><field name=\"alternate_id_str_stored\">uva-lib:u1-2</field>"
        ));
        assert!(!markup.contains("despined_barcodes_a"));
    }

    #[test]
    fn despined_barcodes_only_for_gannon() {
        let mut item = sample_item("u1", 2);
        item.collection = "Gannon Collection".into();
        let markup = enrichment_markup(&item, &[], None);
        assert_eq!(markup.matches("despined_barcodes_a").count(), 2);
        assert!(markup.contains(
            "<field name=\"additional_collection_f_stored\">Gannon Collection</field>"
        ));
    }

    #[test]
    fn values_are_escaped() {
        let mut item = sample_item("u1", 1);
        item.items[0].call_number = "MSS <1> & 2".into();
        let markup = enrichment_markup(&item, &[], None);
        assert!(markup.contains("MSS &lt;1&gt; &amp; 2"));
    }

    #[tokio::test]
    async fn single_part_ready_pdf_adds_download_url() {
        let server = MockServer::start().await;
        mount_rights(&server, "uva-lib:u1-1", "uva-only").await;
        Mock::given(method("GET"))
            .and(path("/pdf/uva-lib:u1-1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("READY"))
            .expect(1)
            .mount(&server)
            .await;

        let mut item = sample_item("u1", 1);
        item.pdf_service_root = format!("{}/pdf", server.uri());

        let mut message = Message::new("<doc><field name=\"id\">u1</field></doc>");
        step_for(&server)
            .process(&mut message, PipelineContext::Item(item))
            .await
            .unwrap();

        let doc = message.payload_text().unwrap();
        assert!(doc.contains(&format!(
            "<field name=\"pdf_download_url_e_stored\">{}/pdf/uva-lib:u1-1/download</field>",
            server.uri()
        )));
        assert!(doc.contains("<field name=\"policy_f_stored\">uva-only</field>"));
        assert!(doc.contains("<field name=\"feature_f_stored\">pdf_service</field>"));
        assert!(doc.ends_with("</doc>"));
    }

    #[tokio::test]
    async fn pdf_status_failure_means_no_pdf() {
        let server = MockServer::start().await;
        mount_rights(&server, "uva-lib:u1-1", "public").await;
        Mock::given(method("GET"))
            .and(path("/pdf/uva-lib:u1-1/status"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut item = sample_item("u1", 1);
        item.pdf_service_root = format!("{}/pdf", server.uri());

        let mut message = Message::new("<doc></doc>");
        step_for(&server)
            .process(&mut message, PipelineContext::Item(item))
            .await
            .unwrap();

        let doc = message.payload_text().unwrap();
        assert!(!doc.contains("pdf_download_url_e_stored"));
        assert!(!doc.contains("policy_f_stored"), "public adds no policy facet");
    }

    #[tokio::test]
    async fn multi_part_items_skip_pdf_status() {
        let server = MockServer::start().await;
        mount_rights(&server, "uva-lib:u1-1", "public").await;
        Mock::given(method("GET"))
            .and(path("/pdf/uva-lib:u1-1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("READY"))
            .expect(0)
            .mount(&server)
            .await;

        let mut item = sample_item("u1", 3);
        item.pdf_service_root = format!("{}/pdf", server.uri());

        let mut message = Message::new("<doc></doc>");
        step_for(&server)
            .process(&mut message, PipelineContext::Item(item))
            .await
            .unwrap();
        assert!(!message.payload_text().unwrap().contains("pdf_download_url_e_stored"));
    }

    #[tokio::test]
    async fn rights_failure_fails_the_step() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/rights/uva-lib:u1-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut message = Message::new("<doc></doc>");
        let err = step_for(&server)
            .process(&mut message, PipelineContext::Item(sample_item("u1", 2)))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(message.payload_text().unwrap(), "<doc></doc>");
    }

    #[tokio::test]
    async fn requires_item_context() {
        let server = MockServer::start().await;
        let err = step_for(&server)
            .process(&mut Message::new("<doc></doc>"), PipelineContext::Unprocessed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContextMismatch { .. }));
    }
}
