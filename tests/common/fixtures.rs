//! Tracksys responses and Solr documents

use serde_json::json;

/// Directory listing in `sirsi` mode
pub fn directory(ids: &[&str]) -> serde_json::Value {
    json!({ "items": ids })
}

/// Detail record for a catalog key with `parts` digitized parts
pub fn item_details(id: &str, parts: usize, pdf_root: &str) -> serde_json::Value {
    let items: Vec<serde_json::Value> = (1..=parts)
        .map(|n| {
            json!({
                "pid": format!("uva-lib:{id}-{n}"),
                "callNumber": format!("MSS {id} v.{n}"),
                "barcode": format!("X{id}{n:03}"),
                "rsURI": "http://rightsstatements.org/vocab/InC-EDU/1.0/",
                "rsUses": ["Educational Use Permitted"],
                "rightsWrapperUrl": format!("https://rights.example.org/wrapper/uva-lib:{id}-{n}"),
                "rightsWrapperText": "Copyright the Rector and Visitors",
                "backendIIIFManifestUrl": format!("https://iiifman.example.org/pid/uva-lib:{id}-{n}"),
                "thumbnailUrl": format!("https://iiif.example.org/uva-lib:{id}-{n}/thumb.jpg"),
            })
        })
        .collect();

    json!({
        "sirsiId": id,
        "pdfServiceRoot": pdf_root,
        "collection": "",
        "items": items,
    })
}

/// Per-part record
pub fn pid_details(pid: &str, ocr_candidate: bool) -> serde_json::Value {
    json!({
        "id": 42,
        "pid": pid,
        "type": "master_file",
        "title": "Scan",
        "availability_policy": "Public",
        "ocr_candidate": ocr_candidate,
    })
}

/// A Solr document carrying one barcode field per entry
pub fn solr_doc(id: &str, barcodes: &[&str]) -> String {
    let mut doc = format!("<doc><field name=\"id\">{id}</field>");
    for barcode in barcodes {
        doc.push_str(&format!("<field name=\"barcode_e_stored\">{barcode}</field>"));
    }
    doc.push_str("</doc>");
    doc
}
