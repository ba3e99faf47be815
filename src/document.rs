//! Solr `<doc>` payload manipulation
//!
//! Documents travel as flat Solr XML: a `<doc>` element containing
//! `<field name="...">value</field>` children. Enrichment only ever appends
//! fields before the closing tag or removes whole field elements, so simple
//! pattern matching is sufficient and keeps the rest of the payload
//! byte-for-byte intact.

use regex::Regex;

/// Closing tag every document ends with
pub const DOC_END_TAG: &str = "</doc>";

/// Build a single `<field name="name">value</field>` element; `value` must already be escaped
pub fn field_tag(name: &str, value: &str) -> String {
    format!("<field name=\"{name}\">{value}</field>")
}

/// Build one element per value, escaping each value
pub fn field_tag_set<S: AsRef<str>>(name: &str, values: &[S]) -> String {
    values
        .iter()
        .map(|v| field_tag(name, &xml_escape(v.as_ref())))
        .collect()
}

/// Insert pre-built field markup just before the first `</doc>`
///
/// A document without a closing tag is returned unchanged.
pub fn append_markup(document: &str, markup: &str) -> String {
    if markup.is_empty() {
        return document.to_string();
    }
    document.replacen(DOC_END_TAG, &format!("{markup}{DOC_END_TAG}"), 1)
}

/// Append a single escaped field before `</doc>`
pub fn append_field(document: &str, name: &str, value: &str) -> String {
    append_markup(document, &field_tag(name, &xml_escape(value)))
}

/// Remove every occurrence of the named field
pub fn remove_field(document: &str, name: &str) -> String {
    field_pattern(name).replace_all(document, "").into_owned()
}

/// Extract the raw (still escaped) values of every non-empty occurrence of a field
pub fn extract_fields(document: &str, name: &str) -> Vec<String> {
    field_pattern(name)
        .captures_iter(document)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Escape text for inclusion as XML character data
///
/// Mirrors the escaping applied by the upstream indexer: the five markup
/// characters plus tab, newline and carriage return as numeric references.
pub fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            '\t' => escaped.push_str("&#x9;"),
            '\n' => escaped.push_str("&#xA;"),
            '\r' => escaped.push_str("&#xD;"),
            other => escaped.push(other),
        }
    }
    escaped
}

// the name is escaped, so the pattern is always valid
#[allow(clippy::expect_used)]
fn field_pattern(name: &str) -> Regex {
    Regex::new(&format!(
        r#"(?s)<field name="{}">(.*?)</field>"#,
        regex::escape(name)
    ))
    .expect("escaped field pattern is valid")
}
