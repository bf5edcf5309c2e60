//! Field mapping and serialization of harvested records.
//!
//! A [`FieldMap`] holds the collection-specific association between
//! qualified metadata keys and ordered display labels, scraped from the
//! collection's configuration. [`GenericMapper`] is the label-less
//! fallback used for collections without an initialized map.

use std::collections::HashMap;
use std::sync::LazyLock;

use quick_xml::escape::escape;
use regex::Regex;

use crate::config::{DCTERMS_NAMESPACE, DC_NAMESPACE, QDC_NAMESPACE};
use crate::record::Record;

/// Semicolon separator within a single occurrence value.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static VALUE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r";\s*").expect("valid regex"));

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// A mapped field value: a scalar, or a list when the raw occurrence
/// value was semicolon-separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Single(String),
    Multi(Vec<String>),
}

impl FieldValue {
    fn is_blank(&self) -> bool {
        match self {
            Self::Single(value) => value.is_empty(),
            Self::Multi(values) => values.iter().all(String::is_empty),
        }
    }
}

/// Split a raw occurrence value on semicolons, collapsing a single
/// result back to a scalar.
fn split_value(value: &str) -> FieldValue {
    let parts: Vec<String> = VALUE_SEPARATOR.split(value).map(str::to_string).collect();
    if parts.len() == 1 {
        FieldValue::Single(value.to_string())
    } else {
        FieldValue::Multi(parts)
    }
}

/// Split a qualified key into its namespace prefix and local name.
/// Keys without a prefix keep their full text as the local name.
pub fn split_qualified_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('.') {
        Some((prefix, local)) if !prefix.is_empty() && !local.is_empty() => (Some(prefix), local),
        _ => (None, key),
    }
}

/// Turn a camel-cased local name into a human-readable label
/// (`dateCreated` becomes `Date Created`).
pub fn humanize_key(key: &str) -> String {
    let (_, local) = split_qualified_key(key);
    let mut spaced = String::new();
    for (i, ch) in local.chars().enumerate() {
        if ch.is_uppercase() && i > 0 {
            spaced.push(' ');
        }
        spaced.push(ch);
    }
    spaced
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn open_qualifieddc(out: &mut String) {
    out.push_str(&format!(
        "<qualifieddc xmlns:qdc=\"{QDC_NAMESPACE}\" xmlns:dc=\"{DC_NAMESPACE}\" xmlns:dcterms=\"{DCTERMS_NAMESPACE}\">\n"
    ));
}

fn write_element(out: &mut String, key: &str, value: &str) {
    let (prefix, local) = split_qualified_key(key);
    out.push_str("  <");
    if let Some(prefix) = prefix {
        out.push_str(prefix);
        out.push(':');
    }
    out.push_str(local);
    out.push('>');
    out.push_str(&escape(value));
    out.push_str("</");
    if let Some(prefix) = prefix {
        out.push_str(prefix);
        out.push(':');
    }
    out.push_str(local);
    out.push_str(">\n");
}

fn write_paragraph(out: &mut String, label: &str, value: &FieldValue) {
    match value {
        FieldValue::Single(text) => {
            out.push_str("  <p><b>");
            out.push_str(&escape(label));
            out.push_str(":</b> ");
            out.push_str(&escape(text));
            out.push_str("</p>\n");
        }
        FieldValue::Multi(values) => {
            out.push_str("  <p><b>");
            out.push_str(&escape(label));
            out.push_str(":</b><br/>\n");
            for text in values {
                if !text.is_empty() {
                    out.push_str("    ");
                    out.push_str(&escape(text));
                    out.push_str("<br/>\n");
                }
            }
            out.push_str("  </p>\n");
        }
    }
}

/// Collection-specific mapping from qualified keys to display labels,
/// with a total serialization order. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    /// Qualified key to one display label per expected occurrence
    /// position, in configuration order.
    fields: Vec<(String, Vec<String>)>,
    /// Serialization order of labels; hidden labels are absent here but
    /// remain addressable through `fields`.
    order: Vec<String>,
}

impl FieldMap {
    pub fn new(fields: Vec<(String, Vec<String>)>, order: Vec<String>) -> Self {
        Self { fields, order }
    }

    /// Display labels configured for a qualified key, one per
    /// occurrence position.
    pub fn labels_for(&self, key: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, labels)| labels.as_slice())
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    fn key_for_label(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, labels)| labels.iter().any(|l| l == label))
            .map(|(key, _)| key.as_str())
    }

    /// Resolve a record into label-to-value pairs. For each configured
    /// (label, occurrence) slot, the value at that occurrence position
    /// in the record's raw value list is taken, semicolon-split, and
    /// collapsed to a scalar when a single element results.
    pub fn map(&self, record: &Record) -> HashMap<String, FieldValue> {
        let mut result = HashMap::new();
        for (key, labels) in &self.fields {
            for (index, label) in labels.iter().enumerate() {
                if let Some(value) = record.metadata().value_at(key, index) {
                    result.insert(label.clone(), split_value(value));
                }
            }
        }
        result
    }

    /// Serialize a record to Qualified Dublin Core XML in label order,
    /// repeating multi-valued fields as sibling elements.
    pub fn to_xml(&self, record: &Record) -> String {
        let data = self.map(record);
        let mut out = String::from(XML_DECLARATION);
        open_qualifieddc(&mut out);
        for label in &self.order {
            let Some(value) = data.get(label) else {
                continue;
            };
            let Some(key) = self.key_for_label(label) else {
                continue;
            };
            match value {
                FieldValue::Single(text) => write_element(&mut out, key, text),
                FieldValue::Multi(values) => {
                    for text in values {
                        write_element(&mut out, key, text);
                    }
                }
            }
        }
        out.push_str("</qualifieddc>\n");
        out
    }

    /// Serialize a record to labeled HTML paragraphs in label order,
    /// skipping empty values.
    pub fn to_html(&self, record: &Record) -> String {
        let data = self.map(record);
        let mut out = String::from("<span>\n");
        for label in &self.order {
            let Some(value) = data.get(label) else {
                continue;
            };
            if value.is_blank() {
                continue;
            }
            write_paragraph(&mut out, label, value);
        }
        out.push_str("</span>\n");
        out
    }
}

/// Fallback renderer for collections without an initialized
/// [`FieldMap`]: serializes every raw field in document order, deriving
/// HTML labels from the keys themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericMapper;

impl GenericMapper {
    pub fn to_xml(&self, record: &Record) -> String {
        let mut out = String::from(XML_DECLARATION);
        open_qualifieddc(&mut out);
        for (key, values) in record.metadata().iter() {
            for value in values {
                write_element(&mut out, key, value);
            }
        }
        out.push_str("</qualifieddc>\n");
        out
    }

    pub fn to_html(&self, record: &Record) -> String {
        let mut out = String::from("<span>\n");
        for (key, values) in record.metadata().iter() {
            let non_empty: Vec<String> = values.iter().filter(|v| !v.is_empty()).cloned().collect();
            if non_empty.is_empty() {
                continue;
            }
            let label = humanize_key(key);
            let value = if non_empty.len() == 1 {
                FieldValue::Single(non_empty.into_iter().next().unwrap_or_default())
            } else {
                FieldValue::Multi(non_empty)
            };
            write_paragraph(&mut out, &label, &value);
        }
        out.push_str("</span>\n");
        out
    }
}
