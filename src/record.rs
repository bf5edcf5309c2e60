//! In-memory representation of one harvested metadata item.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use url::Url;

use crate::config;
use crate::error::{HarvestError, Result};
use crate::mapper::GenericMapper;
use crate::registry::MapperRegistry;

/// Tail of a permalink: `collection,id`, optionally slash-terminated.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static IDENTIFIER_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^/,\s]+),(\d+)/?$").expect("valid regex"));

/// Raw harvested metadata: qualified keys (`dc.title`,
/// `dcterms.spatial`, ...) mapped to their values in document order.
/// Repeating elements accumulate under one key; duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    entries: Vec<(String, Vec<String>)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one occurrence value for a qualified key. First-seen key
    /// order is preserved for serialization.
    pub fn push(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key.to_string(), vec![value])),
        }
    }

    /// All occurrence values for a key, in document order.
    pub fn values(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// The value at a given occurrence position for a key.
    pub fn value_at(&self, key: &str, index: usize) -> Option<&str> {
        self.values(key).get(index).map(String::as_str)
    }

    /// The last occurrence value for a key.
    pub fn last_value(&self, key: &str) -> Option<&str> {
        self.values(key).last().map(String::as_str)
    }

    pub(crate) fn replace_last(&mut self, key: &str, value: String) {
        if let Some((_, values)) = self.entries.iter_mut().find(|(k, _)| k == key) {
            if let Some(last) = values.last_mut() {
                *last = value;
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Iterate keys and value lists in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, values)| (k.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identity of a harvested record: the installation it came from, its
/// collection, and its ordinal id within the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSource {
    pub base_uri: Url,
    pub collection: String,
    pub id: u64,
}

/// Options for building an item image URL. Named fields cover the
/// common CGI parameters; `raw` entries override or extend them by
/// literal parameter name.
#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Percentage scale (100 = full size).
    pub scale: u32,
    pub width: u32,
    pub height: u32,
    /// Horizontal crop offset.
    pub x: u32,
    /// Vertical crop offset.
    pub y: u32,
    /// Raw CGI parameters, applied last.
    pub raw: Vec<(String, String)>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            scale: 100,
            width: 0,
            height: 0,
            x: 0,
            y: 0,
            raw: Vec::new(),
        }
    }
}

/// One harvested metadata item, bound to its originating installation
/// and collection.
#[derive(Debug, Clone)]
pub struct Record {
    metadata: RawRecord,
    source: RecordSource,
    registry: Arc<MapperRegistry>,
}

impl Record {
    /// Wrap a raw record harvested from `collection` at `base_uri`.
    ///
    /// Construction corrects the known tab-joined permalink defect in
    /// place and derives the definitive `(collection, id)` pair from
    /// the record's own last `dc.identifier` value, overwriting the
    /// caller-supplied collection.
    pub fn new(
        metadata: RawRecord,
        base_uri: &Url,
        collection: &str,
        registry: Arc<MapperRegistry>,
    ) -> Result<Self> {
        let mut metadata = metadata;

        // The gateway sometimes emits the permalink as two URL
        // fragments joined by a tab; only the part after the last tab
        // is usable, resolved against the installation base.
        let corrected = match metadata.last_value("dc.identifier") {
            Some(raw) if raw.contains('\t') => {
                let tail = raw.rsplit('\t').next().unwrap_or(raw);
                Some(base_uri.join(tail)?.to_string())
            }
            _ => None,
        };
        if let Some(value) = corrected {
            metadata.replace_last("dc.identifier", value);
        }

        let (derived_collection, derived_id) = {
            let permalink = metadata.last_value("dc.identifier").ok_or_else(|| {
                HarvestError::MalformedIdentifier("record has no dc.identifier".to_string())
            })?;
            let caps = IDENTIFIER_TAIL
                .captures(permalink)
                .ok_or_else(|| HarvestError::MalformedIdentifier(permalink.to_string()))?;
            let id = caps[2]
                .parse::<u64>()
                .map_err(|_| HarvestError::MalformedIdentifier(permalink.to_string()))?;
            (caps[1].to_string(), id)
        };

        // The record's own identifier is authoritative, even when the
        // harvest supplied a collection.
        if derived_collection != collection.trim_start_matches('/') {
            tracing::debug!(
                supplied = collection,
                derived = %derived_collection,
                "collection differs from identifier-derived value"
            );
        }
        Ok(Self {
            metadata,
            source: RecordSource {
                base_uri: base_uri.clone(),
                collection: derived_collection,
                id: derived_id,
            },
            registry,
        })
    }

    pub fn metadata(&self) -> &RawRecord {
        &self.metadata
    }

    pub fn source(&self) -> &RecordSource {
        &self.source
    }

    /// The stable URL identifying this record: the last `dc.identifier`
    /// value, post correction.
    pub fn permalink(&self) -> Option<&str> {
        self.metadata.last_value("dc.identifier")
    }

    /// Image-service URL for this item.
    pub fn img_href(&self, options: &ImageOptions) -> Result<Url> {
        let mut params: Vec<(String, String)> = vec![
            ("DMSCALE".to_string(), options.scale.to_string()),
            ("DMWIDTH".to_string(), options.width.to_string()),
            ("DMHEIGHT".to_string(), options.height.to_string()),
            ("DMX".to_string(), options.x.to_string()),
            ("DMY".to_string(), options.y.to_string()),
        ];
        for (key, value) in &options.raw {
            match params.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => params.push((key.clone(), value.clone())),
            }
        }
        config::image_url(
            &self.source.base_uri,
            &self.source.collection,
            self.source.id,
            &params,
        )
    }

    /// Thumbnail-service URL for this item.
    pub fn thumbnail_href(&self) -> Result<Url> {
        config::thumbnail_url(
            &self.source.base_uri,
            &self.source.collection,
            self.source.id,
        )
    }

    /// Serialize to Qualified Dublin Core XML, using the collection's
    /// field map when one is registered and the generic renderer
    /// otherwise.
    pub fn to_xml(&self) -> String {
        match self
            .registry
            .lookup(&self.source.base_uri, &self.source.collection)
        {
            Some(map) => map.to_xml(self),
            None => GenericMapper.to_xml(self),
        }
    }

    /// Serialize to labeled HTML, with the same field-map fallback as
    /// [`Record::to_xml`].
    pub fn to_html(&self) -> String {
        match self
            .registry
            .lookup(&self.source.base_uri, &self.source.collection)
        {
            Some(map) => map.to_html(self),
            None => GenericMapper.to_html(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize_base_url;
    use pretty_assertions::assert_eq;

    fn base() -> Url {
        normalize_base_url("http://cdm.example.edu").unwrap()
    }

    fn registry() -> Arc<MapperRegistry> {
        Arc::new(MapperRegistry::new())
    }

    fn raw_with_identifier(identifier: &str) -> RawRecord {
        let mut raw = RawRecord::new();
        raw.push("dc.title", "A photograph");
        raw.push("dc.identifier", identifier);
        raw
    }

    #[test]
    fn test_raw_record_preserves_order_and_duplicates() {
        let mut raw = RawRecord::new();
        raw.push("dc.creator", "First");
        raw.push("dc.title", "Title");
        raw.push("dc.creator", "Second");

        assert_eq!(raw.values("dc.creator"), ["First", "Second"]);
        let keys: Vec<&str> = raw.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["dc.creator", "dc.title"]);
    }

    #[test]
    fn test_identity_derived_from_identifier_overwrites_collection() {
        let raw = raw_with_identifier("http://cdm.example.edu/u?/photos,42");
        let record = Record::new(raw, &base(), "something-else", registry()).unwrap();

        assert_eq!(record.source().collection, "photos");
        assert_eq!(record.source().id, 42);
    }

    #[test]
    fn test_permalink_tab_correction() {
        let raw = raw_with_identifier("http://x/\thttp://y/u?/coll,7");
        let record = Record::new(raw, &base(), "coll", registry()).unwrap();

        assert_eq!(record.permalink(), Some("http://y/u?/coll,7"));
        assert_eq!(record.source().collection, "coll");
        assert_eq!(record.source().id, 7);
    }

    #[test]
    fn test_tab_correction_with_relative_fragment() {
        let raw = raw_with_identifier("http://broken/\tu?/photos,3");
        let record = Record::new(raw, &base(), "photos", registry()).unwrap();

        assert_eq!(
            record.permalink(),
            Some("http://cdm.example.edu/u?/photos,3")
        );
    }

    #[test]
    fn test_missing_identifier_is_malformed() {
        let mut raw = RawRecord::new();
        raw.push("dc.title", "No identifier");
        let err = Record::new(raw, &base(), "photos", registry()).unwrap_err();
        assert!(matches!(err, HarvestError::MalformedIdentifier(_)));
    }

    #[test]
    fn test_unparsable_identifier_is_malformed() {
        let raw = raw_with_identifier("http://cdm.example.edu/no-tail-here");
        let err = Record::new(raw, &base(), "photos", registry()).unwrap_err();
        assert!(matches!(err, HarvestError::MalformedIdentifier(_)));
    }

    #[test]
    fn test_img_href_defaults() {
        let raw = raw_with_identifier("http://cdm.example.edu/u?/photos,42");
        let record = Record::new(raw, &base(), "photos", registry()).unwrap();

        let url = record.img_href(&ImageOptions::default()).unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("CISOROOT=%2Fphotos"));
        assert!(query.contains("CISOPTR=42"));
        assert!(query.contains("DMSCALE=100"));
        assert!(query.contains("DMWIDTH=0"));
    }

    #[test]
    fn test_img_href_raw_override_replaces_named_param() {
        let raw = raw_with_identifier("http://cdm.example.edu/u?/photos,42");
        let record = Record::new(raw, &base(), "photos", registry()).unwrap();

        let options = ImageOptions {
            raw: vec![
                ("DMSCALE".to_string(), "25".to_string()),
                ("DMROTATE".to_string(), "90".to_string()),
            ],
            ..Default::default()
        };
        let url = record.img_href(&options).unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("DMSCALE=25"));
        assert!(!query.contains("DMSCALE=100"));
        assert!(query.contains("DMROTATE=90"));
    }

    #[test]
    fn test_thumbnail_href() {
        let raw = raw_with_identifier("http://cdm.example.edu/u?/photos,42");
        let record = Record::new(raw, &base(), "photos", registry()).unwrap();

        let url = record.thumbnail_href().unwrap();
        assert_eq!(url.path(), "/cgi-bin/thumbnail.exe");
        assert!(url.query().unwrap().contains("CISOPTR=42"));
    }
}
