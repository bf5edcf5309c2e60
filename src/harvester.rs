//! Resumption-token harvesting against the CONTENTdm OAI-PMH gateway.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use reqwest::blocking::Client;
use roxmltree::{Document, Node};
use url::Url;

use crate::config::{self, DEFAULT_PAGE_SIZE, METADATA_PREFIX, QDC_NAMESPACE};
use crate::error::{HarvestError, Result};
use crate::http;
use crate::record::{RawRecord, Record};
use crate::registry::{MapperRegistry, MappingStrategy};

/// Canonical item URL: `http://host/path/u?/collection,id`.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static CANONICAL_ITEM_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>.+/)u/?\?/(?P<collection>.+),(?P<id>\d+)$").expect("valid regex")
});

/// How the first ListRecords request is formed.
///
/// Older gateways expect the client to synthesize a structured
/// `collection:from:until:prefix:offset` token up front; newer ones
/// take `set`/`metadataPrefix` parameters and issue their own token in
/// the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenMode {
    #[default]
    ServerIssued,
    ClientSynthesized,
}

/// Bounds for a bulk harvest.
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Stop after this many records; the result is truncated to
    /// exactly this count even when that drops part of the final page.
    pub max: Option<usize>,
    /// Lower datestamp bound (YYYY-MM-DD).
    pub from: Option<String>,
    /// Upper datestamp bound (YYYY-MM-DD).
    pub until: Option<String>,
    /// Offset folded into a client-synthesized token when resuming a
    /// previous partial fetch.
    pub first: usize,
}

/// Drives the pagination protocol against one installation and wraps
/// harvested payloads as [`Record`]s bound to their collection.
#[derive(Debug)]
pub struct Harvester {
    base_uri: Url,
    client: Client,
    registry: Arc<MapperRegistry>,
    page_size: usize,
    token_mode: TokenMode,
}

impl Harvester {
    /// Create a harvester for the installation at `base_url`. The URL
    /// is normalized to the installation's identity form.
    pub fn new(base_url: &str, registry: Arc<MapperRegistry>) -> Result<Self> {
        Ok(Self {
            base_uri: config::normalize_base_url(base_url)?,
            client: http::create_client()?,
            registry,
            page_size: DEFAULT_PAGE_SIZE,
            token_mode: TokenMode::default(),
        })
    }

    pub fn with_token_mode(mut self, token_mode: TokenMode) -> Self {
        self.token_mode = token_mode;
        self
    }

    /// Advisory page size hint. The server decides the actual page
    /// size it serves.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    pub fn registry(&self) -> &Arc<MapperRegistry> {
        &self.registry
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Initialize field maps for every collection at the installation.
    /// Per-collection failures are logged, not propagated; a failing
    /// set listing is.
    pub fn init_mappers(&self, strategy: &MappingStrategy) -> Result<()> {
        let sets = self.collections()?;
        self.registry
            .init_all(&self.client, &self.base_uri, &sets, strategy);
        Ok(())
    }

    /// Initialize the field map for one collection.
    pub fn init_mapper(&self, collection: &str, strategy: &MappingStrategy) -> Result<()> {
        self.registry
            .init_map(&self.client, &self.base_uri, collection, strategy)
    }

    /// Enumerate all sets at the installation as id to display name.
    /// Single request; the gateway does not paginate set listings.
    pub fn collections(&self) -> Result<BTreeMap<String, String>> {
        let xml = self.request(&[("verb", "ListSets")])?;
        let doc = Document::parse(&xml)?;
        let mut sets = BTreeMap::new();
        for set in doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "set")
        {
            if let Some(id) = child_text(set, "setSpec") {
                sets.insert(id, child_text(set, "setName").unwrap_or_default());
            }
        }
        Ok(sets)
    }

    /// Fetch a single record by collection and ordinal id.
    pub fn get_record(&self, collection: &str, id: u64) -> Result<Record> {
        let host = self.base_uri.host_str().unwrap_or_default();
        let identifier = format!("oai:{host}:{collection}/{id}");
        let xml = self.request(&[
            ("verb", "GetRecord"),
            ("identifier", &identifier),
            ("metadataPrefix", METADATA_PREFIX),
        ])?;
        let doc = Document::parse(&xml)?;
        // Gateways disagree on the failure mode here: some answer with
        // an OAI error envelope, others with an empty result set.
        if let Some(code) = oai_error_code(&doc) {
            tracing::debug!(code = %code, identifier = %identifier, "gateway reported an OAI error");
            return Err(HarvestError::NotFound { identifier });
        }
        let raw = decode_page(&doc)
            .into_iter()
            .next()
            .ok_or(HarvestError::NotFound { identifier })?;
        Record::new(raw, &self.base_uri, collection, Arc::clone(&self.registry))
    }

    /// Harvest records for a collection, following resumption tokens
    /// until the gateway stops issuing them or `max` is reached.
    pub fn get_records(&self, collection: &str, options: &HarvestOptions) -> Result<Vec<Record>> {
        let mut raw_records: Vec<RawRecord> = Vec::new();
        let mut token: Option<String> = match self.token_mode {
            TokenMode::ServerIssued => None,
            TokenMode::ClientSynthesized => Some(self.synthesize_token(collection, options)),
        };
        let mut first_request = self.token_mode == TokenMode::ServerIssued;

        loop {
            let xml = if first_request {
                first_request = false;
                let mut params = vec![
                    ("verb", "ListRecords"),
                    ("set", collection),
                    ("metadataPrefix", METADATA_PREFIX),
                ];
                if let Some(from) = options.from.as_deref() {
                    params.push(("from", from));
                }
                if let Some(until) = options.until.as_deref() {
                    params.push(("until", until));
                }
                self.request(&params)?
            } else {
                match token.take() {
                    Some(current) => {
                        self.request(&[("verb", "ListRecords"), ("resumptionToken", &current)])?
                    }
                    None => break,
                }
            };

            let doc = Document::parse(&xml)?;
            raw_records.extend(decode_page(&doc));
            token = resumption_token(&doc);
            tracing::debug!(
                collected = raw_records.len(),
                has_token = token.is_some(),
                "harvested page"
            );
            if token.is_none() {
                break;
            }
            if let Some(max) = options.max {
                if raw_records.len() >= max {
                    break;
                }
            }
        }

        if let Some(max) = options.max {
            raw_records.truncate(max);
        }
        raw_records
            .into_iter()
            .map(|raw| Record::new(raw, &self.base_uri, collection, Arc::clone(&self.registry)))
            .collect()
    }

    /// Resolve an item URL in either observed shape into its record.
    ///
    /// Accepts the canonical `u?/collection,id` form and the query form
    /// carrying `CISOROOT`/`CISOPTR` parameters; dispatches to a fresh
    /// harvester for the embedded installation.
    pub fn record_from_url(url: &str, registry: Arc<MapperRegistry>) -> Result<Record> {
        let (base, collection, id) = parse_item_url(url)?;
        let harvester = Harvester::new(base.as_str(), registry)?;
        harvester.get_record(&collection, id)
    }

    fn synthesize_token(&self, collection: &str, options: &HarvestOptions) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            collection,
            options.from.as_deref().unwrap_or(""),
            options.until.as_deref().unwrap_or(""),
            METADATA_PREFIX,
            options.first,
        )
    }

    fn request(&self, params: &[(&str, &str)]) -> Result<String> {
        let url = config::oai_url(&self.base_uri, params)?;
        http::fetch_string(&self.client, &url, None)
    }
}

/// Split an item URL into (installation base, collection, id).
fn parse_item_url(url: &str) -> Result<(Url, String, u64)> {
    if let Some(caps) = CANONICAL_ITEM_URL.captures(url) {
        let base = Url::parse(&caps["base"])?;
        let id = caps["id"]
            .parse::<u64>()
            .map_err(|_| HarvestError::MalformedIdentifier(url.to_string()))?;
        return Ok((base, caps["collection"].to_string(), id));
    }

    let parsed = Url::parse(url)?;
    let mut collection = None;
    let mut id = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "CISOROOT" => collection = Some(value.trim_start_matches('/').to_string()),
            "CISOPTR" => id = value.parse::<u64>().ok(),
            _ => {}
        }
    }
    let (Some(collection), Some(id)) = (collection, id) else {
        return Err(HarvestError::MalformedIdentifier(url.to_string()));
    };
    let base = parsed.join("..")?;
    Ok((base, collection, id))
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
        .and_then(|c| c.text())
        .map(|t| t.trim().to_string())
}

/// The dereferenceable cursor for the next page, if the gateway issued
/// one. An absent or empty element ends the chain.
fn resumption_token(doc: &Document<'_>) -> Option<String> {
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "resumptionToken")
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// OAI error code in a response envelope (`idDoesNotExist`, ...).
fn oai_error_code(doc: &Document<'_>) -> Option<String> {
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "error")
        .and_then(|n| n.attribute("code"))
        .map(str::to_string)
}

/// Decode every `qualifieddc` payload in a response envelope into a raw
/// record, preserving document order and repeating elements.
fn decode_page(doc: &Document<'_>) -> Vec<RawRecord> {
    let mut records = Vec::new();
    for payload in doc
        .descendants()
        .filter(|n| n.has_tag_name((QDC_NAMESPACE, "qualifieddc")))
    {
        let mut raw = RawRecord::new();
        for child in payload.children().filter(|c| c.is_element()) {
            raw.push(&qualified_key(child), child.text().unwrap_or(""));
        }
        records.push(raw);
    }
    records
}

/// Qualified key of a payload element: `<prefix>.<local>`, or the bare
/// local name when the element carries no namespace prefix.
fn qualified_key(node: Node<'_, '_>) -> String {
    let local = node.tag_name().name();
    match node
        .tag_name()
        .namespace()
        .and_then(|ns| node.lookup_prefix(ns))
    {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}.{local}"),
        _ => local.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <ListRecords>
    <record><metadata>
      <qdc:qualifieddc xmlns:qdc="http://epubs.cclrc.ac.uk/xmlns/qdc/"
                       xmlns:dc="http://purl.org/dc/elements/1.1/"
                       xmlns:dcterms="http://purl.org/dc/terms/">
        <dc:title>First</dc:title>
        <dc:creator>Doe, J.</dc:creator>
        <dc:creator>Roe, R.</dc:creator>
        <dcterms:created>1923</dcterms:created>
        <dc:identifier>http://cdm.example.edu/u?/photos,1</dc:identifier>
      </qdc:qualifieddc>
    </metadata></record>
    <record><metadata>
      <qdc:qualifieddc xmlns:qdc="http://epubs.cclrc.ac.uk/xmlns/qdc/"
                       xmlns:dc="http://purl.org/dc/elements/1.1/">
        <dc:title>Second</dc:title>
        <dc:identifier>http://cdm.example.edu/u?/photos,2</dc:identifier>
      </qdc:qualifieddc>
    </metadata></record>
    <resumptionToken>photos:::qdc:2</resumptionToken>
  </ListRecords>
</OAI-PMH>"#;

    #[test]
    fn test_decode_page_builds_qualified_keys() {
        let doc = Document::parse(SAMPLE_PAGE).unwrap();
        let records = decode_page(&doc);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].values("dc.title"), ["First"]);
        assert_eq!(records[0].values("dc.creator"), ["Doe, J.", "Roe, R."]);
        assert_eq!(records[0].values("dcterms.created"), ["1923"]);
        assert_eq!(records[1].values("dc.title"), ["Second"]);
    }

    #[test]
    fn test_resumption_token_extraction() {
        let doc = Document::parse(SAMPLE_PAGE).unwrap();
        assert_eq!(resumption_token(&doc), Some("photos:::qdc:2".to_string()));
    }

    #[test]
    fn test_empty_resumption_token_ends_chain() {
        let xml = r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
          <ListRecords><resumptionToken>  </resumptionToken></ListRecords>
        </OAI-PMH>"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(resumption_token(&doc), None);
    }

    #[test]
    fn test_oai_error_code() {
        let xml = r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
          <error code="idDoesNotExist">unknown identifier</error>
        </OAI-PMH>"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(oai_error_code(&doc), Some("idDoesNotExist".to_string()));

        let doc = Document::parse(SAMPLE_PAGE).unwrap();
        assert_eq!(oai_error_code(&doc), None);
    }

    #[test]
    fn test_parse_item_url_canonical_form() {
        let (base, collection, id) =
            parse_item_url("http://cdm.example.edu/u?/photos,42").unwrap();
        assert_eq!(base.as_str(), "http://cdm.example.edu/");
        assert_eq!(collection, "photos");
        assert_eq!(id, 42);
    }

    #[test]
    fn test_parse_item_url_query_form() {
        let (base, collection, id) = parse_item_url(
            "http://cdm.example.edu/cgi-bin/showitem.exe?CISOROOT=/photos&CISOPTR=42",
        )
        .unwrap();
        assert_eq!(base.as_str(), "http://cdm.example.edu/");
        assert_eq!(collection, "photos");
        assert_eq!(id, 42);
    }

    #[test]
    fn test_parse_item_url_rejects_other_shapes() {
        assert!(parse_item_url("http://cdm.example.edu/about.html").is_err());
    }

    #[test]
    fn test_synthesized_token_shape() {
        let harvester = Harvester::new(
            "http://cdm.example.edu",
            Arc::new(MapperRegistry::new()),
        )
        .unwrap();

        let options = HarvestOptions {
            from: Some("2008-01-01".to_string()),
            until: Some("2008-12-31".to_string()),
            first: 200,
            ..Default::default()
        };
        assert_eq!(
            harvester.synthesize_token("photos", &options),
            "photos:2008-01-01:2008-12-31:qdc:200"
        );
        assert_eq!(
            harvester.synthesize_token("photos", &HarvestOptions::default()),
            "photos:::qdc:0"
        );
    }
}
