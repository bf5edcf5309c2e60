//! Process-wide cache of collection field maps.
//!
//! The registry is an explicit store handed to [`crate::Harvester`] and
//! [`crate::Record`] rather than a global, so callers and tests can
//! isolate registries per installation. Writes go through a mutex, so a
//! map is either absent or fully built; no partially initialized map is
//! ever visible.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::blocking::Client;
use scraper::{Html, Selector};
use url::Url;

use crate::config::{self, DC_DICTIONARY_KEY};
use crate::credentials::CredentialSource;
use crate::error::{HarvestError, Result};
use crate::http;
use crate::mapper::FieldMap;

/// Administrator-screen row layout: fixed cell positions per field.
const ADMIN_LABEL_CELL: usize = 0;
const ADMIN_CODE_CELL: usize = 1;
const ADMIN_HIDE_CELL: usize = 2;

type MapKey = (String, String);

/// How a collection's field configuration is obtained, by platform
/// generation.
#[derive(Debug)]
pub enum MappingStrategy {
    /// Older installations publish a static `dc.txt` field-code
    /// dictionary plus a per-collection `config.txt`.
    StaticFile,
    /// Newer installations only expose field configuration on the
    /// administrator screen, behind basic auth.
    AdminScrape { credentials: CredentialSource },
}

/// Cache of [`FieldMap`]s keyed by (installation identity, collection).
#[derive(Debug, Default)]
pub struct MapperRegistry {
    maps: Mutex<HashMap<MapKey, Arc<FieldMap>>>,
    /// `dc.txt` field-code dictionaries, one per installation, cached
    /// under the `DC_MAPPING` sentinel collection key.
    dictionaries: Mutex<HashMap<MapKey, Arc<HashMap<String, String>>>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn signature(base_uri: &Url, collection: &str) -> MapKey {
        (
            base_uri.as_str().trim_end_matches('/').to_string(),
            collection.trim_start_matches('/').to_string(),
        )
    }

    /// Pure cache lookup; never triggers scraping.
    pub fn lookup(&self, base_uri: &Url, collection: &str) -> Option<Arc<FieldMap>> {
        self.maps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::signature(base_uri, collection))
            .cloned()
    }

    /// Whether a map has been initialized for the collection.
    pub fn is_mapped(&self, base_uri: &Url, collection: &str) -> bool {
        self.lookup(base_uri, collection).is_some()
    }

    /// Explicitly assign a map, replacing any existing entry for the
    /// same installation and collection.
    pub fn assign_map(&self, base_uri: &Url, collection: &str, map: FieldMap) {
        self.maps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::signature(base_uri, collection), Arc::new(map));
    }

    /// Initialize maps for every listed collection. Individual
    /// collection failures are logged and do not abort the rest.
    pub fn init_all(
        &self,
        client: &Client,
        base_uri: &Url,
        collections: &BTreeMap<String, String>,
        strategy: &MappingStrategy,
    ) {
        for collection in collections.keys() {
            if let Err(err) = self.init_map(client, base_uri, collection, strategy) {
                tracing::warn!(
                    collection = %collection,
                    error = %err,
                    "leaving collection unmapped"
                );
            }
        }
    }

    /// Determine and cache the field map for one collection using the
    /// given scraping strategy. Replaces any existing entry.
    pub fn init_map(
        &self,
        client: &Client,
        base_uri: &Url,
        collection: &str,
        strategy: &MappingStrategy,
    ) -> Result<()> {
        let map = match strategy {
            MappingStrategy::StaticFile => self.scrape_static(client, base_uri, collection)?,
            MappingStrategy::AdminScrape { credentials } => {
                scrape_admin(client, base_uri, collection, credentials)?
            }
        };
        self.maps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::signature(base_uri, collection), Arc::new(map));
        Ok(())
    }

    /// The installation-wide field-code dictionary, fetched once and
    /// cached.
    fn dc_dictionary(
        &self,
        client: &Client,
        base_uri: &Url,
    ) -> Result<Arc<HashMap<String, String>>> {
        let key = Self::signature(base_uri, DC_DICTIONARY_KEY);
        if let Some(dict) = self
            .dictionaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(dict));
        }
        let url = config::dc_dictionary_url(base_uri)?;
        let body = http::fetch_string(client, &url, None)?;
        let dict = Arc::new(parse_dc_dictionary(&body));
        self.dictionaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&dict));
        Ok(dict)
    }

    fn scrape_static(
        &self,
        client: &Client,
        base_uri: &Url,
        collection: &str,
    ) -> Result<FieldMap> {
        let dictionary = self.dc_dictionary(client, base_uri)?;
        let url = config::collection_config_url(base_uri, collection)?;
        // A missing config.txt means the collection has no mapping; the
        // caller treats that as non-fatal during bulk initialization.
        let body = http::fetch_string(client, &url, None).map_err(|err| match err {
            HarvestError::Http(source) => HarvestError::MissingConfiguration {
                collection: collection.to_string(),
                reason: source.to_string(),
            },
            other => other,
        })?;
        Ok(parse_collection_config(&body, &dictionary))
    }
}

/// Parse the installation-wide `dc.txt` listing of
/// `field name:field code:...` lines into field code to qualified key.
fn parse_dc_dictionary(body: &str) -> HashMap<String, String> {
    let mut dictionary = HashMap::new();
    for line in body.lines() {
        let mut parts = line.trim_end().split(':');
        let (Some(name), Some(code)) = (parts.next(), parts.next()) else {
            continue;
        };
        if name.is_empty() || code.is_empty() {
            continue;
        }
        dictionary.insert(code.to_string(), qualified_key_for(name));
    }
    dictionary
}

/// Fold a human field name into its qualified key: lower-case the name,
/// camel-case across whitespace runs, then classify on hyphens.
fn qualified_key_for(name: &str) -> String {
    let mut folded = String::new();
    let mut upshift = false;
    for ch in name.to_lowercase().chars() {
        if ch.is_whitespace() {
            upshift = true;
            continue;
        }
        if upshift {
            folded.extend(ch.to_uppercase());
            upshift = false;
        } else {
            folded.push(ch);
        }
    }
    qualified_key_from_code(&folded)
}

/// Classify a hyphenated field-code token into a qualified key: a
/// single token belongs to the `dc` namespace (`title` -> `dc.title`),
/// two tokens map the second into `dcterms` (`date-created` ->
/// `dcterms.created`).
fn qualified_key_from_code(code: &str) -> String {
    let mut tokens = code.split('-');
    let first = tokens.next().unwrap_or_default();
    match tokens.next() {
        Some(second) => format!("dcterms.{second}"),
        None => format!("dc.{first}"),
    }
}

/// Parse a per-collection `config.txt`. Each line is colon-separated
/// with the display label first, the field code last, and the
/// visibility marker third from the end.
fn parse_collection_config(body: &str, dictionary: &HashMap<String, String>) -> FieldMap {
    let mut fields: Vec<(String, Vec<String>)> = Vec::new();
    let mut order: Vec<String> = Vec::new();
    for line in body.lines() {
        let parts: Vec<&str> = line.trim_end().split(':').collect();
        if parts.len() < 3 {
            continue;
        }
        let label = parts[0];
        let code = parts[parts.len() - 1];
        let hidden = parts[parts.len() - 3] == "HIDE";
        let Some(key) = dictionary.get(code) else {
            tracing::debug!(code, label, "field code missing from dc.txt dictionary");
            continue;
        };
        push_label(&mut fields, key, label);
        if !hidden {
            order.push(label.to_string());
        }
    }
    push_label(&mut fields, "dc.identifier", "Permalink");
    FieldMap::new(fields, order)
}

/// Screen-scrape the administrator field-configuration page. Unlike the
/// static-file path, transport failures here surface as errors.
fn scrape_admin(
    client: &Client,
    base_uri: &Url,
    collection: &str,
    credentials: &CredentialSource,
) -> Result<FieldMap> {
    let creds = credentials.resolve()?;
    let url = config::admin_config_url(base_uri, collection)?;
    let body = http::fetch_string(client, &url, creds.as_ref())?;
    Ok(parse_admin_page(&body))
}

/// Extract (label, field code, hide flag) from the fixed table-cell
/// positions of the administrator screen.
fn parse_admin_page(body: &str) -> FieldMap {
    #[allow(clippy::expect_used)] // Static selectors that are guaranteed to be valid
    let (row_selector, cell_selector) = (
        Selector::parse("tr").expect("valid selector"),
        Selector::parse("td").expect("valid selector"),
    );

    let document = Html::parse_document(body);
    let mut fields: Vec<(String, Vec<String>)> = Vec::new();
    let mut order: Vec<String> = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() <= ADMIN_HIDE_CELL {
            continue;
        }
        let label = &cells[ADMIN_LABEL_CELL];
        let code = &cells[ADMIN_CODE_CELL];
        if label.is_empty() || code.is_empty() {
            continue;
        }
        let key = qualified_key_from_code(code);
        push_label(&mut fields, &key, label);
        let hide_flag = &cells[ADMIN_HIDE_CELL];
        let hidden = hide_flag.eq_ignore_ascii_case("hide") || hide_flag.eq_ignore_ascii_case("yes");
        if !hidden {
            order.push(label.clone());
        }
    }
    push_label(&mut fields, "dc.identifier", "Permalink");
    FieldMap::new(fields, order)
}

fn push_label(fields: &mut Vec<(String, Vec<String>)>, key: &str, label: &str) {
    match fields.iter_mut().find(|(k, _)| k == key) {
        Some((_, labels)) => labels.push(label.to_string()),
        None => fields.push((key.to_string(), vec![label.to_string()])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize_base_url;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_qualified_key_for_folding() {
        assert_eq!(qualified_key_for("Title"), "dc.title");
        assert_eq!(qualified_key_for("Date-Created"), "dcterms.created");
        // Whitespace folds into camel case before hyphen classification.
        assert_eq!(qualified_key_for("Date created"), "dc.dateCreated");
        assert_eq!(qualified_key_for("Is-Part-Of"), "dcterms.part");
    }

    #[test]
    fn test_parse_dc_dictionary() {
        let body = "Title:title\nSubject:subjec\nDate-Created:datec\n\nbroken\n";
        let dictionary = parse_dc_dictionary(body);

        assert_eq!(dictionary.get("title"), Some(&"dc.title".to_string()));
        assert_eq!(dictionary.get("datec"), Some(&"dcterms.created".to_string()));
        assert_eq!(dictionary.len(), 3);
    }

    #[test]
    fn test_parse_collection_config() {
        let mut dictionary = HashMap::new();
        dictionary.insert("title".to_string(), "dc.title".to_string());
        dictionary.insert("subjec".to_string(), "dc.subject".to_string());
        dictionary.insert("descri".to_string(), "dc.description".to_string());

        let body = "Title:BIG:Y:N:title\n\
                    Subject:SMALL:Y:N:subjec\n\
                    Internal Notes:SMALL:HIDE:N:descri\n\
                    Unknown Field:SMALL:Y:N:nosuch\n";
        let map = parse_collection_config(body, &dictionary);

        assert_eq!(
            map.labels_for("dc.title").unwrap(),
            ["Title".to_string()]
        );
        // Hidden and unknown-code labels stay out of the order.
        assert_eq!(
            map.order(),
            ["Title".to_string(), "Subject".to_string()]
        );
        // Hidden field remains addressable.
        assert_eq!(
            map.labels_for("dc.description").unwrap(),
            ["Internal Notes".to_string()]
        );
        // Synthetic Permalink label under dc.identifier.
        assert_eq!(
            map.labels_for("dc.identifier").unwrap(),
            ["Permalink".to_string()]
        );
    }

    #[test]
    fn test_parse_admin_page() {
        let body = r#"<html><body><table>
            <tr><th>Field</th><th>Code</th><th>Hide</th></tr>
            <tr><td>Title</td><td>title</td><td>no</td></tr>
            <tr><td>Date</td><td>date-created</td><td>no</td></tr>
            <tr><td>Notes</td><td>descri</td><td>HIDE</td></tr>
        </table></body></html>"#;
        let map = parse_admin_page(body);

        assert_eq!(map.labels_for("dc.title").unwrap(), ["Title".to_string()]);
        assert_eq!(
            map.labels_for("dcterms.created").unwrap(),
            ["Date".to_string()]
        );
        assert_eq!(map.order(), ["Title".to_string(), "Date".to_string()]);
        assert_eq!(
            map.labels_for("dc.identifier").unwrap(),
            ["Permalink".to_string()]
        );
    }

    #[test]
    fn test_assign_and_lookup() {
        let registry = MapperRegistry::new();
        let base = normalize_base_url("http://cdm.example.edu").unwrap();
        let map = FieldMap::new(
            vec![("dc.title".to_string(), vec!["Title".to_string()])],
            vec!["Title".to_string()],
        );

        assert!(registry.lookup(&base, "photos").is_none());
        assert!(!registry.is_mapped(&base, "photos"));

        registry.assign_map(&base, "photos", map);
        assert!(registry.is_mapped(&base, "photos"));
        // Leading slash on the collection id normalizes to the same key.
        assert!(registry.is_mapped(&base, "/photos"));
    }

    #[test]
    fn test_assign_map_overwrites() {
        let registry = MapperRegistry::new();
        let base = normalize_base_url("http://cdm.example.edu").unwrap();

        registry.assign_map(
            &base,
            "photos",
            FieldMap::new(
                vec![("dc.title".to_string(), vec!["Old".to_string()])],
                vec!["Old".to_string()],
            ),
        );
        registry.assign_map(
            &base,
            "photos",
            FieldMap::new(
                vec![("dc.title".to_string(), vec!["New".to_string()])],
                vec!["New".to_string()],
            ),
        );

        let map = registry.lookup(&base, "photos").unwrap();
        assert_eq!(map.order(), ["New".to_string()]);
    }

    #[test]
    fn test_registries_are_isolated_per_instance() {
        let base = normalize_base_url("http://cdm.example.edu").unwrap();
        let a = MapperRegistry::new();
        let b = MapperRegistry::new();

        a.assign_map(
            &base,
            "photos",
            FieldMap::new(
                vec![("dc.title".to_string(), vec!["Title".to_string()])],
                vec!["Title".to_string()],
            ),
        );
        assert!(a.is_mapped(&base, "photos"));
        assert!(!b.is_mapped(&base, "photos"));
    }
}
