//! Configuration constants and URL construction for CONTENTdm installations.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{HarvestError, Result};

/// Relative path of the OAI-PMH gateway on every CONTENTdm installation.
pub const OAI_PATH: &str = "cgi-bin/oai.exe";

/// Metadata prefix requested from the gateway. CONTENTdm serves
/// Qualified Dublin Core under this prefix only.
pub const METADATA_PREFIX: &str = "qdc";

/// Namespace of the `qualifieddc` payload element in OAI responses.
pub const QDC_NAMESPACE: &str = "http://epubs.cclrc.ac.uk/xmlns/qdc/";

/// Dublin Core element namespace, declared when re-serializing records.
pub const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";

/// Dublin Core terms namespace, declared when re-serializing records.
pub const DCTERMS_NAMESPACE: &str = "http://purl.org/dc/terms/";

/// Page size the gateway uses for ListRecords responses. The server
/// controls the actual size; the client carries this only as an
/// advisory knob.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// HTTP timeout in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Sentinel collection key under which the installation-wide
/// field-code dictionary (`dc.txt`) is cached in the registry.
pub const DC_DICTIONARY_KEY: &str = "DC_MAPPING";

/// Date bound pattern: YYYY-MM-DD.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));

/// Normalize an installation base URL into its identity form:
/// scheme + host + port + path with trailing slashes trimmed, no query
/// or fragment. Two URLs normalizing to the same string name the same
/// installation.
pub fn normalize_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    if url.cannot_be_a_base() || !url.has_host() {
        return Err(HarvestError::InvalidBaseUrl(raw.to_string()));
    }
    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(&trimmed);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Build an OAI gateway request URL for the given query parameters.
/// Values are percent-encoded by the query serializer.
pub fn oai_url(base: &Url, params: &[(&str, &str)]) -> Result<Url> {
    let mut url = base.join(OAI_PATH)?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}

/// URL of the installation-wide field-code dictionary.
pub fn dc_dictionary_url(base: &Url) -> Result<Url> {
    Ok(base.join("dc.txt")?)
}

/// URL of the per-collection field configuration file (static-file
/// platform generation).
pub fn collection_config_url(base: &Url, collection: &str) -> Result<Url> {
    let collection = collection.trim_start_matches('/');
    Ok(base.join(&format!("{collection}/index/etc/config.txt"))?)
}

/// URL of the administrator field-configuration screen (authenticated
/// scrape platform generation).
pub fn admin_config_url(base: &Url, collection: &str) -> Result<Url> {
    let mut url = base.join("cgi-bin/admin/editconf.exe")?;
    let collection = collection.trim_start_matches('/');
    url.query_pairs_mut()
        .append_pair("CISODB", &format!("/{collection}"));
    Ok(url)
}

/// Image retrieval URL for one item, with caller-supplied CGI
/// parameters appended after the item coordinates.
pub fn image_url(
    base: &Url,
    collection: &str,
    id: u64,
    params: &[(String, String)],
) -> Result<Url> {
    let mut url = base.join("cgi-bin/getimage.exe")?;
    let collection = collection.trim_start_matches('/');
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("CISOROOT", &format!("/{collection}"));
        query.append_pair("CISOPTR", &id.to_string());
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}

/// Thumbnail URL for one item.
pub fn thumbnail_url(base: &Url, collection: &str, id: u64) -> Result<Url> {
    let mut url = base.join("cgi-bin/thumbnail.exe")?;
    let collection = collection.trim_start_matches('/');
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("CISOROOT", &format!("/{collection}"));
        query.append_pair("CISOPTR", &id.to_string());
    }
    Ok(url)
}

/// Validate a harvest date bound (YYYY-MM-DD).
///
/// # Examples
/// ```
/// use contentdm_harvester::config::validate_date;
///
/// assert!(validate_date("2008-06-15").is_ok());
/// assert!(validate_date("invalid").is_err());
/// assert!(validate_date("2008-13-01").is_err()); // Invalid month
/// ```
pub fn validate_date(date_str: &str) -> Result<()> {
    if !DATE_PATTERN.is_match(date_str) {
        return Err(HarvestError::InvalidDate(date_str.to_string()));
    }
    chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| HarvestError::InvalidDate(date_str.to_string()))?;
    Ok(())
}
