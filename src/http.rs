//! HTTP access to a CONTENTdm installation.
//!
//! Requests are single-shot: there is no retry logic, so a transport
//! failure during a multi-page harvest aborts the whole operation and
//! discards the pages accumulated so far.

use std::time::Duration;

use reqwest::blocking::Client;
use url::Url;

use crate::config::HTTP_TIMEOUT_SECS;
use crate::credentials::Credentials;
use crate::error::Result;

/// User agent string identifying this harvester.
const USER_AGENT: &str = concat!("contentdm-harvester/", env!("CARGO_PKG_VERSION"));

/// Create a configured HTTP client.
pub fn create_client() -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// Fetch a URL, optionally authenticating with HTTP basic auth.
///
/// Non-success status codes are turned into errors.
pub fn fetch_bytes(
    client: &Client,
    url: &Url,
    credentials: Option<&Credentials>,
) -> Result<Vec<u8>> {
    tracing::debug!(url = %url, authenticated = credentials.is_some(), "GET");
    let mut request = client.get(url.clone());
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }
    let response = request.send()?.error_for_status()?;
    Ok(response.bytes()?.to_vec())
}

/// Fetch a URL and decode the body as UTF-8.
///
/// CONTENTdm responses occasionally carry stray non-UTF-8 bytes;
/// invalid sequences are replaced rather than failing the harvest.
pub fn fetch_string(
    client: &Client,
    url: &Url,
    credentials: Option<&Credentials>,
) -> Result<String> {
    let bytes = fetch_bytes(client, url, credentials)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            tracing::warn!(url = %url, "response was not valid UTF-8, replacing invalid sequences");
            Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
        }
    }
}
