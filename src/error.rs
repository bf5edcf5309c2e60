//! Error types for the harvester.

use thiserror::Error;

/// Main error type for the harvester library.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The installation base URL could not be parsed or normalized.
    #[error("Invalid installation URL: '{0}'")]
    InvalidBaseUrl(String),

    /// Harvest date bound with the wrong shape.
    #[error("Invalid date bound: '{0}'. Expected YYYY-MM-DD (e.g., 2008-06-15)")]
    InvalidDate(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// URL construction failed.
    #[error("URL construction failed: {0}")]
    Url(#[from] url::ParseError),

    /// XML parsing failed.
    #[error("XML parsing failed: {0}")]
    XmlParse(#[from] roxmltree::Error),

    /// Single-record fetch matched nothing at the gateway.
    #[error("No record found for identifier '{identifier}'")]
    NotFound { identifier: String },

    /// Per-collection field configuration is absent on the server.
    /// Non-fatal during bulk registry initialization: the collection
    /// simply stays unmapped.
    #[error("No field configuration for collection '{collection}': {reason}")]
    MissingConfiguration { collection: String, reason: String },

    /// A record identifier or item URL does not end in the expected
    /// `collection,id` tail.
    #[error("Malformed record identifier: '{0}'")]
    MalformedIdentifier(String),

    /// A credential supplier chain never produced a concrete pair.
    #[error("Credential resolution exceeded {0} levels without producing a username/password pair")]
    CredentialResolution(usize),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = HarvestError::NotFound {
            identifier: "oai:cdm.example.edu:photos/9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No record found for identifier 'oai:cdm.example.edu:photos/9'"
        );
    }

    #[test]
    fn test_missing_configuration_display() {
        let err = HarvestError::MissingConfiguration {
            collection: "photos".to_string(),
            reason: "404".to_string(),
        };
        assert!(err.to_string().contains("photos"));
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_malformed_identifier_display() {
        let err = HarvestError::MalformedIdentifier("http://x/nope".to_string());
        assert!(err.to_string().contains("http://x/nope"));
    }
}
