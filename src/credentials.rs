//! Administrator credentials for the field-configuration scrape.

use std::fmt;

use crate::error::{HarvestError, Result};

/// Longest supplier chain followed before resolution gives up.
const MAX_RESOLUTION_DEPTH: usize = 8;

/// A concrete username/password pair for HTTP basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never echo the password into logs.
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of administrator credentials.
///
/// A supplier may itself return another supplier (a prompt deferring to
/// a keychain, say); resolution follows the chain with a bounded loop.
pub enum CredentialSource {
    /// No credentials; requests go out unauthenticated.
    None,
    /// A concrete pair.
    Basic(Credentials),
    /// Deferred supplier, invoked at resolution time.
    Supplier(Box<dyn Fn() -> CredentialSource + Send + Sync>),
}

impl CredentialSource {
    /// Convenience constructor for a direct username/password pair.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic(Credentials::new(username, password))
    }

    /// Resolve to a concrete pair, following supplier indirection up to
    /// a fixed depth.
    pub fn resolve(&self) -> Result<Option<Credentials>> {
        let mut current = match self {
            Self::None => return Ok(None),
            Self::Basic(creds) => return Ok(Some(creds.clone())),
            Self::Supplier(supply) => supply(),
        };
        for _ in 1..MAX_RESOLUTION_DEPTH {
            current = match current {
                Self::None => return Ok(None),
                Self::Basic(creds) => return Ok(Some(creds)),
                Self::Supplier(supply) => supply(),
            };
        }
        Err(HarvestError::CredentialResolution(MAX_RESOLUTION_DEPTH))
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "CredentialSource::None"),
            Self::Basic(creds) => f.debug_tuple("CredentialSource::Basic").field(creds).finish(),
            Self::Supplier(_) => write!(f, "CredentialSource::Supplier(..)"),
        }
    }
}
