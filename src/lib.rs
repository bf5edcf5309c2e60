//! CONTENTdm Harvester - Pull Qualified Dublin Core records from CONTENTdm servers.
//!
//! This crate harvests item metadata from CONTENTdm digital-collection
//! installations over their OAI-PMH gateway and renders the records as
//! Qualified Dublin Core XML or labeled HTML, using each collection's
//! own field configuration for labels and ordering.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use contentdm_harvester::{Harvester, HarvestOptions, MapperRegistry, MappingStrategy};
//!
//! # fn main() -> contentdm_harvester::Result<()> {
//! let registry = Arc::new(MapperRegistry::new());
//! let harvester = Harvester::new("http://cdm.example.edu", registry)?;
//! harvester.init_mapper("photos", &MappingStrategy::StaticFile)?;
//!
//! let records = harvester.get_records("photos", &HarvestOptions::default())?;
//! for record in &records {
//!     println!("{}", record.to_xml());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The harvester is organized into several modules:
//!
//! - [`config`]: URL construction, protocol constants, and validation
//! - [`error`]: Error types and Result alias
//! - [`http`]: HTTP client for gateway and configuration requests
//! - [`credentials`]: Administrator credentials for the admin scrape
//! - [`record`]: Harvested records and their derived URLs
//! - [`mapper`]: Field maps and record rendering
//! - [`registry`]: Shared cache of per-collection field maps
//! - [`harvester`]: Pagination protocol and record retrieval
//! - [`cli`]: Command-line interface

pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod harvester;
pub mod http;
pub mod mapper;
pub mod record;
pub mod registry;

// Re-export commonly used items
pub use credentials::{CredentialSource, Credentials};
pub use error::{HarvestError, Result};
pub use harvester::{Harvester, HarvestOptions, TokenMode};
pub use mapper::{FieldMap, FieldValue, GenericMapper};
pub use record::{ImageOptions, RawRecord, Record, RecordSource};
pub use registry::{MapperRegistry, MappingStrategy};
