//! # NGSI Source Core
//!
//! Shared model for the NGSI source operator.
//!
//! This crate provides:
//! - `SourceConfig`, the per-cycle configuration and its normalisation rules
//! - Attribute formats (`normalized` / `keyValues`) and the format translator
//! - The metadata record exchanged with companion operators

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod entity;
pub mod metadata;

pub use config::{AuthMode, ConfigError, SourceConfig};
pub use entity::{flatten_batch, normalized_to_key_values, AttrsFormat};
pub use metadata::{MetadataError, MetadataExport, MetadataImport};
