//! # deprecated-usage
//!
//! Finds which packages of a plugin ecosystem reference flagged (deprecated
//! or restricted) APIs of the platform they build on, by decoding compiled
//! class files directly.
//!
//! ## Architecture
//!
//! - **classfile**: Class-file decoder producing declarations and references
//! - **signature**: Generic signature grammar
//! - **container**: Zip package reader with nested-jar descent
//! - **symbol**: Canonical class/method/field keys
//! - **registry**: Flagged symbols declared by the reference package
//! - **criteria**: What a scan is looking for
//! - **usage**: Per-package usage records and provider/consumer edges
//! - **closure**: Recursive expansion over consumers, wave by wave
//! - **artifact**: Package descriptors and checksums
//! - **download**: Cached, verified, retried downloads on a bounded pool
//! - **catalog**: Update-center documents
//! - **scan**: Local work directory discovery
//! - **pipeline**: Orchestration of downloads, analysis and waves

pub mod artifact;
pub mod catalog;
pub mod classfile;
pub mod cli;
pub mod closure;
pub mod config;
pub mod container;
pub mod criteria;
pub mod download;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod scan;
pub mod signature;
pub mod symbol;
pub mod usage;

#[cfg(test)]
#[path = "../tests/common/classgen.rs"]
pub(crate) mod classgen;
