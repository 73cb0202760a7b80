//! Update-center catalog documents.
//!
//! Only the fields needed to build artifact descriptors are read; everything
//! else in the document is ignored.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::artifact::{ArtifactDescriptor, Checksum};
use crate::download::Fetcher;
use crate::error::{CatalogError, UnsafePathSegment};

pub const DEFAULT_UPDATE_CENTER: &str = "https://updates.jenkins.io/update-center.json";

/// Artifact name of the platform package in catalogs and the work directory.
pub const CORE_NAME: &str = "core";

const JSONP_PREFIX: &str = "updateCenter.post(";

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub wiki: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<CatalogDependency>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogDependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCenter {
    #[serde(default)]
    pub core: Option<CatalogEntry>,
    #[serde(default)]
    pub plugins: BTreeMap<String, CatalogEntry>,
}

/// Parses a catalog, with or without the `updateCenter.post(...);` envelope.
pub fn parse_update_center(text: &str, source_name: &str) -> Result<UpdateCenter, CatalogError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix(JSONP_PREFIX)
        .map(|rest| rest.trim_end().trim_end_matches(';').trim_end().trim_end_matches(')'))
        .unwrap_or(trimmed);
    serde_json::from_str(body).map_err(|source| CatalogError::Parse {
        source_name: source_name.to_string(),
        source,
    })
}

pub fn fetch_update_center(fetcher: &dyn Fetcher, url: &str) -> Result<UpdateCenter, CatalogError> {
    let bytes = fetcher.fetch(url)?;
    let center = parse_update_center(&String::from_utf8_lossy(&bytes), url)?;
    info!(url, plugins = center.plugins.len(), "catalog loaded");
    Ok(center)
}

/// Artifacts of a run: the reference package and the dependent packages.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub core: Option<ArtifactDescriptor>,
    pub plugins: Vec<ArtifactDescriptor>,
}

impl Catalog {
    /// Merges documents in order. The first core and the first occurrence of
    /// each plugin name win. Entries whose name or version cannot be used as a
    /// work-directory path are skipped.
    pub fn merge(documents: &[UpdateCenter], work_dir: &Path) -> Self {
        let mut catalog = Catalog::default();
        let mut seen = HashSet::new();
        for document in documents {
            if catalog.core.is_none()
                && let Some(core) = &document.core
            {
                match descriptor(work_dir, core) {
                    Ok(core) => catalog.core = Some(core),
                    Err(err) => warn!(error = %err, "skipping catalog core entry"),
                }
            }
            for entry in document.plugins.values() {
                if !seen.insert(entry.name.clone()) {
                    continue;
                }
                match descriptor(work_dir, entry) {
                    Ok(plugin) => catalog.plugins.push(plugin),
                    Err(err) => warn!(plugin = %entry.name, error = %err, "skipping catalog entry"),
                }
            }
        }
        catalog
    }

    /// Splits already downloaded artifacts into the core and everything else.
    pub fn from_local(artifacts: Vec<ArtifactDescriptor>) -> Self {
        let mut catalog = Catalog::default();
        for artifact in artifacts {
            if artifact.name == CORE_NAME && catalog.core.is_none() {
                catalog.core = Some(artifact);
            } else {
                catalog.plugins.push(artifact);
            }
        }
        catalog
    }
}

fn descriptor(work_dir: &Path, entry: &CatalogEntry) -> Result<ArtifactDescriptor, UnsafePathSegment> {
    Ok(ArtifactDescriptor::new(work_dir, &entry.name, &entry.version, &entry.url)?
        .with_checksum(entry.sha256.as_deref().and_then(Checksum::parse_sha256))
        .with_docs_url(entry.wiki.clone())
        .with_dependencies(entry.dependencies.iter().map(|d| d.name.clone()).collect()))
}
