//! Artifact descriptors and content checksums.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::UnsafePathSegment;
use crate::usage::PackageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    Sha256([u8; 32]),
}

impl Checksum {
    /// Accepts the 64-character hex form or the base64 form update centers publish.
    pub fn parse_sha256(value: &str) -> Option<Self> {
        let value = value.trim();
        let bytes = if value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode(value).ok()?
        } else {
            STANDARD.decode(value).ok()?
        };
        let digest: [u8; 32] = bytes.try_into().ok()?;
        Some(Self::Sha256(digest))
    }

    pub fn of(data: &[u8]) -> Self {
        Self::Sha256(Sha256::digest(data).into())
    }

    /// `Err` carries the actual digest of `data`.
    pub fn verify(&self, data: &[u8]) -> Result<(), Checksum> {
        let actual = Self::of(data);
        if &actual == self { Ok(()) } else { Err(actual) }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256(digest) => write!(f, "sha256:{}", hex::encode(digest)),
        }
    }
}

impl Serialize for Checksum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub version: String,
    pub url: String,
    pub checksum: Option<Checksum>,
    pub docs_url: Option<String>,
    /// `<work>/<name>/<version>/<file name from url>`
    pub file: PathBuf,
    /// Names of the packages this one declares as dependencies, optional ones included.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl ArtifactDescriptor {
    /// Fails when `name` or `version` could leave `<work>/<name>/<version>`.
    pub fn new(work_dir: &Path, name: &str, version: &str, url: &str) -> Result<Self, UnsafePathSegment> {
        check_segment("name", name)?;
        check_segment("version", version)?;
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            url: url.to_string(),
            checksum: None,
            docs_url: None,
            file: work_dir
                .join(name)
                .join(version)
                .join(file_name_from_url(url, name)),
            dependencies: Vec::new(),
        })
    }

    pub fn with_checksum(mut self, checksum: Option<Checksum>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_docs_url(mut self, docs_url: Option<String>) -> Self {
        self.docs_url = docs_url;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d == name)
    }

    pub fn package_id(&self) -> PackageId {
        PackageId::new(&self.name, &self.version)
    }

    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', ':', '\0'])
}

fn check_segment(what: &'static str, value: &str) -> Result<(), UnsafePathSegment> {
    if is_safe_segment(value) {
        Ok(())
    } else {
        Err(UnsafePathSegment {
            what,
            value: value.to_string(),
        })
    }
}

fn file_name_from_url(url: &str, name: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(file) if is_safe_segment(file) => file.to_string(),
        _ => format!("{name}.hpi"),
    }
}
