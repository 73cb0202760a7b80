//! Error taxonomy shared by the decoder, the scanner and the acquisition pipeline.
//!
//! Entry-level failures (`DecodeError`) are absorbed by the container walk,
//! artifact-level failures (`ArtifactError`, `FetchError`) are absorbed by the
//! pipeline and reported at the end of the run, and `ConfigError` aborts the
//! run before any work starts.

use std::path::PathBuf;
use thiserror::Error;

/// One class entry could not be decoded (`MalformedInput`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid class file magic header {0:#010x}")]
    InvalidMagic(u32),
    #[error("unsupported constant pool tag {tag}")]
    UnsupportedConstant { tag: u8 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
    #[error("invalid opcode {opcode:#04x} at bytecode offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },
    #[error("malformed signature `{0}`")]
    InvalidSignature(String),
    #[error("malformed annotation element tag `{0}`")]
    InvalidElementValue(char),
}

/// A package container could not be opened or read (`CorruptArtifact`).
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("corrupt archive {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The scan of this package panicked; the rest of the run continues.
    #[error("analysis of {} aborted: {message}", path.display())]
    Aborted { path: PathBuf, message: String },
}

/// Transport-level failure of one request, before retry policy is applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("connection failure on {url}: {message}")]
    Connection { url: String, message: String },
}

impl TransportError {
    /// Gateway-level 5xx answers and broken connections are replayed; 4xx are final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => (500..600).contains(status),
            Self::Connection { .. } => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt returned a body whose digest did not verify.
    #[error("checksum mismatch for {url} after {attempts} attempt(s): expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        attempts: u32,
        expected: String,
        actual: String,
    },
    #[error("download failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("{} is not available locally and downloads are disabled", path.display())]
    NotAvailableOffline { path: PathBuf },
    #[error("failed to persist {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A catalog name or version that cannot be used as a work-directory segment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("`{value}` is not a valid {what} for a work-directory path")]
pub struct UnsafePathSegment {
    pub what: &'static str,
    pub value: String,
}

/// The package catalog could not be obtained; fatal for the run.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to parse catalog {source_name}: {source}")]
    Parse {
        source_name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Startup configuration problem (`ConfigurationError`); fatal before any work.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{kind} include-list option provided, but file cannot be found ({})", path.display())]
    MissingIncludeFile { kind: &'static str, path: PathBuf },
    #[error("failed to read {kind} include-list {}: {source}", path.display())]
    UnreadableIncludeFile {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid value for {option}: {message}")]
    InvalidOption {
        option: &'static str,
        message: String,
    },
}

/// Why an artifact contributed nothing (or only a partial record) to the run.
#[derive(Debug, Error)]
pub enum ArtifactFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Analysis(#[from] ArtifactError),
}
