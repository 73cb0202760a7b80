use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::container::ScanMode;
use crate::criteria::OptionsBasedCriteria;
use crate::download::CachePolicy;
use crate::error::ConfigError;
use crate::pipeline::PipelineConfig;
use crate::registry::{DEFAULT_IGNORED_CLASSES, MarkerPolicy};
use crate::symbol::{self, SEPARATOR};

/// Resolved settings for one run. Include lists are already loaded.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub update_centers: Vec<String>,
    pub work_dir: PathBuf,
    pub reference: Option<PathBuf>,
    /// `Some` when any include list was given. Adds to the registry lookup,
    /// or replaces it with `--only-include-specified`.
    pub options_criteria: Option<OptionsBasedCriteria>,
    pub marker: MarkerPolicy,
    pub ignored_classes: Vec<String>,
    pub pipeline: PipelineConfig,
    pub cache: CachePolicy,
    /// `Some(max_depth)` in recursive mode.
    pub recursive: Option<u32>,
    pub per_plugin: bool,
    pub output: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let work_dir = match &cli.work_dir {
            Some(dir) => dir.clone(),
            None => default_work_dir()?,
        };

        if cli.recursive && cli.recursive_max_depth == 0 {
            return Err(ConfigError::InvalidOption {
                option: "--recursive-max-depth",
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        let mut pipeline = PipelineConfig::default();
        if let Some(n) = cli.download_concurrent {
            pipeline.download_concurrent = positive("--download-concurrent", n)?;
        }
        if let Some(n) = cli.analysis_concurrent {
            pipeline.analysis_concurrent = positive("--analysis-concurrent", n)?;
        }
        if cli.include_plugin_libs {
            pipeline.scan.mode = ScanMode::Deep;
        }

        let cache = if cli.skip_downloads {
            CachePolicy::Offline
        } else if cli.refresh {
            CachePolicy::Refresh
        } else {
            CachePolicy::ReuseExisting
        };

        Ok(Self {
            update_centers: cli.update_centers.clone(),
            work_dir,
            reference: cli.reference.clone(),
            options_criteria: options_criteria(cli).context("Failed to load include lists")?,
            marker: MarkerPolicy {
                tokens: cli.markers.clone(),
                include_deprecated_attribute: true,
            },
            ignored_classes: DEFAULT_IGNORED_CLASSES.iter().map(|s| s.to_string()).collect(),
            pipeline,
            cache,
            recursive: cli.recursive.then_some(cli.recursive_max_depth),
            per_plugin: cli.per_plugin,
            output: cli.output.clone(),
        })
    }
}

fn positive(option: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidOption {
            option,
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

fn options_criteria(cli: &Cli) -> Result<Option<OptionsBasedCriteria>, ConfigError> {
    if cli.include_classes.is_none() && cli.include_methods.is_none() && cli.include_fields.is_none()
    {
        return Ok(None);
    }

    let mut criteria = OptionsBasedCriteria {
        only_include_specified: cli.only_include_specified,
        include_java_core_classes: cli.include_java_core_classes,
        only_include_platform_classes: cli.only_include_platform_classes,
        ..Default::default()
    };
    if let Some(path) = &cli.include_classes {
        criteria.classes = load_include_list("classes", path)?.into_iter().collect();
    }
    if let Some(path) = &cli.include_methods {
        for line in load_include_list("methods", path)? {
            let (owner, name) = member_entry("--include-methods", &line)?;
            criteria.methods.entry(owner).or_default().insert(name);
        }
    }
    if let Some(path) = &cli.include_fields {
        for line in load_include_list("fields", path)? {
            let (owner, name) = member_entry("--include-fields", &line)?;
            criteria.fields.entry(owner).or_default().insert(name);
        }
    }
    Ok(Some(criteria))
}

/// One entry per line, `#` lines skipped, dotted names turned into slash form.
pub fn load_include_list(kind: &'static str, path: &Path) -> Result<Vec<String>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::MissingIncludeFile {
            kind,
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::UnreadableIncludeFile {
        kind,
        path: path.to_path_buf(),
        source,
    })?;

    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = symbol::internal_name(line);
        if seen.insert(entry.clone()) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// `owner#member`; a descriptor suffix after the member name is dropped.
fn member_entry(option: &'static str, line: &str) -> Result<(String, String), ConfigError> {
    let invalid = || ConfigError::InvalidOption {
        option,
        message: format!("expected `Class{SEPARATOR}member`, got `{line}`"),
    };
    let (owner, member) = line.split_once(SEPARATOR).ok_or_else(invalid)?;
    let name = member.split('(').next().unwrap_or(member);
    if owner.is_empty() || name.is_empty() {
        return Err(invalid());
    }
    Ok((owner.to_string(), name.to_string()))
}

pub fn default_work_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(dirs::data_local_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve cache directory"))?;
    Ok(base.join("deprecated-usage").join("work"))
}

/// Writes through a `.tmp` sibling and renames it into place.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }

    let mut tmp_os = path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);
    fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write temporary file: {}", tmp.display()))?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to atomically replace file: {}", path.display()))?;
    Ok(())
}
