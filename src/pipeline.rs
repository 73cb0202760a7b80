//! Acquisition and analysis orchestration.
//!
//! Downloads and analyses run on two separate pools. An artifact is handed to
//! the analysis pool as soon as its own download finishes. Workers never share
//! mutable state: each returns its record over a channel and the calling
//! thread merges them.

use anyhow::Context;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use tracing::{debug, info, warn};

use crate::artifact::ArtifactDescriptor;
use crate::catalog::Catalog;
use crate::closure::{ClosureEngine, LevelClosure, Termination};
use crate::config::RunConfig;
use crate::criteria::{AnyOf, DeprecatedApiCriteria, SearchCriteria};
use crate::download::{self, Downloader, Fetcher, panic_message};
use crate::error::{ArtifactError, ArtifactFailure};
use crate::registry::{self, RegistrySummary};
use crate::usage::{self, PackageScan, ScanOptions, UsageByApi, UsageRecord};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub download_concurrent: usize,
    pub analysis_concurrent: usize,
    pub scan: ScanOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            download_concurrent: cpus * 4,
            analysis_concurrent: cpus,
            scan: ScanOptions::default(),
        }
    }
}

/// Merged result of one pass over the corpus.
#[derive(Debug, Default)]
pub struct WaveReport {
    /// Sorted by package name.
    pub records: Vec<UsageRecord>,
    /// Keyed by artifact name.
    pub failures: BTreeMap<String, ArtifactFailure>,
    pub malformed_entries: usize,
    pub classes_read: usize,
    /// Artifacts that were analysed successfully; later waves reuse them.
    pub analyzed: Vec<ArtifactDescriptor>,
}

impl WaveReport {
    fn merge(&mut self, artifact: ArtifactDescriptor, outcome: Result<PackageScan, ArtifactError>) {
        match outcome {
            Ok(scan) => {
                self.malformed_entries += scan.malformed_entries;
                self.classes_read += scan.classes_read;
                self.records.push(scan.record);
                self.analyzed.push(artifact);
            }
            Err(err) => {
                self.failures.insert(artifact.name.clone(), err.into());
            }
        }
    }

    fn finish(mut self) -> Self {
        self.records.sort_by(|a, b| a.package.cmp(&b.package));
        self.analyzed.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }
}

/// Scans one local artifact. A corrupt container is deleted so the next run
/// downloads it again. A panic inside the scan fails this artifact only.
pub fn analyze_artifact(
    artifact: &ArtifactDescriptor,
    criteria: &dyn SearchCriteria,
    options: &ScanOptions,
) -> Result<PackageScan, ArtifactError> {
    let scan = panic::catch_unwind(AssertUnwindSafe(|| {
        usage::scan_package(&artifact.file, artifact.package_id(), criteria, options)
    }));
    let result = scan.unwrap_or_else(|payload| {
        Err(ArtifactError::Aborted {
            path: artifact.file.clone(),
            message: panic_message(payload.as_ref()),
        })
    });
    if let Err(err @ ArtifactError::Corrupt { .. }) = &result {
        warn!(file = %artifact.file.display(), error = %err, "deleting corrupt artifact");
        if let Err(io) = fs::remove_file(&artifact.file) {
            warn!(file = %artifact.file.display(), error = %io, "failed to delete corrupt artifact");
        }
    }
    result
}

/// Downloads `artifacts` and analyses each one as soon as it is available.
pub fn acquire_and_analyze<F>(
    downloader: Arc<Downloader<F>>,
    artifacts: Vec<ArtifactDescriptor>,
    criteria: Arc<dyn SearchCriteria>,
    config: &PipelineConfig,
) -> Result<WaveReport, rayon::ThreadPoolBuildError>
where
    F: Fetcher + 'static,
{
    let total = artifacts.len();
    let analysis_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.analysis_concurrent.max(1))
        .thread_name(|i| format!("analysis-{i}"))
        .panic_handler(log_panic)
        .build()?;

    let (ready_tx, ready_rx) = mpsc::channel();
    let _download_pool =
        download::spawn_downloads(downloader, artifacts, config.download_concurrent, ready_tx)?;

    let (done_tx, done_rx) = mpsc::channel();
    let mut report = WaveReport::default();
    for (artifact, acquired) in ready_rx {
        if let Err(err) = acquired {
            report.failures.insert(artifact.name.clone(), err.into());
            continue;
        }
        let criteria = Arc::clone(&criteria);
        let options = config.scan.clone();
        let done_tx = done_tx.clone();
        analysis_pool.spawn(move || {
            let outcome = analyze_artifact(&artifact, criteria.as_ref(), &options);
            let _ = done_tx.send((artifact, outcome));
        });
    }
    drop(done_tx);

    for (artifact, outcome) in done_rx {
        report.merge(artifact, outcome);
    }
    info!(
        total,
        analyzed = report.analyzed.len(),
        failed = report.failures.len(),
        malformed_entries = report.malformed_entries,
        "acquisition and analysis finished"
    );
    Ok(report.finish())
}

fn log_panic(payload: Box<dyn std::any::Any + Send>) {
    warn!(panic = %panic_message(payload.as_ref()), "analysis task panicked");
}

/// Analyses already available artifacts; returns once all of them are done.
pub fn analyze_wave(
    artifacts: &[ArtifactDescriptor],
    criteria: Arc<dyn SearchCriteria>,
    config: &PipelineConfig,
) -> Result<WaveReport, rayon::ThreadPoolBuildError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.analysis_concurrent.max(1))
        .panic_handler(log_panic)
        .build()?;
    let outcomes: Vec<_> = pool.install(|| {
        artifacts
            .par_iter()
            .map(|artifact| {
                let outcome = analyze_artifact(artifact, criteria.as_ref(), &config.scan);
                (artifact.clone(), outcome)
            })
            .collect()
    });

    let mut report = WaveReport::default();
    for (artifact, outcome) in outcomes {
        report.merge(artifact, outcome);
    }
    Ok(report.finish())
}

/// Everything one run produces, in the shape written to the JSON result.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// Absent when `--only-include-specified` replaces the registry.
    pub registry: Option<RegistrySummary>,
    pub packages: Vec<UsageRecord>,
    pub usage_by_api: UsageByApi,
    pub unused_symbols: Vec<String>,
    pub closure: Option<ClosureReport>,
    #[serde(rename = "errors", serialize_with = "failure_messages")]
    pub failures: BTreeMap<String, ArtifactFailure>,
    pub malformed_entries: usize,
    pub classes_read: usize,
}

#[derive(Debug, Serialize)]
pub struct ClosureReport {
    pub termination: Termination,
    pub waves: u32,
    #[serde(flatten)]
    pub closure: LevelClosure,
}

fn failure_messages<S: serde::Serializer>(
    failures: &BTreeMap<String, ArtifactFailure>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(failures.iter().map(|(name, failure)| (name, failure.to_string())))
}

/// Runs the whole analysis over `catalog`.
///
/// Only configuration problems and an unusable reference package fail the
/// run. Per-artifact failures end up in `RunSummary::failures`.
pub fn run<F>(
    config: &RunConfig,
    downloader: Arc<Downloader<F>>,
    catalog: Catalog,
) -> anyhow::Result<RunSummary>
where
    F: Fetcher + 'static,
{
    let Catalog { core, plugins } = catalog;
    let mut malformed_entries = 0;

    // Include lists add to the registry unless they are the only thing asked for.
    let mut flagged = None;
    let mut members: Vec<Arc<dyn SearchCriteria>> = Vec::new();
    if let Some(options) = &config.options_criteria {
        members.push(Arc::new(options.clone()));
    }
    if !config.options_criteria.as_ref().is_some_and(|o| o.only_include_specified) {
        let reference = resolve_reference(config, &downloader, core.as_ref())?;
        let build = registry::build_from_packages(
            &[reference.as_path()],
            config.marker.clone(),
            &config.ignored_classes,
        )
        .with_context(|| format!("Failed to read reference package: {}", reference.display()))?;
        malformed_entries += build.malformed_entries;
        let shared = Arc::new(build.registry);
        flagged = Some(Arc::clone(&shared));
        members.push(Arc::new(DeprecatedApiCriteria::new(shared)));
    }
    let criteria: Arc<dyn SearchCriteria> = if members.len() == 1 {
        members.remove(0)
    } else {
        Arc::new(AnyOf::new(members))
    };

    let reference_file = config
        .reference
        .clone()
        .or_else(|| core.as_ref().map(|c| c.file.clone()));
    let packages: Vec<ArtifactDescriptor> = plugins
        .into_iter()
        .filter(|a| Some(&a.file) != reference_file.as_ref())
        .collect();
    info!(packages = packages.len(), "analysing dependent packages");

    let stats = downloader.stats();
    let first = acquire_and_analyze(downloader, packages, Arc::clone(&criteria), &config.pipeline)
        .context("Failed to start worker pools")?;
    let (from_cache, downloaded, failed, bytes) = stats.snapshot();
    info!(from_cache, downloaded, failed, bytes, "downloads finished");

    malformed_entries += first.malformed_entries;
    let classes_read = first.classes_read;
    let mut failures = first.failures;
    let available = first.analyzed;

    let (records, closure) = match config.recursive {
        None => (first.records, None),
        Some(max_depth) => {
            let mut wave_one = Some(first.records);
            let outcome = ClosureEngine::new(max_depth).run(criteria, |level, wave_criteria| {
                if let Some(records) = wave_one.take() {
                    return records;
                }
                match analyze_wave(&available, Arc::clone(wave_criteria), &config.pipeline) {
                    Ok(report) => {
                        for (name, failure) in report.failures {
                            failures.entry(name).or_insert(failure);
                        }
                        report.records
                    }
                    Err(err) => {
                        warn!(level, error = %err, "failed to start analysis pool");
                        Vec::new()
                    }
                }
            });
            let report = ClosureReport {
                termination: outcome.termination,
                waves: outcome.waves,
                closure: outcome.closure,
            };
            (outcome.first_wave, Some(report))
        }
    };

    let usage_by_api = usage::usage_by_api(&records);
    let unused_symbols = flagged
        .as_deref()
        .map(|r| usage::unused_symbols(r, &records))
        .unwrap_or_default();
    if malformed_entries > 0 {
        warn!(malformed_entries, "class entries skipped as malformed");
    }

    Ok(RunSummary {
        registry: flagged.map(|r| r.summary()),
        packages: records,
        usage_by_api,
        unused_symbols,
        closure,
        failures,
        malformed_entries,
        classes_read,
    })
}

/// Why a package got no per-plugin analysis of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoDependents,
    NoFlaggedApis,
}

/// Flagged APIs of one package and their use by the packages depending on it.
#[derive(Debug, Serialize)]
pub struct PluginAnalysis {
    pub registry: RegistrySummary,
    pub dependents: Vec<UsageRecord>,
    pub usage_by_api: UsageByApi,
    pub unused_symbols: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PerPluginSummary {
    /// Keyed by the package whose flagged APIs were looked for.
    pub plugins: BTreeMap<String, PluginAnalysis>,
    pub skipped: BTreeMap<String, SkipReason>,
    #[serde(rename = "errors", serialize_with = "failure_messages")]
    pub failures: BTreeMap<String, ArtifactFailure>,
    pub malformed_entries: usize,
    pub classes_read: usize,
}

/// Package name → names of the packages that declare a dependency on it.
pub fn dependents_index(plugins: &[ArtifactDescriptor]) -> BTreeMap<String, Vec<String>> {
    let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for plugin in plugins {
        for dependency in &plugin.dependencies {
            index.entry(dependency.clone()).or_default().push(plugin.name.clone());
        }
    }
    for names in index.values_mut() {
        names.sort();
        names.dedup();
    }
    index
}

/// Runs one analysis per package: the package's own flagged APIs are looked
/// for in the packages that depend on it.
pub fn run_per_plugin<F>(
    config: &RunConfig,
    downloader: Arc<Downloader<F>>,
    catalog: Catalog,
) -> anyhow::Result<PerPluginSummary>
where
    F: Fetcher + 'static,
{
    let dependents = dependents_index(&catalog.plugins);
    let mut skipped = BTreeMap::new();
    let mut wanted = Vec::new();
    for plugin in catalog.plugins {
        let provider = dependents.contains_key(&plugin.name);
        if !provider {
            skipped.insert(plugin.name.clone(), SkipReason::NoDependents);
        }
        let dependent = plugin
            .dependencies
            .iter()
            .any(|d| dependents.contains_key(d));
        if provider || dependent {
            wanted.push(plugin);
        }
    }
    info!(
        providers = dependents.len(),
        packages = wanted.len(),
        "acquiring packages for per-plugin analysis"
    );

    let mut failures = BTreeMap::new();
    let mut available = HashMap::new();
    let (tx, rx) = mpsc::channel();
    let _download_pool = download::spawn_downloads(
        downloader,
        wanted,
        config.pipeline.download_concurrent,
        tx,
    )
    .context("Failed to start worker pools")?;
    for (artifact, acquired) in rx {
        match acquired {
            Ok(_) => {
                available.insert(artifact.name.clone(), artifact);
            }
            Err(err) => {
                failures.insert(artifact.name.clone(), ArtifactFailure::from(err));
            }
        }
    }

    let mut plugins = BTreeMap::new();
    let mut malformed_entries = 0;
    let mut classes_read = 0;
    for (provider, consumers) in &dependents {
        let Some(artifact) = available.get(provider) else {
            continue;
        };
        let build = match registry::build_from_packages(
            &[artifact.file.as_path()],
            config.marker.clone(),
            &config.ignored_classes,
        ) {
            Ok(build) => build,
            Err(err) => {
                failures.entry(provider.clone()).or_insert(err.into());
                continue;
            }
        };
        malformed_entries += build.malformed_entries;
        if build.registry.is_empty() {
            debug!(plugin = %provider, "no flagged APIs");
            skipped.insert(provider.clone(), SkipReason::NoFlaggedApis);
            continue;
        }

        let targets: Vec<ArtifactDescriptor> = consumers
            .iter()
            .filter(|name| !failures.contains_key(*name))
            .filter_map(|name| available.get(name).cloned())
            .collect();
        let flagged = Arc::new(build.registry);
        let criteria: Arc<dyn SearchCriteria> = Arc::new(DeprecatedApiCriteria::new(Arc::clone(&flagged)));
        let wave = analyze_wave(&targets, criteria, &config.pipeline)
            .context("Failed to start analysis pool")?;
        malformed_entries += wave.malformed_entries;
        classes_read += wave.classes_read;
        for (name, failure) in wave.failures {
            failures.entry(name).or_insert(failure);
        }

        info!(plugin = %provider, dependents = wave.records.len(), "per-plugin analysis finished");
        plugins.insert(
            provider.clone(),
            PluginAnalysis {
                registry: flagged.summary(),
                usage_by_api: usage::usage_by_api(&wave.records),
                unused_symbols: usage::unused_symbols(&flagged, &wave.records),
                dependents: wave.records,
            },
        );
    }

    Ok(PerPluginSummary {
        plugins,
        skipped,
        failures,
        malformed_entries,
        classes_read,
    })
}

fn resolve_reference<F: Fetcher>(
    config: &RunConfig,
    downloader: &Downloader<F>,
    core: Option<&ArtifactDescriptor>,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = &config.reference {
        return Ok(path.clone());
    }
    let core = core.context("No reference package: the catalog has no core entry and --reference was not given")?;
    downloader
        .acquire(core)
        .with_context(|| format!("Failed to acquire reference package {}", core.name))?;
    Ok(core.file.clone())
}
