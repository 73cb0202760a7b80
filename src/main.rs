use anyhow::{Context, Result};
use clap::Parser;
use deprecated_usage::catalog::{self, Catalog};
use deprecated_usage::cli::Cli;
use deprecated_usage::config::{self, RunConfig};
use deprecated_usage::download::{CachePolicy, Downloader, HttpFetcher};
use deprecated_usage::error::ArtifactFailure;
use deprecated_usage::{logging, pipeline, scan};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = RunConfig::from_cli(&cli)?;
    let started = Instant::now();

    let fetcher = HttpFetcher::new(HTTP_TIMEOUT).context("Failed to build HTTP client")?;
    let catalog = load_catalog(&config, &fetcher)?;
    let downloader = Arc::new(Downloader::new(fetcher, config.cache));

    let json = if config.per_plugin {
        let summary = pipeline::run_per_plugin(&config, downloader, catalog)?;
        report_failures(&summary.failures);
        info!(
            plugins = summary.plugins.len(),
            skipped = summary.skipped.len(),
            errors = summary.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        serde_json::to_vec_pretty(&summary)?
    } else {
        let summary = pipeline::run(&config, downloader, catalog)?;
        report_failures(&summary.failures);
        info!(
            packages = summary.packages.iter().filter(|r| r.has_usage()).count(),
            errors = summary.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        serde_json::to_vec_pretty(&summary)?
    };

    match &config.output {
        Some(path) => config::write_atomically(path, &json)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&json)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn report_failures(failures: &BTreeMap<String, ArtifactFailure>) {
    for (name, failure) in failures {
        warn!(artifact = %name, error = %failure, "artifact not analysed");
    }
}

fn load_catalog(config: &RunConfig, fetcher: &HttpFetcher) -> Result<Catalog> {
    if config.cache == CachePolicy::Offline {
        let artifacts = scan::local_artifacts(&config.work_dir).with_context(|| {
            format!("Failed to scan work directory: {}", config.work_dir.display())
        })?;
        info!(artifacts = artifacts.len(), "using local packages only");
        return Ok(Catalog::from_local(artifacts));
    }

    let mut documents = Vec::with_capacity(config.update_centers.len());
    for url in &config.update_centers {
        let document = catalog::fetch_update_center(fetcher, url)
            .with_context(|| format!("Failed to load catalog {url}"))?;
        documents.push(document);
    }
    Ok(Catalog::merge(&documents, &config.work_dir))
}
