use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::debug;

use crate::artifact::ArtifactDescriptor;
use crate::container::Container;

const DEPENDENCIES_HEADER: &str = "Plugin-Dependencies:";

const PACKAGE_EXTENSIONS: &[&str] = &["hpi", "jpi", "jar", "war"];

/// Package files below `work_dir`, laid out as `<name>/<version>/<file>`.
pub fn scan_packages(work_dir: &Path) -> Result<Vec<PathBuf>> {
    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(work_dir)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .max_depth(Some(3))
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if entry.file_type().is_some_and(|t| t.is_file()) && is_package_file(path) {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut found: Vec<PathBuf> = rx.iter().collect();
    found.sort();
    Ok(found)
}

fn is_package_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PACKAGE_EXTENSIONS.contains(&e))
}

/// `<work>/<name>/<version>/<file>` → `(name, version)`
pub fn name_and_version(package_path: &Path) -> Option<(String, String)> {
    let version_dir = package_path.parent()?;
    let name_dir = version_dir.parent()?;
    let version = version_dir.file_name()?.to_string_lossy().to_string();
    let name = name_dir.file_name()?.to_string_lossy().to_string();
    Some((name, version))
}

/// Descriptors for every package already present in the work directory.
/// Dependencies come from each package manifest.
pub fn local_artifacts(work_dir: &Path) -> Result<Vec<ArtifactDescriptor>> {
    let mut artifacts = Vec::new();
    for path in scan_packages(work_dir)? {
        let Some((name, version)) = name_and_version(&path) else {
            continue;
        };
        let Ok(mut artifact) = ArtifactDescriptor::new(work_dir, &name, &version, "") else {
            continue;
        };
        artifact.url = format!("file://{}", path.display());
        artifact.dependencies = local_dependencies(&path);
        artifact.file = path;
        artifacts.push(artifact);
    }
    Ok(artifacts)
}

fn local_dependencies(path: &Path) -> Vec<String> {
    match Container::open(path).and_then(|c| c.manifest()) {
        Ok(Some(manifest)) => manifest_dependencies(&manifest),
        Ok(None) => Vec::new(),
        Err(err) => {
            debug!(package = %path.display(), error = %err, "no readable manifest");
            Vec::new()
        }
    }
}

/// Names listed in the main section's `Plugin-Dependencies` header, e.g.
/// `ant:1.0,credentials:2.1;resolution:=optional`.
pub fn manifest_dependencies(manifest: &str) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for line in manifest.lines() {
        if line.is_empty() {
            break;
        }
        match (line.strip_prefix(' '), headers.last_mut()) {
            (Some(continued), Some(last)) => last.push_str(continued),
            _ => headers.push(line.to_string()),
        }
    }
    headers
        .iter()
        .find_map(|h| h.strip_prefix(DEPENDENCIES_HEADER))
        .map(|value| {
            value
                .split(',')
                .filter_map(|dep| dep.split([':', ';']).next())
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
