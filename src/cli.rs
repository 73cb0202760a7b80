use clap::Parser;
use std::path::PathBuf;

use crate::catalog::DEFAULT_UPDATE_CENTER;
use crate::closure::DEFAULT_MAX_DEPTH;
use crate::registry::DEFAULT_MARKER;

#[derive(Debug, Clone, Parser)]
#[command(name = "deprecated-usage")]
#[command(about = "Find which packages of a plugin ecosystem use flagged platform APIs")]
pub struct Cli {
    /// Update-center catalog URLs, comma separated. Earlier catalogs win.
    #[arg(
        short = 'u',
        long = "update-center",
        value_name = "URL",
        value_delimiter = ',',
        default_value = DEFAULT_UPDATE_CENTER
    )]
    pub update_centers: Vec<String>,

    #[arg(short = 'w', long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Local reference package used instead of the catalog core.
    #[arg(long, value_name = "FILE")]
    pub reference: Option<PathBuf>,

    #[arg(short = 'C', long = "include-classes", value_name = "FILE")]
    pub include_classes: Option<PathBuf>,

    #[arg(short = 'M', long = "include-methods", value_name = "FILE")]
    pub include_methods: Option<PathBuf>,

    #[arg(short = 'F', long = "include-fields", value_name = "FILE")]
    pub include_fields: Option<PathBuf>,

    #[arg(long)]
    pub only_include_specified: bool,

    #[arg(long)]
    pub include_java_core_classes: bool,

    #[arg(long)]
    pub only_include_platform_classes: bool,

    /// Also scan every library jar bundled in a package.
    #[arg(long)]
    pub include_plugin_libs: bool,

    #[arg(long)]
    pub recursive: bool,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_DEPTH)]
    pub recursive_max_depth: u32,

    /// Look for each package's own flagged APIs in the packages depending on it.
    #[arg(
        long,
        conflicts_with_all = ["recursive", "reference", "include_classes", "include_methods", "include_fields"]
    )]
    pub per_plugin: bool,

    #[arg(long, value_name = "N")]
    pub download_concurrent: Option<usize>,

    #[arg(long, value_name = "N")]
    pub analysis_concurrent: Option<usize>,

    /// Only use packages already in the work directory.
    #[arg(long, conflicts_with = "refresh")]
    pub skip_downloads: bool,

    /// Download every package again, ignoring cached copies.
    #[arg(long)]
    pub refresh: bool,

    /// Annotation name fragment that flags an API. Repeatable.
    #[arg(long = "marker", value_name = "TOKEN", default_value = DEFAULT_MARKER)]
    pub markers: Vec<String>,

    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[arg(short = 'v', long)]
    pub verbose: bool,
}
