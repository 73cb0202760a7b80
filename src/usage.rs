//! Per-package usage scanning.
//!
//! A package is decoded completely before matching so that member references
//! through package-local subclasses can be resolved to the inherited symbol.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use tracing::debug;

use crate::classfile::{self, ClassFile, Target};
use crate::container::{Container, ScanMode};
use crate::criteria::SearchCriteria;
use crate::error::ArtifactError;
use crate::registry::SymbolRegistry;
use crate::symbol;

/// Wrapper-only packages whose references are not real usage.
pub const DEFAULT_IGNORED_PACKAGE_FILES: &[&str] = &["python-wrapper.hpi"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub version: String,
}

impl PackageId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

pub type EdgeMap = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub package: PackageId,
    pub classes: BTreeSet<String>,
    pub methods: BTreeSet<String>,
    pub fields: BTreeSet<String>,
    pub provider_to_consumers: EdgeMap,
    pub consumer_to_providers: EdgeMap,
}

impl UsageRecord {
    pub fn empty(package: PackageId) -> Self {
        Self {
            package,
            classes: BTreeSet::new(),
            methods: BTreeSet::new(),
            fields: BTreeSet::new(),
            provider_to_consumers: EdgeMap::new(),
            consumer_to_providers: EdgeMap::new(),
        }
    }

    pub fn has_usage(&self) -> bool {
        !self.classes.is_empty() || !self.methods.is_empty() || !self.fields.is_empty()
    }

    pub fn consumers(&self) -> impl Iterator<Item = &str> {
        self.consumer_to_providers.keys().map(String::as_str)
    }

    fn record(&mut self, provider: String, consumer: String, kind: symbol::SymbolKind) {
        let matched = match kind {
            symbol::SymbolKind::Class => &mut self.classes,
            symbol::SymbolKind::Method => &mut self.methods,
            symbol::SymbolKind::Field => &mut self.fields,
        };
        matched.insert(provider.clone());
        self.consumer_to_providers
            .entry(consumer.clone())
            .or_default()
            .insert(provider.clone());
        self.provider_to_consumers
            .entry(provider)
            .or_default()
            .insert(consumer);
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub mode: ScanMode,
    pub ignored_package_files: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mode: ScanMode::Shallow,
            ignored_package_files: DEFAULT_IGNORED_PACKAGE_FILES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageScan {
    pub record: UsageRecord,
    pub classes_read: usize,
    /// Entries that could not be read or decoded; absorbed, never fatal.
    pub malformed_entries: usize,
}

/// Scans one package file. Fails only when the container itself is unreadable.
pub fn scan_package(
    path: &Path,
    package: PackageId,
    criteria: &dyn SearchCriteria,
    options: &ScanOptions,
) -> Result<PackageScan, ArtifactError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if options.ignored_package_files.iter().any(|f| *f == file_name) {
        debug!(package = %package, "ignored package file");
        return Ok(PackageScan {
            record: UsageRecord::empty(package),
            classes_read: 0,
            malformed_entries: 0,
        });
    }

    let container = Container::open(path)?;
    let mut classes = Vec::new();
    let mut malformed_entries = 0;
    for item in container.class_entries(&package.name, options.mode)? {
        match item {
            Ok(entry) => match classfile::decode(&entry.bytes) {
                Ok(class) => classes.push(class),
                Err(err) => {
                    debug!(package = %package, entry = %entry.name, error = %err, "malformed class entry");
                    malformed_entries += 1;
                }
            },
            Err(failure) => {
                debug!(package = %package, entry = %failure.name, error = %failure.message, "unreadable entry");
                malformed_entries += 1;
            }
        }
    }

    let (record, unreadable) = scan_classes(package, &classes, criteria);
    Ok(PackageScan {
        record,
        classes_read: classes.len(),
        malformed_entries: malformed_entries + unreadable,
    })
}

/// Matches the references of already decoded classes. Returns the record and
/// the number of classes whose reference stream could not be enumerated.
pub fn scan_classes(
    package: PackageId,
    classes: &[ClassFile],
    criteria: &dyn SearchCriteria,
) -> (UsageRecord, usize) {
    let hierarchy = LocalHierarchy::new(classes);
    let mut record = UsageRecord::empty(package);
    let mut unreadable = 0;

    for class in classes {
        let references = match class.references() {
            Ok(references) => references,
            Err(err) => {
                debug!(class = %class.name, error = %err, "skipping class with malformed signature");
                unreadable += 1;
                continue;
            }
        };
        for reference in references {
            let Some((provider, kind)) = match_target(&reference.target, criteria, &hierarchy)
            else {
                continue;
            };
            record.record(provider, reference.site.key(), kind);
        }
    }
    (record, unreadable)
}

fn match_target(
    target: &Target,
    criteria: &dyn SearchCriteria,
    hierarchy: &LocalHierarchy<'_>,
) -> Option<(String, symbol::SymbolKind)> {
    match target {
        Target::Class(class) => (criteria.should_analyze_class(class)
            && criteria.is_looking_for_class(class))
        .then(|| (class.clone(), symbol::SymbolKind::Class)),
        Target::Method {
            owner,
            name,
            descriptor,
        } => hierarchy.lineage(owner).into_iter().find_map(|class| {
            let key = symbol::method_key(class, name, descriptor);
            (criteria.should_analyze_class(class)
                && criteria.is_looking_for_method(&key, class, name))
            .then_some((key, symbol::SymbolKind::Method))
        }),
        Target::Field { owner, name, .. } => {
            hierarchy.lineage(owner).into_iter().find_map(|class| {
                let key = symbol::field_key(class, name);
                (criteria.should_analyze_class(class)
                    && criteria.is_looking_for_field(&key, class, name))
                .then_some((key, symbol::SymbolKind::Field))
            })
        }
    }
}

/// Supertypes of the classes declared by one package.
struct LocalHierarchy<'a> {
    parents: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> LocalHierarchy<'a> {
    fn new(classes: &'a [ClassFile]) -> Self {
        let parents = classes
            .iter()
            .map(|c| {
                let mut parents: Vec<&str> = c.super_name.iter().map(String::as_str).collect();
                parents.extend(c.interfaces.iter().map(String::as_str));
                (c.name.as_str(), parents)
            })
            .collect();
        Self { parents }
    }

    /// The owner followed by its ancestors, breadth first. Ancestors are only
    /// expanded while they are declared by this package.
    fn lineage<'b>(&'b self, owner: &'b str) -> Vec<&'b str> {
        let mut order = vec![owner];
        let mut seen: HashSet<&str> = HashSet::from([owner]);
        let mut queue = VecDeque::from([owner]);
        while let Some(class) = queue.pop_front() {
            let Some(parents) = self.parents.get(class) else {
                continue;
            };
            for &parent in parents {
                if seen.insert(parent) {
                    order.push(parent);
                    queue.push_back(parent);
                }
            }
        }
        order
    }
}

/// Symbol → sorted package names, per symbol kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageByApi {
    pub classes: BTreeMap<String, BTreeSet<String>>,
    pub methods: BTreeMap<String, BTreeSet<String>>,
    pub fields: BTreeMap<String, BTreeSet<String>>,
}

pub fn usage_by_api<'a>(records: impl IntoIterator<Item = &'a UsageRecord>) -> UsageByApi {
    let mut view = UsageByApi::default();
    for record in records {
        let name = &record.package.name;
        for class in &record.classes {
            view.classes.entry(class.clone()).or_default().insert(name.clone());
        }
        for method in &record.methods {
            view.methods.entry(method.clone()).or_default().insert(name.clone());
        }
        for field in &record.fields {
            view.fields.entry(field.clone()).or_default().insert(name.clone());
        }
    }
    view
}

/// Registry entries referenced by none of the records, in registry order.
pub fn unused_symbols<'a>(
    registry: &SymbolRegistry,
    records: impl IntoIterator<Item = &'a UsageRecord>,
) -> Vec<String> {
    let mut used: HashSet<&str> = HashSet::new();
    for record in records {
        used.extend(record.classes.iter().map(String::as_str));
        used.extend(record.methods.iter().map(String::as_str));
        used.extend(record.fields.iter().map(String::as_str));
    }
    registry
        .classes()
        .chain(registry.methods())
        .chain(registry.fields())
        .filter(|k| !used.contains(k))
        .map(str::to_string)
        .collect()
}
