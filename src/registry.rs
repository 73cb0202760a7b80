//! Flagged-symbol registry built from the reference package.
//!
//! Insertion order is kept for reporting; the first origin recorded for a key
//! wins. After `build` the registry is shared read-only behind an `Arc`.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::classfile::{self, ClassFile};
use crate::container::{Container, ScanMode};
use crate::error::ArtifactError;
use crate::symbol::{self, SymbolKind};

/// Classes whose flag is only reachable through compiler-generated code.
pub const DEFAULT_IGNORED_CLASSES: &[&str] = &["hudson/model/Hudson$CloudList"];

pub const DEFAULT_MARKER: &str = "Deprecated";

/// Which declarations count as flagged.
#[derive(Debug, Clone)]
pub struct MarkerPolicy {
    /// Substrings matched against annotation type descriptors.
    pub tokens: Vec<String>,
    /// Also honour the `Deprecated` class-file attribute.
    pub include_deprecated_attribute: bool,
}

impl Default for MarkerPolicy {
    fn default() -> Self {
        Self {
            tokens: vec![DEFAULT_MARKER.to_string()],
            include_deprecated_attribute: true,
        }
    }
}

impl MarkerPolicy {
    pub fn is_marked(&self, annotations: &[String], deprecated_attribute: bool) -> bool {
        if self.include_deprecated_attribute && deprecated_attribute {
            return true;
        }
        annotations
            .iter()
            .any(|desc| self.tokens.iter().any(|token| desc.contains(token.as_str())))
    }
}

#[derive(Debug, Default, Clone)]
struct OrderedKeys {
    keys: Vec<String>,
    origins: HashMap<String, String>,
}

impl OrderedKeys {
    fn insert(&mut self, key: String, origin: &str) -> bool {
        if self.origins.contains_key(&key) {
            return false;
        }
        self.origins.insert(key.clone(), origin.to_string());
        self.keys.push(key);
        true
    }

    fn remove(&mut self, key: &str) {
        if self.origins.remove(key).is_some() {
            self.keys.retain(|k| k != key);
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SymbolRegistry {
    classes: OrderedKeys,
    methods: OrderedKeys,
    fields: OrderedKeys,
    owners: HashSet<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub classes: Vec<RegistryEntry>,
    pub methods: Vec<RegistryEntry>,
    pub fields: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryEntry {
    pub key: String,
    pub origin: String,
}

/// Outcome of reading a reference package.
#[derive(Debug)]
pub struct RegistryBuild {
    pub registry: SymbolRegistry,
    pub classes_read: usize,
    pub malformed_entries: usize,
}

impl SymbolRegistry {
    pub fn builder(policy: MarkerPolicy) -> RegistryBuilder {
        RegistryBuilder {
            policy,
            ignored: DEFAULT_IGNORED_CLASSES.iter().map(|s| s.to_string()).collect(),
            registry: SymbolRegistry::default(),
        }
    }

    pub fn contains_class(&self, key: &str) -> bool {
        self.classes.origins.contains_key(key)
    }

    pub fn contains_method(&self, key: &str) -> bool {
        self.methods.origins.contains_key(key)
    }

    pub fn contains_field(&self, key: &str) -> bool {
        self.fields.origins.contains_key(key)
    }

    /// True when the class itself or one of its members is flagged.
    pub fn owns(&self, class: &str) -> bool {
        self.owners.contains(class)
    }

    pub fn origin(&self, key: &str) -> Option<&str> {
        let keys = match symbol::kind_of(key) {
            SymbolKind::Class => &self.classes,
            SymbolKind::Method => &self.methods,
            SymbolKind::Field => &self.fields,
        };
        keys.origins.get(key).map(String::as_str)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys.iter().map(String::as_str)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys.iter().map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.keys.len() + self.methods.keys.len() + self.fields.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> RegistrySummary {
        let entries = |keys: &OrderedKeys| {
            keys.keys
                .iter()
                .map(|k| RegistryEntry {
                    key: k.clone(),
                    origin: keys.origins.get(k).cloned().unwrap_or_default(),
                })
                .collect()
        };
        RegistrySummary {
            classes: entries(&self.classes),
            methods: entries(&self.methods),
            fields: entries(&self.fields),
        }
    }
}

pub struct RegistryBuilder {
    policy: MarkerPolicy,
    ignored: HashSet<String>,
    registry: SymbolRegistry,
}

impl RegistryBuilder {
    pub fn ignore_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored = classes.into_iter().map(Into::into).collect();
        self
    }

    /// Records the flagged visible declarations of one class.
    pub fn add_class(&mut self, class: &ClassFile, origin: &str) {
        if !class.is_visible() {
            return;
        }
        let registry = &mut self.registry;
        if self.policy.is_marked(&class.annotations, class.deprecated) {
            registry.classes.insert(symbol::class_key(&class.name), origin);
        }
        for method in &class.methods {
            if method.access.is_visible()
                && self.policy.is_marked(&method.annotations, method.deprecated)
            {
                registry.methods.insert(
                    symbol::method_key(&class.name, &method.name, &method.descriptor),
                    origin,
                );
            }
        }
        for field in &class.fields {
            if field.access.is_visible()
                && self.policy.is_marked(&field.annotations, field.deprecated)
            {
                registry
                    .fields
                    .insert(symbol::field_key(&class.name, &field.name), origin);
            }
        }
    }

    /// Reads every class of a reference package, bundled libraries included.
    pub fn add_package(&mut self, path: &Path) -> Result<(usize, usize), ArtifactError> {
        let container = Container::open(path)?;
        let origin = container.stem().to_string();
        let mut read = 0;
        let mut malformed = 0;
        for item in container.class_entries(&origin, ScanMode::Deep)? {
            let entry = match item {
                Ok(entry) => entry,
                Err(failure) => {
                    debug!(entry = %failure.name, error = %failure.message, "unreadable entry");
                    malformed += 1;
                    continue;
                }
            };
            match classfile::decode(&entry.bytes) {
                Ok(class) => {
                    read += 1;
                    self.add_class(&class, &entry.origin);
                }
                Err(err) => {
                    debug!(entry = %entry.name, error = %err, "skipping malformed class");
                    malformed += 1;
                }
            }
        }
        if malformed > 0 {
            warn!(package = %path.display(), malformed, "reference package has unreadable entries");
        }
        Ok((read, malformed))
    }

    pub fn build(mut self) -> SymbolRegistry {
        for ignored in &self.ignored {
            self.registry.classes.remove(ignored);
        }
        let registry = &mut self.registry;
        let owners = registry
            .classes
            .keys
            .iter()
            .map(|k| k.as_str())
            .chain(registry.methods.keys.iter().map(|k| symbol::owner_of(k)))
            .chain(registry.fields.keys.iter().map(|k| symbol::owner_of(k)))
            .map(str::to_string)
            .collect();
        registry.owners = owners;
        self.registry
    }
}

/// Builds the registry from one or more reference packages.
pub fn build_from_packages(
    paths: &[&Path],
    policy: MarkerPolicy,
    ignored_classes: &[String],
) -> Result<RegistryBuild, ArtifactError> {
    let mut builder = SymbolRegistry::builder(policy).ignore_classes(ignored_classes.iter().cloned());
    let mut classes_read = 0;
    let mut malformed_entries = 0;
    for path in paths {
        let (read, malformed) = builder.add_package(path)?;
        classes_read += read;
        malformed_entries += malformed;
    }
    let registry = builder.build();
    info!(
        classes = registry.classes.keys.len(),
        methods = registry.methods.keys.len(),
        fields = registry.fields.keys.len(),
        scanned = classes_read,
        "flagged symbol registry ready"
    );
    Ok(RegistryBuild {
        registry,
        classes_read,
        malformed_entries,
    })
}
