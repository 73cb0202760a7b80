//! Search criteria: which referenced symbols are of interest.
//!
//! Criteria are shared read-only by every analysis task of a wave, hence
//! `Send + Sync`. Variants compose with [`AnyOf`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::registry::SymbolRegistry;
use crate::symbol;

pub trait SearchCriteria: Send + Sync {
    fn is_looking_for_class(&self, class: &str) -> bool;

    fn is_looking_for_method(&self, key: &str, class: &str, name: &str) -> bool;

    fn is_looking_for_field(&self, key: &str, class: &str, name: &str) -> bool;

    /// Pre-filter on the owning class of a reference; `false` skips the
    /// member checks entirely.
    fn should_analyze_class(&self, class: &str) -> bool;
}

/// Membership in the flagged-symbol registry.
pub struct DeprecatedApiCriteria {
    registry: Arc<SymbolRegistry>,
}

impl DeprecatedApiCriteria {
    pub fn new(registry: Arc<SymbolRegistry>) -> Self {
        Self { registry }
    }
}

impl SearchCriteria for DeprecatedApiCriteria {
    fn is_looking_for_class(&self, class: &str) -> bool {
        self.registry.contains_class(class)
    }

    fn is_looking_for_method(&self, key: &str, _class: &str, _name: &str) -> bool {
        self.registry.contains_method(key)
    }

    fn is_looking_for_field(&self, key: &str, _class: &str, _name: &str) -> bool {
        self.registry.contains_field(key)
    }

    fn should_analyze_class(&self, class: &str) -> bool {
        self.registry.owns(class)
    }
}

/// Explicit allow-lists plus namespace toggles.
#[derive(Debug, Clone, Default)]
pub struct OptionsBasedCriteria {
    pub classes: BTreeSet<String>,
    /// owner class → method names (any descriptor)
    pub methods: BTreeMap<String, BTreeSet<String>>,
    /// owner class → field names
    pub fields: BTreeMap<String, BTreeSet<String>>,
    pub only_include_specified: bool,
    pub include_java_core_classes: bool,
    pub only_include_platform_classes: bool,
}

const PLATFORM_MARKERS: &[&str] = &["jenkins", "hudson", "org/kohsuke"];

pub fn is_java_core_class(class: &str) -> bool {
    class.starts_with("java/") || class.starts_with("javax/")
}

impl OptionsBasedCriteria {
    fn explicitly_listed(&self, class: &str) -> bool {
        self.classes.iter().any(|c| class.starts_with(c.as_str()))
            || self.methods.keys().any(|c| class.starts_with(c.as_str()))
            || self.fields.keys().any(|c| class.starts_with(c.as_str()))
    }
}

impl SearchCriteria for OptionsBasedCriteria {
    fn is_looking_for_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    fn is_looking_for_method(&self, _key: &str, class: &str, name: &str) -> bool {
        self.methods
            .get(class)
            .is_some_and(|names| names.contains(name))
    }

    fn is_looking_for_field(&self, _key: &str, class: &str, name: &str) -> bool {
        self.fields
            .get(class)
            .is_some_and(|names| names.contains(name))
    }

    fn should_analyze_class(&self, class: &str) -> bool {
        // an explicit listing overrides every namespace toggle
        if self.explicitly_listed(class) {
            return true;
        }
        if self.only_include_specified {
            return false;
        }
        if is_java_core_class(class) {
            return self.include_java_core_classes;
        }
        if !PLATFORM_MARKERS.iter().any(|m| class.contains(m)) {
            // non-platform classes: the toggle is read as-is
            return self.only_include_platform_classes;
        }
        true
    }
}

/// One wave's frontier in recursive mode. Built once, never mutated.
#[derive(Debug, Clone, Default)]
pub struct RecursiveFrontierCriteria {
    symbols: Arc<HashSet<String>>,
    owners: Arc<HashSet<String>>,
}

impl RecursiveFrontierCriteria {
    pub fn new(symbols: HashSet<String>) -> Self {
        let owners = symbols
            .iter()
            .map(|k| symbol::owner_of(k).to_string())
            .collect();
        Self {
            symbols: Arc::new(symbols),
            owners: Arc::new(owners),
        }
    }
}

impl SearchCriteria for RecursiveFrontierCriteria {
    fn is_looking_for_class(&self, class: &str) -> bool {
        self.symbols.contains(class)
    }

    fn is_looking_for_method(&self, key: &str, _class: &str, _name: &str) -> bool {
        self.symbols.contains(key)
    }

    fn is_looking_for_field(&self, key: &str, _class: &str, _name: &str) -> bool {
        self.symbols.contains(key)
    }

    fn should_analyze_class(&self, class: &str) -> bool {
        self.owners.contains(class)
    }
}

/// Logical OR over its members. Empty means "nothing".
#[derive(Default, Clone)]
pub struct AnyOf {
    members: Vec<Arc<dyn SearchCriteria>>,
}

impl AnyOf {
    pub fn new(members: Vec<Arc<dyn SearchCriteria>>) -> Self {
        Self { members }
    }

}

impl SearchCriteria for AnyOf {
    fn is_looking_for_class(&self, class: &str) -> bool {
        self.members.iter().any(|c| c.is_looking_for_class(class))
    }

    fn is_looking_for_method(&self, key: &str, class: &str, name: &str) -> bool {
        self.members
            .iter()
            .any(|c| c.is_looking_for_method(key, class, name))
    }

    fn is_looking_for_field(&self, key: &str, class: &str, name: &str) -> bool {
        self.members
            .iter()
            .any(|c| c.is_looking_for_field(key, class, name))
    }

    fn should_analyze_class(&self, class: &str) -> bool {
        self.members.iter().any(|c| c.should_analyze_class(class))
    }
}
