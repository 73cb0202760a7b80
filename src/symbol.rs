//! Canonical symbol keys.
//!
//! - class: internal slash name, array wrappers removed (`[[La/b/C;` → `a/b/C`)
//! - method: `owner#name(descriptor)`
//! - field: `owner#name`, the field type is intentionally not part of the key

use serde::{Deserialize, Serialize};

pub const SEPARATOR: char = '#';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Method,
    Field,
}

/// Removes any number of leading array markers and the `L…;` wrapper that
/// descriptors put around an array's element type.
pub fn dearray(name: &str) -> &str {
    let trimmed = name.trim_start_matches('[');
    if trimmed.len() == name.len() {
        return name;
    }
    match trimmed.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        Some(inner) => inner,
        None => trimmed,
    }
}

pub fn class_key(name: &str) -> String {
    dearray(name).to_string()
}

pub fn method_key(owner: &str, name: &str, descriptor: &str) -> String {
    format!("{}{SEPARATOR}{name}{descriptor}", dearray(owner))
}

pub fn field_key(owner: &str, name: &str) -> String {
    format!("{}{SEPARATOR}{name}", dearray(owner))
}

/// Splits a member key into its owner class and the remainder (`name` or `name(desc)`).
pub fn split_member(key: &str) -> Option<(&str, &str)> {
    key.split_once(SEPARATOR)
}

/// The class a key belongs to: itself for class keys, the owner for member keys.
pub fn owner_of(key: &str) -> &str {
    split_member(key).map(|(owner, _)| owner).unwrap_or(key)
}

pub fn kind_of(key: &str) -> SymbolKind {
    match split_member(key) {
        None => SymbolKind::Class,
        Some((_, member)) if member.contains('(') => SymbolKind::Method,
        Some(_) => SymbolKind::Field,
    }
}

/// Simple member name of a method key (`a/B#run(I)V` → `run`).
pub fn method_name(key: &str) -> Option<&str> {
    let (_, member) = split_member(key)?;
    member.split('(').next()
}

/// Accepts either dotted (`a.b.C`) or internal (`a/b/C`) names.
pub fn internal_name(name: &str) -> String {
    name.trim().replace('.', "/")
}
