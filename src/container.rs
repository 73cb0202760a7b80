//! Package container reader.
//!
//! A package is a zip archive (`.hpi`, `.jpi`, `.war`, `.jar`). Its class
//! entries are yielded lazily; nested library jars are opened in memory and
//! walked one level deep.

use memmap2::Mmap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::ArtifactError;

const CLASS_SUFFIX: &str = ".class";
const JAR_SUFFIX: &str = ".jar";
const MANIFEST: &str = "META-INF/MANIFEST.MF";
/// Upper bound on the buffer reserved from a declared entry size. The size
/// comes from the archive and may be anything, zip64 extras included.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Own classes only: top-level entries plus the nested jar named after the package.
    #[default]
    Shallow,
    /// Own classes plus every bundled library jar.
    Deep,
}

#[derive(Debug, Clone)]
pub struct ClassEntry {
    pub name: String,
    pub bytes: Vec<u8>,
    /// File stem of the archive the entry was read from.
    pub origin: String,
}

/// An entry that could not be read; the walk continues past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub name: String,
    pub message: String,
}

pub struct Container {
    path: PathBuf,
    stem: String,
    mmap: Mmap,
}

impl Container {
    pub fn open(path: &Path) -> Result<Self, ArtifactError> {
        let file = File::open(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // SAFETY: The file is opened read-only and the mapping is owned by the
        // container, so it outlives every archive view borrowed from it.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            stem: file_stem(&path.to_string_lossy()).to_string(),
            mmap,
        })
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Text of the package manifest, if it has one.
    pub fn manifest(&self) -> Result<Option<String>, ArtifactError> {
        let corrupt = |source| ArtifactError::Corrupt {
            path: self.path.clone(),
            source,
        };
        let mut archive = ZipArchive::new(Cursor::new(&self.mmap[..])).map_err(corrupt)?;
        let mut entry = match archive.by_name(MANIFEST) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(source) => return Err(corrupt(source)),
        };
        let mut bytes = Vec::with_capacity(preallocation(entry.size()));
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| ArtifactError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Class entries of this package. `package_name` selects the primary
    /// nested jar in shallow mode.
    pub fn class_entries<'a>(
        &'a self,
        package_name: &str,
        mode: ScanMode,
    ) -> Result<ClassEntries<'a>, ArtifactError> {
        let archive = ZipArchive::new(Cursor::new(&self.mmap[..])).map_err(|source| {
            ArtifactError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(ClassEntries {
            outer: archive,
            outer_origin: self.stem.clone(),
            index: 0,
            nested: None,
            package_name: package_name.to_string(),
            mode,
        })
    }
}

struct NestedJar {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    origin: String,
    index: usize,
}

pub struct ClassEntries<'a> {
    outer: ZipArchive<Cursor<&'a [u8]>>,
    outer_origin: String,
    index: usize,
    nested: Option<NestedJar>,
    package_name: String,
    mode: ScanMode,
}

fn wants_nested(mode: ScanMode, package_name: &str, entry_name: &str) -> bool {
    if !entry_name.ends_with(JAR_SUFFIX) {
        return false;
    }
    match mode {
        ScanMode::Deep => true,
        ScanMode::Shallow => file_stem(entry_name) == package_name,
    }
}

impl ClassEntries<'_> {
    fn next_nested(&mut self) -> Option<Result<ClassEntry, EntryFailure>> {
        let nested = self.nested.as_mut()?;
        while nested.index < nested.archive.len() {
            let i = nested.index;
            nested.index += 1;
            let origin = nested.origin.clone();
            let mut entry = match nested.archive.by_index(i) {
                Ok(entry) => entry,
                Err(err) => {
                    return Some(Err(EntryFailure {
                        name: format!("{origin}!#{i}"),
                        message: err.to_string(),
                    }));
                }
            };
            let name = entry.name().to_string();
            if !name.ends_with(CLASS_SUFFIX) {
                continue;
            }
            return Some(read_entry(&mut entry, name, origin));
        }
        self.nested = None;
        None
    }
}

impl Iterator for ClassEntries<'_> {
    type Item = Result<ClassEntry, EntryFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.next_nested() {
                return Some(item);
            }
            if self.index >= self.outer.len() {
                return None;
            }
            let i = self.index;
            self.index += 1;

            let mut entry = match self.outer.by_index(i) {
                Ok(entry) => entry,
                Err(err) => {
                    return Some(Err(EntryFailure {
                        name: format!("#{i}"),
                        message: err.to_string(),
                    }));
                }
            };
            let name = entry.name().to_string();
            if name.ends_with(CLASS_SUFFIX) {
                return Some(read_entry(&mut entry, name, self.outer_origin.clone()));
            }
            if !wants_nested(self.mode, &self.package_name, &name) {
                continue;
            }

            let mut bytes = Vec::with_capacity(preallocation(entry.size()));
            if let Err(err) = entry.read_to_end(&mut bytes) {
                return Some(Err(EntryFailure {
                    name,
                    message: err.to_string(),
                }));
            }
            drop(entry);
            match ZipArchive::new(Cursor::new(bytes)) {
                Ok(archive) => {
                    self.nested = Some(NestedJar {
                        archive,
                        origin: file_stem(&name).to_string(),
                        index: 0,
                    });
                }
                Err(err) => {
                    return Some(Err(EntryFailure {
                        name,
                        message: err.to_string(),
                    }));
                }
            }
        }
    }
}

fn read_entry(
    entry: &mut zip::read::ZipFile<'_>,
    name: String,
    origin: String,
) -> Result<ClassEntry, EntryFailure> {
    let mut bytes = Vec::with_capacity(preallocation(entry.size()));
    match entry.read_to_end(&mut bytes) {
        Ok(_) => Ok(ClassEntry {
            name,
            bytes,
            origin,
        }),
        Err(err) => Err(EntryFailure {
            name,
            message: err.to_string(),
        }),
    }
}

fn preallocation(declared: u64) -> usize {
    declared.min(MAX_PREALLOCATION) as usize
}

/// `WEB-INF/lib/foo-1.2.jar` → `foo-1.2`
pub fn file_stem(path: &str) -> &str {
    let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => file,
    }
}
