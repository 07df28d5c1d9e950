// EnvironmentSpec Registry
//
// Immutable after construction; shared as Arc<Registry> and passed explicitly.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use super::environment::EnvironmentSpec;
use super::error::{DomainError, Result};

/// Table of source_id -> EnvironmentSpec
#[derive(Debug, Clone, Default)]
pub struct Registry {
    specs: BTreeMap<String, EnvironmentSpec>,
}

impl Registry {
    /// Build a registry, enforcing unique ids and non-overlapping env roots
    pub fn new(specs: impl IntoIterator<Item = EnvironmentSpec>) -> Result<Self> {
        let mut map: BTreeMap<String, EnvironmentSpec> = BTreeMap::new();

        for spec in specs {
            spec.validate()?;

            if map.contains_key(&spec.source_id) {
                return Err(DomainError::DuplicateSource(spec.source_id));
            }

            let root = normalize(&spec.env_root);
            if let Some(other) = map
                .values()
                .find(|other| overlaps(&normalize(&other.env_root), &root))
            {
                return Err(DomainError::OverlappingRoots {
                    first: other.source_id.clone(),
                    first_root: other.env_root.display().to_string(),
                    second: spec.source_id.clone(),
                    second_root: spec.env_root.display().to_string(),
                });
            }

            map.insert(spec.source_id.clone(), spec);
        }

        Ok(Self { specs: map })
    }

    pub fn get(&self, source_id: &str) -> Option<&EnvironmentSpec> {
        self.specs.get(source_id)
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.specs.contains_key(source_id)
    }

    /// Source ids in sorted order
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvironmentSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Lexical normalization: drops `.` and folds `..` where possible
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}
