//! Mapping Catalog - versioned registry of mapping specifications
//!
//! Built-in versions are embedded in the binary; extra or overriding
//! mappings can be loaded from a directory of `*.json` files. The catalog
//! is an ordinary value handed to whoever needs it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::MappingSpec;
use crate::error::{MappingError, MappingResult, XmlResult};
use crate::xml::reader;

const BUILTIN: &[(&str, &str)] = &[
    ("2.2", include_str!("../../mappings/avails-2.2.json")),
    ("2.3", include_str!("../../mappings/avails-2.3.json")),
];

/// Mapping specifications keyed by version.
#[derive(Debug, Clone, Default)]
pub struct MappingCatalog {
    specs: BTreeMap<String, Arc<MappingSpec>>,
}

impl MappingCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the embedded mappings.
    pub fn builtin() -> MappingResult<Self> {
        let mut catalog = Self::new();
        for (version, text) in BUILTIN {
            let spec = MappingSpec::from_json(text)?;
            debug_assert_eq!(spec.version(), *version);
            catalog.insert(spec);
        }
        Ok(catalog)
    }

    /// Built-in mappings plus every `*.json` in `dir` (same version overrides).
    pub fn with_dir(dir: impl AsRef<Path>) -> MappingResult<Self> {
        let mut catalog = Self::builtin()?;
        catalog.load_dir(dir.as_ref())?;
        Ok(catalog)
    }

    fn load_dir(&mut self, dir: &Path) -> MappingResult<()> {
        let io_err = |source| MappingError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<_> = fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        paths.sort();

        for path in paths {
            self.load_file(&path)?;
        }
        Ok(())
    }

    /// Load one mapping file and register it.
    pub fn load_file(&mut self, path: &Path) -> MappingResult<Arc<MappingSpec>> {
        let text = fs::read_to_string(path).map_err(|source| MappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let spec = MappingSpec::from_json(&text)?;
        tracing::info!(version = spec.version(), path = %path.display(), "loaded mapping");
        Ok(self.insert(spec))
    }

    pub fn insert(&mut self, spec: MappingSpec) -> Arc<MappingSpec> {
        let spec = Arc::new(spec);
        self.specs.insert(spec.version().to_string(), Arc::clone(&spec));
        spec
    }

    pub fn get(&self, version: &str) -> MappingResult<Arc<MappingSpec>> {
        self.specs
            .get(version)
            .cloned()
            .ok_or_else(|| MappingError::UnknownVersion(version.to_string()))
    }

    /// Versions in ascending order.
    pub fn versions(&self) -> Vec<&str> {
        self.specs.keys().map(String::as_str).collect()
    }

    /// Highest version, by version-aware ordering.
    pub fn latest(&self) -> Option<Arc<MappingSpec>> {
        self.specs
            .values()
            .max_by(|a, b| version_key(a.version()).cmp(&version_key(b.version())))
            .cloned()
    }

    /// Mapping whose Avails namespace is `uri`.
    pub fn by_namespace(&self, uri: &str) -> Option<Arc<MappingSpec>> {
        self.specs
            .values()
            .find(|s| s.avail_namespace() == uri)
            .cloned()
    }

    /// Mapping for an XML document, by its root namespace.
    pub fn detect(&self, xml: &str) -> XmlResult<Option<Arc<MappingSpec>>> {
        let namespace = reader::root_namespace(xml)?;
        Ok(namespace.and_then(|uri| self.by_namespace(&uri)))
    }
}

fn version_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}
