//! Mapping specification: spreadsheet columns to XML path templates.
//!
//! A mapping is a JSON document, one per schema version:
//!
//! ```json
//! {
//!   "version": "2.3",
//!   "namespaces": { "avail": "http://...", "md": "http://..." },
//!   "sheets": [{ "name": "Avails" }],
//!   "columns": {
//!     "Avail:ALID": "{avail}ALID",
//!     "AvailTrans:Start": ["{avail}Start", "{avail}StartCondition"],
//!     "AvailMetadata:EpisodeNumber": { "Episode": "{avail}EpisodeMetadata/..." },
//!     "AvailAsset:ContentID": { "function": "contentId" }
//!   }
//! }
//! ```
//!
//! Loading validates the document against the mapping JSON Schema, then
//! compiles every template and resolves every function reference. Any
//! failure is a configuration error; a loaded [`MappingSpec`] is immutable
//! and keeps the declared column order.

pub mod catalog;
pub mod functions;
pub mod path;

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::error::{MappingError, MappingResult};
use crate::models::{keys, ColumnKey, Scope};
use crate::transform::terms::dedicated_term;
use crate::validation::validate_mapping;
use path::{compile, compile_as, NamespaceBindings, PathExpr, TargetKind};

pub use catalog::MappingCatalog;
pub use functions::{FunctionContext, TransformKind};

/// Prefix bound to the Avails namespace.
pub const AVAIL_PREFIX: &str = "avail";
/// Prefix bound to the Common Metadata namespace.
pub const MD_PREFIX: &str = "md";

// =============================================================================
// Compiled Model
// =============================================================================

/// How one column maps to XML.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingRule {
    Path(PathExpr),
    /// Candidate paths in priority order.
    Alternatives(Vec<PathExpr>),
    /// One path per asset work-type.
    ByWorkType(Vec<(String, PathExpr)>),
    Transform(TransformKind),
}

impl MappingRule {
    /// The path used when writing a value for `work_type`.
    pub fn path_for(&self, work_type: &str) -> Option<&PathExpr> {
        match self {
            MappingRule::Path(p) => Some(p),
            MappingRule::Alternatives(paths) => paths.first(),
            MappingRule::ByWorkType(_) => self.candidates(work_type).into_iter().next(),
            MappingRule::Transform(_) => None,
        }
    }

    /// Paths to try, in order, when reading a value for `work_type`.
    pub fn candidates(&self, work_type: &str) -> Vec<&PathExpr> {
        match self {
            MappingRule::Path(p) => vec![p],
            MappingRule::Alternatives(paths) => paths.iter().collect(),
            MappingRule::ByWorkType(by_type) => by_type
                .iter()
                .find(|(t, _)| t == work_type)
                .or_else(|| by_type.iter().find(|(t, _)| t.eq_ignore_ascii_case(work_type)))
                .map(|(_, p)| vec![p])
                .unwrap_or_default(),
            MappingRule::Transform(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingEntry {
    pub key: ColumnKey,
    pub rule: MappingRule,
}

impl MappingEntry {
    pub fn scope(&self) -> Scope {
        self.key.scope()
    }
}

/// An output sheet and the work-types routed to it (empty = all).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetLayout {
    pub name: String,
    #[serde(default)]
    pub work_types: Vec<String>,
}

impl SheetLayout {
    pub fn accepts(&self, work_type: &str) -> bool {
        self.work_types.is_empty()
            || self
                .work_types
                .iter()
                .any(|w| w.eq_ignore_ascii_case(work_type))
    }
}

/// A compiled, immutable mapping for one schema version.
#[derive(Debug, Clone)]
pub struct MappingSpec {
    version: String,
    description: String,
    bindings: NamespaceBindings,
    sheets: Vec<SheetLayout>,
    entries: Vec<MappingEntry>,
    index: HashMap<ColumnKey, usize>,
}

// =============================================================================
// Raw JSON Shape
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawSpec {
    version: String,
    #[serde(default)]
    description: String,
    namespaces: BTreeMap<String, String>,
    #[serde(default)]
    sheets: Vec<SheetLayout>,
    columns: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRule {
    Path(String),
    Alternatives(Vec<String>),
    Function(FunctionRef),
    ByWorkType(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FunctionRef {
    function: String,
}

// =============================================================================
// Loading
// =============================================================================

impl MappingSpec {
    /// Parse, validate and compile a mapping document.
    pub fn from_json(text: &str) -> MappingResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> MappingResult<Self> {
        validate_mapping(value).map_err(MappingError::Schema)?;
        let raw: RawSpec = serde_json::from_value(value.clone())?;

        let mut bindings = NamespaceBindings::new();
        for (prefix, uri) in &raw.namespaces {
            bindings.bind(prefix.clone(), uri.clone());
        }
        for required in [AVAIL_PREFIX, MD_PREFIX] {
            if bindings.uri(required).is_none() {
                return Err(MappingError::MissingNamespace(required.to_string()));
            }
        }

        let mut entries = Vec::with_capacity(raw.columns.len());
        let mut index = HashMap::new();
        for (raw_key, raw_rule) in raw.columns {
            let key = ColumnKey::parse(&raw_key)?;
            let rule: RawRule = serde_json::from_value(raw_rule)?;
            let rule = compile_rule(&key, rule, &bindings)?;
            index.insert(key.clone(), entries.len());
            entries.push(MappingEntry { key, rule });
        }

        let sheets = if raw.sheets.is_empty() {
            vec![SheetLayout {
                name: "Avails".to_string(),
                work_types: Vec::new(),
            }]
        } else {
            raw.sheets
        };

        tracing::debug!(version = %raw.version, columns = entries.len(), "compiled mapping");

        Ok(Self {
            version: raw.version,
            description: raw.description,
            bindings,
            sheets,
            entries,
            index,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn bindings(&self) -> &NamespaceBindings {
        &self.bindings
    }

    pub fn sheets(&self) -> &[SheetLayout] {
        &self.sheets
    }

    /// Entries in declared order.
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn entry(&self, key: &str) -> Option<&MappingEntry> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Declared position of a column.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// The writing path of `key` for an asset of `work_type`.
    pub fn path_for(&self, key: &str, work_type: &str) -> Option<&PathExpr> {
        self.entry(key).and_then(|e| e.rule.path_for(work_type))
    }

    /// URI of the Avails namespace.
    pub fn avail_namespace(&self) -> &str {
        self.bindings.uri(AVAIL_PREFIX).unwrap_or_default()
    }

    /// `Asset` → `avail:Asset`.
    pub fn qualified(&self, local: &str) -> String {
        format!("{}:{}", AVAIL_PREFIX, local)
    }

    /// `DisplayName` → `md:DisplayName`.
    pub fn md(&self, local: &str) -> String {
        format!("{}:{}", MD_PREFIX, local)
    }
}

/// Columns the engine reads or writes as element text (linking keys, Terms,
/// boundaries, entitlements, volume finalization).
fn fixed_target(key: &str) -> Option<TargetKind> {
    const ELEMENT_KEYS: &[&str] = &[
        keys::ALID,
        keys::WORK_TYPE,
        keys::UV_VERSION_ID,
        keys::DMA_ID,
        keys::START,
        keys::END,
        keys::EPISODE_NUMBER,
        keys::SEASON_CONTENT_ID,
        keys::VOLUME_FIRST_EPISODE,
        keys::VOLUME_EPISODE_COUNT,
    ];
    if ELEMENT_KEYS.contains(&key) || dedicated_term(key).is_some() {
        Some(TargetKind::Element)
    } else {
        None
    }
}

fn compile_rule(
    key: &ColumnKey,
    rule: RawRule,
    bindings: &NamespaceBindings,
) -> MappingResult<MappingRule> {
    let expected = fixed_target(key.as_str());
    let compile_one = |template: &str| {
        match expected {
            Some(kind) => compile_as(template, bindings, kind),
            None => compile(template, bindings),
        }
        .map_err(|source| MappingError::Path {
            key: key.to_string(),
            source,
        })
    };

    Ok(match rule {
        RawRule::Path(template) => MappingRule::Path(compile_one(&template)?),
        RawRule::Alternatives(templates) => {
            if templates.is_empty() {
                return Err(MappingError::EmptyAlternatives(key.to_string()));
            }
            MappingRule::Alternatives(
                templates
                    .iter()
                    .map(|t| compile_one(t))
                    .collect::<MappingResult<_>>()?,
            )
        }
        RawRule::Function(FunctionRef { function }) => {
            let kind = TransformKind::from_name(&function).ok_or_else(|| {
                MappingError::UnknownFunction {
                    key: key.to_string(),
                    name: function.clone(),
                }
            })?;
            MappingRule::Transform(kind)
        }
        RawRule::ByWorkType(by_type) => MappingRule::ByWorkType(
            by_type
                .into_iter()
                .map(|(work_type, template)| -> MappingResult<(String, PathExpr)> {
                    Ok((work_type, compile_one(&template)?))
                })
                .collect::<MappingResult<_>>()?,
        ),
    })
}
