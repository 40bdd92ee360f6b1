//! Schema introspection consumed by the engine.
//!
//! The engine only needs two answers from the XML schema: whether an
//! element is required, and which scalar type it carries (to pick a value
//! conversion). [`StaticSchema`] answers both from fixed tables for the
//! Avails schema family.

use std::collections::{HashMap, HashSet};

use crate::xml::local_part;

/// Scalar type of an element or attribute, as far as conversion cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    String,
    Duration,
    Date,
    DateTime,
    Boolean,
}

/// Questions the transcoder asks about the target schema.
pub trait SchemaIntrospection {
    fn is_element_required(&self, name: &str) -> bool;
    fn type_of(&self, name: &str) -> TypeTag;
}

/// Table-driven introspection keyed by local name.
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    required: HashSet<String>,
    types: HashMap<String, TypeTag>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables for Avails 2.2 / 2.3.
    pub fn avails() -> Self {
        let mut schema = Self::new();
        for name in ["ALID", "WorkType", "LicenseType", "EntryType", "country"] {
            schema = schema.with_required(name);
        }
        let types = [
            ("RunLength", TypeTag::Duration),
            ("Duration", TypeTag::Duration),
            ("Date", TypeTag::Date),
            ("FixedEndDate", TypeTag::Date),
            ("Start", TypeTag::DateTime),
            ("End", TypeTag::DateTime),
            ("ExceptionFlag", TypeTag::Boolean),
            ("Boolean", TypeTag::Boolean),
        ];
        for (name, tag) in types {
            schema = schema.with_type(name, tag);
        }
        schema
    }

    pub fn with_required(mut self, name: &str) -> Self {
        self.required.insert(name.to_string());
        self
    }

    pub fn with_type(mut self, name: &str, tag: TypeTag) -> Self {
        self.types.insert(name.to_string(), tag);
        self
    }
}

impl SchemaIntrospection for StaticSchema {
    fn is_element_required(&self, name: &str) -> bool {
        self.required.contains(local_part(name))
    }

    fn type_of(&self, name: &str) -> TypeTag {
        self.types
            .get(local_part(name))
            .copied()
            .unwrap_or(TypeTag::String)
    }
}
