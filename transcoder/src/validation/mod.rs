//! JSON Schema validation of mapping documents.
//!
//! Mapping files are checked against `schemas/mapping-spec.schema.json`
//! (Draft 7, embedded at compile time) before they are compiled, so that
//! every structural problem in a hand-edited mapping is reported at once
//! rather than one `serde` error at a time.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use avails::validation::validate_mapping;
//!
//! let mapping = json!({
//!     "version": "2.3",
//!     "namespaces": { "avail": "urn:avail", "md": "urn:md" },
//!     "columns": { "Avail:ALID": "{avail}ALID" }
//! });
//! assert!(validate_mapping(&mapping).is_ok());
//! ```

use serde_json::Value;

const MAPPING_SCHEMA: &str = include_str!("../../schemas/mapping-spec.schema.json");

/// Validate `data` against `schema`.
///
/// # Returns
/// * `Ok(())` when valid
/// * `Err(Vec<String>)` with every violation otherwise
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Boolean shortcut for [`validate`].
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// The embedded mapping-document schema.
pub fn mapping_schema() -> Result<Value, Vec<String>> {
    serde_json::from_str(MAPPING_SCHEMA).map_err(|e| vec![format!("Invalid embedded schema: {}", e)])
}

/// Validate a mapping document.
pub fn validate_mapping(data: &Value) -> Result<(), Vec<String>> {
    validate(&mapping_schema()?, data)
}
