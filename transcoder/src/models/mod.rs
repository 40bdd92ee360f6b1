//! Domain models shared by both transcoding directions.
//!
//! - [`ColumnKey`] - canonical `Category:Field` spreadsheet column identity
//! - [`Category`] / [`Scope`] - which entity a column belongs to
//! - [`keys`] - well-known column keys the engine treats specially

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::MappingError;

// =============================================================================
// Column Categories
// =============================================================================

/// First header row value: the column group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Avail,
    AvailAsset,
    AvailMetadata,
    AvailTrans,
}

impl Category {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Avail" => Some(Category::Avail),
            "AvailAsset" => Some(Category::AvailAsset),
            "AvailMetadata" => Some(Category::AvailMetadata),
            "AvailTrans" => Some(Category::AvailTrans),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Avail => "Avail",
            Category::AvailAsset => "AvailAsset",
            Category::AvailMetadata => "AvailMetadata",
            Category::AvailTrans => "AvailTrans",
        }
    }

    /// Element a column's paths are evaluated against.
    pub fn scope(&self) -> Scope {
        match self {
            Category::Avail => Scope::Avail,
            Category::AvailAsset | Category::AvailMetadata => Scope::Asset,
            Category::AvailTrans => Scope::Transaction,
        }
    }
}

/// Context element for a column's path expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Avail,
    Asset,
    Transaction,
}

// =============================================================================
// Column Key
// =============================================================================

/// Composite column identity, always stored as `Category:Field`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnKey(String);

impl ColumnKey {
    /// Parse `Category:Field` or `Category/Field`.
    pub fn parse(raw: &str) -> Result<Self, MappingError> {
        let raw = raw.trim();
        let (category, field) = raw
            .split_once(':')
            .or_else(|| raw.split_once('/'))
            .ok_or_else(|| MappingError::InvalidKey(raw.to_string()))?;

        let category = Category::parse(category)
            .ok_or_else(|| MappingError::UnknownCategory(raw.to_string()))?;
        let field = field.trim();
        if field.is_empty() || field.contains(['/', ':']) {
            return Err(MappingError::InvalidKey(raw.to_string()));
        }

        Ok(Self(format!("{}:{}", category.as_str(), field)))
    }

    /// Build a key from the two header cells of one column.
    pub fn from_header(category: &str, field: &str) -> Result<Self, MappingError> {
        Self::parse(&format!("{}/{}", category.trim(), field.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> Category {
        let (category, _) = self.0.split_once(':').unwrap_or((&self.0, ""));
        // Only constructed through `parse`, so the category is always valid.
        Category::parse(category).unwrap_or(Category::Avail)
    }

    pub fn field(&self) -> &str {
        self.0.split_once(':').map(|(_, f)| f).unwrap_or("")
    }

    pub fn scope(&self) -> Scope {
        self.category().scope()
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ColumnKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ColumnKey {
    type Error = MappingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ColumnKey> for String {
    fn from(key: ColumnKey) -> Self {
        key.0
    }
}

// =============================================================================
// Well-known Columns
// =============================================================================

/// Column keys with engine-level meaning (linking, rules, finalization).
pub mod keys {
    pub const ALID: &str = "Avail:ALID";
    pub const DISPLAY_NAME: &str = "Avail:DisplayName";
    pub const SERVICE_PROVIDER: &str = "Avail:ServiceProvider";
    pub const EXCEPTION_FLAG: &str = "Avail:ExceptionFlag";
    pub const UV_VERSION_ID: &str = "Avail:UVVersionID";
    pub const DMA_ID: &str = "Avail:DMA_ID";

    pub const WORK_TYPE: &str = "AvailAsset:WorkType";
    pub const CONTENT_ID: &str = "AvailAsset:ContentID";

    pub const EDIT_ID: &str = "AvailMetadata:EditID";
    pub const TITLE_ID: &str = "AvailMetadata:TitleID";
    pub const ALT_ID: &str = "AvailMetadata:AltID";
    pub const EPISODE_NUMBER: &str = "AvailMetadata:EpisodeNumber";
    pub const SEASON_CONTENT_ID: &str = "AvailMetadata:SeasonContentID";
    pub const VOLUME_FIRST_EPISODE: &str = "AvailMetadata:VolumeFirstEpisodeNumber";
    pub const VOLUME_EPISODE_COUNT: &str = "AvailMetadata:VolumeNumberOfEpisodes";
    pub const CAPTIONS_EXEMPTION: &str = "AvailMetadata:USACaptionsExemptionReason";

    pub const TERRITORY: &str = "AvailTrans:Territory";
    pub const START: &str = "AvailTrans:Start";
    pub const END: &str = "AvailTrans:End";
    pub const PRICE_TYPE: &str = "AvailTrans:PriceType";
    pub const PRICE_VALUE: &str = "AvailTrans:PriceValue";
    pub const PRICE_CURRENCY: &str = "AvailTrans:PriceCurrency";
    pub const SRP: &str = "AvailTrans:SRP";
}

// =============================================================================
// Work Types
// =============================================================================

/// Collapse an asset work-type into the Avail-level type.
///
/// `Movie` and `Short` become `single`; everything else is lower-cased.
pub fn avail_type_for(work_type: &str) -> String {
    match work_type.trim() {
        w if w.eq_ignore_ascii_case("movie") || w.eq_ignore_ascii_case("short") => {
            "single".to_string()
        }
        w => w.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_accepts_both_separators() {
        let a = ColumnKey::parse("AvailTrans:Start").unwrap();
        let b = ColumnKey::parse("AvailTrans/Start").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "AvailTrans:Start");
        assert_eq!(a.field(), "Start");
        assert_eq!(a.scope(), Scope::Transaction);
    }

    #[test]
    fn test_key_from_header_trims_cells() {
        let key = ColumnKey::from_header(" AvailMetadata ", "TitleInternalAlias ").unwrap();
        assert_eq!(key.as_str(), "AvailMetadata:TitleInternalAlias");
        assert_eq!(key.scope(), Scope::Asset);
    }

    #[test]
    fn test_key_rejects_unknown_category() {
        assert!(matches!(
            ColumnKey::parse("Foo:Bar"),
            Err(MappingError::UnknownCategory(_))
        ));
        assert!(matches!(
            ColumnKey::parse("NoSeparator"),
            Err(MappingError::InvalidKey(_))
        ));
        assert!(ColumnKey::parse("Avail:").is_err());
    }

    #[test]
    fn test_avail_type_collapsing() {
        assert_eq!(avail_type_for("Movie"), "single");
        assert_eq!(avail_type_for("Short"), "single");
        assert_eq!(avail_type_for("Episode"), "episode");
        assert_eq!(avail_type_for("Season"), "season");
    }
}
