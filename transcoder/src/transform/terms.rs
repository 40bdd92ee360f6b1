//! Transaction Term rules.
//!
//! A Transaction carries its commercial terms as
//! `<avail:Term termName="..."><avail:Money currency="USD">9.99</avail:Money></avail:Term>`.
//! Spreadsheets express them two ways:
//!
//! - legacy `PriceType` / `PriceValue` / `PriceCurrency`, at most one Term
//!   per row, its child kind picked by the price type
//! - dedicated columns (`SRP`, `RentalDuration`, ...), one Term each
//!
//! `TPR-` (temporary price reduction) prefixes are stripped before lookup,
//! and `WSP` is specialised per work-type.

use crate::mapping::MappingSpec;
use crate::models::keys;
use crate::xml::{NodeId, XmlDocument};

/// Child element of a Term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    Text,
    Money,
    Duration,
    Boolean,
}

impl TermKind {
    pub fn element(self) -> &'static str {
        match self {
            TermKind::Text => "Text",
            TermKind::Money => "Money",
            TermKind::Duration => "Duration",
            TermKind::Boolean => "Boolean",
        }
    }
}

const LEGACY_TERMS: &[(&str, TermKind)] = &[
    ("Tier", TermKind::Text),
    ("Category", TermKind::Text),
    ("NA", TermKind::Text),
    ("WSP", TermKind::Money),
    ("DMRP", TermKind::Money),
    ("SMRP", TermKind::Money),
    ("LicenseFee", TermKind::Money),
    ("SRP", TermKind::Money),
];

const TPR_PREFIX: &str = "TPR-";

/// Term produced from a legacy `PriceType` cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTerm {
    /// `termName` attribute value.
    pub name: String,
    pub kind: TermKind,
}

impl LegacyTerm {
    pub fn is_srp(&self) -> bool {
        self.name == "SRP"
    }
}

/// Resolve a `PriceType` cell for an asset of `work_type`.
///
/// Returns `None` for unrecognized price types.
pub fn resolve_price_type(price_type: &str, work_type: &str) -> Option<LegacyTerm> {
    let trimmed = price_type.trim();
    let base = match trimmed.get(..TPR_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(TPR_PREFIX) => &trimmed[TPR_PREFIX.len()..],
        _ => trimmed,
    };

    let (name, kind) = LEGACY_TERMS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(base))?;

    let name = match *name {
        "WSP" if work_type.eq_ignore_ascii_case("Episode") => "EpisodeWSP",
        "WSP" if work_type.eq_ignore_ascii_case("Season") => "SeasonWSP",
        other => other,
    };
    Some(LegacyTerm {
        name: name.to_string(),
        kind: *kind,
    })
}

/// `PriceType` a Term name came from, or `None` for non-legacy terms.
///
/// SRP is excluded: it has its own column.
pub fn legacy_price_type(term_name: &str) -> Option<&'static str> {
    match term_name {
        "EpisodeWSP" | "SeasonWSP" => Some("WSP"),
        "SRP" => None,
        name => LEGACY_TERMS
            .iter()
            .find(|(legacy, _)| *legacy == name)
            .map(|(legacy, _)| *legacy),
    }
}

/// A column that maps to exactly one Term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedicatedTerm {
    pub key: &'static str,
    /// The Money child takes its currency from `PriceCurrency`.
    pub takes_currency: bool,
}

pub const DEDICATED_TERMS: &[DedicatedTerm] = &[
    DedicatedTerm { key: keys::SRP, takes_currency: true },
    DedicatedTerm { key: "AvailTrans:RentalDuration", takes_currency: false },
    DedicatedTerm { key: "AvailTrans:WatchDuration", takes_currency: false },
    DedicatedTerm { key: "AvailTrans:Download", takes_currency: false },
    DedicatedTerm { key: "AvailTrans:Exclusive", takes_currency: false },
    DedicatedTerm { key: "AvailTrans:ExclusiveAttributes", takes_currency: false },
    DedicatedTerm { key: "AvailTrans:BrandingRights", takes_currency: false },
    DedicatedTerm { key: "AvailTrans:BrandingRightsAttributes", takes_currency: false },
];

pub fn dedicated_term(key: &str) -> Option<&'static DedicatedTerm> {
    DEDICATED_TERMS.iter().find(|t| t.key == key)
}

/// First legacy Term of a Transaction and the `PriceType` it stands for.
pub fn first_legacy_term(
    doc: &XmlDocument,
    spec: &MappingSpec,
    transaction: NodeId,
) -> Option<(NodeId, &'static str)> {
    let term_name = spec.qualified("Term");
    let found = doc.children_named(transaction, &term_name).find_map(|term| {
        doc.attribute(term, "termName")
            .and_then(legacy_price_type)
            .map(|price_type| (term, price_type))
    });
    found
}

/// The value-carrying child of a Term (`Money`, `Text`, ...).
pub fn term_value_node(doc: &XmlDocument, spec: &MappingSpec, term: NodeId) -> Option<NodeId> {
    [TermKind::Money, TermKind::Text, TermKind::Duration, TermKind::Boolean]
        .iter()
        .find_map(|kind| doc.first_child_named(term, &spec.qualified(kind.element())))
}
