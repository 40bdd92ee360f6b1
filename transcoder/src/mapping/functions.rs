//! Transform functions referenced from mappings (`{"function": "..."}`).
//!
//! The set is closed: names are resolved to [`TransformKind`] when the
//! mapping loads, and an unknown name is a configuration error. Each kind
//! computes a spreadsheet value from the XML during extraction; ingestion
//! handles the same columns with dedicated rules.

use serde::{Deserialize, Serialize};

use super::path::PathMatch;
use super::MappingSpec;
use crate::convert::compact_eidr;
use crate::models::keys;
use crate::provenance::XmlRef;
use crate::transform::terms::{first_legacy_term, term_value_node};
use crate::xml::{NodeId, XmlDocument};

/// Region whose presence triggers the captions inference.
const CAPTIONS_REGION: &str = "US";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransformKind {
    /// Asset `contentID`, EIDR identifiers in compact form.
    ContentId,
    /// Derived `Yes`/`No` from the US captions exemption.
    CaptionsIncluded,
    PriceType,
    PriceValue,
    PriceCurrency,
}

impl TransformKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "contentId" => Some(TransformKind::ContentId),
            "captionsIncluded" => Some(TransformKind::CaptionsIncluded),
            "priceType" => Some(TransformKind::PriceType),
            "priceValue" => Some(TransformKind::PriceValue),
            "priceCurrency" => Some(TransformKind::PriceCurrency),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransformKind::ContentId => "contentId",
            TransformKind::CaptionsIncluded => "captionsIncluded",
            TransformKind::PriceType => "priceType",
            TransformKind::PriceValue => "priceValue",
            TransformKind::PriceCurrency => "priceCurrency",
        }
    }

    /// Compute the cell value, or `None` when the row has nothing to show.
    pub fn apply(&self, ctx: &FunctionContext<'_>) -> Option<PathMatch> {
        match self {
            TransformKind::ContentId => ctx
                .doc
                .attribute(ctx.asset, "contentID")
                .map(|id| PathMatch {
                    value: compact_eidr(id),
                    source: XmlRef::attribute(ctx.asset, "contentID"),
                }),
            TransformKind::CaptionsIncluded => captions_included(ctx),
            TransformKind::PriceType => {
                let (term, price_type) = first_legacy_term(ctx.doc, ctx.spec, ctx.transaction?)?;
                Some(PathMatch {
                    value: price_type.to_string(),
                    source: XmlRef::attribute(term, "termName"),
                })
            }
            TransformKind::PriceValue => {
                let (term, _) = first_legacy_term(ctx.doc, ctx.spec, ctx.transaction?)?;
                let node = term_value_node(ctx.doc, ctx.spec, term)?;
                ctx.doc.text(node).map(|v| PathMatch {
                    value: v.to_string(),
                    source: XmlRef::element(node),
                })
            }
            TransformKind::PriceCurrency => price_currency(ctx),
        }
    }
}

/// Everything a transform may look at.
pub struct FunctionContext<'a> {
    pub doc: &'a XmlDocument,
    pub spec: &'a MappingSpec,
    pub avail: NodeId,
    pub asset: NodeId,
    pub transaction: Option<NodeId>,
    pub work_type: &'a str,
}

/// Blank unless some Transaction of the Avail covers the US; then `Yes`
/// when the asset has no captions exemption, `No` when it has one.
fn captions_included(ctx: &FunctionContext<'_>) -> Option<PathMatch> {
    let territory = ctx.spec.path_for(keys::TERRITORY, ctx.work_type)?;
    let transaction_name = ctx.spec.qualified("Transaction");

    let in_us = ctx
        .doc
        .children_named(ctx.avail, &transaction_name)
        .flat_map(|tx| territory.evaluate(ctx.doc, tx))
        .any(|m| m.value.trim().eq_ignore_ascii_case(CAPTIONS_REGION));
    if !in_us {
        return None;
    }

    let exemption = ctx
        .spec
        .path_for(keys::CAPTIONS_EXEMPTION, ctx.work_type)
        .map(|p| p.evaluate(ctx.doc, ctx.asset))
        .unwrap_or_default()
        .into_iter()
        .find(|m| !m.value.trim().is_empty());

    Some(match exemption {
        Some(found) => PathMatch {
            value: "No".to_string(),
            source: found.source,
        },
        None => PathMatch {
            value: "Yes".to_string(),
            source: XmlRef::element(ctx.asset),
        },
    })
}

/// Currency of the legacy Money term, falling back to the SRP term's.
fn price_currency(ctx: &FunctionContext<'_>) -> Option<PathMatch> {
    let transaction = ctx.transaction?;
    let money_name = ctx.spec.qualified("Money");

    let legacy_money = first_legacy_term(ctx.doc, ctx.spec, transaction)
        .and_then(|(term, _)| ctx.doc.first_child_named(term, &money_name));
    let srp_money = || {
        ctx.spec
            .path_for(keys::SRP, ctx.work_type)
            .and_then(|p| p.select(ctx.doc, transaction).into_iter().next())
    };

    let money = legacy_money.or_else(srp_money)?;
    ctx.doc.attribute(money, "currency").map(|c| PathMatch {
        value: c.to_string(),
        source: XmlRef::attribute(money, "currency"),
    })
}
