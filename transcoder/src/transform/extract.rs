//! XML-to-row extraction.
//!
//! Every Avail yields one row per Asset × Transaction. Avail-level values
//! are repeated on each of its rows, Asset-level values on each of the
//! asset's rows. Extraction only reads the document.

use serde::{Deserialize, Serialize};

use crate::convert::{to_external, TypeHint};
use crate::mapping::path::PathMatch;
use crate::mapping::{FunctionContext, MappingEntry, MappingRule, MappingSpec};
use crate::models::{ColumnKey, Scope};
use crate::provenance::{CellAddress, ExtractProvenance, XmlRef};
use crate::report::{BuildLog, Location, LogEntry};
use crate::schema::SchemaIntrospection;
use crate::sheet::{Sheet, FIRST_DATA_ROW};
use crate::xml::{NodeId, XmlDocument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractOptions {
    /// Drop columns that are empty in every row of a sheet.
    pub hide_empty_columns: bool,
    /// Separator for all-matches columns.
    pub join_separator: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            hide_empty_columns: false,
            join_separator: ", ".to_string(),
        }
    }
}

/// One extracted row, values parallel to the mapping entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRow {
    pub work_type: String,
    pub values: Vec<String>,
    pub sources: Vec<Option<XmlRef>>,
}

#[derive(Debug)]
pub struct ExtractOutcome {
    pub sheets: Vec<Sheet>,
    pub provenance: ExtractProvenance,
    pub log: BuildLog,
}

/// Nodes a row is read from.
#[derive(Clone, Copy)]
struct RowNodes<'w> {
    avail: NodeId,
    asset: NodeId,
    transaction: Option<NodeId>,
    work_type: &'w str,
}

pub struct Extractor<'a> {
    spec: &'a MappingSpec,
    schema: &'a dyn SchemaIntrospection,
    options: ExtractOptions,
}

impl<'a> Extractor<'a> {
    pub fn new(spec: &'a MappingSpec, schema: &'a dyn SchemaIntrospection, options: ExtractOptions) -> Self {
        Self { spec, schema, options }
    }

    /// Rows for one Avail element.
    pub fn extract_avail(&self, doc: &XmlDocument, avail: NodeId, log: &mut BuildLog) -> Vec<ExtractedRow> {
        let spec = self.spec;
        let assets: Vec<NodeId> = doc.children_named(avail, &spec.qualified("Asset")).collect();
        let transactions: Vec<Option<NodeId>> = {
            let found: Vec<Option<NodeId>> = doc
                .children_named(avail, &spec.qualified("Transaction"))
                .map(Some)
                .collect();
            if found.is_empty() {
                vec![None]
            } else {
                found
            }
        };

        if assets.is_empty() {
            log.log(LogEntry::warning("Avail has no Asset; no rows extracted").at(Location::node(doc.path_of(avail))));
            return Vec::new();
        }

        let mut rows = Vec::with_capacity(assets.len() * transactions.len());
        for &asset in &assets {
            let work_type = doc.child_text(asset, &spec.qualified("WorkType")).unwrap_or("").trim();
            for &transaction in &transactions {
                let nodes = RowNodes {
                    avail,
                    asset,
                    transaction,
                    work_type,
                };
                let (values, sources): (Vec<String>, Vec<Option<XmlRef>>) = spec
                    .entries()
                    .iter()
                    .map(|entry| match self.value_of(doc, entry, nodes, log) {
                        Some(found) => (found.value, Some(found.source)),
                        None => (String::new(), None),
                    })
                    .unzip();
                rows.push(ExtractedRow {
                    work_type: work_type.to_string(),
                    values,
                    sources,
                });
            }
        }
        rows
    }

    fn value_of(&self, doc: &XmlDocument, entry: &MappingEntry, nodes: RowNodes<'_>, log: &mut BuildLog) -> Option<PathMatch> {
        if let MappingRule::Transform(kind) = &entry.rule {
            let ctx = FunctionContext {
                doc,
                spec: self.spec,
                avail: nodes.avail,
                asset: nodes.asset,
                transaction: nodes.transaction,
                work_type: nodes.work_type,
            };
            return kind.apply(&ctx);
        }

        let context = match entry.scope() {
            Scope::Avail => nodes.avail,
            Scope::Asset => nodes.asset,
            Scope::Transaction => nodes.transaction?,
        };

        let mut hits = entry
            .rule
            .candidates(nodes.work_type)
            .into_iter()
            .map(|path| {
                let matches: Vec<PathMatch> = path
                    .evaluate(doc, context)
                    .into_iter()
                    .filter(|m| !m.value.trim().is_empty())
                    .collect();
                (path, matches)
            })
            .filter(|(_, matches)| !matches.is_empty());

        let (path, mut matches) = hits.next()?;
        if hits.next().is_some() {
            log.log(
                LogEntry::warning(format!("Several candidate paths match {}; using {}", entry.key, path.source()))
                    .at(Location::node(doc.path_of(context))),
            );
        }

        let leaf = path.leaf_local_name().unwrap_or("");
        let hint = TypeHint::new(self.schema.type_of(leaf), leaf);

        if path.allows_multiple() {
            let source = matches[0].source.clone();
            let value = matches
                .iter()
                .map(|m| to_external(&m.value, &hint))
                .collect::<Vec<_>>()
                .join(&self.options.join_separator);
            return Some(PathMatch { value, source });
        }

        if matches.len() > 1 {
            log.log(
                LogEntry::warning(format!("{} matches for {}; using the first", matches.len(), entry.key))
                    .at(Location::node(doc.path_of(context))),
            );
        }
        let first = matches.swap_remove(0);
        Some(PathMatch {
            value: to_external(&first.value, &hint),
            source: first.source,
        })
    }

    /// Rows of every Avail, routed to the mapping's sheets by work-type.
    pub fn extract_document(&self, doc: &XmlDocument) -> ExtractOutcome {
        let spec = self.spec;
        let mut log = BuildLog::new();
        let mut provenance = ExtractProvenance::new();
        let columns: Vec<ColumnKey> = spec.entries().iter().map(|e| e.key.clone()).collect();

        let mut routed: Vec<Vec<ExtractedRow>> = vec![Vec::new(); spec.sheets().len()];
        let Some(root) = doc.root() else {
            log.log(LogEntry::error("Document has no root element"));
            return ExtractOutcome {
                sheets: Vec::new(),
                provenance,
                log,
            };
        };

        for avail in doc.children_named(root, &spec.qualified("Avail")) {
            for row in self.extract_avail(doc, avail, &mut log) {
                match spec.sheets().iter().position(|s| s.accepts(&row.work_type)) {
                    Some(slot) => routed[slot].push(row),
                    None => log.log(
                        LogEntry::warning(format!("No sheet takes work type '{}'; row dropped", row.work_type))
                            .at(Location::node(doc.path_of(avail))),
                    ),
                }
            }
        }

        let mut sheets = Vec::with_capacity(routed.len());
        for (layout, rows) in spec.sheets().iter().zip(routed) {
            let visible: Vec<usize> = (0..columns.len())
                .filter(|&c| !self.options.hide_empty_columns || rows.iter().any(|r| !r.values[c].is_empty()))
                .collect();

            for (i, row) in rows.iter().enumerate() {
                for &c in &visible {
                    if let Some(source) = &row.sources[c] {
                        provenance.record(
                            CellAddress {
                                sheet: layout.name.clone(),
                                row: FIRST_DATA_ROW + i,
                                column: columns[c].clone(),
                            },
                            source.clone(),
                        );
                    }
                }
            }

            tracing::debug!(sheet = %layout.name, rows = rows.len(), columns = visible.len(), "extracted sheet");
            sheets.push(Sheet {
                name: layout.name.clone(),
                columns: visible.iter().map(|&c| columns[c].clone()).collect(),
                rows: rows
                    .into_iter()
                    .map(|r| visible.iter().map(|&c| r.values[c].clone()).collect())
                    .collect(),
            });
        }

        let total: usize = sheets.iter().map(|s| s.rows.len()).sum();
        log.log(LogEntry::success(format!("Extracted {} rows into {} sheets", total, sheets.len())));
        ExtractOutcome { sheets, provenance, log }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::keys;
    use crate::schema::StaticSchema;
    use crate::xml::reader;

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
    <avail:AvailList xmlns:avail="http://www.movielabs.com/schema/avails/v2.3/avails"
            xmlns:md="http://www.movielabs.com/schema/md/v2.6/md">
      <avail:Avail>
        <avail:ALID>md:alid:org:studio:A1</avail:ALID>
        <avail:Licensor><md:DisplayName>Studio</md:DisplayName></avail:Licensor>
        <avail:ServiceProvider><md:DisplayName>Shop</md:DisplayName></avail:ServiceProvider>
        <avail:AvailType>single</avail:AvailType>
        <avail:Asset contentID="md:cid:eidr-s:F00D-0001">
          <avail:WorkType>Movie</avail:WorkType>
          <avail:Metadata>
            <avail:TitleDisplayUnlimited>Feature</avail:TitleDisplayUnlimited>
            <avail:RunLength>PT1H30M</avail:RunLength>
          </avail:Metadata>
        </avail:Asset>
        <avail:Transaction>
          <avail:LicenseType>EST</avail:LicenseType>
          <avail:Territory><md:country>US</md:country></avail:Territory>
          <avail:Territory><md:country>CA</md:country></avail:Territory>
          <avail:Start>2020-01-01T00:00:00</avail:Start>
          <avail:End>2020-12-31T23:59:59</avail:End>
          <avail:Term termName="Tier"><avail:Text>Gold</avail:Text></avail:Term>
        </avail:Transaction>
        <avail:Transaction>
          <avail:LicenseType>VOD</avail:LicenseType>
          <avail:Territory><md:country>FR</md:country></avail:Territory>
          <avail:StartCondition>Immediate</avail:StartCondition>
        </avail:Transaction>
      </avail:Avail>
      <avail:Avail>
        <avail:ALID>md:alid:org:studio:A2</avail:ALID>
        <avail:Asset contentID="md:cid:org:studio:ep1">
          <avail:WorkType>Episode</avail:WorkType>
          <avail:EpisodeMetadata>
            <avail:EpisodeNumber><md:Number>1</md:Number></avail:EpisodeNumber>
          </avail:EpisodeMetadata>
        </avail:Asset>
      </avail:Avail>
    </avail:AvailList>"#;

    fn extract(version_json: &str, options: ExtractOptions) -> ExtractOutcome {
        let spec = MappingSpec::from_json(version_json).unwrap();
        let schema = StaticSchema::avails();
        let doc = reader::parse(XML, spec.bindings()).unwrap();
        Extractor::new(&spec, &schema, options).extract_document(&doc)
    }

    fn v23() -> &'static str {
        include_str!("../../mappings/avails-2.3.json")
    }

    #[test]
    fn test_rows_per_asset_and_transaction() {
        let outcome = extract(v23(), ExtractOptions::default());
        assert_eq!(outcome.sheets.len(), 1);
        let sheet = &outcome.sheets[0];
        assert_eq!(sheet.name, "Avails");
        assert_eq!(sheet.rows.len(), 3);

        assert_eq!(sheet.cell(0, keys::ALID), Some("md:alid:org:studio:A1"));
        assert_eq!(sheet.cell(1, keys::ALID), Some("md:alid:org:studio:A1"));
        assert_eq!(sheet.cell(1, keys::SERVICE_PROVIDER), Some("Shop"));
        assert_eq!(sheet.cell(0, keys::CONTENT_ID), Some("10.5240/F00D-0001"));
        assert_eq!(sheet.cell(0, "AvailMetadata:TotalRunTime"), Some("01:30"));
    }

    #[test]
    fn test_transaction_values_converted() {
        let outcome = extract(v23(), ExtractOptions::default());
        let sheet = &outcome.sheets[0];
        assert_eq!(sheet.cell(0, keys::TERRITORY), Some("US, CA"));
        assert_eq!(sheet.cell(0, keys::START), Some("2020-01-01"));
        assert_eq!(sheet.cell(0, keys::END), Some("2020-12-31"));
        assert_eq!(sheet.cell(0, keys::PRICE_TYPE), Some("Tier"));
        assert_eq!(sheet.cell(0, keys::PRICE_VALUE), Some("Gold"));
        assert_eq!(sheet.cell(1, keys::START), Some("Immediate"));
        assert_eq!(sheet.cell(1, keys::PRICE_TYPE), Some(""));
    }

    #[test]
    fn test_captions_column() {
        let outcome = extract(v23(), ExtractOptions::default());
        let sheet = &outcome.sheets[0];
        assert_eq!(sheet.cell(0, "AvailMetadata:CaptionIncluded"), Some("Yes"));
        assert_eq!(sheet.cell(2, "AvailMetadata:CaptionIncluded"), Some(""));
    }

    #[test]
    fn test_asset_without_transactions_gives_one_row() {
        let outcome = extract(v23(), ExtractOptions::default());
        let sheet = &outcome.sheets[0];
        assert_eq!(sheet.cell(2, keys::EPISODE_NUMBER), Some("1"));
        assert_eq!(sheet.cell(2, "AvailTrans:LicenseType"), Some(""));
    }

    #[test]
    fn test_split_sheets_by_work_type() {
        let outcome = extract(include_str!("../../mappings/avails-2.2.json"), ExtractOptions::default());
        let names: Vec<&str> = outcome.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Movies", "TV"]);
        assert_eq!(outcome.sheets[0].rows.len(), 2);
        assert_eq!(outcome.sheets[1].rows.len(), 1);
    }

    #[test]
    fn test_hide_empty_columns() {
        let options = ExtractOptions {
            hide_empty_columns: true,
            ..ExtractOptions::default()
        };
        let outcome = extract(v23(), options);
        let sheet = &outcome.sheets[0];
        assert!(sheet.columns.iter().all(|c| c.as_str() != keys::DMA_ID));
        assert!(sheet.columns.iter().any(|c| c.as_str() == keys::ALID));
        assert!(sheet.rows.iter().all(|r| r.len() == sheet.columns.len()));
    }

    #[test]
    fn test_provenance_links_cells_to_nodes() {
        let spec = MappingSpec::from_json(v23()).unwrap();
        let schema = StaticSchema::avails();
        let doc = reader::parse(XML, spec.bindings()).unwrap();
        let outcome = Extractor::new(&spec, &schema, ExtractOptions::default()).extract_document(&doc);

        let address = CellAddress {
            sheet: "Avails".to_string(),
            row: FIRST_DATA_ROW,
            column: ColumnKey::parse(keys::CONTENT_ID).unwrap(),
        };
        let source = outcome.provenance.source_of(&address).unwrap();
        assert_eq!(source.attribute.as_deref(), Some("contentID"));
        assert_eq!(doc.local_name(source.node), "Asset");
    }

    #[test]
    fn test_several_matches_warns() {
        let spec = MappingSpec::from_json(v23()).unwrap();
        let schema = StaticSchema::avails();
        let xml = XML.replace(
            "<avail:AvailType>single</avail:AvailType>",
            "<avail:ServiceProvider><md:DisplayName>Other</md:DisplayName></avail:ServiceProvider>\
             <avail:AvailType>single</avail:AvailType>",
        );
        let doc = reader::parse(&xml, spec.bindings()).unwrap();
        let outcome = Extractor::new(&spec, &schema, ExtractOptions::default()).extract_document(&doc);
        assert_eq!(outcome.sheets[0].cell(0, keys::SERVICE_PROVIDER), Some("Shop"));
        assert!(outcome.log.warnings().any(|w| w.message.contains(keys::SERVICE_PROVIDER)));
    }
}
