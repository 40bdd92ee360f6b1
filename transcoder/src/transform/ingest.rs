//! Row-to-XML ingestion.
//!
//! Rows are pushed one at a time through a small state machine:
//!
//! ```text
//! HEADER_ROW_1 → HEADER_ROW_2 → [COMMENT_ROW] → DATA_ROW* → TERMINATED
//! ```
//!
//! Each data row is staged on fresh arena elements first. If anything in
//! the row is structurally wrong, the arena is rolled back to the row's
//! checkpoint and nothing of it survives. Otherwise the staged fragments
//! are committed to the [`Assembler`] registries.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::assembler::{AssetDraft, AssetId, Assembler, AvailDraft, AvailId, SharedField};
use super::terms::{dedicated_term, resolve_price_type, TermKind};
use crate::convert::{expand_eidr, is_year_leading, to_internal, TypeHint};
use crate::error::{MappingError, MappingResult, RowError};
use crate::mapping::path::PathExpr;
use crate::mapping::{MappingEntry, MappingRule, MappingSpec};
use crate::models::{avail_type_for, keys, ColumnKey, Scope};
use crate::provenance::{CellRef, IngestProvenance, XmlRef};
use crate::report::{BuildLog, Location, LogEntry};
use crate::schema::SchemaIntrospection;
use crate::xml::{NodeId, XmlDocument};

/// Entitlement columns and the ecosystem each feeds.
const ENTITLEMENT_COLUMNS: &[(&str, &str)] = &[(keys::UV_VERSION_ID, "UVVU"), (keys::DMA_ID, "DMA")];

// =============================================================================
// Options and Results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestOptions {
    /// More consecutive blank rows than this ends the sheet.
    pub empty_row_threshold: usize,
    /// Prefix marking the optional comment row under the headers.
    pub comment_marker: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            empty_row_threshold: 5,
            comment_marker: "//".to_string(),
        }
    }
}

/// What the caller should do after pushing a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFlow {
    Continue,
    Terminated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub data_rows: usize,
    pub ingested: usize,
    pub failed: usize,
    pub avails: usize,
    pub assets: usize,
    pub transactions: usize,
    pub entitlements: usize,
}

/// Result of one document build.
#[derive(Debug)]
pub struct IngestOutcome {
    pub document: XmlDocument,
    pub provenance: IngestProvenance,
    pub log: BuildLog,
    pub stats: IngestStats,
}

// =============================================================================
// Row Context
// =============================================================================

/// One data row, addressable by column key.
#[derive(Debug, Clone)]
pub struct RowContext {
    /// 1-based spreadsheet row.
    pub number: usize,
    cells: HashMap<ColumnKey, String>,
}

impl RowContext {
    /// Trimmed cell, `None` when the sheet has no such column.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.cells.get(key).map(|v| v.trim())
    }

    /// Trimmed cell, empty when absent.
    pub fn value(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    fn require(&self, key: &str) -> Result<&str, RowError> {
        match self.value(key) {
            "" => Err(RowError::MissingField {
                row: self.number,
                column: key.to_string(),
            }),
            value => Ok(value),
        }
    }

    fn cell(&self, key: &ColumnKey, value: &str) -> CellRef {
        CellRef {
            row: self.number,
            column: key.clone(),
            value: value.to_string(),
        }
    }

    fn shared(&self, column: &'static str, value: String) -> SharedField {
        SharedField {
            column,
            value,
            row: self.number,
        }
    }
}

// =============================================================================
// Ingester
// =============================================================================

#[derive(Debug)]
enum State {
    Categories,
    Fields { categories: Vec<String> },
    FirstData,
    Data,
    Terminated,
}

enum AvailStage {
    New(AvailDraft),
    Existing(AvailId, Vec<SharedField>),
}

enum AssetStage {
    New(AssetDraft),
    Existing(AssetId, Vec<SharedField>),
}

struct StagedRow {
    avail: AvailStage,
    asset: AssetStage,
    transaction: NodeId,
    entitlements: Vec<(&'static str, String, CellRef)>,
    links: Vec<(XmlRef, CellRef)>,
}

/// Push-based builder of one Avails document.
pub struct Ingester<'a> {
    spec: &'a MappingSpec,
    schema: &'a dyn SchemaIntrospection,
    options: IngestOptions,
    state: State,
    columns: Vec<Option<ColumnKey>>,
    row_number: usize,
    blank_run: usize,
    assembler: Assembler<'a>,
    provenance: IngestProvenance,
    log: BuildLog,
    stats: IngestStats,
}

impl<'a> Ingester<'a> {
    /// Fails when the mapping lacks the linking columns or has malformed
    /// boundary entries.
    pub fn new(
        spec: &'a MappingSpec,
        schema: &'a dyn SchemaIntrospection,
        options: IngestOptions,
    ) -> MappingResult<Self> {
        for key in [keys::ALID, keys::WORK_TYPE, keys::CONTENT_ID] {
            if !spec.contains(key) {
                return Err(MappingError::MissingColumn(key.to_string()));
            }
        }
        for key in [keys::START, keys::END] {
            match spec.entry(key).map(|e| &e.rule) {
                None => {}
                Some(MappingRule::Alternatives(paths)) if paths.len() == 2 => {}
                Some(_) => return Err(MappingError::InvalidBoundary(key.to_string())),
            }
        }

        Ok(Self {
            spec,
            schema,
            options,
            state: State::Categories,
            columns: Vec::new(),
            row_number: 0,
            blank_run: 0,
            assembler: Assembler::new(spec),
            provenance: IngestProvenance::new(),
            log: BuildLog::new(),
            stats: IngestStats::default(),
        })
    }

    /// Feed the next physical row of the sheet.
    pub fn push_row<S: AsRef<str>>(&mut self, cells: &[S]) -> RowFlow {
        if matches!(self.state, State::Terminated) {
            return RowFlow::Terminated;
        }
        self.row_number += 1;
        let cells: Vec<&str> = cells.iter().map(|c| c.as_ref()).collect();

        match std::mem::replace(&mut self.state, State::Data) {
            State::Categories => {
                self.state = State::Fields {
                    categories: cells.iter().map(|c| c.trim().to_string()).collect(),
                };
            }
            State::Fields { categories } => {
                self.index_columns(&categories, &cells);
                self.state = State::FirstData;
            }
            State::FirstData => {
                let is_comment = cells
                    .get(1)
                    .is_some_and(|c| c.trim_start().starts_with(&self.options.comment_marker));
                if is_comment {
                    tracing::debug!(row = self.row_number, "skipping comment row");
                } else {
                    return self.data_row(&cells);
                }
            }
            State::Data => return self.data_row(&cells),
            State::Terminated => self.state = State::Terminated,
        }
        RowFlow::Continue
    }

    /// Column identity from the two header rows. A blank category inherits
    /// the previous column's (merged header cells).
    fn index_columns(&mut self, categories: &[String], fields: &[&str]) {
        let mut category = String::new();
        self.columns = fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                if let Some(c) = categories.get(i).filter(|c| !c.is_empty()) {
                    category = c.clone();
                }
                let field = field.trim();
                if field.is_empty() {
                    return None;
                }
                match ColumnKey::from_header(&category, field) {
                    Ok(key) if self.spec.contains(key.as_str()) => Some(key),
                    Ok(key) => {
                        self.log.log(
                            LogEntry::warning(format!("Column '{}' is not in mapping {}; ignored", key, self.spec.version()))
                                .at(Location::cell(2, key.as_str())),
                        );
                        None
                    }
                    Err(e) => {
                        self.log.log(LogEntry::warning(format!("Unrecognized header: {}", e)).at(Location::row(2)));
                        None
                    }
                }
            })
            .collect();

        let mut seen = HashSet::new();
        for slot in self.columns.iter_mut() {
            let Some(key) = slot.clone() else { continue };
            if !seen.insert(key.clone()) {
                self.log.log(
                    LogEntry::warning(format!("Duplicate column '{}'; first occurrence used", key))
                        .at(Location::row(2)),
                );
                *slot = None;
            }
        }
        tracing::debug!(columns = seen.len(), "indexed header columns");
    }

    fn data_row(&mut self, cells: &[&str]) -> RowFlow {
        self.state = State::Data;
        if cells.iter().all(|c| c.trim().is_empty()) {
            self.blank_run += 1;
            if self.blank_run > self.options.empty_row_threshold {
                self.log.log(
                    LogEntry::info(format!(
                        "Stopped reading after {} consecutive blank rows",
                        self.blank_run
                    ))
                    .at(Location::row(self.row_number)),
                );
                self.state = State::Terminated;
                return RowFlow::Terminated;
            }
            return RowFlow::Continue;
        }
        self.blank_run = 0;

        let row = RowContext {
            number: self.row_number,
            cells: self
                .columns
                .iter()
                .zip(cells.iter())
                .filter_map(|(key, cell)| key.clone().map(|k| (k, cell.to_string())))
                .collect(),
        };
        self.ingest_row(&row);
        RowFlow::Continue
    }

    /// Stage, then commit or roll back one data row.
    fn ingest_row(&mut self, row: &RowContext) {
        self.stats.data_rows += 1;
        let checkpoint = self.assembler.checkpoint();
        match self.stage_row(row) {
            Ok(staged) => {
                self.commit(staged);
                self.stats.ingested += 1;
            }
            Err(e) => {
                self.assembler.rollback(checkpoint);
                self.stats.failed += 1;
                let location = match &e {
                    RowError::MissingField { row, column } | RowError::Path { row, column, .. } => {
                        Location::cell(*row, column.as_str())
                    }
                    RowError::UnknownPriceType { row, .. } => Location::cell(*row, keys::PRICE_TYPE),
                };
                self.log.log(LogEntry::error(e.to_string()).at(location));
            }
        }
    }

    fn stage_row(&mut self, row: &RowContext) -> Result<StagedRow, RowError> {
        let alid = row.require(keys::ALID)?;
        let work_type = row.require(keys::WORK_TYPE)?;
        let content_id = expand_eidr(row.require(keys::CONTENT_ID)?);
        let spec = self.spec;

        let mut stager = RowStager {
            spec,
            schema: self.schema,
            row,
            work_type,
            log: &mut self.log,
            links: Vec::new(),
        };
        let avail_shared = vec![
            row.shared(keys::WORK_TYPE, avail_type_for(work_type)),
            row.shared(keys::DISPLAY_NAME, row.value(keys::DISPLAY_NAME).to_string()),
            row.shared(keys::SERVICE_PROVIDER, row.value(keys::SERVICE_PROVIDER).to_string()),
            row.shared(keys::EXCEPTION_FLAG, row.value(keys::EXCEPTION_FLAG).to_string()),
        ];
        let existing_avail = self.assembler.find_avail(alid);
        let avail = match existing_avail {
            Some(id) => AvailStage::Existing(id, avail_shared),
            None => {
                let doc = self.assembler.doc_mut();
                let element = doc.create_element(spec.qualified("Avail"));
                doc.add_text_child(element, spec.qualified("AvailType"), avail_type_for(work_type));
                stager.stage_scope(doc, element, Scope::Avail)?;
                AvailStage::New(AvailDraft {
                    alid: alid.to_string(),
                    element,
                    shared: avail_shared,
                })
            }
        };

        let asset_shared = vec![
            row.shared(keys::WORK_TYPE, avail_type_for(work_type)),
            row.shared(keys::EDIT_ID, row.value(keys::EDIT_ID).to_string()),
            row.shared(keys::TITLE_ID, row.value(keys::TITLE_ID).to_string()),
            row.shared(keys::ALT_ID, row.value(keys::ALT_ID).to_string()),
        ];
        let existing_asset = existing_avail.and_then(|_| self.assembler.find_asset(&content_id, alid));

        let asset = match existing_asset {
            Some(id) => AssetStage::Existing(id, asset_shared),
            None => {
                let doc = self.assembler.doc_mut();
                let element = doc.create_element(spec.qualified("Asset"));
                doc.set_attribute(element, "contentID", content_id.as_str());
                if let Some(entry) = spec.entry(keys::CONTENT_ID) {
                    stager.link(XmlRef::attribute(element, "contentID"), &entry.key, row.value(keys::CONTENT_ID));
                }
                stager.stage_scope(doc, element, Scope::Asset)?;
                AssetStage::New(AssetDraft {
                    content_id,
                    work_type: work_type.to_string(),
                    element,
                    shared: asset_shared,
                })
            }
        };

        let doc = self.assembler.doc_mut();
        let transaction = doc.create_element(spec.qualified("Transaction"));
        stager.stage_scope(doc, transaction, Scope::Transaction)?;

        let mut entitlements = Vec::new();
        for (key, ecosystem) in ENTITLEMENT_COLUMNS {
            let Some(entry) = spec.entry(key) else { continue };
            let raw = row.value(key);
            for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
                entitlements.push((*ecosystem, id.to_string(), row.cell(&entry.key, raw)));
            }
        }

        Ok(StagedRow {
            avail,
            asset,
            transaction,
            entitlements,
            links: stager.links,
        })
    }

    fn commit(&mut self, staged: StagedRow) {
        let avail = match staged.avail {
            AvailStage::New(draft) => self.assembler.register_avail(draft).0,
            AvailStage::Existing(id, shared) => {
                for issue in self.assembler.reconcile_avail(id, &shared) {
                    self.log.log(issue.to_log_entry("Avail"));
                }
                id
            }
        };

        let issues = match staged.asset {
            AssetStage::New(draft) => self.assembler.register_asset(avail, draft).1,
            AssetStage::Existing(id, shared) => self.assembler.reconcile_asset(id, &shared),
        };
        for issue in issues {
            self.log.log(issue.to_log_entry("Asset"));
        }

        self.assembler.add_transaction(avail, staged.transaction);

        for (ecosystem, id, cell) in staged.entitlements {
            if let Some(target) = self.assembler.add_entitlement_id(avail, ecosystem, &id) {
                self.provenance.record(target, cell);
            }
        }
        for (target, cell) in staged.links {
            self.provenance.record(target, cell);
        }
    }

    /// Assemble the document and hand back everything collected.
    pub fn finish(mut self) -> IngestOutcome {
        if matches!(self.state, State::Categories | State::Fields { .. }) {
            self.log.log(LogEntry::error("Sheet ended before both header rows were read"));
        }

        self.stats.avails = self.assembler.avail_count();
        self.stats.assets = self.assembler.asset_count();
        self.stats.transactions = self.assembler.transaction_count();
        self.stats.entitlements = self.assembler.entitlement_count();

        let document = self.assembler.assemble(&mut self.log);
        self.log.log(LogEntry::success(format!(
            "Ingested {} of {} rows into {} avails",
            self.stats.ingested, self.stats.data_rows, self.stats.avails
        )));

        IngestOutcome {
            document,
            provenance: self.provenance,
            log: self.log,
            stats: self.stats,
        }
    }
}

/// Ingest a whole sheet of rows.
pub fn ingest_rows<I, R, S>(
    spec: &MappingSpec,
    schema: &dyn SchemaIntrospection,
    options: IngestOptions,
    rows: I,
) -> MappingResult<IngestOutcome>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    let mut ingester = Ingester::new(spec, schema, options)?;
    for row in rows {
        if ingester.push_row(row.as_ref()) == RowFlow::Terminated {
            break;
        }
    }
    Ok(ingester.finish())
}

// =============================================================================
// Row Staging
// =============================================================================

/// Writes one row's cells onto freshly created elements.
struct RowStager<'r> {
    spec: &'r MappingSpec,
    schema: &'r dyn SchemaIntrospection,
    row: &'r RowContext,
    work_type: &'r str,
    log: &'r mut BuildLog,
    links: Vec<(XmlRef, CellRef)>,
}

impl<'r> RowStager<'r> {
    /// Materialize every entry of `scope`, in mapping order.
    fn stage_scope(&mut self, doc: &mut XmlDocument, element: NodeId, scope: Scope) -> Result<(), RowError> {
        let spec = self.spec;
        for entry in spec.entries().iter().filter(|e| e.scope() == scope) {
            match entry.key.as_str() {
                keys::UV_VERSION_ID | keys::DMA_ID => {}
                keys::START | keys::END => self.stage_boundary(doc, element, entry)?,
                keys::PRICE_TYPE => self.stage_legacy_term(doc, element)?,
                _ => {
                    if matches!(entry.rule, MappingRule::Transform(_)) {
                        continue;
                    }
                    let Some(raw) = self.row.get(entry.key.as_str()) else {
                        continue;
                    };
                    match entry.rule.path_for(self.work_type) {
                        Some(path) => self.stage_value(doc, element, entry, path, raw)?,
                        None if !raw.is_empty() => tracing::debug!(
                            row = self.row.number,
                            column = %entry.key,
                            work_type = self.work_type,
                            "column has no path for this work type"
                        ),
                        None => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn stage_value(
        &mut self,
        doc: &mut XmlDocument,
        element: NodeId,
        entry: &MappingEntry,
        path: &PathExpr,
        raw: &str,
    ) -> Result<(), RowError> {
        let leaf = path.leaf_local_name().unwrap_or("");
        if raw.is_empty() {
            if self.schema.is_element_required(leaf) {
                self.log.log(
                    LogEntry::error(format!("Required element {} has no value", leaf))
                        .at(Location::cell(self.row.number, entry.key.as_str())),
                );
            }
            return Ok(());
        }

        let hint = TypeHint::new(self.schema.type_of(leaf), leaf);
        let Some(value) = to_internal(raw, &hint) else {
            self.log.log(
                LogEntry::error(format!("Cannot convert '{}' to {:?}; value omitted", raw, hint.tag))
                    .at(Location::cell(self.row.number, entry.key.as_str())),
            );
            return Ok(());
        };

        let targets = self.materialize(doc, element, entry, path, &value)?;
        let takes_currency = dedicated_term(entry.key.as_str()).is_some_and(|t| t.takes_currency);
        let currency = self.row.value(keys::PRICE_CURRENCY);
        if takes_currency && !currency.is_empty() {
            for target in &targets {
                doc.set_attribute(target.node, "currency", currency);
                self.link_key(XmlRef::attribute(target.node, "currency"), keys::PRICE_CURRENCY, currency);
            }
        }
        for target in targets {
            self.link(target, &entry.key, raw);
        }
        Ok(())
    }

    /// A year-leading value is a date (first path); anything else is a
    /// condition keyword (second path).
    fn stage_boundary(&mut self, doc: &mut XmlDocument, element: NodeId, entry: &MappingEntry) -> Result<(), RowError> {
        let raw = self.row.value(entry.key.as_str());
        if raw.is_empty() {
            return Ok(());
        }
        let MappingRule::Alternatives(paths) = &entry.rule else {
            return Ok(());
        };
        let (Some(date_path), Some(condition_path)) = (paths.first(), paths.get(1)) else {
            return Ok(());
        };

        if is_year_leading(raw) {
            self.stage_value(doc, element, entry, date_path, raw)
        } else {
            let targets = self.materialize(doc, element, entry, condition_path, raw)?;
            for target in targets {
                self.link(target, &entry.key, raw);
            }
            Ok(())
        }
    }

    /// `PriceType` / `PriceValue` / `PriceCurrency` as one Term.
    fn stage_legacy_term(&mut self, doc: &mut XmlDocument, transaction: NodeId) -> Result<(), RowError> {
        let price_type = self.row.value(keys::PRICE_TYPE);
        if price_type.is_empty() {
            return Ok(());
        }
        let term = resolve_price_type(price_type, self.work_type).ok_or_else(|| RowError::UnknownPriceType {
            row: self.row.number,
            value: price_type.to_string(),
        })?;

        if term.is_srp() && self.spec.contains(keys::SRP) {
            self.log.log(
                LogEntry::error(format!("PriceType SRP is deprecated; use the {} column", keys::SRP))
                    .at(Location::cell(self.row.number, keys::PRICE_TYPE)),
            );
            return Ok(());
        }

        let spec = self.spec;
        let value = self.row.value(keys::PRICE_VALUE);
        let element = doc.add_child(transaction, spec.qualified("Term"));
        doc.set_attribute(element, "termName", term.name.as_str());
        let child = doc.add_text_child(element, spec.qualified(term.kind.element()), value);
        self.link_key(XmlRef::attribute(element, "termName"), keys::PRICE_TYPE, price_type);
        self.link_key(XmlRef::element(child), keys::PRICE_VALUE, value);

        let currency = self.row.value(keys::PRICE_CURRENCY);
        if term.kind == TermKind::Money && !currency.is_empty() {
            doc.set_attribute(child, "currency", currency);
            self.link_key(XmlRef::attribute(child, "currency"), keys::PRICE_CURRENCY, currency);
        }
        Ok(())
    }

    fn materialize(
        &mut self,
        doc: &mut XmlDocument,
        element: NodeId,
        entry: &MappingEntry,
        path: &PathExpr,
        value: &str,
    ) -> Result<Vec<XmlRef>, RowError> {
        path.materialize(doc, element, value).map_err(|source| RowError::Path {
            row: self.row.number,
            column: entry.key.to_string(),
            source,
        })
    }

    fn link(&mut self, target: XmlRef, key: &ColumnKey, value: &str) {
        self.links.push((target, self.row.cell(key, value)));
    }

    fn link_key(&mut self, target: XmlRef, key: &str, value: &str) {
        if let Ok(key) = ColumnKey::parse(key) {
            self.link(target, &key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchema;

    const CATEGORIES: &[&str] = &[
        "Avail", "", "", "AvailAsset", "", "AvailMetadata", "AvailTrans", "", "", "", "", "", "", "",
    ];
    const FIELDS: &[&str] = &[
        "ALID",
        "DisplayName",
        "ServiceProvider",
        "WorkType",
        "ContentID",
        "EpisodeNumber",
        "LicenseType",
        "Territory",
        "Start",
        "End",
        "PriceType",
        "PriceValue",
        "PriceCurrency",
        "SRP",
    ];
    const BASE: &[&str] = &[
        "A1",
        "Studio",
        "Provider One",
        "Movie",
        "md:cid:org:studio:1",
        "",
        "EST",
        "US",
        "2020-01-01",
        "",
        "",
        "",
        "",
        "",
    ];

    const ALID: usize = 0;
    const PROVIDER: usize = 2;
    const WORK_TYPE: usize = 3;
    const CONTENT_ID: usize = 4;
    const EPISODE: usize = 5;
    const LICENSE: usize = 6;
    const TERRITORY: usize = 7;
    const START: usize = 8;
    const END: usize = 9;
    const PRICE_TYPE: usize = 10;
    const PRICE_VALUE: usize = 11;
    const CURRENCY: usize = 12;
    const SRP: usize = 13;

    fn spec() -> MappingSpec {
        MappingSpec::from_json(include_str!("../../mappings/avails-2.3.json")).unwrap()
    }

    fn data(overrides: &[(usize, &str)]) -> Vec<String> {
        let mut row: Vec<String> = BASE.iter().map(|s| s.to_string()).collect();
        for (i, v) in overrides {
            row[*i] = v.to_string();
        }
        row
    }

    fn sheet(rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
        let mut all = vec![
            CATEGORIES.iter().map(|s| s.to_string()).collect(),
            FIELDS.iter().map(|s| s.to_string()).collect(),
        ];
        all.extend(rows);
        all
    }

    fn run(rows: Vec<Vec<String>>) -> IngestOutcome {
        crate::logging::init_test();
        let spec = spec();
        let schema = StaticSchema::avails();
        ingest_rows(&spec, &schema, IngestOptions::default(), sheet(rows)).unwrap()
    }

    fn avails(doc: &XmlDocument) -> Vec<NodeId> {
        doc.children_named(doc.root().unwrap(), "avail:Avail").collect()
    }

    fn named(doc: &XmlDocument, parent: NodeId, name: &str) -> Vec<NodeId> {
        doc.children_named(parent, name).collect()
    }

    #[test]
    fn test_same_row_twice_is_idempotent() {
        let outcome = run(vec![data(&[]), data(&[])]);
        let doc = &outcome.document;

        let avails = avails(doc);
        assert_eq!(avails.len(), 1);
        assert_eq!(named(doc, avails[0], "avail:Asset").len(), 1);
        assert_eq!(named(doc, avails[0], "avail:Transaction").len(), 2);
        assert_eq!(outcome.stats.ingested, 2);
        assert!(!outcome.log.has_errors());
    }

    #[test]
    fn test_service_provider_mismatch_keeps_first() {
        let outcome = run(vec![data(&[]), data(&[(PROVIDER, "Provider Two")])]);
        let doc = &outcome.document;
        let avail = avails(doc)[0];
        let provider = doc.first_child_named(avail, "avail:ServiceProvider").unwrap();
        assert_eq!(doc.child_text(provider, "md:DisplayName"), Some("Provider One"));

        let errors: Vec<_> = outcome.log.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].location, Some(Location::cell(4, keys::SERVICE_PROVIDER)));
        assert!(errors[0].message.contains("row 3"));
        assert_eq!(named(doc, avail, "avail:Transaction").len(), 2);
    }

    #[test]
    fn test_avail_header_and_type() {
        let outcome = run(vec![data(&[])]);
        let doc = &outcome.document;
        let avail = avails(doc)[0];
        let names: Vec<&str> = doc.children(avail).iter().map(|&c| doc.local_name(c)).collect();
        assert_eq!(names, vec!["ALID", "Licensor", "ServiceProvider", "AvailType", "Asset", "Transaction"]);
        assert_eq!(doc.child_text(avail, "avail:AvailType"), Some("single"));

        let asset = doc.first_child_named(avail, "avail:Asset").unwrap();
        assert_eq!(doc.attribute(asset, "contentID"), Some("md:cid:org:studio:1"));
        assert_eq!(doc.child_text(asset, "avail:WorkType"), Some("Movie"));
    }

    #[test]
    fn test_tpr_wsp_on_episode_is_money() {
        let outcome = run(vec![data(&[
            (WORK_TYPE, "Episode"),
            (EPISODE, "3"),
            (PRICE_TYPE, "TPR-WSP"),
            (PRICE_VALUE, "1.99"),
            (CURRENCY, "USD"),
        ])]);
        let doc = &outcome.document;
        let tx = named(doc, avails(doc)[0], "avail:Transaction")[0];
        let term = doc.first_child_named(tx, "avail:Term").unwrap();
        assert_eq!(doc.attribute(term, "termName"), Some("EpisodeWSP"));
        let money = doc.first_child_named(term, "avail:Money").unwrap();
        assert_eq!(doc.text(money), Some("1.99"));
        assert_eq!(doc.attribute(money, "currency"), Some("USD"));
    }

    #[test]
    fn test_tier_is_text() {
        let outcome = run(vec![data(&[(PRICE_TYPE, "Tier"), (PRICE_VALUE, "Gold"), (CURRENCY, "USD")])]);
        let doc = &outcome.document;
        let tx = named(doc, avails(doc)[0], "avail:Transaction")[0];
        let term = doc.first_child_named(tx, "avail:Term").unwrap();
        assert_eq!(doc.attribute(term, "termName"), Some("Tier"));
        let text = doc.first_child_named(term, "avail:Text").unwrap();
        assert_eq!(doc.text(text), Some("Gold"));
        assert_eq!(doc.attribute(text, "currency"), None);
    }

    #[test]
    fn test_unknown_price_type_rolls_back_row() {
        let outcome = run(vec![data(&[(PRICE_TYPE, "Bogus")]), data(&[(ALID, "A2")])]);
        let doc = &outcome.document;
        let avails = avails(doc);
        assert_eq!(avails.len(), 1);
        assert_eq!(doc.child_text(avails[0], "avail:ALID"), Some("A2"));
        assert_eq!(outcome.stats.failed, 1);
        assert!(outcome.provenance.targets_from_row(3).is_empty());
    }

    #[test]
    fn test_legacy_srp_rejected_dedicated_srp_used() {
        let outcome = run(vec![data(&[
            (PRICE_TYPE, "SRP"),
            (PRICE_VALUE, "9.99"),
            (CURRENCY, "USD"),
            (SRP, "19.99"),
        ])]);
        let doc = &outcome.document;
        let tx = named(doc, avails(doc)[0], "avail:Transaction")[0];
        let terms = named(doc, tx, "avail:Term");
        assert_eq!(terms.len(), 1);
        let money = doc.first_child_named(terms[0], "avail:Money").unwrap();
        assert_eq!(doc.text(money), Some("19.99"));
        assert_eq!(doc.attribute(money, "currency"), Some("USD"));
        assert_eq!(outcome.log.errors().count(), 1);
        assert_eq!(outcome.stats.ingested, 1);
    }

    #[test]
    fn test_start_boundary_date_condition_or_nothing() {
        let outcome = run(vec![
            data(&[(END, "2020-12-31")]),
            data(&[(START, "Immediate")]),
            data(&[(START, "")]),
        ]);
        let doc = &outcome.document;
        let txs = named(doc, avails(doc)[0], "avail:Transaction");

        assert_eq!(doc.child_text(txs[0], "avail:Start"), Some("2020-01-01T00:00:00"));
        assert_eq!(doc.child_text(txs[0], "avail:End"), Some("2020-12-31T23:59:59"));
        assert_eq!(doc.child_text(txs[1], "avail:StartCondition"), Some("Immediate"));
        assert!(doc.first_child_named(txs[1], "avail:Start").is_none());
        assert!(doc.first_child_named(txs[2], "avail:Start").is_none());
        assert!(doc.first_child_named(txs[2], "avail:StartCondition").is_none());
    }

    #[test]
    fn test_territories_split_on_commas() {
        let outcome = run(vec![data(&[(TERRITORY, "US, CA")])]);
        let doc = &outcome.document;
        let tx = named(doc, avails(doc)[0], "avail:Transaction")[0];
        let countries: Vec<&str> = named(doc, tx, "avail:Territory")
            .into_iter()
            .filter_map(|t| doc.child_text(t, "md:country"))
            .collect();
        assert_eq!(countries, vec!["US", "CA"]);
    }

    #[test]
    fn test_blank_run_terminates() {
        let mut rows: Vec<Vec<String>> = vec![vec![String::new(); FIELDS.len()]; 6];
        rows.push(data(&[]));
        let outcome = run(rows);
        assert!(avails(&outcome.document).is_empty());

        let mut rows: Vec<Vec<String>> = vec![vec![String::new(); FIELDS.len()]; 5];
        rows.push(data(&[]));
        let outcome = run(rows);
        assert_eq!(avails(&outcome.document).len(), 1);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let spec = spec();
        let schema = StaticSchema::avails();
        let options = IngestOptions {
            empty_row_threshold: 1,
            ..IngestOptions::default()
        };
        let mut rows = sheet(vec![vec![String::new(); 2]; 2]);
        rows.push(data(&[]));
        let outcome = ingest_rows(&spec, &schema, options, rows).unwrap();
        assert!(avails(&outcome.document).is_empty());
    }

    #[test]
    fn test_missing_alid_fails_row_only() {
        let outcome = run(vec![data(&[(ALID, "")]), data(&[(CONTENT_ID, "")]), data(&[])]);
        assert_eq!(outcome.stats.failed, 2);
        assert_eq!(outcome.stats.ingested, 1);
        let errors: Vec<_> = outcome.log.errors().collect();
        assert_eq!(errors[0].location, Some(Location::cell(3, keys::ALID)));
        assert_eq!(errors[1].location, Some(Location::cell(4, keys::CONTENT_ID)));
    }

    #[test]
    fn test_required_empty_cell_logged() {
        let outcome = run(vec![data(&[(LICENSE, "")])]);
        assert_eq!(outcome.stats.ingested, 1);
        let error = outcome.log.errors().next().unwrap();
        assert_eq!(error.location, Some(Location::cell(3, "AvailTrans:LicenseType")));
    }

    #[test]
    fn test_comment_row_skipped() {
        let mut comment = vec![String::new(); FIELDS.len()];
        comment[1] = "// licensor display name".to_string();
        let outcome = run(vec![comment, data(&[])]);
        assert_eq!(outcome.stats.data_rows, 1);
        assert_eq!(avails(&outcome.document).len(), 1);
    }

    #[test]
    fn test_compact_eidr_expanded() {
        let outcome = run(vec![data(&[(CONTENT_ID, "10.5240/F00D-0001")])]);
        let doc = &outcome.document;
        let asset = named(doc, avails(doc)[0], "avail:Asset")[0];
        assert_eq!(doc.attribute(asset, "contentID"), Some("md:cid:eidr-s:F00D-0001"));
    }

    #[test]
    fn test_provenance_points_at_cells() {
        let outcome = run(vec![data(&[])]);
        let doc = &outcome.document;
        let avail = avails(doc)[0];
        let alid = doc.first_child_named(avail, "avail:ALID").unwrap();
        let cell = outcome.provenance.source_of(&XmlRef::element(alid)).unwrap();
        assert_eq!(cell.row, 3);
        assert_eq!(cell.column.as_str(), keys::ALID);
        assert_eq!(cell.value, "A1");
    }

    #[test]
    fn test_entitlement_ids_deduplicated() {
        let spec = spec();
        let schema = StaticSchema::avails();
        let rows = vec![
            vec!["Avail", "", "AvailAsset", ""],
            vec!["ALID", "UVVersionID", "WorkType", "ContentID"],
            vec!["A1", "UV-1, UV-2", "Movie", "cid-1"],
            vec!["A1", "UV-2", "Movie", "cid-1"],
        ];
        let outcome = ingest_rows(&spec, &schema, IngestOptions::default(), rows).unwrap();
        let doc = &outcome.document;
        let avail = avails(doc)[0];
        let shared = named(doc, avail, "avail:SharedEntitlement");
        assert_eq!(shared.len(), 1);
        assert_eq!(doc.attribute(shared[0], "ecosystem"), Some("UVVU"));
        assert_eq!(named(doc, shared[0], "avail:EcosystemID").len(), 2);
    }

    #[test]
    fn test_repeated_asset_keeps_first_identifiers() {
        crate::logging::init_test();
        let spec = spec();
        let schema = StaticSchema::avails();
        let rows = vec![
            vec!["Avail", "AvailAsset", "", "AvailMetadata", "", "AvailTrans"],
            vec!["ALID", "WorkType", "ContentID", "EditID", "TitleID", "LicenseType"],
            vec!["A1", "Movie", "cid-1", "E1", "T1", "EST"],
            vec!["A1", "Movie", "cid-1", "E2", "T2", "VOD"],
            vec!["A1", "Episode", "cid-1", "E1", "T1", "SVOD"],
        ];
        let outcome = ingest_rows(&spec, &schema, IngestOptions::default(), rows).unwrap();
        let doc = &outcome.document;
        let avail = avails(doc)[0];
        let assets = named(doc, avail, "avail:Asset");
        assert_eq!(assets.len(), 1);
        assert_eq!(named(doc, avail, "avail:Transaction").len(), 3);
        assert_eq!(doc.child_text(assets[0], "avail:WorkType"), Some("Movie"));
        let read = |key| spec.path_for(key, "Movie").unwrap().evaluate(doc, assets[0])[0].value.clone();
        assert_eq!(read(keys::EDIT_ID), "E1");
        assert_eq!(read(keys::TITLE_ID), "T1");

        let asset_errors: Vec<_> = outcome
            .log
            .errors()
            .filter(|e| e.message.starts_with("Asset"))
            .map(|e| e.location.clone())
            .collect();
        assert_eq!(
            asset_errors,
            vec![
                Some(Location::cell(4, keys::EDIT_ID)),
                Some(Location::cell(4, keys::TITLE_ID)),
                Some(Location::cell(5, keys::WORK_TYPE)),
            ]
        );
        assert_eq!(outcome.stats.ingested, 3);
    }

    #[test]
    fn test_volume_counts_episodes_of_its_season() {
        crate::logging::init_test();
        let spec = spec();
        let schema = StaticSchema::avails();
        let rows = vec![
            vec!["Avail", "AvailAsset", "", "AvailMetadata", "", "", ""],
            vec![
                "ALID",
                "WorkType",
                "ContentID",
                "EpisodeNumber",
                "SeasonContentID",
                "VolumeFirstEpisodeNumber",
                "VolumeNumberOfEpisodes",
            ],
            vec!["A1", "Volume", "vol-1", "", "S1", "1", "10"],
            vec!["A1", "Episode", "ep-2", "2", "S1", "", ""],
            vec!["A1", "Episode", "ep-3", "3", "S1", "", ""],
            vec!["A1", "Episode", "ep-4", "4", "S2", "", ""],
            vec!["A1", "Episode", "ep-3b", "3", "S1", "", ""],
        ];
        let outcome = ingest_rows(&spec, &schema, IngestOptions::default(), rows).unwrap();
        let doc = &outcome.document;
        let avail = avails(doc)[0];
        let volume = named(doc, avail, "avail:Asset")
            .into_iter()
            .find(|&a| doc.attribute(a, "contentID") == Some("vol-1"))
            .unwrap();
        let read = |key| spec.path_for(key, "Volume").unwrap().evaluate(doc, volume)[0].value.clone();
        assert_eq!(read(keys::VOLUME_FIRST_EPISODE), "2");
        assert_eq!(read(keys::VOLUME_EPISODE_COUNT), "2");
        assert_eq!(outcome.log.warnings().count(), 0);
    }

    #[test]
    fn test_mapping_without_linking_columns_rejected() {
        let spec = MappingSpec::from_json(
            r#"{
                "version": "x",
                "namespaces": { "avail": "urn:a", "md": "urn:md" },
                "columns": { "Avail:ALID": "{avail}ALID", "AvailAsset:WorkType": "{avail}WorkType" }
            }"#,
        )
        .unwrap();
        let schema = StaticSchema::avails();
        assert!(matches!(
            Ingester::new(&spec, &schema, IngestOptions::default()),
            Err(MappingError::MissingColumn(_))
        ));
    }
}
