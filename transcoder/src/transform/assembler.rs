//! Document assembly: entity registries and the final ordering pass.
//!
//! Rows arrive one at a time, but the XML wants one Avail per ALID and one
//! Asset per (content-id, ALID). The assembler keeps keyed registries of
//! those entities while rows are ingested, then builds the tree once.
//!
//! # Architecture
//!
//! ```text
//! rows (flat, repeated)               Avails XML (nested, unique)
//! ┌───────────────────────────┐      ┌──────────────────────────────┐
//! │ ALID A1, CID X, EST, US   │      │ Avail A1                     │
//! │ ALID A1, CID X, VOD, CA   │  →   │   Asset X                    │
//! │ ALID A2, CID Y, EST, US   │      │   Transaction EST / US       │
//! └───────────────────────────┘      │   Transaction VOD / CA       │
//!                                    │ Avail A2  ...                │
//!                                    └──────────────────────────────┘
//! ```
//!
//! Entities are addressed by index handles. Elements are created detached
//! in the arena and only attached to the tree by [`Assembler::assemble`].

use std::collections::{BTreeSet, HashMap};

use crate::mapping::path::PathExpr;
use crate::mapping::MappingSpec;
use crate::models::keys;
use crate::provenance::XmlRef;
use crate::report::{BuildLog, Location, LogEntry};
use crate::xml::{Checkpoint, NodeId, XmlDocument};

/// Avail children that precede the entity block, in schema order.
const AVAIL_HEADER: &[&str] = &[
    "ALID",
    "Disposition",
    "Licensor",
    "ServiceProvider",
    "AvailType",
    "ShortDescription",
];

const WORK_TYPE_EPISODE: &str = "Episode";
const WORK_TYPE_VOLUME: &str = "Volume";

// =============================================================================
// Handles and Entities
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AvailId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntitlementId(usize);

/// A field that must agree across every row of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedField {
    pub column: &'static str,
    pub value: String,
    pub row: usize,
}

/// A repeated sighting that disagrees with the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inconsistency {
    pub column: &'static str,
    pub first_row: usize,
    pub first_value: String,
    pub row: usize,
    pub value: String,
}

impl Inconsistency {
    pub fn to_log_entry(&self, entity: &str) -> LogEntry {
        LogEntry::error(format!(
            "{} is inconsistent: '{}' here, '{}' at row {} (first value kept)",
            entity, self.value, self.first_value, self.first_row
        ))
        .at(Location::cell(self.row, self.column))
    }
}

/// A new Avail staged from one row.
#[derive(Debug, Clone)]
pub struct AvailDraft {
    pub alid: String,
    pub element: NodeId,
    pub shared: Vec<SharedField>,
}

/// A new Asset staged from one row.
#[derive(Debug, Clone)]
pub struct AssetDraft {
    pub content_id: String,
    pub work_type: String,
    pub element: NodeId,
    pub shared: Vec<SharedField>,
}

#[derive(Debug)]
struct AvailEntity {
    alid: String,
    element: NodeId,
    shared: Vec<SharedField>,
    assets: Vec<AssetId>,
    transactions: Vec<TransactionId>,
    entitlements: Vec<EntitlementId>,
}

#[derive(Debug)]
struct AssetEntity {
    work_type: String,
    element: NodeId,
    shared: Vec<SharedField>,
}

#[derive(Debug)]
struct TransactionEntity {
    element: NodeId,
}

#[derive(Debug)]
struct EntitlementEntity {
    element: NodeId,
    ids: BTreeSet<String>,
}

/// Episodes assigned to a Volume by the first finalization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAssignment {
    pub volume: AssetId,
    pub episodes: Vec<(AssetId, u64)>,
}

// =============================================================================
// Assembler
// =============================================================================

/// Owns the in-progress document and the entity registries.
pub struct Assembler<'a> {
    spec: &'a MappingSpec,
    doc: XmlDocument,
    avails: Vec<AvailEntity>,
    avail_index: HashMap<String, AvailId>,
    assets: Vec<AssetEntity>,
    asset_index: HashMap<(String, String), AssetId>,
    transactions: Vec<TransactionEntity>,
    entitlements: Vec<EntitlementEntity>,
    entitlement_index: HashMap<(AvailId, String), EntitlementId>,
}

impl<'a> Assembler<'a> {
    pub fn new(spec: &'a MappingSpec) -> Self {
        Self {
            spec,
            doc: XmlDocument::new(),
            avails: Vec::new(),
            avail_index: HashMap::new(),
            assets: Vec::new(),
            asset_index: HashMap::new(),
            transactions: Vec::new(),
            entitlements: Vec::new(),
            entitlement_index: HashMap::new(),
        }
    }

    pub fn doc(&self) -> &XmlDocument {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut XmlDocument {
        &mut self.doc
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.doc.checkpoint()
    }

    /// Discard elements staged since `checkpoint`. Registries are only
    /// touched on commit, so they need no undo.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.doc.rollback(checkpoint);
    }

    // =========================================================================
    // Registration
    // =========================================================================

    pub fn find_avail(&self, alid: &str) -> Option<AvailId> {
        self.avail_index.get(alid).copied()
    }

    pub fn find_asset(&self, content_id: &str, alid: &str) -> Option<AssetId> {
        self.asset_index
            .get(&(content_id.to_string(), alid.to_string()))
            .copied()
    }

    /// Register a staged Avail, or reconcile it against the existing one.
    pub fn register_avail(&mut self, draft: AvailDraft) -> (AvailId, Vec<Inconsistency>) {
        if let Some(id) = self.find_avail(&draft.alid) {
            return (id, reconcile(&self.avails[id.0].shared, &draft.shared));
        }
        let id = AvailId(self.avails.len());
        self.avail_index.insert(draft.alid.clone(), id);
        self.avails.push(AvailEntity {
            alid: draft.alid,
            element: draft.element,
            shared: draft.shared,
            assets: Vec::new(),
            transactions: Vec::new(),
            entitlements: Vec::new(),
        });
        (id, Vec::new())
    }

    /// Compare a later sighting of an Avail without registering anything.
    pub fn reconcile_avail(&self, id: AvailId, shared: &[SharedField]) -> Vec<Inconsistency> {
        reconcile(&self.avails[id.0].shared, shared)
    }

    /// Register a staged Asset under `avail`, or reconcile it.
    pub fn register_asset(&mut self, avail: AvailId, draft: AssetDraft) -> (AssetId, Vec<Inconsistency>) {
        let alid = self.avails[avail.0].alid.clone();
        if let Some(id) = self.find_asset(&draft.content_id, &alid) {
            return (id, reconcile(&self.assets[id.0].shared, &draft.shared));
        }
        let id = AssetId(self.assets.len());
        self.asset_index.insert((draft.content_id, alid), id);
        self.assets.push(AssetEntity {
            work_type: draft.work_type,
            element: draft.element,
            shared: draft.shared,
        });
        self.avails[avail.0].assets.push(id);
        (id, Vec::new())
    }

    pub fn reconcile_asset(&self, id: AssetId, shared: &[SharedField]) -> Vec<Inconsistency> {
        reconcile(&self.assets[id.0].shared, shared)
    }

    /// Transactions are never deduplicated.
    pub fn add_transaction(&mut self, avail: AvailId, element: NodeId) -> TransactionId {
        let id = TransactionId(self.transactions.len());
        self.transactions.push(TransactionEntity { element });
        self.avails[avail.0].transactions.push(id);
        id
    }

    /// Add an identifier under (`avail`, `ecosystem`). Returns the new
    /// identifier element, or `None` if the identifier was already there.
    pub fn add_entitlement_id(&mut self, avail: AvailId, ecosystem: &str, id: &str) -> Option<XmlRef> {
        let key = (avail, ecosystem.to_string());
        let entitlement = match self.entitlement_index.get(&key) {
            Some(&existing) => existing,
            None => {
                let element = self.doc.create_element(self.spec.qualified("SharedEntitlement"));
                self.doc.set_attribute(element, "ecosystem", ecosystem);
                let handle = EntitlementId(self.entitlements.len());
                self.entitlements.push(EntitlementEntity {
                    element,
                    ids: BTreeSet::new(),
                });
                self.entitlement_index.insert(key, handle);
                self.avails[avail.0].entitlements.push(handle);
                handle
            }
        };

        let entity = &mut self.entitlements[entitlement.0];
        if !entity.ids.insert(id.to_string()) {
            return None;
        }
        let element = entity.element;
        let child = self
            .doc
            .add_text_child(element, self.spec.qualified("EcosystemID"), id);
        Some(XmlRef::element(child))
    }

    pub fn avail_count(&self) -> usize {
        self.avails.len()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn entitlement_count(&self) -> usize {
        self.entitlements.len()
    }

    // =========================================================================
    // Assembly
    // =========================================================================

    /// Build the final tree: ordering, then volume finalization.
    pub fn assemble(mut self, log: &mut BuildLog) -> XmlDocument {
        let assignments = self.assign_volumes(log);

        let root = self.doc.create_element(self.spec.qualified("AvailList"));
        for (prefix, uri) in self.spec.bindings().iter() {
            self.doc.declare_namespace(prefix, uri);
        }
        self.doc.set_root(root);

        for avail in &self.avails {
            let element = avail.element;
            let mut ordered = self.doc.children(element).to_vec();
            ordered.sort_by_key(|&c| header_rank(self.doc.local_name(c)));
            self.doc.reorder_children(element, ordered);

            let insert_at = self
                .doc
                .children(element)
                .iter()
                .filter(|&&c| header_rank(self.doc.local_name(c)) < AVAIL_HEADER.len())
                .count();

            let entitlements: Vec<NodeId> = avail.entitlements.iter().map(|e| self.entitlements[e.0].element).collect();
            let transactions: Vec<NodeId> = avail.transactions.iter().map(|t| self.transactions[t.0].element).collect();
            let assets: Vec<NodeId> = avail.assets.iter().map(|a| self.assets[a.0].element).collect();
            self.doc.insert_children(element, insert_at, &entitlements);
            self.doc.insert_children(element, insert_at, &transactions);
            self.doc.insert_children(element, insert_at, &assets);

            self.doc.append_child(root, element);
        }

        self.finalize_volumes(&assignments, log);
        self.doc
    }

    /// Pass 1: side table of Episode assets per Volume.
    ///
    /// An Episode belongs to the first Volume whose declared range
    /// `[first, first + count)` holds its number, provided their season
    /// content-IDs agree when both are known.
    pub fn assign_volumes(&self, log: &mut BuildLog) -> Vec<VolumeAssignment> {
        let spec = self.spec;
        let (Some(first_path), Some(count_path), Some(number_path)) = (
            spec.path_for(keys::VOLUME_FIRST_EPISODE, WORK_TYPE_VOLUME),
            spec.path_for(keys::VOLUME_EPISODE_COUNT, WORK_TYPE_VOLUME),
            spec.path_for(keys::EPISODE_NUMBER, WORK_TYPE_EPISODE),
        ) else {
            return Vec::new();
        };

        struct Declared {
            id: AssetId,
            first: u64,
            count: u64,
            season: Option<String>,
        }

        let season_of = |asset: &AssetEntity| {
            spec.path_for(keys::SEASON_CONTENT_ID, &asset.work_type)
                .and_then(|p| self.read(p, asset.element))
        };

        let mut volumes = Vec::new();
        for (i, asset) in self.assets.iter().enumerate() {
            if !asset.work_type.eq_ignore_ascii_case(WORK_TYPE_VOLUME) {
                continue;
            }
            let first = self.read(first_path, asset.element).and_then(|v| v.parse().ok());
            let count = self.read(count_path, asset.element).and_then(|v| v.parse().ok());
            match (first, count) {
                (Some(first), Some(count)) => volumes.push(Declared {
                    id: AssetId(i),
                    first,
                    count,
                    season: season_of(asset),
                }),
                _ => log.log(
                    LogEntry::warning("Volume declares no usable episode range")
                        .at(Location::node(self.doc.path_of(asset.element))),
                ),
            }
        }

        let mut assignments: Vec<VolumeAssignment> = volumes
            .iter()
            .map(|v| VolumeAssignment {
                volume: v.id,
                episodes: Vec::new(),
            })
            .collect();

        for (i, asset) in self.assets.iter().enumerate() {
            if !asset.work_type.eq_ignore_ascii_case(WORK_TYPE_EPISODE) {
                continue;
            }
            let Some(number) = self.read(number_path, asset.element).and_then(|v| v.parse::<u64>().ok()) else {
                continue;
            };
            let season = season_of(asset);
            let slot = volumes.iter().position(|v| {
                let in_range = number >= v.first && number - v.first < v.count;
                let same_season = match (&v.season, &season) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                };
                in_range && same_season
            });
            if let Some(slot) = slot {
                assignments[slot].episodes.push((AssetId(i), number));
            }
        }
        assignments
    }

    /// Pass 2: write the actual first episode and episode count.
    fn finalize_volumes(&mut self, assignments: &[VolumeAssignment], log: &mut BuildLog) {
        let spec = self.spec;
        let (Some(first_path), Some(count_path)) = (
            spec.path_for(keys::VOLUME_FIRST_EPISODE, WORK_TYPE_VOLUME),
            spec.path_for(keys::VOLUME_EPISODE_COUNT, WORK_TYPE_VOLUME),
        ) else {
            return;
        };

        for assignment in assignments {
            let element = self.assets[assignment.volume.0].element;
            let numbers: BTreeSet<u64> = assignment.episodes.iter().map(|(_, n)| *n).collect();
            let Some(first) = numbers.first().copied() else {
                log.log(
                    LogEntry::warning("No episodes fall in this Volume's range; declared values kept")
                        .at(Location::node(self.doc.path_of(element))),
                );
                continue;
            };

            for (path, value) in [(first_path, first.to_string()), (count_path, numbers.len().to_string())] {
                if let Err(e) = path.materialize(&mut self.doc, element, &value) {
                    log.log(
                        LogEntry::error(format!("Cannot write volume field: {}", e))
                            .at(Location::node(self.doc.path_of(element))),
                    );
                }
            }
        }
    }

    fn read(&self, path: &PathExpr, context: NodeId) -> Option<String> {
        path.evaluate(&self.doc, context)
            .into_iter()
            .map(|m| m.value.trim().to_string())
            .find(|v| !v.is_empty())
    }
}

fn header_rank(local: &str) -> usize {
    match local {
        "ExceptionFlag" => AVAIL_HEADER.len() + 1,
        other => AVAIL_HEADER
            .iter()
            .position(|h| *h == other)
            .unwrap_or(AVAIL_HEADER.len()),
    }
}

fn reconcile(first: &[SharedField], later: &[SharedField]) -> Vec<Inconsistency> {
    later
        .iter()
        .filter_map(|field| {
            let original = first.iter().find(|f| f.column == field.column)?;
            (original.value != field.value).then(|| Inconsistency {
                column: field.column,
                first_row: original.row,
                first_value: original.value.clone(),
                row: field.row,
                value: field.value.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> MappingSpec {
        MappingSpec::from_json(include_str!("../../mappings/avails-2.3.json")).unwrap()
    }

    fn shared(column: &'static str, value: &str, row: usize) -> SharedField {
        SharedField { column, value: value.into(), row }
    }

    fn stage_avail(asm: &mut Assembler<'_>, spec: &MappingSpec, alid: &str, provider: &str, row: usize) -> AvailDraft {
        let doc = asm.doc_mut();
        let element = doc.create_element(spec.qualified("Avail"));
        doc.add_text_child(element, spec.qualified("ExceptionFlag"), "false");
        doc.add_text_child(element, spec.qualified("ShortDescription"), "desc");
        doc.add_text_child(element, spec.qualified("ALID"), alid);
        AvailDraft {
            alid: alid.into(),
            element,
            shared: vec![shared(keys::SERVICE_PROVIDER, provider, row)],
        }
    }

    fn stage_asset(asm: &mut Assembler<'_>, spec: &MappingSpec, cid: &str, work_type: &str, fields: &[(&str, &str)]) -> AssetDraft {
        let doc = asm.doc_mut();
        let element = doc.create_element(spec.qualified("Asset"));
        doc.set_attribute(element, "contentID", cid);
        doc.add_text_child(element, spec.qualified("WorkType"), work_type);
        for (key, value) in fields {
            spec.path_for(key, work_type)
                .unwrap()
                .materialize(doc, element, value)
                .unwrap();
        }
        AssetDraft {
            content_id: cid.into(),
            work_type: work_type.into(),
            element,
            shared: Vec::new(),
        }
    }

    #[test]
    fn test_reconciliation_keeps_first_value() {
        let spec = spec();
        let mut asm = Assembler::new(&spec);
        let first = stage_avail(&mut asm, &spec, "A1", "Provider One", 3);
        let (id, issues) = asm.register_avail(first);
        assert!(issues.is_empty());

        let second = stage_avail(&mut asm, &spec, "A1", "Provider Two", 4);
        let (again, issues) = asm.register_avail(second);
        assert_eq!(id, again);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].first_value, "Provider One");
        assert_eq!(issues[0].row, 4);
        assert_eq!(asm.avail_count(), 1);
        assert_eq!(asm.avails[0].shared[0].value, "Provider One");
    }

    #[test]
    fn test_entitlement_ids_are_deduplicated() {
        let spec = spec();
        let mut asm = Assembler::new(&spec);
        let draft = stage_avail(&mut asm, &spec, "A1", "P", 3);
        let (avail, _) = asm.register_avail(draft);

        assert!(asm.add_entitlement_id(avail, "UVVU", "UV-1").is_some());
        assert!(asm.add_entitlement_id(avail, "UVVU", "UV-1").is_none());
        assert!(asm.add_entitlement_id(avail, "UVVU", "UV-2").is_some());
        assert!(asm.add_entitlement_id(avail, "DMA", "D-1").is_some());
        assert_eq!(asm.entitlement_count(), 2);
    }

    #[test]
    fn test_avail_children_order() {
        let spec = spec();
        let mut asm = Assembler::new(&spec);
        let draft = stage_avail(&mut asm, &spec, "A1", "P", 3);
        let (avail, _) = asm.register_avail(draft);
        let asset = stage_asset(&mut asm, &spec, "cid-1", "Movie", &[]);
        asm.register_asset(avail, asset);
        let tx = asm.doc_mut().create_element(spec.qualified("Transaction"));
        asm.add_transaction(avail, tx);
        asm.add_entitlement_id(avail, "UVVU", "UV-1");

        let mut log = BuildLog::new();
        let doc = asm.assemble(&mut log);
        let root = doc.root().unwrap();
        let avail = doc.children(root)[0];
        let names: Vec<&str> = doc.children(avail).iter().map(|&c| doc.local_name(c)).collect();
        assert_eq!(
            names,
            vec!["ALID", "ShortDescription", "Asset", "Transaction", "SharedEntitlement", "ExceptionFlag"]
        );
    }

    fn volume_doc(declared: (&str, &str), episodes: &[&str]) -> (XmlDocument, BuildLog) {
        let spec = spec();
        let mut asm = Assembler::new(&spec);
        let draft = stage_avail(&mut asm, &spec, "A1", "P", 3);
        let (avail, _) = asm.register_avail(draft);

        let volume = stage_asset(
            &mut asm,
            &spec,
            "vol-1",
            "Volume",
            &[(keys::VOLUME_FIRST_EPISODE, declared.0), (keys::VOLUME_EPISODE_COUNT, declared.1)],
        );
        asm.register_asset(avail, volume);
        for (i, number) in episodes.iter().enumerate() {
            let cid = format!("ep-{}", i);
            let episode = stage_asset(&mut asm, &spec, &cid, "Episode", &[(keys::EPISODE_NUMBER, number)]);
            asm.register_asset(avail, episode);
        }

        let mut log = BuildLog::new();
        let doc = asm.assemble(&mut log);
        (doc, log)
    }

    fn volume_values(doc: &XmlDocument) -> (String, String) {
        let spec = spec();
        let root = doc.root().unwrap();
        let avail = doc.children(root)[0];
        let volume = doc
            .children_named(avail, "avail:Asset")
            .find(|&a| doc.attribute(a, "contentID") == Some("vol-1"))
            .unwrap();
        let read = |key| {
            spec.path_for(key, "Volume").unwrap().evaluate(doc, volume)[0].value.clone()
        };
        (read(keys::VOLUME_FIRST_EPISODE), read(keys::VOLUME_EPISODE_COUNT))
    }

    #[test]
    fn test_volume_range_without_markers() {
        let (doc, _) = volume_doc(("3", "2"), &["3", "4", "7"]);
        assert_eq!(volume_values(&doc), ("3".to_string(), "2".to_string()));

        let mut pending = vec![doc.root().unwrap()];
        while let Some(node) = pending.pop() {
            assert!(doc.attributes(node).iter().all(|(k, _)| k == "contentID"));
            pending.extend_from_slice(doc.children(node));
        }
    }

    #[test]
    fn test_volume_uses_actual_episodes() {
        let (doc, _) = volume_doc(("4", "5"), &["5", "4", "4"]);
        assert_eq!(volume_values(&doc), ("4".to_string(), "2".to_string()));
    }

    #[test]
    fn test_empty_volume_keeps_declared_values() {
        let (doc, log) = volume_doc(("10", "2"), &["1"]);
        assert_eq!(volume_values(&doc), ("10".to_string(), "2".to_string()));
        assert_eq!(log.warnings().count(), 1);
    }

    #[test]
    fn test_volume_range_at_numeric_limit() {
        let first = (u64::MAX - 1).to_string();
        let last = u64::MAX.to_string();
        let (doc, log) = volume_doc((first.as_str(), "5"), &[last.as_str()]);
        assert_eq!(volume_values(&doc), (last, "1".to_string()));
        assert_eq!(log.warnings().count(), 0);
    }
}
