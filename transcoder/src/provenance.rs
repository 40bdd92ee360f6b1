//! Provenance links between spreadsheet cells and XML nodes.
//!
//! Ingestion records, for every element or attribute it writes, the cell
//! the value came from. Extraction records the reverse. Downstream
//! validators use these maps to point their messages at the right cell or
//! element.
//!
//! Links are append-only: the first link recorded for a target wins.

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

use crate::models::ColumnKey;
use crate::xml::NodeId;

/// An element, or one attribute of an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XmlRef {
    pub node: NodeId,
    pub attribute: Option<String>,
}

impl XmlRef {
    pub fn element(node: NodeId) -> Self {
        Self { node, attribute: None }
    }

    pub fn attribute(node: NodeId, name: &str) -> Self {
        Self {
            node,
            attribute: Some(name.to_string()),
        }
    }
}

/// A spreadsheet cell together with its raw value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellRef {
    /// 1-based sheet row, header rows included.
    pub row: usize,
    pub column: ColumnKey,
    pub value: String,
}

/// Address of an extracted cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CellAddress {
    pub sheet: String,
    /// 1-based sheet row, header rows included, as in [`CellRef`].
    pub row: usize,
    pub column: ColumnKey,
}

/// Append-only association from targets to their sources.
#[derive(Debug, Clone)]
pub struct Provenance<T, S> {
    links: HashMap<T, S>,
    order: Vec<T>,
}

impl<T, S> Default for Provenance<T, S> {
    fn default() -> Self {
        Self {
            links: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T: Clone + Eq + Hash, S> Provenance<T, S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `target` to `source`. Returns false if `target` was already linked.
    pub fn record(&mut self, target: T, source: S) -> bool {
        if self.links.contains_key(&target) {
            return false;
        }
        self.order.push(target.clone());
        self.links.insert(target, source);
        true
    }

    pub fn source_of(&self, target: &T) -> Option<&S> {
        self.links.get(target)
    }

    /// Links in recording order.
    pub fn iter(&self) -> impl Iterator<Item = (&T, &S)> {
        self.order
            .iter()
            .filter_map(|t| self.links.get(t).map(|s| (t, s)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget every link; used between document builds.
    pub fn reset(&mut self) {
        self.links.clear();
        self.order.clear();
    }
}

/// XML node → originating cell.
pub type IngestProvenance = Provenance<XmlRef, CellRef>;

/// Extracted cell → originating XML node.
pub type ExtractProvenance = Provenance<CellAddress, XmlRef>;

impl IngestProvenance {
    /// Every XML target written from spreadsheet row `row`.
    pub fn targets_from_row(&self, row: usize) -> Vec<&XmlRef> {
        self.iter()
            .filter(|(_, cell)| cell.row == row)
            .map(|(target, _)| target)
            .collect()
    }

    /// Replay every link into an external consumer.
    pub fn forward_to(&self, sink: &mut dyn ProvenanceSink) {
        for (target, cell) in self.iter() {
            sink.record(target, cell.row, &cell.column, &cell.value);
        }
    }
}

/// External consumer of ingestion provenance (e.g. a constraint validator).
pub trait ProvenanceSink {
    fn record(&mut self, target: &XmlRef, row: usize, column: &ColumnKey, value: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlDocument;

    fn cell(row: usize, column: &str, value: &str) -> CellRef {
        CellRef {
            row,
            column: ColumnKey::parse(column).unwrap(),
            value: value.into(),
        }
    }

    #[test]
    fn test_first_link_wins() {
        let mut doc = XmlDocument::new();
        let node = doc.create_element("avail:ALID");
        let mut prov = IngestProvenance::new();

        assert!(prov.record(XmlRef::element(node), cell(3, "Avail:ALID", "A-1")));
        assert!(!prov.record(XmlRef::element(node), cell(4, "Avail:ALID", "A-1")));
        assert_eq!(prov.source_of(&XmlRef::element(node)).unwrap().row, 3);
        assert_eq!(prov.len(), 1);
    }

    #[test]
    fn test_element_and_attribute_are_distinct_targets() {
        let mut doc = XmlDocument::new();
        let asset = doc.create_element("avail:Asset");
        let mut prov = IngestProvenance::new();
        prov.record(XmlRef::element(asset), cell(3, "AvailAsset:WorkType", "Movie"));
        prov.record(XmlRef::attribute(asset, "contentID"), cell(3, "AvailAsset:ContentID", "X"));

        assert_eq!(prov.targets_from_row(3).len(), 2);
        assert!(prov.targets_from_row(4).is_empty());
        prov.reset();
        assert!(prov.is_empty());
    }

    #[test]
    fn test_forward_to_sink() {
        struct Collect(Vec<(usize, String)>);
        impl ProvenanceSink for Collect {
            fn record(&mut self, _: &XmlRef, row: usize, column: &ColumnKey, _: &str) {
                self.0.push((row, column.to_string()));
            }
        }

        let mut doc = XmlDocument::new();
        let node = doc.create_element("avail:ALID");
        let mut prov = IngestProvenance::new();
        prov.record(XmlRef::element(node), cell(5, "Avail:ALID", "A-9"));

        let mut sink = Collect(Vec::new());
        prov.forward_to(&mut sink);
        assert_eq!(sink.0, vec![(5, "Avail:ALID".to_string())]);
    }
}
