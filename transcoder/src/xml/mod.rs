//! Arena-backed XML element tree.
//!
//! Every element lives in one `Vec` owned by [`XmlDocument`] and is
//! addressed by a [`NodeId`] handle. Handles are stable for the lifetime of
//! the document, which lets provenance, entity registries and the volume
//! side table refer to nodes without borrowing the tree.
//!
//! ```text
//! nodes: [ AvailList, Avail, ALID, Asset, WorkType, ... ]
//!            0         1      2     3      4
//! Avail.children = [2, 3, ...]   Asset.parent = Some(1)
//! ```
//!
//! Element names are stored qualified (`avail:Asset`). The reader rewrites
//! document prefixes to the mapping's canonical prefixes, so name
//! comparison is a plain string comparison.

pub mod reader;
pub mod writer;

/// Handle to an element in an [`XmlDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// Marker returned by [`XmlDocument::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// An element tree plus its namespace declarations.
#[derive(Debug, Clone, Default)]
pub struct XmlDocument {
    nodes: Vec<Element>,
    root: Option<NodeId>,
    namespaces: Vec<(String, String)>,
}

impl XmlDocument {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Create a detached element.
    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Element {
            name: name.into(),
            ..Element::default()
        });
        id
    }

    /// Append `child` to `parent`, detaching it from any previous parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Insert `children` at `index` in `parent`'s child list, keeping their order.
    pub fn insert_children(&mut self, parent: NodeId, index: usize, children: &[NodeId]) {
        for &child in children {
            self.detach(child);
            self.nodes[child.0].parent = Some(parent);
        }
        let list = &mut self.nodes[parent.0].children;
        let at = index.min(list.len());
        list.splice(at..at, children.iter().copied());
    }

    /// Create an element and append it to `parent`.
    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let child = self.create_element(name);
        self.append_child(parent, child);
        child
    }

    pub fn add_text_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> NodeId {
        let child = self.add_child(parent, name);
        self.set_text(child, text);
        child
    }

    fn detach(&mut self, child: NodeId) {
        if let Some(old) = self.nodes[child.0].parent.take() {
            self.nodes[old.0].children.retain(|&c| c != child);
        }
    }

    /// Reorder `parent`'s children; ids not currently children are ignored.
    pub fn reorder_children(&mut self, parent: NodeId, order: Vec<NodeId>) {
        let current = &self.nodes[parent.0].children;
        let kept: Vec<NodeId> = order.into_iter().filter(|c| current.contains(c)).collect();
        if kept.len() == current.len() {
            self.nodes[parent.0].children = kept;
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    /// Name without its prefix.
    pub fn local_name(&self, id: NodeId) -> &str {
        local_part(&self.nodes[id.0].name)
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].text.as_deref()
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        self.nodes[id.0].text = Some(text.into());
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes[id.0]
            .attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self, id: NodeId) -> &[(String, String)] {
        &self.nodes[id.0].attributes
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        let value = value.into();
        let attrs = &mut self.nodes[id.0].attributes;
        match attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => attrs.push((name.to_string(), value)),
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn children_named<'a>(
        &'a self,
        id: NodeId,
        name: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(move |&c| self.nodes[c.0].name == name)
    }

    pub fn first_child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children_named(id, name).next()
    }

    /// Text of the first child called `name`.
    pub fn child_text(&self, id: NodeId, name: &str) -> Option<&str> {
        self.first_child_named(id, name).and_then(|c| self.text(c))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub fn declare_namespace(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let prefix = prefix.into();
        let uri = uri.into();
        match self.namespaces.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, u)) => *u = uri,
            None => self.namespaces.push((prefix, uri)),
        }
    }

    pub fn namespaces(&self) -> &[(String, String)] {
        &self.namespaces
    }

    /// URI bound to `prefix` on this document.
    pub fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.namespaces
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, u)| u.as_str())
    }

    /// Number of elements ever created (including detached ones).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Readable location such as `/avail:AvailList/avail:Avail[2]/avail:ALID`.
    ///
    /// Positions are 1-based among same-named siblings and only shown when
    /// there is more than one.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            let name = self.name(node);
            let segment = match self.parent(node) {
                Some(parent) => {
                    let siblings: Vec<NodeId> = self.children_named(parent, name).collect();
                    if siblings.len() > 1 {
                        let pos = siblings.iter().position(|&s| s == node).unwrap_or(0) + 1;
                        format!("{}[{}]", name, pos)
                    } else {
                        name.to_string()
                    }
                }
                None => name.to_string(),
            };
            segments.push(segment);
            current = self.parent(node);
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    /// Mark the current arena size.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.nodes.len())
    }

    /// Drop every element created since `checkpoint`.
    ///
    /// Text and attribute changes on older elements are not undone; callers
    /// stage new content on fresh elements only.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        let mark = checkpoint.0;
        if mark >= self.nodes.len() {
            return;
        }
        self.nodes.truncate(mark);
        for node in &mut self.nodes {
            node.children.retain(|c| c.0 < mark);
        }
        if self.root.is_some_and(|r| r.0 >= mark) {
            self.root = None;
        }
    }
}

/// Local part of a qualified name.
pub fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name)
}
