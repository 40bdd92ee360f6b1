//! Parse XML text into an [`XmlDocument`] with `roxmltree`.
//!
//! Namespaced names are rewritten to the caller's canonical prefixes so
//! that mapping paths (`avail:Asset`) match whatever prefixes the document
//! author chose. Unknown namespaces keep the document's own prefix.

use roxmltree::{Document, Node};

use super::{NodeId, XmlDocument};
use crate::error::{XmlError, XmlResult};
use crate::mapping::path::NamespaceBindings;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Parse `text`, mapping namespace URIs to the prefixes in `bindings`.
pub fn parse(text: &str, bindings: &NamespaceBindings) -> XmlResult<XmlDocument> {
    let source = Document::parse(text)?;
    let root = source.root_element();

    let mut doc = XmlDocument::new();
    for ns in root.namespaces() {
        if ns.uri() == XML_NAMESPACE {
            continue;
        }
        let Some(prefix) = canonical_prefix(root, ns.uri(), bindings) else {
            continue;
        };
        doc.declare_namespace(prefix, ns.uri());
    }

    let id = convert(&mut doc, root, bindings);
    doc.set_root(id);
    Ok(doc)
}

fn convert(doc: &mut XmlDocument, node: Node<'_, '_>, bindings: &NamespaceBindings) -> NodeId {
    let name = qualify(node, node.tag_name().namespace(), node.tag_name().name(), bindings);
    let id = doc.create_element(name);

    for attr in node.attributes() {
        let name = qualify(node, attr.namespace(), attr.name(), bindings);
        doc.set_attribute(id, &name, attr.value());
    }

    let mut text = String::new();
    for child in node.children() {
        if child.is_element() {
            let child_id = convert(doc, child, bindings);
            doc.append_child(id, child_id);
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or(""));
        }
    }

    let text = text.trim();
    if !text.is_empty() {
        doc.set_text(id, text);
    }
    id
}

fn qualify(
    node: Node<'_, '_>,
    namespace: Option<&str>,
    local: &str,
    bindings: &NamespaceBindings,
) -> String {
    match namespace.and_then(|uri| canonical_prefix(node, uri, bindings)) {
        Some(prefix) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

fn canonical_prefix<'a>(
    node: Node<'a, '_>,
    uri: &str,
    bindings: &'a NamespaceBindings,
) -> Option<&'a str> {
    bindings
        .prefix_for(uri)
        .or_else(|| node.lookup_prefix(uri).filter(|p| !p.is_empty()))
}

/// Namespace URI of the root element, used for version detection.
pub fn root_namespace(text: &str) -> Result<Option<String>, XmlError> {
    let source = Document::parse(text)?;
    Ok(source
        .root_element()
        .tag_name()
        .namespace()
        .map(str::to_string))
}
