//! Serialize an [`XmlDocument`] with `quick-xml`.
//!
//! Namespace declarations are written on the root element. Elements with
//! neither text nor children are written as empty tags.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{NodeId, XmlDocument};
use crate::error::{XmlError, XmlResult};

/// Render the document as indented UTF-8 XML with a declaration.
pub fn to_string(doc: &XmlDocument) -> XmlResult<String> {
    let root = doc.root().ok_or(XmlError::NoRoot)?;

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_element(&mut writer, doc, root, true)?;

    let bytes = writer.into_inner();
    Ok(String::from_utf8(bytes)?)
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    doc: &XmlDocument,
    id: NodeId,
    is_root: bool,
) -> XmlResult<()> {
    let name = doc.name(id);
    let mut start = BytesStart::new(name);

    if is_root {
        for (prefix, uri) in doc.namespaces() {
            let key = format!("xmlns:{}", prefix);
            start.push_attribute((key.as_str(), uri.as_str()));
        }
    }
    for (key, value) in doc.attributes(id) {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    let text = doc.text(id).filter(|t| !t.is_empty());
    let children = doc.children(id);

    if text.is_none() && children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    if let Some(text) = text {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    for &child in children {
        write_element(writer, doc, child, false)?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
