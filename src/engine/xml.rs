//! Minimal XML reading on top of `quick-xml`: an owned element tree and a
//! well-formedness check.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(#[from] quick_xml::Error),
    #[error("XML attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("XML encoding error: {0}")]
    Encoding(#[from] quick_xml::encoding::EncodingError),
    #[error("malformed XML: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    /// Qualified name as written, e.g. `m:oMath`.
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Concatenated text of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(element: &XmlElement, out: &mut String) {
    for node in &element.children {
        match node {
            XmlNode::Text(text) => out.push_str(text),
            XmlNode::Element(el) => collect_text(el, out),
        }
    }
}

/// Parse a document or fragment with a single root element.
pub fn parse_tree(xml: &str) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut stack = vec![XmlElement::default()];
    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(element(&reader, &e)?),
            Event::Empty(e) => {
                let el = element(&reader, &e)?;
                push_node(&mut stack, XmlNode::Element(el));
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .filter(|_| !stack.is_empty())
                    .ok_or_else(|| XmlError::Malformed("unexpected end tag".to_string()))?;
                push_node(&mut stack, XmlNode::Element(el));
            }
            Event::Text(e) => {
                let text = reader.decoder().decode(&e)?.into_owned();
                push_node(&mut stack, XmlNode::Text(text));
            }
            Event::GeneralRef(e) => {
                let entity = reader.decoder().decode(&e)?.into_owned();
                let text = decode_entity(&entity)
                    .ok_or_else(|| XmlError::Malformed(format!("unknown entity &{entity};")))?;
                push_node(&mut stack, XmlNode::Text(text));
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                push_node(&mut stack, XmlNode::Text(text));
            }
            Event::Eof => break,
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }

    if stack.len() != 1 {
        return Err(XmlError::Malformed("unclosed element".to_string()));
    }
    stack
        .pop()
        .and_then(|document| document.elements().next().cloned())
        .ok_or_else(|| XmlError::Malformed("no root element".to_string()))
}

/// Check that `xml` is well formed: balanced tags, valid attributes, known
/// entities and exactly one root element.
pub fn check_well_formed(xml: &str) -> Result<(), XmlError> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
                for attr in e.attributes() {
                    attr?;
                }
            }
            Event::Empty(e) => {
                if depth == 0 {
                    roots += 1;
                }
                for attr in e.attributes() {
                    attr?;
                }
            }
            Event::End(_) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| XmlError::Malformed("unexpected end tag".to_string()))?;
            }
            Event::GeneralRef(e) => {
                let entity = reader.decoder().decode(&e)?.into_owned();
                if decode_entity(&entity).is_none() {
                    return Err(XmlError::Malformed(format!("unknown entity &{entity};")));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (depth, roots) {
        (0, 1) => Ok(()),
        (0, n) => Err(XmlError::Malformed(format!("expected one root element, found {n}"))),
        _ => Err(XmlError::Malformed("unclosed element".to_string())),
    }
}

fn element(reader: &Reader<&[u8]>, e: &BytesStart) -> Result<XmlElement, XmlError> {
    let name = reader.decoder().decode(e.name().as_ref())?.into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = reader.decoder().decode(attr.key.as_ref())?.into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok(XmlElement {
        name,
        attrs,
        children: Vec::new(),
    })
}

fn push_node(stack: &mut [XmlElement], node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        match (parent.children.last_mut(), node) {
            (Some(XmlNode::Text(prev)), XmlNode::Text(text)) => prev.push_str(&text),
            (_, node) => parent.children.push(node),
        }
    }
}

/// Decode an entity reference name (without `&` and `;`).
fn decode_entity(entity: &str) -> Option<String> {
    match entity {
        "lt" => Some("<".to_string()),
        "gt" => Some(">".to_string()),
        "amp" => Some("&".to_string()),
        "apos" => Some("'".to_string()),
        "quot" => Some("\"".to_string()),
        s if s.starts_with("#x") || s.starts_with("#X") => u32::from_str_radix(&s[2..], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from),
        s if s.starts_with('#') => s[1..]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from),
        _ => None,
    }
}
