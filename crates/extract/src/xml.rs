use crate::{ParseError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Minimal owned element tree shared by the Draw.io and SVG readers
#[derive(Debug, Clone, Default)]
pub(crate) struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attr(key).and_then(parse_number)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Depth-first pre-order walk over this element and its descendants
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element, &[&'a Element])) {
        let mut ancestors = Vec::new();
        walk_inner(self, &mut ancestors, visit);
    }
}

fn walk_inner<'a>(
    element: &'a Element,
    ancestors: &mut Vec<&'a Element>,
    visit: &mut impl FnMut(&'a Element, &[&'a Element]),
) {
    visit(element, ancestors);
    ancestors.push(element);
    for child in &element.children {
        walk_inner(child, ancestors, visit);
    }
    ancestors.pop();
}

/// Parses a leading float, tolerating unit suffixes such as `12px`.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let end = raw
        .char_indices()
        .find(|(i, c)| {
            let sign = (*c == '-' || *c == '+') && *i == 0;
            !(c.is_ascii_digit() || *c == '.' || sign)
        })
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    raw[..end].parse().ok()
}

fn xml_error(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> ParseError {
    ParseError::Xml {
        position: reader.buffer_position() as u64,
        message: err.to_string(),
    }
}

fn open_element(reader: &Reader<&[u8]>, start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| xml_error(reader, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}

/// Parses a whole document into its root element.
pub(crate) fn parse_document(text: &str) -> Result<Element> {
    let mut reader = Reader::from_reader(text.as_bytes());
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|err| xml_error(&reader, err))?;
        match event {
            Event::Start(start) => {
                let element = open_element(&reader, &start)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&reader, &start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => {}
                }
            }
            Event::End(_) => {
                let Some(element) = stack.pop() else {
                    return Err(ParseError::Malformed("unbalanced closing tag".into()));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => {}
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let value = match text.unescape() {
                        Ok(value) => value.into_owned(),
                        Err(_) => String::from_utf8_lossy(&text).into_owned(),
                    };
                    push_text(current, &value);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    push_text(current, &String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ParseError::Malformed(format!(
            "unclosed element <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }
    root.ok_or_else(|| ParseError::Malformed("document has no root element".into()))
}

fn push_text(element: &mut Element, value: &str) {
    if value.trim().is_empty() {
        return;
    }
    if !element.text.is_empty() {
        element.text.push(' ');
    }
    element.text.push_str(value.trim());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builds_tree_with_attributes_and_text() {
        let root = parse_document(r#"<a x="1 &amp; 2"><b/><c>hi <d>there</d></c></a>"#)
            .expect("parse");
        assert_eq!(root.name, "a");
        assert_eq!(root.attr("x"), Some("1 & 2"));
        assert_eq!(root.children.len(), 2);
        let c = &root.children[1];
        assert_eq!(c.text, "hi");
        assert_eq!(c.child("d").map(|d| d.text.as_str()), Some("there"));
    }

    #[test]
    fn unclosed_root_is_malformed() {
        let err = parse_document("<a><b></b>").unwrap_err();
        assert!(matches!(
            err,
            ParseError::Malformed(_) | ParseError::Xml { .. }
        ));
    }

    #[test]
    fn mismatched_tags_are_xml_errors() {
        let err = parse_document("<a><b></a>").unwrap_err();
        assert!(matches!(err, ParseError::Xml { .. }));
    }

    #[test]
    fn numbers_tolerate_units() {
        assert_eq!(parse_number("12px"), Some(12.0));
        assert_eq!(parse_number("-3.5"), Some(-3.5));
        assert_eq!(parse_number("abc"), None);
    }
}
