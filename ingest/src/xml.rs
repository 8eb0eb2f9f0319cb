use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};

use crate::error::{IngestError, Result};

/// A start (or empty) tag with its decoded attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, or an empty string when absent.
    pub fn attr_or_empty(&self, key: &str) -> String {
        self.attr(key).unwrap_or_default().to_string()
    }
}

/// One owned token of the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlNode {
    Start(Element),
    Empty(Element),
    End(String),
    Text(String),
    Eof,
}

/// Forward-only pull cursor over an XML document.
///
/// Text arrives in pieces (entity references are separate tokens), so
/// callers that want an element's value use [`XmlCursor::read_text`].
pub struct XmlCursor<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

impl XmlCursor<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> XmlCursor<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(false);
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next token; declarations, comments and processing instructions are skipped.
    pub fn next_node(&mut self) -> Result<XmlNode> {
        loop {
            self.buf.clear();
            let node = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => XmlNode::Start(element(&e)?),
                Event::Empty(e) => XmlNode::Empty(element(&e)?),
                Event::End(e) => XmlNode::End(String::from_utf8_lossy(e.name().as_ref()).into_owned()),
                Event::Text(e) => XmlNode::Text(e.xml_content().map_err(quick_xml::Error::from)?.into_owned()),
                Event::CData(e) => XmlNode::Text(e.xml_content().map_err(quick_xml::Error::from)?.into_owned()),
                Event::GeneralRef(e) => XmlNode::Text(resolve_reference(&e)?),
                Event::Eof => XmlNode::Eof,
                _ => continue,
            };
            return Ok(node);
        }
    }

    /// Next start, empty or end tag, skipping text.
    pub fn next_tag(&mut self) -> Result<XmlNode> {
        loop {
            match self.next_node()? {
                XmlNode::Text(_) => continue,
                node => return Ok(node),
            }
        }
    }

    /// Trimmed text content of the element `name` whose start tag was just
    /// consumed, including text of nested elements. Leaves the cursor after
    /// the matching end tag.
    pub fn read_text(&mut self, name: &str) -> Result<String> {
        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            match self.next_node()? {
                XmlNode::Text(t) => text.push_str(&t),
                XmlNode::Start(e) if e.name == name => depth += 1,
                XmlNode::End(end) if end == name => {
                    if depth == 0 {
                        return Ok(text.trim().to_string());
                    }
                    depth -= 1;
                }
                XmlNode::Eof => {
                    return Err(IngestError::Malformed(format!(
                        "document ended inside <{name}>"
                    )));
                }
                _ => {}
            }
        }
    }

    /// Text of `node` when it is a start tag, empty for an empty tag.
    pub fn value_of(&mut self, node: &XmlNode) -> Result<String> {
        match node {
            XmlNode::Start(e) => self.read_text(&e.name),
            _ => Ok(String::new()),
        }
    }

    /// Value held by the next element in document order, used by formats
    /// that put a label in one cell and its value in the following one.
    pub fn read_next_value(&mut self, label: &str) -> Result<String> {
        loop {
            let node = self.next_tag()?;
            match node {
                XmlNode::Start(_) | XmlNode::Empty(_) => return self.value_of(&node),
                XmlNode::Eof => {
                    return Err(IngestError::Malformed(format!("no value follows <{label}>")));
                }
                _ => {}
            }
        }
    }
}

fn element(start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element { name, attributes })
}

/// Resolve `&amp;`, `&#x41;` and friends. Unknown named entities (HTML
/// leftovers such as `&nbsp;`) are kept verbatim.
fn resolve_reference(reference: &BytesRef<'_>) -> Result<String> {
    if let Some(c) = reference.resolve_char_ref()? {
        return Ok(c.to_string());
    }
    let name = reference.decode().map_err(quick_xml::Error::from)?;
    Ok(match resolve_predefined_entity(&name) {
        Some(resolved) => resolved.to_string(),
        None => format!("&{name};"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(xml: &str) -> XmlCursor<&[u8]> {
        XmlCursor::new(xml.as_bytes())
    }

    #[test]
    fn test_read_text_joins_entities() {
        let mut c = cursor("<a>x &gt; y &amp;&#65;</a>");
        assert!(matches!(c.next_node().unwrap(), XmlNode::Start(e) if e.name == "a"));
        assert_eq!(c.read_text("a").unwrap(), "x > y &A");
        assert_eq!(c.next_node().unwrap(), XmlNode::Eof);
    }

    #[test]
    fn test_read_text_includes_nested_elements() {
        let mut c = cursor("<td><b>web</b>01</td><next/>");
        c.next_node().unwrap();
        assert_eq!(c.read_text("td").unwrap(), "web01");
        assert!(matches!(c.next_tag().unwrap(), XmlNode::Empty(e) if e.name == "next"));
    }

    #[test]
    fn test_attributes_are_unescaped() {
        let mut c = cursor(r#"<tag name="a&amp;b" empty=""/>"#);
        let XmlNode::Empty(e) = c.next_node().unwrap() else {
            panic!("expected empty tag");
        };
        assert_eq!(e.attr("name"), Some("a&b"));
        assert_eq!(e.attr("empty"), Some(""));
        assert_eq!(e.attr("missing"), None);
    }

    #[test]
    fn test_read_next_value_skips_label_text() {
        let mut c = cursor("<tr><td>Machine</td><td> host01 </td></tr>");
        c.next_tag().unwrap();
        let label = c.next_tag().unwrap();
        assert_eq!(c.value_of(&label).unwrap(), "Machine");
        assert_eq!(c.read_next_value("Machine").unwrap(), "host01");
    }

    #[test]
    fn test_unterminated_element_is_malformed() {
        let mut c = cursor("<a>text");
        c.next_node().unwrap();
        assert!(c.read_text("a").is_err());
    }

    #[test]
    fn test_unknown_entity_kept_verbatim() {
        let mut c = cursor("<p>a&nbsp;b</p>");
        c.next_node().unwrap();
        assert_eq!(c.read_text("p").unwrap(), "a&nbsp;b");
    }
}
