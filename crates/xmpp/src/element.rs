//! A small owned XML element tree for received stanzas.

use {
    quick_xml::{
        Reader,
        escape::unescape,
        events::{BytesCData, BytesRef, BytesStart, BytesText, Event},
    },
    std::borrow::Cow,
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Local name, namespace prefix stripped.
    pub name: String,
    /// Attributes in document order, keys as written (`xmlns`, `xml:lang`, ...).
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Concatenated character data directly inside this element.
    pub text: String,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The default namespace declared on this element, if any.
    pub fn ns(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    pub fn is(&self, name: &str, ns: &str) -> bool {
        self.name == name && self.ns() == Some(ns)
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// Text of the first child named `name`, trimmed; blank counts as absent.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// Parse a standalone XML document and return its root element.
    pub fn parse(input: &str) -> Result<Element> {
        let mut reader = Reader::from_str(input);
        let mut builder = TreeBuilder::default();
        loop {
            match reader.read_event()? {
                Event::Start(e) => builder.start(&e)?,
                Event::Empty(e) => {
                    if let Some(root) = builder.empty(&e)? {
                        return Ok(root);
                    }
                },
                Event::End(_) => {
                    if let Some(root) = builder.end()? {
                        return Ok(root);
                    }
                },
                Event::Text(t) => builder.text(&decode_text(&t)?),
                Event::CData(c) => builder.text(&decode_cdata(&c)?),
                Event::GeneralRef(r) => builder.text(&decode_ref(&r)?),
                Event::Eof => return Err(Error::Xml("unexpected end of document".into())),
                _ => {},
            }
        }
    }
}

/// Accumulates parser events into an element, returning it once the
/// outermost element closes.
#[derive(Debug, Default)]
pub(crate) struct TreeBuilder {
    stack: Vec<Element>,
}

impl TreeBuilder {
    pub(crate) fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    pub(crate) fn start(&mut self, e: &BytesStart<'_>) -> Result<()> {
        self.stack.push(element_from_start(e)?);
        Ok(())
    }

    pub(crate) fn empty(&mut self, e: &BytesStart<'_>) -> Result<Option<Element>> {
        let el = element_from_start(e)?;
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(el);
                Ok(None)
            },
            None => Ok(Some(el)),
        }
    }

    pub(crate) fn end(&mut self) -> Result<Option<Element>> {
        let el = self
            .stack
            .pop()
            .ok_or_else(|| Error::Xml("closing tag without an open element".into()))?;
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(el);
                Ok(None)
            },
            None => Ok(Some(el)),
        }
    }

    /// Character data between top-level elements (whitespace keepalives) is
    /// dropped.
    pub(crate) fn text(&mut self, text: &str) {
        if let Some(top) = self.stack.last_mut() {
            top.text.push_str(text);
        }
    }
}

pub(crate) fn element_from_start(e: &BytesStart<'_>) -> Result<Element> {
    let name = utf8(e.local_name().as_ref())?.to_string();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::Xml(e.to_string()))?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let value = unescape(utf8(&attr.value)?)
            .map_err(|e| Error::Xml(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        ..Default::default()
    })
}

pub(crate) fn decode_text<'a>(t: &'a BytesText<'_>) -> Result<Cow<'a, str>> {
    unescape(utf8(t)?).map_err(|e| Error::Xml(e.to_string()))
}

pub(crate) fn decode_cdata<'a>(c: &'a BytesCData<'_>) -> Result<Cow<'a, str>> {
    utf8(c).map(Cow::Borrowed)
}

/// Resolve an entity or character reference (`amp`, `#38`, `#x26`).
pub(crate) fn decode_ref(r: &BytesRef<'_>) -> Result<String> {
    let name = utf8(r)?;
    unescape(&format!("&{name};"))
        .map(Cow::into_owned)
        .map_err(|e| Error::Xml(e.to_string()))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::Xml(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_stanza() {
        let el = Element::parse(
            "<iq type='result' id='disco1' from='example.com'>\
               <query xmlns='http://jabber.org/protocol/disco#items'>\
                 <item jid='conference.example.com' name='Chatrooms'/>\
                 <item jid='pubsub.example.com'/>\
               </query>\
             </iq>",
        )
        .unwrap();
        assert_eq!(el.name, "iq");
        assert_eq!(el.attr("id"), Some("disco1"));
        let query = el.child("query").unwrap();
        assert!(query.is("query", "http://jabber.org/protocol/disco#items"));
        let jids: Vec<_> = query
            .children_named("item")
            .filter_map(|i| i.attr("jid"))
            .collect();
        assert_eq!(jids, ["conference.example.com", "pubsub.example.com"]);
    }

    #[test]
    fn strips_prefix_and_unescapes() {
        let el = Element::parse(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
               <body a='x &amp; y'>1 &lt; 2 &#38; <![CDATA[<raw>]]></body>\
             </stream:features>",
        )
        .unwrap();
        assert_eq!(el.name, "features");
        let body = el.child("body").unwrap();
        assert_eq!(body.attr("a"), Some("x & y"));
        assert_eq!(body.text, "1 < 2 & <raw>");
    }

    #[test]
    fn child_text_treats_blank_as_absent() {
        let el = Element::parse("<r><a>  v </a><b>   </b><c/></r>").unwrap();
        assert_eq!(el.child_text("a"), Some("v"));
        assert_eq!(el.child_text("b"), None);
        assert_eq!(el.child_text("c"), None);
        assert_eq!(el.child_text("missing"), None);
    }

    #[test]
    fn truncated_document_is_an_error() {
        assert!(Element::parse("<r><a>").is_err());
        assert!(Element::parse("").is_err());
    }
}
