//! Minimal XML element tree for XMPP stanzas.
//!
//! Only what the bridge needs: build stanzas with a small builder, look up
//! children and attributes of received ones, and serialize back to text.
//! Namespaces are plain `xmlns` attributes; children that inherit their
//! parent's namespace simply carry none.

use std::fmt;

use quick_xml::escape::escape;

/// XML namespaces used on the wire.
pub mod ns {
    pub const CLIENT: &str = "jabber:client";
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    pub const PING: &str = "urn:xmpp:ping";
    pub const REGISTER: &str = "jabber:iq:register";
    pub const MUC: &str = "http://jabber.org/protocol/muc";
    pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
    pub const MUC_OWNER: &str = "http://jabber.org/protocol/muc#owner";
    pub const MUC_ROOMCONFIG: &str = "http://jabber.org/protocol/muc#roomconfig";
    pub const DATA_FORMS: &str = "jabber:x:data";
}

/// Opening tag of a client stream toward `domain`. Never closed by itself.
pub fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' version='1.0' xmlns='{}' xmlns:stream='{}'>",
        escape(domain),
        ns::CLIENT,
        ns::STREAM
    )
}

pub const STREAM_FOOTER: &str = "</stream:stream>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // Builder
    // ════════════════════════════════════════════════════════════════════

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn ns(self, namespace: &str) -> Self {
        self.attr("xmlns", namespace)
    }

    pub fn child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        match self.children.last_mut() {
            Some(Node::Text(existing)) => existing.push_str(&text),
            _ => self.children.push(Node::Text(text)),
        }
    }

    // ════════════════════════════════════════════════════════════════════
    // Accessors
    // ════════════════════════════════════════════════════════════════════

    /// Qualified name as written, e.g. `stream:features`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without its prefix.
    pub fn local_name(&self) -> &str {
        self.name
            .split_once(':')
            .map(|(_, local)| local)
            .unwrap_or(&self.name)
    }

    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Namespace declared on this element, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.get_attr("xmlns")
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// First child with the given local name and, when given, namespace.
    pub fn get_child(&self, name: &str, namespace: Option<&str>) -> Option<&Element> {
        self.children().find(|child| {
            child.local_name() == name
                && namespace.map_or(true, |ns| child.namespace() == Some(ns))
        })
    }

    pub fn has_child(&self, name: &str, namespace: Option<&str>) -> bool {
        self.get_child(name, namespace).is_some()
    }

    /// Concatenated direct text content.
    pub fn text_content(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Serializes the element and its subtree.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("='");
            out.push_str(&escape(value.as_str()));
            out.push('\'');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                Node::Element(child) => child.write_into(out),
                Node::Text(text) => out.push_str(&escape(text.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

/// Defined condition of a stanza error, e.g. `item-not-found`.
pub fn error_condition(stanza: &Element) -> String {
    stanza
        .get_child("error", None)
        .and_then(|error| error.children().find(|c| c.local_name() != "text"))
        .map(|condition| condition.local_name().to_string())
        .unwrap_or_else(|| "undefined-condition".to_string())
}

/// MUC status codes carried by a presence, e.g. 110 (self) or 201 (created).
pub fn muc_status_codes(presence: &Element) -> Vec<u16> {
    presence
        .get_child("x", Some(ns::MUC_USER))
        .map(|x| {
            x.children()
                .filter(|c| c.local_name() == "status")
                .filter_map(|c| c.get_attr("code"))
                .filter_map(|code| code.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// A `jabber:x:data` text field with a single value.
pub fn form_field(var: &str, value: impl Into<String>) -> Element {
    Element::new("field")
        .attr("var", var)
        .child(Element::new("value").text(value))
}
