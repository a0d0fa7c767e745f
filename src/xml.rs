//! Owned XML tree used to edit package parts in place.
//!
//! Parts are parsed with `quick-xml` into an [`XmlDocument`], mutated through
//! [`Element`], and written back with `quick_xml::Writer`. Text content is kept
//! in its escaped form so that entity references survive a round trip untouched;
//! attribute values are stored unescaped and escaped again on write, with tab,
//! carriage return and line feed written as character references.

use crate::error::{Error, Result};
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeSet, HashMap};

/// A namespace binding: `None` prefix is the default namespace.
pub type NamespaceBinding = (Option<String>, String);

/// XML declaration fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub version: String,
    pub standalone: Option<String>,
}

impl Default for Declaration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            standalone: Some("yes".to_string()),
        }
    }
}

/// A node inside an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Escaped character data.
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    DocType(String),
}

impl Node {
    /// Build a text node from unescaped content.
    pub fn text(content: &str) -> Self {
        Node::Text(escape(content).into_owned())
    }
}

/// An element with its attributes and children in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written, e.g. `x14:dataValidation`.
    pub name: String,
    /// Attributes in document order, values unescaped.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

/// A parsed XML part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub declaration: Option<Declaration>,
    /// Comments, processing instructions and doctype before the root.
    pub prolog: Vec<Node>,
    pub root: Element,
    /// Comments and processing instructions after the root.
    pub epilog: Vec<Node>,
}

/// An element found by [`Element::collect_outermost`].
#[derive(Debug, Clone)]
pub struct ScopedMatch {
    /// Local name of the matched element's parent.
    pub parent: String,
    /// How many elements named like the parent precede it in document order,
    /// not counting anything inside a match.
    pub parent_occurrence: usize,
    pub element: Element,
    /// Namespace bindings in scope at the matched element, outermost first.
    pub namespaces: Vec<NamespaceBinding>,
}

/// Local part of a qualified name.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn name_prefix(name: &str) -> Option<&str> {
    name.split_once(':').map(|(prefix, _)| prefix)
}

fn lookup<'a>(scope: &'a [NamespaceBinding], prefix: Option<&str>) -> Option<&'a str> {
    scope
        .iter()
        .rev()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.as_str())
}

impl Element {
    /// Create an element with no attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn prefix(&self) -> Option<&str> {
        name_prefix(&self.name)
    }

    /// Get an attribute by its qualified name.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(idx).1)
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, content: &str) {
        self.children = vec![Node::text(content)];
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First direct child with the given local name.
    pub fn find_child(&self, local: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.local_name() == local)
    }

    pub fn find_child_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.child_elements_mut().find(|e| e.local_name() == local)
    }

    /// First descendant (document order, excluding `self`) with the given local name.
    pub fn find_descendant(&self, local: &str) -> Option<&Element> {
        for child in self.child_elements() {
            if child.local_name() == local {
                return Some(child);
            }
            if let Some(found) = child.find_descendant(local) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_descendant_mut(&mut self, local: &str) -> Option<&mut Element> {
        let path = self.path_to_descendant(local)?;
        self.at_path_mut(&path)
    }

    /// Child indices leading to the first descendant named `local`.
    pub fn path_to_descendant(&self, local: &str) -> Option<Vec<usize>> {
        for (idx, node) in self.children.iter().enumerate() {
            let Node::Element(child) = node else {
                continue;
            };
            if child.local_name() == local {
                return Some(vec![idx]);
            }
            if let Some(mut rest) = child.path_to_descendant(local) {
                rest.insert(0, idx);
                return Some(rest);
            }
        }
        None
    }

    /// Child indices leading to descendant number `n` (0-based, document order)
    /// named `local`, without looking inside elements named `skip`.
    pub fn path_to_nth_descendant(&self, local: &str, n: usize, skip: &str) -> Option<Vec<usize>> {
        let mut remaining = n;
        self.nth_path(local, &mut remaining, skip)
    }

    fn nth_path(&self, local: &str, remaining: &mut usize, skip: &str) -> Option<Vec<usize>> {
        for (idx, node) in self.children.iter().enumerate() {
            let Node::Element(child) = node else {
                continue;
            };
            if child.local_name() == local {
                if *remaining == 0 {
                    return Some(vec![idx]);
                }
                *remaining -= 1;
            }
            if child.local_name() == skip {
                continue;
            }
            if let Some(mut rest) = child.nth_path(local, remaining, skip) {
                rest.insert(0, idx);
                return Some(rest);
            }
        }
        None
    }

    /// Element reached by following child indices; the empty path is `self`.
    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let Some((&first, rest)) = path.split_first() else {
            return Some(self);
        };
        match self.children.get_mut(first) {
            Some(Node::Element(child)) => child.at_path_mut(rest),
            _ => None,
        }
    }

    /// Remove every direct child with the given local name, returning how many went.
    pub fn remove_children(&mut self, local: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|n| !matches!(n, Node::Element(e) if e.local_name() == local));
        before - self.children.len()
    }

    pub fn append(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Insert `child` before the first direct child whose local name is in
    /// `followers`, or append it when there is none. Returns the index used.
    pub fn insert_before_first_of(&mut self, child: Element, followers: &[&str]) -> usize {
        let idx = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if followers.contains(&e.local_name())))
            .unwrap_or(self.children.len());
        self.children.insert(idx, Node::Element(child));
        idx
    }

    /// Namespace declarations made on this element.
    pub fn namespace_declarations(&self) -> Vec<NamespaceBinding> {
        self.attributes
            .iter()
            .filter_map(|(k, v)| {
                if k == "xmlns" {
                    Some((None, v.clone()))
                } else {
                    k.strip_prefix("xmlns:")
                        .map(|prefix| (Some(prefix.to_string()), v.clone()))
                }
            })
            .collect()
    }

    /// Prefix bound to `uri` on this element, if any (`Some(None)` for the default namespace).
    pub fn namespace_prefix_for(&self, uri: &str) -> Option<Option<String>> {
        self.namespace_declarations()
            .into_iter()
            .find(|(_, bound)| bound == uri)
            .map(|(prefix, _)| prefix)
    }

    /// Declare `prefix` (or the default namespace for `None`) on this element.
    pub fn declare_namespace(&mut self, prefix: Option<&str>, uri: &str) {
        let key = match prefix {
            Some(p) => format!("xmlns:{p}"),
            None => "xmlns".to_string(),
        };
        self.set_attribute(key, uri);
    }

    /// Prefixes used by element and attribute names in this subtree.
    /// `None` stands for unprefixed element names (the default namespace).
    pub fn used_prefixes(&self) -> BTreeSet<Option<String>> {
        let mut out = BTreeSet::new();
        self.collect_used_prefixes(&mut out);
        out
    }

    fn collect_used_prefixes(&self, out: &mut BTreeSet<Option<String>>) {
        out.insert(self.prefix().map(str::to_string));
        for (key, _) in &self.attributes {
            if let Some(prefix) = name_prefix(key) {
                if prefix != "xmlns" && prefix != "xml" {
                    out.insert(Some(prefix.to_string()));
                }
            }
        }
        for child in self.child_elements() {
            child.collect_used_prefixes(out);
        }
    }

    fn collect_declared_prefixes(&self, out: &mut BTreeSet<Option<String>>) {
        out.extend(self.namespace_declarations().into_iter().map(|(p, _)| p));
        for child in self.child_elements() {
            child.collect_declared_prefixes(out);
        }
    }

    /// Make this detached fragment self-sufficient: declare on it every namespace it
    /// uses that `source_scope` binds and `destination_scope` does not bind the same way.
    pub fn carry_namespaces(
        &mut self,
        source_scope: &[NamespaceBinding],
        destination_scope: &[NamespaceBinding],
    ) -> usize {
        let mut declared = BTreeSet::new();
        self.collect_declared_prefixes(&mut declared);

        let mut added = 0;
        for prefix in self.used_prefixes() {
            if declared.contains(&prefix) {
                continue;
            }
            let Some(uri) = lookup(source_scope, prefix.as_deref()) else {
                continue;
            };
            if lookup(destination_scope, prefix.as_deref()) != Some(uri) {
                let uri = uri.to_string();
                self.declare_namespace(prefix.as_deref(), &uri);
                added += 1;
            }
        }
        added
    }

    /// Collect every `local` element that is not nested inside another match,
    /// together with its parent's local name and the namespaces in scope.
    pub fn collect_outermost(&self, local: &str) -> Vec<ScopedMatch> {
        let mut out = Vec::new();
        let mut scope = self.namespace_declarations();
        let mut seen = HashMap::new();
        self.collect_outermost_into(local, 0, &mut seen, &mut scope, &mut out);
        out
    }

    fn collect_outermost_into(
        &self,
        local: &str,
        occurrence: usize,
        seen: &mut HashMap<String, usize>,
        scope: &mut Vec<NamespaceBinding>,
        out: &mut Vec<ScopedMatch>,
    ) {
        for child in self.child_elements() {
            let count = seen.entry(child.local_name().to_string()).or_insert(0);
            let child_occurrence = *count;
            *count += 1;

            let declared = child.namespace_declarations();
            let depth = scope.len();
            scope.extend(declared);
            if child.local_name() == local {
                out.push(ScopedMatch {
                    parent: self.local_name().to_string(),
                    parent_occurrence: occurrence,
                    element: child.clone(),
                    namespaces: scope.clone(),
                });
            } else {
                child.collect_outermost_into(local, child_occurrence, seen, scope, out);
            }
            scope.truncate(depth);
        }
    }

    fn write_to<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            let escaped = escape_attribute(value);
            start.push_attribute((key.as_bytes(), escaped.as_bytes()));
        }

        if self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        for child in &self.children {
            write_node(child, writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

fn write_node<W: std::io::Write>(node: &Node, writer: &mut Writer<W>) -> Result<()> {
    match node {
        Node::Element(e) => e.write_to(writer)?,
        Node::Text(t) => writer.write_event(Event::Text(BytesText::from_escaped(t.as_str())))?,
        Node::CData(t) => writer.write_event(Event::CData(BytesCData::new(t.as_str())))?,
        Node::Comment(t) => {
            writer.write_event(Event::Comment(BytesText::from_escaped(t.as_str())))?
        }
        Node::ProcessingInstruction(t) => {
            writer.write_event(Event::PI(BytesPI::new(t.as_str())))?
        }
        Node::DocType(t) => {
            writer.write_event(Event::DocType(BytesText::from_escaped(t.as_str())))?
        }
    }
    Ok(())
}

fn utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| Error::XmlParse(e.to_string()))
}

/// Attribute value as a conforming parser reports it: literal whitespace
/// becomes a space, character references keep their character.
fn attribute_value(raw: &str) -> Result<String> {
    let normalized = raw.replace("\r\n", " ").replace(['\t', '\n', '\r'], " ");
    unescape(&normalized)
        .map(|value| value.into_owned())
        .map_err(|e| Error::XmlParse(e.to_string()))
}

fn escape_attribute(value: &str) -> String {
    escape(value)
        .replace('\t', "&#9;")
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element::new(utf8(start.name().as_ref())?);
    for attr in start.attributes() {
        let attr = attr?;
        let key = utf8(attr.key.as_ref())?;
        let value = attribute_value(&utf8(&attr.value)?)?;
        element.attributes.push((key, value));
    }
    Ok(element)
}

impl XmlDocument {
    /// Create a document around a root element with a standard declaration.
    pub fn new(root: Element) -> Self {
        Self {
            declaration: Some(Declaration::default()),
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        }
    }

    /// Parse a part. `part_name` is only used for error messages.
    pub fn parse(bytes: &[u8], part_name: &str) -> Result<Self> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);

        let mut declaration = None;
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut buf = Vec::new();

        let err = |e: &dyn std::fmt::Display| Error::XmlParse(format!("{part_name}: {e}"));

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| err(&e))?;
            let node = match event {
                Event::Decl(d) => {
                    let version = d.version().map_err(|e| err(&e))?;
                    let standalone = match d.standalone() {
                        Some(s) => Some(utf8(&s.map_err(|e| err(&e))?)?),
                        None => None,
                    };
                    declaration = Some(Declaration {
                        version: utf8(&version)?,
                        standalone,
                    });
                    None
                }
                Event::Start(e) => {
                    stack.push(element_from_start(&e).map_err(|e| err(&e))?);
                    None
                }
                Event::Empty(e) => Some(Node::Element(element_from_start(&e).map_err(|e| err(&e))?)),
                Event::End(_) => {
                    let finished = stack
                        .pop()
                        .ok_or_else(|| err(&"unexpected closing tag"))?;
                    Some(Node::Element(finished))
                }
                Event::Text(t) => Some(Node::Text(utf8(&t)?)),
                Event::CData(t) => Some(Node::CData(utf8(&t)?)),
                Event::Comment(t) => Some(Node::Comment(utf8(&t)?)),
                Event::PI(t) => Some(Node::ProcessingInstruction(utf8(&t)?)),
                Event::DocType(t) => Some(Node::DocType(utf8(&t)?)),
                Event::Eof => break,
            };

            if let Some(node) = node {
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => match node {
                        Node::Element(e) if root.is_none() => root = Some(e),
                        Node::Element(_) => return Err(err(&"multiple root elements")),
                        Node::Text(t) if t.trim().is_empty() => {}
                        Node::Text(_) | Node::CData(_) => {
                            return Err(err(&"character data outside the root element"))
                        }
                        other if root.is_none() => prolog.push(other),
                        other => epilog.push(other),
                    },
                }
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(err(&"unclosed element at end of document"));
        }
        let root = root.ok_or_else(|| err(&"no root element"))?;

        Ok(Self {
            declaration,
            prolog,
            root,
            epilog,
        })
    }

    /// Serialize as UTF-8.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        if let Some(decl) = &self.declaration {
            writer.write_event(Event::Decl(BytesDecl::new(
                &decl.version,
                Some("UTF-8"),
                decl.standalone.as_deref(),
            )))?;
            writer.get_mut().push(b'\n');
        }
        for node in &self.prolog {
            write_node(node, &mut writer)?;
        }
        self.root.write_to(&mut writer)?;
        for node in &self.epilog {
            write_node(node, &mut writer)?;
        }
        Ok(writer.into_inner())
    }
}
